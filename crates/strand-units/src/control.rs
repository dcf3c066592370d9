//! Control-rate units.

use strand_core::{AllocContext, Args, Event, Payload, RESET_SYMBOL, Unit, UnitContext, UnitError, VarId};

/// Forwards every value it receives on `in` to `out`.
///
/// Never runs in the exec sweep; it only reacts to callbacks, UI messages and
/// network events.
pub struct Number {
    input: VarId,
    out: VarId,
}

impl Unit for Number {
    fn recv(&mut self, ctx: &mut UnitContext<'_>, event: &Event<'_>) -> Result<(), UnitError> {
        if event.dst_var != Some(self.input) {
            return Ok(());
        }
        match event.value() {
            Some(value) => ctx.set(self.out, value.clone()),
            None => Ok(()),
        }
    }
}

pub(crate) fn number(ctx: &mut AllocContext<'_>, args: &Args) -> Result<Box<dyn Unit>, UnitError> {
    let initial = args.f64_or("value", 0.0)?;
    let input = ctx.input("in", initial)?;
    let out = ctx.output("out", initial)?;
    ctx.disable_exec();
    Ok(Box::new(Number { input, out }))
}

/// Emits an incrementing count every `period` cycles.
///
/// Variables: `period` (in, UInt; 0 behaves as 1), `count` (out, UInt).
pub struct Counter {
    period: VarId,
    count: VarId,
    ticks: u32,
}

impl Unit for Counter {
    fn exec(&mut self, ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        let period = ctx.get_u32(self.period)?.max(1);
        self.ticks += 1;
        if self.ticks < period {
            return Ok(());
        }
        self.ticks = 0;
        let count = ctx.get_u32(self.count)?;
        ctx.set(self.count, count.wrapping_add(1))
    }

    fn reset(&mut self, _ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        self.ticks = 0;
        Ok(())
    }
}

pub(crate) fn counter(ctx: &mut AllocContext<'_>, args: &Args) -> Result<Box<dyn Unit>, UnitError> {
    let period = ctx.input("period", args.u32_or("period", 1)?)?;
    let count = ctx.output("count", 0_u32)?;
    Ok(Box::new(Counter {
        period,
        count,
        ticks: 0,
    }))
}

/// Logs and counts the values it receives.
///
/// Variables: `in` (in, Double), `count` (out, UInt), `last` (out, Double).
/// A `_reset` broadcast zeroes the count.
pub struct Probe {
    input: VarId,
    count: VarId,
    last: VarId,
    id: String,
}

impl Unit for Probe {
    fn recv(&mut self, ctx: &mut UnitContext<'_>, event: &Event<'_>) -> Result<(), UnitError> {
        match event.payload {
            Payload::Value(value) if event.dst_var == Some(self.input) => {
                tracing::info!(probe = %self.id, %value, "probe received");
                let count = ctx.get_u32(self.count)?;
                ctx.set(self.count, count.wrapping_add(1))?;
                ctx.set(self.last, value.clone())
            }
            Payload::Symbol(_) => ctx.set(self.count, 0_u32),
            _ => Ok(()),
        }
    }
}

pub(crate) fn probe(ctx: &mut AllocContext<'_>, args: &Args) -> Result<Box<dyn Unit>, UnitError> {
    let input = ctx.input("in", 0.0_f64)?;
    let count = ctx.output("count", 0_u32)?;
    let last = ctx.output("last", 0.0_f64)?;
    ctx.disable_exec();
    ctx.subscribe(RESET_SYMBOL);
    let id = args.str_or("name", "").to_owned();
    let id = if id.is_empty() {
        ctx.id().to_string()
    } else {
        id
    };
    Ok(Box::new(Probe {
        input,
        count,
        last,
        id,
    }))
}
