//! Small units shared by the crate's unit tests.

use std::cell::Cell;
use std::sync::Arc;

use crate::event::{Event, Payload};
use crate::registry::{ClassCategory, ClassDescriptor, ClassRegistry};
use crate::unit::{AllocContext, Args, Unit, UnitContext, UnitError};
use crate::var::VarId;

thread_local! {
    static SEQ: Cell<u32> = const { Cell::new(0) };
}

fn next_seq() -> u32 {
    SEQ.with(|s| {
        let n = s.get() + 1;
        s.set(n);
        n
    })
}

/// Writes `freq` into every sample of `out` and into `level`.
pub struct Osc {
    freq: VarId,
    out: VarId,
    level: VarId,
}

impl Unit for Osc {
    fn exec(&mut self, ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        let freq = ctx.get_f32(self.freq)?;
        ctx.audio_out(self.out)?.channel_mut(0).fill(freq);
        ctx.set(self.level, freq)
    }
}

fn osc(ctx: &mut AllocContext<'_>, args: &Args) -> Result<Box<dyn Unit>, UnitError> {
    let freq = ctx.input("freq", args.f32_or("freq", 1.0)?)?;
    let out = ctx.audio_output("out", 1)?;
    let level = ctx.output("level", 0.0_f32)?;
    Ok(Box::new(Osc { freq, out, level }))
}

/// Copies `in` to `out` scaled by `gain`.
pub struct Amp {
    input: VarId,
    gain: VarId,
    out: VarId,
}

impl Unit for Amp {
    fn exec(&mut self, ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        let gain = ctx.get_f32(self.gain)?;
        let (src, dst) = ctx.audio_io(self.input, self.out)?;
        dst.copy_from(src);
        dst.scale(gain);
        Ok(())
    }
}

fn amp(ctx: &mut AllocContext<'_>, _: &Args) -> Result<Box<dyn Unit>, UnitError> {
    let input = ctx.audio_input("in")?;
    let gain = ctx.input("gain", 1.0_f32)?;
    let out = ctx.audio_output("out", 1)?;
    Ok(Box::new(Amp { input, gain, out }))
}

/// Records what it receives into its own output variables.
pub struct Recorder {
    x: VarId,
    y: VarId,
    count: VarId,
    stamp: VarId,
    midi: VarId,
    resets: VarId,
    saved: VarId,
    cleared: VarId,
}

impl Unit for Recorder {
    fn recv(&mut self, ctx: &mut UnitContext<'_>, event: &Event<'_>) -> Result<(), UnitError> {
        match event.payload {
            Payload::Value(v) if event.dst_var == Some(self.x) => {
                let count = ctx.get_u32(self.count)?;
                ctx.set(self.count, count + 1)?;
                ctx.set(self.stamp, next_seq())?;
                ctx.set(self.y, v.clone())?;
            }
            Payload::Midi(msgs) => {
                let seen = ctx.get_u32(self.midi)?;
                ctx.set(self.midi, seen + msgs.len() as u32)?;
            }
            Payload::Symbol(_) => {
                let resets = ctx.get_u32(self.resets)?;
                ctx.set(self.resets, resets + 1)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn reset(&mut self, ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        ctx.set(self.cleared, true)
    }

    fn store(&mut self, ctx: &mut UnitContext<'_>, save: bool) -> Result<(), UnitError> {
        ctx.set(self.saved, save)
    }
}

fn recorder(ctx: &mut AllocContext<'_>, _: &Args) -> Result<Box<dyn Unit>, UnitError> {
    let x = ctx.input("x", 0.0_f64)?;
    let y = ctx.output("y", 0.0_f64)?;
    let count = ctx.output("count", 0_u32)?;
    let stamp = ctx.output("stamp", 0_u32)?;
    let midi = ctx.output("midi", 0_u32)?;
    let resets = ctx.output("resets", 0_u32)?;
    let saved = ctx.output("saved", false)?;
    let cleared = ctx.output("cleared", false)?;
    ctx.disable_exec();
    ctx.subscribe(crate::symbol::MIDI_SYMBOL);
    ctx.subscribe(crate::symbol::RESET_SYMBOL);
    Ok(Box::new(Recorder {
        x,
        y,
        count,
        stamp,
        midi,
        resets,
        saved,
        cleared,
    }))
}

/// Writes `1.0, 2.0, ..` into `out`, `writes` times per cycle.
pub struct Burst {
    out: VarId,
    writes: u32,
}

impl Unit for Burst {
    fn exec(&mut self, ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        for n in 1..=self.writes {
            ctx.set(self.out, f64::from(n))?;
        }
        Ok(())
    }
}

fn burst(ctx: &mut AllocContext<'_>, args: &Args) -> Result<Box<dyn Unit>, UnitError> {
    let out = ctx.output("out", 0.0_f64)?;
    let writes = args.u32_or("writes", 2)?;
    Ok(Box::new(Burst { out, writes }))
}

/// Fails on demand.
pub struct Faulty {
    fail_exec: bool,
    fail_reset: bool,
}

impl Unit for Faulty {
    fn exec(&mut self, _ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        if self.fail_exec {
            return Err(UnitError::Failed("exec refused".into()));
        }
        Ok(())
    }

    fn reset(&mut self, _ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        if self.fail_reset {
            return Err(UnitError::Failed("reset refused".into()));
        }
        Ok(())
    }
}

fn faulty(_: &mut AllocContext<'_>, args: &Args) -> Result<Box<dyn Unit>, UnitError> {
    Ok(Box::new(Faulty {
        fail_exec: args.bool_or("fail_exec", false)?,
        fail_reset: args.bool_or("fail_reset", false)?,
    }))
}

fn refuse(ctx: &mut AllocContext<'_>, _: &Args) -> Result<Box<dyn Unit>, UnitError> {
    ctx.audio_output("out", 2)?;
    Err(UnitError::InvalidArg {
        name: "any".into(),
        reason: "always refused".into(),
    })
}

/// Registry with every test class.
pub fn registry() -> Arc<ClassRegistry> {
    let mut registry = ClassRegistry::new();
    let classes: [(&'static str, crate::registry::UnitFactory); 6] = [
        ("osc", osc),
        ("amp", amp),
        ("recorder", recorder),
        ("faulty", faulty),
        ("refuse", refuse),
        ("burst", burst),
    ];
    for (label, factory) in classes {
        registry.register(
            ClassDescriptor {
                label,
                description: "test unit",
                category: ClassCategory::Debug,
            },
            factory,
        );
    }
    Arc::new(registry)
}
