//! Audio processors and analyzers.

use strand_core::{AllocContext, Args, Unit, UnitContext, UnitError, VarId};

fn channels_arg(args: &Args) -> Result<usize, UnitError> {
    match args.u32_or("channels", 1)? {
        0 => Err(UnitError::InvalidArg {
            name: "channels".into(),
            reason: "must be at least 1".into(),
        }),
        n => Ok(n as usize),
    }
}

/// Scales its input.
///
/// Variables: `in` (in, Audio), `gain` (in, Float), `out` (out, Audio).
pub struct Gain {
    input: VarId,
    gain: VarId,
    out: VarId,
}

impl Unit for Gain {
    fn exec(&mut self, ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        let gain = ctx.get_f32(self.gain)?;
        let (src, dst) = ctx.audio_io(self.input, self.out)?;
        dst.copy_from(src);
        dst.scale(gain);
        Ok(())
    }
}

pub(crate) fn gain(ctx: &mut AllocContext<'_>, args: &Args) -> Result<Box<dyn Unit>, UnitError> {
    let channels = channels_arg(args)?;
    let input = ctx.audio_input("in")?;
    let gain = ctx.input("gain", args.f32_or("gain", 1.0)?)?;
    let out = ctx.audio_output("out", channels)?;
    Ok(Box::new(Gain { input, gain, out }))
}

/// Two-input mixer.
///
/// Variables: `in0`, `in1` (in, Audio), `gain0`, `gain1` (in, Float),
/// `out` (out, Audio).
pub struct Mixer {
    inputs: [VarId; 2],
    gains: [VarId; 2],
    out: VarId,
}

impl Unit for Mixer {
    fn exec(&mut self, ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        let g0 = ctx.get_f32(self.gains[0])?;
        let g1 = ctx.get_f32(self.gains[1])?;
        let (a, dst) = ctx.audio_io(self.inputs[0], self.out)?;
        dst.copy_from(a);
        dst.scale(g0);
        let (b, dst) = ctx.audio_io(self.inputs[1], self.out)?;
        dst.accumulate_from(b, g1);
        Ok(())
    }
}

pub(crate) fn mixer(ctx: &mut AllocContext<'_>, args: &Args) -> Result<Box<dyn Unit>, UnitError> {
    let channels = channels_arg(args)?;
    let in0 = ctx.audio_input("in0")?;
    let in1 = ctx.audio_input("in1")?;
    let gain0 = ctx.input("gain0", args.f32_or("gain0", 1.0)?)?;
    let gain1 = ctx.input("gain1", args.f32_or("gain1", 1.0)?)?;
    let out = ctx.audio_output("out", channels)?;
    Ok(Box::new(Mixer {
        inputs: [in0, in1],
        gains: [gain0, gain1],
        out,
    }))
}

/// Emits the RMS level of its input once per cycle.
///
/// Variables: `in` (in, Audio), `rms` (out, Float).
pub struct Meter {
    input: VarId,
    rms: VarId,
}

impl Unit for Meter {
    fn exec(&mut self, ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        let level = ctx.audio(self.input)?.rms();
        ctx.set(self.rms, level)
    }
}

pub(crate) fn meter(ctx: &mut AllocContext<'_>, _: &Args) -> Result<Box<dyn Unit>, UnitError> {
    let input = ctx.audio_input("in")?;
    let rms = ctx.output("rms", 0.0_f32)?;
    Ok(Box::new(Meter { input, rms }))
}
