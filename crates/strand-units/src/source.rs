//! Signal sources.

use core::f32::consts::TAU;

use strand_core::{AllocContext, Args, Unit, UnitContext, UnitError, VarId};

/// Sine oscillator.
///
/// Variables: `freq` (in, Float, Hz), `gain` (in, Float), `out` (out, Audio).
/// Args: `freq` (440), `gain` (0.5), `channels` (1), `phase` (0, in cycles).
pub struct Sine {
    freq: VarId,
    gain: VarId,
    out: VarId,
    initial_phase: f32,
    phase: f32,
}

impl Unit for Sine {
    fn exec(&mut self, ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        let inc = ctx.get_f32(self.freq)? / ctx.sample_rate();
        let gain = ctx.get_f32(self.gain)?;
        let out = ctx.audio_out(self.out)?;
        let start = self.phase;
        for ch in 0..out.channels() {
            let mut phase = start;
            for s in out.channel_mut(ch) {
                *s = libm::sinf(TAU * phase) * gain;
                phase += inc;
                phase -= libm::floorf(phase);
            }
            self.phase = phase;
        }
        Ok(())
    }

    fn reset(&mut self, _ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        self.phase = self.initial_phase;
        Ok(())
    }
}

pub(crate) fn sine(ctx: &mut AllocContext<'_>, args: &Args) -> Result<Box<dyn Unit>, UnitError> {
    let channels = args.u32_or("channels", 1)?;
    if channels == 0 {
        return Err(UnitError::InvalidArg {
            name: "channels".into(),
            reason: "must be at least 1".into(),
        });
    }
    let freq = ctx.input("freq", args.f32_or("freq", 440.0)?)?;
    let gain = ctx.input("gain", args.f32_or("gain", 0.5)?)?;
    let out = ctx.audio_output("out", channels as usize)?;
    let phase = args.f32_or("phase", 0.0)?.rem_euclid(1.0);
    Ok(Box::new(Sine {
        freq,
        gain,
        out,
        initial_phase: phase,
        phase,
    }))
}
