//! MIDI input units.

use strand_core::{AllocContext, Args, Event, MIDI_SYMBOL, Unit, UnitContext, UnitError, VarId};

/// Turns incoming note messages into `note`/`velocity` control outputs.
///
/// Note-offs emit velocity 0 for the released note. Arg `channel` (-1 = omni)
/// filters by MIDI channel.
pub struct MidiNotes {
    note: VarId,
    velocity: VarId,
    channel: Option<u8>,
}

impl Unit for MidiNotes {
    fn recv(&mut self, ctx: &mut UnitContext<'_>, event: &Event<'_>) -> Result<(), UnitError> {
        for msg in event.midi() {
            if self.channel.is_some_and(|ch| ch != msg.channel()) {
                continue;
            }
            if msg.is_note_on() {
                ctx.set(self.note, i32::from(msg.d0))?;
                ctx.set(self.velocity, i32::from(msg.d1))?;
            } else if msg.is_note_off() {
                ctx.set(self.note, i32::from(msg.d0))?;
                ctx.set(self.velocity, 0_i32)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn midi_notes(
    ctx: &mut AllocContext<'_>,
    args: &Args,
) -> Result<Box<dyn Unit>, UnitError> {
    let channel = match args.i32_or("channel", -1)? {
        -1 => None,
        ch @ 0..=15 => Some(ch as u8),
        other => {
            return Err(UnitError::InvalidArg {
                name: "channel".into(),
                reason: format!("{other} is not a MIDI channel (0-15, or -1 for omni)"),
            });
        }
    };
    let note = ctx.output("note", 0_i32)?;
    let velocity = ctx.output("velocity", 0_i32)?;
    ctx.disable_exec();
    ctx.subscribe(MIDI_SYMBOL);
    Ok(Box::new(MidiNotes {
        note,
        velocity,
        channel,
    }))
}
