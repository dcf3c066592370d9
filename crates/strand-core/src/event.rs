//! Event envelope shared by UI, MIDI, network and internal dispatch.

use crate::graph::InstanceId;
use crate::symbol::SymbolId;
use crate::value::Value;
use crate::var::VarId;

/// Origin and routing flags of an [`Event`].
///
/// Stored as a compact bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventFlags(u8);

impl EventFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Value written from a user interface message.
    pub const UI: Self = Self(1 << 0);
    /// Value delivered by a control-rate callback.
    pub const CALLBACK: Self = Self(1 << 1);
    /// Attribute broadcast (`_midi`, `_reset`, ...).
    pub const BROADCAST: Self = Self(1 << 2);
    /// Value received from another node.
    pub const NETWORK: Self = Self(1 << 3);
    /// Payload carries MIDI messages.
    pub const MIDI: Self = Self(1 << 4);

    /// Returns true if `self` contains all flags in `other`.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Returns the union of two flag sets.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// One short MIDI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiMsg {
    /// Status byte (kind in the high nibble, channel in the low nibble).
    pub status: u8,
    /// First data byte.
    pub d0: u8,
    /// Second data byte.
    pub d1: u8,
}

impl MidiMsg {
    /// Builds a note-on message.
    pub const fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            status: 0x90 | (channel & 0x0f),
            d0: note & 0x7f,
            d1: velocity & 0x7f,
        }
    }

    /// Builds a note-off message.
    pub const fn note_off(channel: u8, note: u8) -> Self {
        Self {
            status: 0x80 | (channel & 0x0f),
            d0: note & 0x7f,
            d1: 0,
        }
    }

    /// MIDI channel, 0-15.
    pub const fn channel(self) -> u8 {
        self.status & 0x0f
    }

    /// True for note-on with non-zero velocity.
    pub const fn is_note_on(self) -> bool {
        self.status & 0xf0 == 0x90 && self.d1 > 0
    }

    /// True for note-off, or note-on with zero velocity.
    pub const fn is_note_off(self) -> bool {
        self.status & 0xf0 == 0x80 || (self.status & 0xf0 == 0x90 && self.d1 == 0)
    }
}

/// Event payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    /// Nothing attached.
    None,
    /// A control value.
    Value(&'a Value),
    /// A run of MIDI messages.
    Midi(&'a [MidiMsg]),
    /// The attribute symbol of a broadcast.
    Symbol(SymbolId),
    /// Opaque bytes.
    Bytes(&'a [u8]),
}

/// What a unit's [`recv`](crate::Unit::recv) is handed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event<'a> {
    /// Origin flags.
    pub flags: EventFlags,
    /// Sending instance, if the event came from one.
    pub src_inst: Option<InstanceId>,
    /// Sending variable, if the event came from one.
    pub src_var: Option<VarId>,
    /// Receiving variable; `None` for broadcasts.
    pub dst_var: Option<VarId>,
    /// Payload.
    pub payload: Payload<'a>,
}

impl<'a> Event<'a> {
    /// Value payload, if any.
    pub fn value(&self) -> Option<&'a Value> {
        match self.payload {
            Payload::Value(v) => Some(v),
            _ => None,
        }
    }

    /// MIDI payload, empty if none.
    pub fn midi(&self) -> &'a [MidiMsg] {
        match self.payload {
            Payload::Midi(msgs) => msgs,
            _ => &[],
        }
    }
}

/// Message handed to [`Graph::dispatch`](crate::Graph::dispatch) by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message<'a> {
    /// A UI control change carrying an encoded [`Value`].
    Ui {
        /// Target instance.
        inst: InstanceId,
        /// Target variable.
        var: VarId,
        /// Encoded value blob.
        value: &'a [u8],
    },
    /// Incoming MIDI.
    Midi(&'a [MidiMsg]),
    /// A datagram from another node.
    Net {
        /// Sender node id as resolved by the transport.
        from: u16,
        /// Raw datagram.
        bytes: &'a [u8],
    },
    /// Unrecognized selector; ignored.
    Unknown(u32),
}
