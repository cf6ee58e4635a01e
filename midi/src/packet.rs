//! USB-MIDI 1.0 Event Packets.

use defmt::Format;

/// Code Index Numbers, the low nibble of an event packet header.
pub mod cin {
    pub const MISC: u8 = 0x0;
    pub const CABLE_EVENT: u8 = 0x1;
    pub const SYSTEM_COMMON_2: u8 = 0x2;
    pub const SYSTEM_COMMON_3: u8 = 0x3;
    pub const SYSEX_START: u8 = 0x4;
    /// Also single-byte system common (tune request).
    pub const SYSEX_END_1: u8 = 0x5;
    pub const SYSEX_END_2: u8 = 0x6;
    pub const SYSEX_END_3: u8 = 0x7;
    pub const NOTE_OFF: u8 = 0x8;
    pub const NOTE_ON: u8 = 0x9;
    pub const POLY_KEYPRESS: u8 = 0xa;
    pub const CONTROL_CHANGE: u8 = 0xb;
    pub const PROGRAM_CHANGE: u8 = 0xc;
    pub const CHANNEL_PRESSURE: u8 = 0xd;
    pub const PITCH_BEND: u8 = 0xe;
    pub const SINGLE_BYTE: u8 = 0xf;
}

/// MIDI bytes carried by a packet with code index `cin`; `None` for the
/// reserved codes.
pub const fn payload_len(cin: u8) -> Option<usize> {
    match cin {
        cin::SYSEX_END_1 | cin::SINGLE_BYTE => Some(1),
        cin::SYSTEM_COMMON_2 | cin::SYSEX_END_2 | cin::PROGRAM_CHANGE | cin::CHANNEL_PRESSURE => {
            Some(2)
        }
        cin::SYSTEM_COMMON_3
        | cin::SYSEX_START
        | cin::SYSEX_END_3
        | cin::NOTE_OFF..=cin::CONTROL_CHANGE
        | cin::PITCH_BEND => Some(3),
        _ => None,
    }
}

/// One 4-byte event packet: `[cable << 4 | cin, midi_0, midi_1, midi_2]`.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPacket([u8; 4]);

impl EventPacket {
    pub const LEN: usize = 4;

    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Packs `payload` (1 to 3 bytes), zero-padding the rest.
    pub(crate) fn new(cable: u8, cin: u8, payload: &[u8]) -> Self {
        let mut bytes = [(cable << 4) | (cin & 0x0f), 0, 0, 0];
        bytes[1..=payload.len()].copy_from_slice(payload);
        Self(bytes)
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        self.0
    }

    pub const fn cable(&self) -> u8 {
        self.0[0] >> 4
    }

    pub const fn cin(&self) -> u8 {
        self.0[0] & 0x0f
    }

    /// All-zero packets pad bulk transfers and carry nothing.
    pub const fn is_padding(&self) -> bool {
        matches!(self.0, [0, 0, 0, 0])
    }

    /// The MIDI bytes, or `None` for a reserved code index.
    pub fn payload(&self) -> Option<&[u8]> {
        payload_len(self.cin()).map(|len| &self.0[1..=len])
    }
}
