//! Validation of application MIDI bytes and their mapping to event packets.

use defmt::Format;

use crate::error::MidiError;
use crate::packet::{EventPacket, cin};

const SYSEX_START: u8 = 0xf0;
const SYSEX_END: u8 = 0xf7;

/// Highest cable number an event packet header can carry.
pub const MAX_CABLE: u8 = 0x0f;

/// One MIDI message (or one received SysEx fragment) and its cable.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiMessage {
    cable: u8,
    len: u8,
    bytes: [u8; 3],
}

impl MidiMessage {
    /// Checks that `bytes` is exactly one complete message with its status
    /// byte. Running status is rejected.
    pub fn new(cable: u8, bytes: &[u8]) -> Result<Self, MidiError> {
        if cable > MAX_CABLE {
            return Err(MidiError::MalformedMessage);
        }
        let (&status, data) = bytes.split_first().ok_or(MidiError::MalformedMessage)?;
        let expected = message_len(status, bytes.len()).ok_or(MidiError::MalformedMessage)?;
        if bytes.len() != expected {
            return Err(MidiError::MalformedMessage);
        }

        let data_ok = match status {
            SYSEX_START => {
                let (&last, inner) = data.split_last().ok_or(MidiError::MalformedMessage)?;
                last == SYSEX_END && inner.iter().all(|byte| *byte < 0x80)
            }
            _ => data.iter().all(|byte| *byte < 0x80),
        };
        if !data_ok {
            return Err(MidiError::MalformedMessage);
        }

        Ok(Self::from_raw(cable, bytes))
    }

    /// Decodes a received packet. `None` for padding and reserved codes.
    pub fn from_packet(packet: EventPacket) -> Option<Self> {
        if packet.is_padding() {
            return None;
        }
        let payload = packet.payload()?;
        Some(Self::from_raw(packet.cable(), payload))
    }

    fn from_raw(cable: u8, payload: &[u8]) -> Self {
        let mut bytes = [0; 3];
        bytes[..payload.len()].copy_from_slice(payload);
        Self {
            cable,
            len: payload.len() as u8,
            bytes,
        }
    }

    pub fn cable(&self) -> u8 {
        self.cable
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn status(&self) -> u8 {
        self.bytes[0]
    }

    pub fn to_packet(&self) -> EventPacket {
        EventPacket::new(self.cable, code_index(self.status(), self.len as usize), self.bytes())
    }
}

/// Length a message starting with `status` must have. SysEx only fits one
/// packet as `F0 F7` or `F0 xx F7`.
fn message_len(status: u8, actual: usize) -> Option<usize> {
    match status {
        0x00..=0x7f => None,
        0xc0..=0xdf => Some(2),
        0x80..=0xef => Some(3),
        SYSEX_START if matches!(actual, 2 | 3) => Some(actual),
        0xf1 | 0xf3 => Some(2),
        0xf2 => Some(3),
        0xf6 | 0xf8..=0xff => Some(1),
        // F0 longer than a packet, F4, F5, lone F7
        _ => None,
    }
}

fn code_index(status: u8, len: usize) -> u8 {
    match status {
        0x80..=0xef => status >> 4,
        SYSEX_START if len == 2 => cin::SYSEX_END_2,
        SYSEX_START => cin::SYSEX_END_3,
        0xf1 | 0xf3 => cin::SYSTEM_COMMON_2,
        0xf2 => cin::SYSTEM_COMMON_3,
        0xf6 => cin::SYSEX_END_1,
        _ => cin::SINGLE_BYTE,
    }
}

/// Splits a complete `F0 … F7` message into event packets.
pub fn sysex_packets(
    cable: u8,
    bytes: &[u8],
) -> Result<impl Iterator<Item = EventPacket> + '_, MidiError> {
    let valid = cable <= MAX_CABLE
        && bytes.len() >= 2
        && bytes[0] == SYSEX_START
        && bytes[bytes.len() - 1] == SYSEX_END
        && bytes[1..bytes.len() - 1].iter().all(|byte| *byte < 0x80);
    if !valid {
        return Err(MidiError::MalformedMessage);
    }

    let count = sysex_packet_count(bytes.len());
    Ok(bytes.chunks(3).enumerate().map(move |(index, chunk)| {
        let code = if index + 1 < count {
            cin::SYSEX_START
        } else {
            match chunk.len() {
                1 => cin::SYSEX_END_1,
                2 => cin::SYSEX_END_2,
                _ => cin::SYSEX_END_3,
            }
        };
        EventPacket::new(cable, code, chunk)
    }))
}

pub const fn sysex_packet_count(len: usize) -> usize {
    len.div_ceil(3)
}
