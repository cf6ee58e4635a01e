use core::fmt;

use defmt::Format;

/// Errors returned to the application by the MIDI API.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiError {
    /// Not one complete MIDI message with its status byte, or a cable the
    /// device does not declare.
    MalformedMessage,
    /// The transmit FIFO has no room; retry after the next service pass.
    BufferFull,
    /// Nothing received. Expected steady state, not a failure.
    NoData,
}

impl fmt::Display for MidiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MidiError::MalformedMessage => "malformed MIDI message",
            MidiError::BufferFull => "MIDI transmit buffer full",
            MidiError::NoData => "no MIDI data",
        };
        f.write_str(text)
    }
}

impl core::error::Error for MidiError {}
