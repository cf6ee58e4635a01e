use defmt::{Format, debug};
use embassy_sync::{blocking_mutex::raw::RawMutex, channel::Sender};
use midly::{live::LiveEvent, stream::MidiStream};

use crate::message::MidiMessage;

/// Channel voice messages the application reacts to.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOff { channel: u8, key: u8, vel: u8 },
    NoteOn { channel: u8, key: u8, vel: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    /// Raw 14-bit value, 0x2000 is centered.
    PitchBend { channel: u8, value: u16 },
}

/// Turns received MIDI into [`MidiEvent`]s on a channel.
pub struct MidiListener<'ch, M: RawMutex, const N: usize> {
    sender: Sender<'ch, M, MidiEvent, N>,
    midi_stream: MidiStream<MidiListenerBuffer>,
}

midly::stack_buffer! {
    struct MidiListenerBuffer([u8; 4]);
}

impl<'ch, M: RawMutex, const N: usize> MidiListener<'ch, M, N> {
    pub fn new(sender: Sender<'ch, M, MidiEvent, N>) -> Self {
        let midi_stream = MidiStream::with_buffer(MidiListenerBuffer::new());

        MidiListener {
            sender,
            midi_stream,
        }
    }

    fn handle_event(sender: &Sender<'ch, M, MidiEvent, N>, event: LiveEvent<'_>) {
        let LiveEvent::Midi { channel, message } = event else {
            return;
        };
        let channel = channel.into();

        let event_to_add = match message {
            midly::MidiMessage::NoteOff { key, vel } => MidiEvent::NoteOff {
                channel,
                key: key.into(),
                vel: vel.into(),
            },
            midly::MidiMessage::NoteOn { key, vel } => MidiEvent::NoteOn {
                channel,
                key: key.into(),
                vel: vel.into(),
            },
            midly::MidiMessage::Controller { controller, value } => MidiEvent::ControlChange {
                channel,
                controller: controller.into(),
                value: value.into(),
            },
            midly::MidiMessage::ProgramChange { program } => MidiEvent::ProgramChange {
                channel,
                program: program.into(),
            },
            midly::MidiMessage::PitchBend { bend } => MidiEvent::PitchBend {
                channel,
                value: bend.0.into(),
            },
            _ => return,
        };

        debug!("MIDI: event {}", event_to_add);

        // only fails if full, and then the event is dropped anyway
        sender.try_send(event_to_add).ok();
    }

    /// Feeds a raw MIDI byte stream, e.g. from `MidiClass::read_stream`.
    pub fn process_bytes(&mut self, bytes: &[u8]) {
        self.midi_stream
            .feed(bytes, |event| Self::handle_event(&self.sender, event));
    }

    /// Handles one message from `MidiClass::read_message`.
    pub fn process_message(&mut self, message: &MidiMessage) {
        if let Ok(event) = LiveEvent::parse(message.bytes()) {
            Self::handle_event(&self.sender, event);
        }
    }
}

#[cfg(test)]
mod test;
