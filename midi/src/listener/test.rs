use embassy_sync::{blocking_mutex::raw::NoopRawMutex, channel::Channel};
use midly::{
    MidiMessage as Message, PitchBend,
    live::{LiveEvent, SystemCommon},
};
use pretty_assertions::assert_eq;

use crate::MidiMessage;
use crate::listener::{MidiEvent, MidiListener};

macro_rules! setup {
    ($receiver:ident, $midi_listener:ident) => {
        let channel = Channel::<NoopRawMutex, MidiEvent, 4>::new();
        let sender = channel.sender();
        let $receiver = channel.receiver();
        let mut $midi_listener = MidiListener::new(sender);
    };
}

macro_rules! note_on {
    ($channel:expr, $key:expr, $vel:expr) => {
        LiveEvent::Midi {
            channel: $channel.into(),
            message: Message::NoteOn {
                key: $key.into(),
                vel: $vel.into(),
            },
        }
    };
}

macro_rules! note_off {
    ($channel:expr, $key:expr, $vel:expr) => {
        LiveEvent::Midi {
            channel: $channel.into(),
            message: Message::NoteOff {
                key: $key.into(),
                vel: $vel.into(),
            },
        }
    };
}

macro_rules! drain {
    ($receiver:ident) => {{
        let mut output_buffer: Vec<MidiEvent> = Vec::new();
        while let Ok(event) = $receiver.try_receive() {
            output_buffer.push(event);
        }
        output_buffer
    }};
}

#[test]
fn when_overflowing_it_discards_the_overflow() {
    setup!(receiver, midi_listener);

    let sample_midi = [
        note_on!(0, 0, 0),
        note_off!(0, 1, 1),
        note_on!(0, 2, 2),
        note_off!(0, 3, 3),
        note_on!(0, 4, 4),
        note_off!(0, 5, 5),
    ];

    let mut input_buffer: Vec<u8> = Vec::new();

    sample_midi
        .iter()
        .for_each(|ev| ev.write(&mut input_buffer).unwrap());

    midi_listener.process_bytes(&input_buffer);

    assert_eq!(
        drain!(receiver).as_slice(),
        &[
            MidiEvent::NoteOn { channel: 0, key: 0, vel: 0 },
            MidiEvent::NoteOff { channel: 0, key: 1, vel: 1 },
            MidiEvent::NoteOn { channel: 0, key: 2, vel: 2 },
            MidiEvent::NoteOff { channel: 0, key: 3, vel: 3 },
        ]
    );
}

#[test]
fn when_receiving_from_multiple_channels_it_keeps_the_channel() {
    setup!(receiver, midi_listener);

    let sample_midi = [
        note_on!(0, 0, 0),
        note_off!(1, 1, 1),
        note_on!(2, 2, 2),
        note_off!(15, 3, 3),
    ];

    let mut input_buffer: Vec<u8> = Vec::new();

    sample_midi
        .iter()
        .for_each(|ev| ev.write(&mut input_buffer).unwrap());

    midi_listener.process_bytes(&input_buffer);

    assert_eq!(
        drain!(receiver).as_slice(),
        &[
            MidiEvent::NoteOn { channel: 0, key: 0, vel: 0 },
            MidiEvent::NoteOff { channel: 1, key: 1, vel: 1 },
            MidiEvent::NoteOn { channel: 2, key: 2, vel: 2 },
            MidiEvent::NoteOff { channel: 15, key: 3, vel: 3 },
        ]
    );
}

#[test]
fn when_receiving_garbage_it_processes_the_midi() {
    setup!(receiver, midi_listener);

    let sysex_contents = [8.into()].repeat(1000);
    let sysex = LiveEvent::Common(SystemCommon::SysEx(sysex_contents.as_slice()));

    let sample_midi = [
        note_on!(0, 0, 0),
        note_off!(1, 1, 1),
        sysex,
        note_on!(2, 2, 2),
        note_off!(3, 3, 3),
    ];

    let mut input_buffer: Vec<u8> = Vec::new();

    sample_midi[0..2]
        .iter()
        .for_each(|ev| ev.write(&mut input_buffer).unwrap());

    // add random data
    input_buffer
        .append(&mut [0x90, 0xf1, 0x56, 0x3e, 0xe3, 0x0d, 0x87, 0x78, 0xd1, 0xc4].repeat(1000));

    sample_midi[2..]
        .iter()
        .for_each(|ev| ev.write(&mut input_buffer).unwrap());

    midi_listener.process_bytes(&input_buffer);

    assert_eq!(
        drain!(receiver).as_slice(),
        &[
            MidiEvent::NoteOn { channel: 0, key: 0, vel: 0 },
            MidiEvent::NoteOff { channel: 1, key: 1, vel: 1 },
            MidiEvent::NoteOn { channel: 2, key: 2, vel: 2 },
            MidiEvent::NoteOff { channel: 3, key: 3, vel: 3 },
        ]
    );
}

#[test]
fn messages_from_the_class_become_events() {
    setup!(receiver, midi_listener);

    let messages = [
        MidiMessage::new(0, &[0xb2, 0x07, 0x64]).unwrap(),
        MidiMessage::new(0, &[0xc1, 0x05]).unwrap(),
        MidiMessage::new(0, &[0xf8]).unwrap(),
        MidiMessage::new(0, &[0xe0, 0x00, 0x40]).unwrap(),
    ];

    messages
        .iter()
        .for_each(|message| midi_listener.process_message(message));

    assert_eq!(
        drain!(receiver).as_slice(),
        &[
            MidiEvent::ControlChange { channel: 2, controller: 7, value: 100 },
            MidiEvent::ProgramChange { channel: 1, program: 5 },
            MidiEvent::PitchBend { channel: 0, value: 0x2000 },
        ]
    );
}

#[test]
fn pitch_bend_bytes_match_midly() {
    setup!(receiver, midi_listener);

    let mut input_buffer: Vec<u8> = Vec::new();
    LiveEvent::Midi {
        channel: 4.into(),
        message: Message::PitchBend {
            bend: PitchBend(0x1234.into()),
        },
    }
    .write(&mut input_buffer)
    .unwrap();

    midi_listener.process_bytes(&input_buffer);

    assert_eq!(
        drain!(receiver).as_slice(),
        &[MidiEvent::PitchBend { channel: 4, value: 0x1234 }]
    );
}
