#![cfg_attr(not(test), no_std)]

//! USB-MIDI 1.0 on top of `usb-core`: event packet framing, the bulk
//! streaming class driver and the application-facing MIDI API.

pub mod class;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod fifo;
pub mod listener;
pub mod message;
pub mod packet;

pub use class::MidiClass;
pub use descriptor::configuration_descriptor;
pub use device::MidiDevice;
pub use error::MidiError;
pub use fifo::PacketFifo;
pub use listener::{MidiEvent, MidiListener};
pub use message::MidiMessage;
pub use packet::EventPacket;

