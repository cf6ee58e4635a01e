use defmt::info;
use usb_core::{Dcd, DeviceState, TimeSource, UsbDevice, UsbError};

use crate::class::MidiClass;
use crate::error::MidiError;
use crate::message::MidiMessage;

/// A USB device whose only function is MIDI: what the application drives
/// from its main loop.
pub struct MidiDevice<'d, 'q, D: Dcd, T: TimeSource, const Q: usize> {
    usb: UsbDevice<'d, 'q, D, T, Q>,
    class: MidiClass,
}

impl<'d, 'q, D: Dcd, T: TimeSource, const Q: usize> MidiDevice<'d, 'q, D, T, Q> {
    pub fn new(usb: UsbDevice<'d, 'q, D, T, Q>) -> Self {
        Self {
            usb,
            class: MidiClass::default(),
        }
    }

    pub fn init(&mut self) {
        info!("MIDI: device init");
        self.usb.init();
    }

    /// One bounded pass over pending USB events and FIFO work. Call at
    /// least once per millisecond.
    pub fn service(&mut self) {
        self.usb.service(&mut [&mut self.class]);
    }

    pub fn write_message(&mut self, cable: u8, bytes: &[u8]) -> Result<(), MidiError> {
        self.class.write_message(cable, bytes)
    }

    pub fn write_sysex(&mut self, cable: u8, bytes: &[u8]) -> Result<(), MidiError> {
        self.class.write_sysex(cable, bytes)
    }

    pub fn read_message(&mut self) -> Option<MidiMessage> {
        self.class.read_message()
    }

    pub fn is_mounted(&self) -> bool {
        self.usb.state() == DeviceState::Configured && self.class.is_mounted()
    }

    pub fn remote_wakeup(&mut self) -> Result<(), UsbError> {
        self.usb.remote_wakeup()
    }

    pub fn usb(&self) -> &UsbDevice<'d, 'q, D, T, Q> {
        &self.usb
    }

    pub fn usb_mut(&mut self) -> &mut UsbDevice<'d, 'q, D, T, Q> {
        &mut self.usb
    }

    pub fn class(&self) -> &MidiClass {
        &self.class
    }

    pub fn class_mut(&mut self) -> &mut MidiClass {
        &mut self.class
    }
}
