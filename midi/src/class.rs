//! USB-MIDI 1.0 class driver: bulk endpoint streaming between the host and
//! the application FIFOs.

use defmt::{debug, trace, warn};
use usb_core::controller::FULL_SPEED_MAX_PACKET;
use usb_core::{
    Controller, Dcd, Direction, EndpointAddress, EndpointDescriptor, EndpointState,
    InterfaceDescriptor, Transfer, TransferType, UsbClass, UsbError,
};

use crate::descriptor::{AUDIO_CLASS, AUDIO_CONTROL_SUBCLASS, MIDI_STREAMING_SUBCLASS};
use crate::error::MidiError;
use crate::fifo::PacketFifo;
use crate::message::{MidiMessage, sysex_packet_count, sysex_packets};
use crate::packet::EventPacket;

const MAX_PACKET: usize = FULL_SPEED_MAX_PACKET as usize;

/// The MIDI function of the device. `RX` and `TX` are the FIFO sizes in bytes.
///
/// Messages can be queued before the host configures the device; they are
/// sent once it does, and dropped by a bus reset.
pub struct MidiClass<
    const RX: usize = { config::MIDI_RX_BUFSIZE },
    const TX: usize = { config::MIDI_TX_BUFSIZE },
> {
    cables: u8,
    ep_out: Option<EndpointDescriptor>,
    ep_in: Option<EndpointDescriptor>,
    mounted: bool,
    rx: PacketFifo<RX>,
    tx: PacketFifo<TX>,
    rx_paused: bool,
}

impl Default for MidiClass {
    fn default() -> Self {
        Self::new(config::MIDI_CABLES)
    }
}

impl<const RX: usize, const TX: usize> MidiClass<RX, TX> {
    pub const fn new(cables: u8) -> Self {
        Self {
            cables,
            ep_out: None,
            ep_in: None,
            mounted: false,
            rx: PacketFifo::new(),
            tx: PacketFifo::new(),
            rx_paused: false,
        }
    }

    /// Whether the host has configured the MIDI interfaces.
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Queues one complete channel or system message for the host.
    pub fn write_message(&mut self, cable: u8, bytes: &[u8]) -> Result<(), MidiError> {
        if cable >= self.cables {
            return Err(MidiError::MalformedMessage);
        }
        let message = MidiMessage::new(cable, bytes)?;
        self.tx.push(message.to_packet())
    }

    /// Queues a complete `F0 … F7` message, either all of it or nothing.
    pub fn write_sysex(&mut self, cable: u8, bytes: &[u8]) -> Result<(), MidiError> {
        if cable >= self.cables {
            return Err(MidiError::MalformedMessage);
        }
        let packets = sysex_packets(cable, bytes)?;
        if self.tx.free() < sysex_packet_count(bytes.len()) {
            return Err(MidiError::BufferFull);
        }
        for packet in packets {
            self.tx.push(packet)?;
        }
        Ok(())
    }

    /// Next received message; SysEx arrives as the fragments its packets carry.
    pub fn read_message(&mut self) -> Option<MidiMessage> {
        while let Some(packet) = self.rx.pop() {
            if let Some(message) = MidiMessage::from_packet(packet) {
                return Some(message);
            }
        }
        None
    }

    /// Drains received packets into `buf` as a plain MIDI byte stream, cable
    /// numbers dropped. Stops before a packet that does not fit.
    pub fn read_stream(&mut self, buf: &mut [u8]) -> usize {
        let mut len = 0;
        while let Some(packet) = self.rx.peek() {
            let payload = packet.payload().unwrap_or(&[]);
            if len + payload.len() > buf.len() {
                break;
            }
            buf[len..len + payload.len()].copy_from_slice(payload);
            len += payload.len();
            self.rx.pop();
        }
        len
    }

    /// Received packets waiting to be read.
    pub fn available(&self) -> usize {
        self.rx.len()
    }

    /// Packets that can still be queued for the host.
    pub fn tx_free(&self) -> usize {
        self.tx.free()
    }

    /// Packets queued for the host.
    pub fn tx_pending(&self) -> usize {
        self.tx.len()
    }

    fn arm_rx<D: Dcd>(&mut self, controller: &mut Controller<D>) {
        let Some(ep) = self.ep_out else {
            return;
        };
        if controller.state(ep.address) != EndpointState::Idle {
            return;
        }
        if self.rx.is_full() {
            if !self.rx_paused {
                debug!("MIDI: RX FIFO full, pausing reception");
                self.rx_paused = true;
            }
            return;
        }
        let size = ep.max_packet_size.min(FULL_SPEED_MAX_PACKET);
        if controller
            .submit_transfer(ep.address, Transfer::Out(size))
            .is_ok()
            && self.rx_paused
        {
            debug!("MIDI: reception resumed");
            self.rx_paused = false;
        }
    }

    fn flush_tx<D: Dcd>(&mut self, controller: &mut Controller<D>) {
        let Some(ep) = self.ep_in else {
            return;
        };
        if self.tx.is_empty() || controller.state(ep.address) != EndpointState::Idle {
            return;
        }
        let mut buf = [0u8; MAX_PACKET];
        let size = (ep.max_packet_size as usize).min(MAX_PACKET);
        let len = self.tx.copy_front(&mut buf[..size]);
        match controller.submit_transfer(ep.address, Transfer::In(&buf[..len])) {
            Ok(()) => {
                trace!("MIDI: sending {} packets", len / EventPacket::LEN);
                self.tx.discard(len);
            }
            Err(err) => warn!("MIDI: IN transfer refused: {}", err),
        }
    }

    fn receive<D: Dcd>(&mut self, controller: &mut Controller<D>, ep: EndpointAddress, bytes: u16) {
        let mut buf = [0u8; MAX_PACKET];
        let want = (bytes as usize).min(MAX_PACKET);
        let len = controller.read(ep, &mut buf[..want]);

        let chunks = buf[..len].chunks_exact(EventPacket::LEN);
        if !chunks.remainder().is_empty() {
            warn!(
                "MIDI: overrun, {} trailing bytes dropped",
                chunks.remainder().len()
            );
        }

        let mut dropped = 0;
        for chunk in chunks {
            let packet = EventPacket::from_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if packet.is_padding() || packet.payload().is_none() {
                continue;
            }
            if packet.cable() >= self.cables {
                trace!("MIDI: packet for undeclared cable {}", packet.cable());
                continue;
            }
            if self.rx.push(packet).is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!("MIDI: overrun, RX FIFO full, {} packets dropped", dropped);
        }

        self.arm_rx(controller);
    }
}

impl<D: Dcd, const RX: usize, const TX: usize> UsbClass<D> for MidiClass<RX, TX> {
    fn claims(&self, interface: &InterfaceDescriptor) -> bool {
        interface.class == AUDIO_CLASS
            && matches!(
                interface.subclass,
                AUDIO_CONTROL_SUBCLASS | MIDI_STREAMING_SUBCLASS
            )
    }

    fn endpoint_opened(&mut self, _interface: u8, endpoint: &EndpointDescriptor) {
        if endpoint.transfer_type != TransferType::Bulk {
            return;
        }
        match endpoint.address.direction() {
            Direction::Out => self.ep_out = Some(*endpoint),
            Direction::In => self.ep_in = Some(*endpoint),
        }
    }

    fn configured(&mut self, controller: &mut Controller<D>) {
        self.mounted = self.ep_in.is_some() && self.ep_out.is_some();
        if !self.mounted {
            warn!("MIDI: streaming interface without a bulk endpoint pair");
            return;
        }
        debug!("MIDI: mounted");
        self.arm_rx(controller);
        self.flush_tx(controller);
    }

    fn reset(&mut self) {
        self.mounted = false;
        self.ep_in = None;
        self.ep_out = None;
        self.rx.clear();
        self.tx.clear();
        self.rx_paused = false;
    }

    fn transfer_complete(&mut self, controller: &mut Controller<D>, ep: EndpointAddress, bytes: u16) {
        match ep.direction() {
            Direction::Out => self.receive(controller, ep, bytes),
            Direction::In => self.flush_tx(controller),
        }
    }

    fn endpoint_overrun(&mut self, controller: &mut Controller<D>, ep: EndpointAddress) {
        warn!("MIDI: overrun on {:#04x}", ep.as_u8());
        match ep.direction() {
            Direction::Out => self.arm_rx(controller),
            Direction::In => self.flush_tx(controller),
        }
    }

    fn halt_cleared(&mut self, controller: &mut Controller<D>, _ep: EndpointAddress) {
        self.arm_rx(controller);
        self.flush_tx(controller);
    }

    fn service(&mut self, controller: &mut Controller<D>) {
        if !self.mounted {
            return;
        }
        self.arm_rx(controller);
        self.flush_tx(controller);
    }
}
