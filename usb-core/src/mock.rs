//! In-memory controller and a scripted host, for driving the device core and
//! class drivers in host-side tests.

use heapless::Vec;

use crate::class::UsbClass;
use crate::control::{CONTROL_BUFFER_SIZE, SetupPacket};
use crate::controller::{Capabilities, Dcd, FULL_SPEED_MAX_PACKET, MAX_ENDPOINTS, Transfer};
use crate::descriptor::EndpointDescriptor;
use crate::device::UsbDevice;
use crate::endpoint::EndpointAddress;
use crate::error::UsbError;
use crate::event::{Event, EventProducer};
use crate::time::TimeSource;

pub type Packet = Vec<u8, { FULL_SPEED_MAX_PACKET as usize }>;

/// A [`Dcd`] that records what the device core asks of the hardware.
pub struct MockDcd {
    capabilities: Capabilities,
    initialized: bool,
    address: u8,
    open: Vec<EndpointDescriptor, { 2 * MAX_ENDPOINTS }>,
    stalled: Vec<EndpointAddress, { 2 * MAX_ENDPOINTS }>,
    sent: [Option<Packet>; MAX_ENDPOINTS],
    armed: [Option<u16>; MAX_ENDPOINTS],
    received: [Packet; MAX_ENDPOINTS],
    signalling: bool,
    wakeups: u32,
    setups: u32,
}

impl Default for MockDcd {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDcd {
    /// Full-speed controller with eight endpoint numbers.
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::full_speed(MAX_ENDPOINTS as u8))
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            initialized: false,
            address: 0,
            open: Vec::new(),
            stalled: Vec::new(),
            sent: Default::default(),
            armed: [None; MAX_ENDPOINTS],
            received: Default::default(),
            signalling: false,
            wakeups: 0,
            setups: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn open_endpoints(&self) -> &[EndpointDescriptor] {
        &self.open
    }

    pub fn is_stalled(&self, ep: EndpointAddress) -> bool {
        self.stalled.contains(&ep)
    }

    /// Takes the packet queued for the host on IN endpoint `ep`.
    pub fn take_in(&mut self, ep: EndpointAddress) -> Option<Packet> {
        self.sent.get_mut(ep.number() as usize)?.take()
    }

    /// Length the device is ready to receive on OUT endpoint `ep`.
    pub fn armed_out(&self, ep: EndpointAddress) -> Option<u16> {
        self.armed.get(ep.number() as usize).copied().flatten()
    }

    /// Consumes the receive readiness on OUT endpoint `ep`.
    pub fn take_armed(&mut self, ep: EndpointAddress) -> Option<u16> {
        self.armed.get_mut(ep.number() as usize)?.take()
    }

    /// Stores `data` as the payload of the next completed OUT transfer on `ep`.
    pub fn load_out(&mut self, ep: EndpointAddress, data: &[u8]) {
        if let Some(slot) = self.received.get_mut(ep.number() as usize) {
            slot.clear();
            let _ = slot.extend_from_slice(data);
        }
    }

    pub fn is_signalling(&self) -> bool {
        self.signalling
    }

    /// How often remote wakeup signalling was started.
    pub fn wakeup_count(&self) -> u32 {
        self.wakeups
    }

    /// How many setup packets the core has taken off the event queue.
    pub fn setup_count(&self) -> u32 {
        self.setups
    }

    /// The hardware drops a stall on endpoint 0 when a setup packet arrives.
    fn setup_arrived(&mut self) {
        self.stalled.retain(|ep| !ep.is_control());
        self.sent[0] = None;
        self.armed[0] = None;
    }
}

impl Dcd for MockDcd {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn init(&mut self) {
        *self = Self::with_capabilities(self.capabilities);
        self.initialized = true;
    }

    fn set_address(&mut self, address: u8) {
        self.address = address;
    }

    fn open_endpoint(&mut self, descriptor: &EndpointDescriptor) {
        self.open.retain(|open| open.address != descriptor.address);
        let _ = self.open.push(*descriptor);
    }

    fn close_all(&mut self) {
        self.open.clear();
        self.stalled.retain(|ep| ep.is_control());
        for number in 1..MAX_ENDPOINTS {
            self.sent[number] = None;
            self.armed[number] = None;
            self.received[number].clear();
        }
    }

    fn start_transfer(&mut self, ep: EndpointAddress, transfer: Transfer<'_>) {
        let number = ep.number() as usize;
        match transfer {
            Transfer::In(data) => self.sent[number] = Packet::from_slice(data).ok(),
            Transfer::Out(len) => self.armed[number] = Some(len),
        }
    }

    fn read_out(&mut self, ep: EndpointAddress, buf: &mut [u8]) -> usize {
        let Some(data) = self.received.get_mut(ep.number() as usize) else {
            return 0;
        };
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        data.clear();
        len
    }

    fn set_stall(&mut self, ep: EndpointAddress, stalled: bool) {
        self.stalled.retain(|other| *other != ep);
        if stalled {
            let _ = self.stalled.push(ep);
        }
    }

    fn remote_wakeup(&mut self, signalling: bool) {
        if signalling && !self.signalling {
            self.wakeups += 1;
        }
        self.signalling = signalling;
    }

    fn setup_received(&mut self) {
        self.setups += 1;
    }
}

type Device<'a, 'd, 'q, T, const N: usize> = &'a mut UsbDevice<'d, 'q, MockDcd, T, N>;
type Classes<'a, 'c> = &'a mut [&'c mut dyn UsbClass<MockDcd>];

/// Plays the host side of the bus against a [`UsbDevice`] on a [`MockDcd`].
///
/// Every step posts the events the hardware would raise and runs one service
/// pass, so the device sees exactly the ordering a real bus produces.
pub struct Host<'q, const N: usize> {
    events: EventProducer<'q, N>,
    /// Address the host sends to; packets for other addresses never reach
    /// the device.
    pub address: u8,
}

impl<'q, const N: usize> Host<'q, N> {
    pub fn new(events: EventProducer<'q, N>) -> Self {
        Self { events, address: 0 }
    }

    /// Raises `event` and runs one service pass.
    pub fn send<T: TimeSource>(
        &mut self,
        device: Device<'_, '_, 'q, T, N>,
        classes: Classes<'_, '_>,
        event: Event,
    ) {
        let _ = self.events.push(event);
        device.service(classes);
    }

    /// Raises `event` without servicing the device, as an interrupt firing
    /// while the device is busy elsewhere.
    pub fn post(&mut self, event: Event) -> Result<(), UsbError> {
        self.events.push(event)
    }

    pub fn bus_reset<T: TimeSource>(
        &mut self,
        device: Device<'_, '_, 'q, T, N>,
        classes: Classes<'_, '_>,
    ) {
        self.address = 0;
        self.send(device, classes, Event::BusReset);
    }

    /// Runs a control read. `None` when the device stalled or never answered.
    pub fn control_read<T: TimeSource>(
        &mut self,
        device: Device<'_, '_, 'q, T, N>,
        classes: Classes<'_, '_>,
        setup: SetupPacket,
    ) -> Option<Vec<u8, CONTROL_BUFFER_SIZE>> {
        if !self.setup(device, classes, setup) {
            return None;
        }
        let mps = device.controller().ep0_size() as usize;
        let mut data = Vec::new();
        loop {
            let packet = self.take_control_in(device)?;
            data.extend_from_slice(&packet).ok()?;
            self.complete(device, classes, EndpointAddress::CONTROL_IN, packet.len());
            if packet.len() < mps || data.len() >= setup.length as usize {
                break;
            }
        }
        device
            .controller_mut()
            .dcd_mut()
            .take_armed(EndpointAddress::CONTROL_OUT)?;
        self.complete(device, classes, EndpointAddress::CONTROL_OUT, 0);
        Some(data)
    }

    /// Runs a control write with `data` as data stage. Returns whether the
    /// device acknowledged the status stage.
    pub fn control_write<T: TimeSource>(
        &mut self,
        device: Device<'_, '_, 'q, T, N>,
        classes: Classes<'_, '_>,
        setup: SetupPacket,
        data: &[u8],
    ) -> bool {
        if !self.setup(device, classes, setup) {
            return false;
        }
        let mps = device.controller().ep0_size() as usize;
        for chunk in data.chunks(mps) {
            let dcd = device.controller_mut().dcd_mut();
            if dcd.is_stalled(EndpointAddress::CONTROL_OUT)
                || dcd.take_armed(EndpointAddress::CONTROL_OUT).is_none()
            {
                return false;
            }
            dcd.load_out(EndpointAddress::CONTROL_OUT, chunk);
            self.complete(device, classes, EndpointAddress::CONTROL_OUT, chunk.len());
        }
        match self.take_control_in(device) {
            Some(status) if status.is_empty() => {
                self.complete(device, classes, EndpointAddress::CONTROL_IN, 0);
                true
            }
            _ => false,
        }
    }

    /// SET_ADDRESS; the host follows the device to its new address.
    pub fn set_address<T: TimeSource>(
        &mut self,
        device: Device<'_, '_, 'q, T, N>,
        classes: Classes<'_, '_>,
        address: u8,
    ) -> bool {
        let accepted = self.control_write(device, classes, standard_out(0x05, address as u16), &[]);
        if accepted {
            self.address = address;
        }
        accepted
    }

    pub fn set_configuration<T: TimeSource>(
        &mut self,
        device: Device<'_, '_, 'q, T, N>,
        classes: Classes<'_, '_>,
        value: u8,
    ) -> bool {
        self.control_write(device, classes, standard_out(0x09, value as u16), &[])
    }

    /// Bus reset, SET_ADDRESS and SET_CONFIGURATION in a row.
    pub fn enumerate<T: TimeSource>(
        &mut self,
        device: Device<'_, '_, 'q, T, N>,
        classes: Classes<'_, '_>,
        address: u8,
        configuration: u8,
    ) -> bool {
        self.bus_reset(device, classes);
        self.set_address(device, classes, address)
            && self.set_configuration(device, classes, configuration)
    }

    /// Sends `data` to OUT endpoint `ep`. `false` if the device was not
    /// ready to receive.
    pub fn bulk_out<T: TimeSource>(
        &mut self,
        device: Device<'_, '_, 'q, T, N>,
        classes: Classes<'_, '_>,
        ep: EndpointAddress,
        data: &[u8],
    ) -> bool {
        let dcd = device.controller_mut().dcd_mut();
        if dcd.is_stalled(ep) || dcd.take_armed(ep).is_none() {
            return false;
        }
        dcd.load_out(ep, data);
        self.complete(device, classes, ep, data.len());
        true
    }

    /// Collects the packet waiting on IN endpoint `ep`, if any.
    pub fn bulk_in<T: TimeSource>(
        &mut self,
        device: Device<'_, '_, 'q, T, N>,
        classes: Classes<'_, '_>,
        ep: EndpointAddress,
    ) -> Option<Packet> {
        let packet = device.controller_mut().dcd_mut().take_in(ep)?;
        self.complete(device, classes, ep, packet.len());
        Some(packet)
    }

    fn setup<T: TimeSource>(
        &mut self,
        device: Device<'_, '_, 'q, T, N>,
        classes: Classes<'_, '_>,
        setup: SetupPacket,
    ) -> bool {
        if device.controller().dcd().address() != self.address {
            return false;
        }
        device.controller_mut().dcd_mut().setup_arrived();
        self.send(device, classes, Event::Setup(setup.to_bytes()));
        true
    }

    fn take_control_in<T: TimeSource>(&mut self, device: Device<'_, '_, 'q, T, N>) -> Option<Packet> {
        let dcd = device.controller_mut().dcd_mut();
        if dcd.is_stalled(EndpointAddress::CONTROL_IN) {
            return None;
        }
        dcd.take_in(EndpointAddress::CONTROL_IN)
    }

    fn complete<T: TimeSource>(
        &mut self,
        device: Device<'_, '_, 'q, T, N>,
        classes: Classes<'_, '_>,
        ep: EndpointAddress,
        bytes: usize,
    ) {
        self.send(
            device,
            classes,
            Event::TransferComplete {
                ep,
                bytes: bytes as u16,
            },
        );
    }
}

/// Standard host-to-device request addressed to the device.
pub const fn standard_out(request: u8, value: u16) -> SetupPacket {
    SetupPacket {
        request_type: 0x00,
        request,
        value,
        index: 0,
        length: 0,
    }
}

/// GET_DESCRIPTOR for `kind`/`index`, asking for `length` bytes.
pub const fn get_descriptor(kind: u8, index: u8, length: u16) -> SetupPacket {
    SetupPacket {
        request_type: 0x80,
        request: 0x06,
        value: ((kind as u16) << 8) | index as u16,
        index: 0,
        length,
    }
}
