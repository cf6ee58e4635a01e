//! Device controller driver (DCD) abstraction.
//!
//! [`Dcd`] is what a concrete USB peripheral implements: raw endpoint
//! programming with no bookkeeping. [`Controller`] wraps it with the endpoint
//! table, validates endpoint setups against the controller's capabilities and
//! enforces one outstanding transfer per endpoint. The device core and the
//! class drivers only ever talk to the [`Controller`].

use defmt::{Format, debug, trace};
use heapless::Vec;

use crate::descriptor::EndpointDescriptor;
use crate::endpoint::{Direction, EndpointAddress, EndpointState, TransferType};
use crate::error::UsbError;

/// Highest number of endpoint numbers (per direction) the table tracks.
pub const MAX_ENDPOINTS: usize = 8;

/// Full-speed packet size limit for control, bulk and interrupt endpoints.
pub const FULL_SPEED_MAX_PACKET: u16 = 64;

/// What the peripheral can do.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Endpoint numbers `0..endpoint_count` exist in both directions.
    pub endpoint_count: u8,
    pub max_packet_size: u16,
    pub isochronous: bool,
}

impl Capabilities {
    pub const fn full_speed(endpoint_count: u8) -> Self {
        Self {
            endpoint_count,
            max_packet_size: FULL_SPEED_MAX_PACKET,
            isochronous: false,
        }
    }
}

/// A transfer handed to the peripheral.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer<'a> {
    /// Send these bytes (possibly none) to the host.
    In(&'a [u8]),
    /// Accept up to this many bytes from the host.
    Out(u16),
}

impl Transfer<'_> {
    pub fn len(&self) -> usize {
        match self {
            Transfer::In(data) => data.len(),
            Transfer::Out(len) => *len as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn direction(&self) -> Direction {
        match self {
            Transfer::In(_) => Direction::In,
            Transfer::Out(_) => Direction::Out,
        }
    }
}

/// Controller-specific driver.
///
/// Every method returns immediately. Completions, setup packets and bus
/// events are reported by the interrupt handler through an
/// [`EventProducer`](crate::event::EventProducer).
pub trait Dcd {
    fn capabilities(&self) -> Capabilities;

    /// Resets the peripheral and enables endpoint 0. Called before the first
    /// bus reset can be reported.
    fn init(&mut self);

    fn set_address(&mut self, address: u8);

    fn open_endpoint(&mut self, descriptor: &EndpointDescriptor);

    /// Disables every endpoint except endpoint 0 and aborts pending transfers.
    fn close_all(&mut self);

    /// Arms `ep`. IN data is copied out before this returns.
    fn start_transfer(&mut self, ep: EndpointAddress, transfer: Transfer<'_>);

    /// Copies the data of the last completed OUT transfer on `ep`.
    fn read_out(&mut self, ep: EndpointAddress, buf: &mut [u8]) -> usize;

    fn set_stall(&mut self, ep: EndpointAddress, stalled: bool);

    /// Starts or stops driving resume signalling on the bus.
    fn remote_wakeup(&mut self, signalling: bool);

    /// The core has taken a setup packet off the event queue. Setup packets
    /// are reported in the order they were queued.
    fn setup_received(&mut self) {}
}

#[derive(Debug, Clone, Copy)]
struct EndpointSlot {
    state: EndpointState,
    transfer_type: TransferType,
    max_packet_size: u16,
}

impl EndpointSlot {
    const CLOSED: Self = Self {
        state: EndpointState::Closed,
        transfer_type: TransferType::Bulk,
        max_packet_size: 0,
    };

    const fn control(max_packet_size: u16) -> Self {
        Self {
            state: EndpointState::Idle,
            transfer_type: TransferType::Control,
            max_packet_size,
        }
    }
}

pub struct Controller<D: Dcd> {
    dcd: D,
    ep0_size: u8,
    endpoints: [[EndpointSlot; 2]; MAX_ENDPOINTS],
}

impl<D: Dcd> Controller<D> {
    pub fn new(dcd: D, ep0_size: u8) -> Self {
        Self {
            dcd,
            ep0_size,
            endpoints: [[EndpointSlot::CLOSED; 2]; MAX_ENDPOINTS],
        }
    }

    /// Resets the peripheral and puts endpoint 0 in its default state.
    pub fn init(&mut self) {
        debug!("DCD: init, ep0 size {}", self.ep0_size);
        self.dcd.init();
        self.reset_table();
    }

    pub fn ep0_size(&self) -> u8 {
        self.ep0_size
    }

    pub fn dcd(&self) -> &D {
        &self.dcd
    }

    pub fn dcd_mut(&mut self) -> &mut D {
        &mut self.dcd
    }

    /// Opens an endpoint as described, if the controller can support it.
    pub fn open_endpoint(&mut self, descriptor: &EndpointDescriptor) -> Result<(), UsbError> {
        let caps = self.dcd.capabilities();
        let ep = descriptor.address;
        let number = ep.number() as usize;
        let size = descriptor.max_packet_size;

        let valid_size = match descriptor.transfer_type {
            TransferType::Control | TransferType::Bulk => {
                matches!(size, 8 | 16 | 32 | 64) && size <= caps.max_packet_size
            }
            TransferType::Interrupt => size > 0 && size <= caps.max_packet_size,
            TransferType::Isochronous => caps.isochronous && size > 0 && size <= 1023,
        };

        if ep.is_control()
            || number >= MAX_ENDPOINTS
            || number >= caps.endpoint_count as usize
            || !valid_size
        {
            debug!("DCD: rejecting endpoint {}", descriptor);
            return Err(UsbError::ConfigError);
        }

        self.dcd.open_endpoint(descriptor);
        *self.slot_mut(ep) = EndpointSlot {
            state: EndpointState::Idle,
            transfer_type: descriptor.transfer_type,
            max_packet_size: size,
        };
        trace!("DCD: opened {:#04x}", ep.as_u8());
        Ok(())
    }

    /// Closes every endpoint but endpoint 0.
    pub fn close_all(&mut self) {
        self.dcd.close_all();
        for (number, pair) in self.endpoints.iter_mut().enumerate() {
            if number != 0 {
                *pair = [EndpointSlot::CLOSED; 2];
            }
        }
    }

    /// Queues a single-packet transfer; completion arrives as an event.
    pub fn submit_transfer(
        &mut self,
        ep: EndpointAddress,
        transfer: Transfer<'_>,
    ) -> Result<(), UsbError> {
        if transfer.direction() != ep.direction() || ep.number() as usize >= MAX_ENDPOINTS {
            return Err(UsbError::ConfigError);
        }
        let slot = self.slot_mut(ep);
        match slot.state {
            EndpointState::Closed => return Err(UsbError::ConfigError),
            EndpointState::Busy | EndpointState::Stalled => return Err(UsbError::EndpointBusy),
            EndpointState::Idle => {}
        }
        if transfer.len() > slot.max_packet_size as usize {
            return Err(UsbError::ConfigError);
        }
        slot.state = EndpointState::Busy;
        trace!("DCD: submit {:#04x} len {}", ep.as_u8(), transfer.len());
        self.dcd.start_transfer(ep, transfer);
        Ok(())
    }

    /// Copies the data of the OUT transfer that just completed on `ep`.
    pub fn read(&mut self, ep: EndpointAddress, buf: &mut [u8]) -> usize {
        self.dcd.read_out(ep, buf)
    }

    pub fn stall(&mut self, ep: EndpointAddress) {
        if self.state(ep) == EndpointState::Closed {
            return;
        }
        self.dcd.set_stall(ep, true);
        self.slot_mut(ep).state = EndpointState::Stalled;
    }

    pub fn clear_stall(&mut self, ep: EndpointAddress) {
        if self.state(ep) != EndpointState::Stalled {
            return;
        }
        self.dcd.set_stall(ep, false);
        self.slot_mut(ep).state = EndpointState::Idle;
    }

    pub fn state(&self, ep: EndpointAddress) -> EndpointState {
        self.endpoints
            .get(ep.number() as usize)
            .map_or(EndpointState::Closed, |pair| {
                pair[ep.direction().index()].state
            })
    }

    pub fn is_stalled(&self, ep: EndpointAddress) -> bool {
        self.state(ep) == EndpointState::Stalled
    }

    pub fn max_packet_size(&self, ep: EndpointAddress) -> u16 {
        self.endpoints
            .get(ep.number() as usize)
            .map_or(0, |pair| pair[ep.direction().index()].max_packet_size)
    }

    pub fn transfer_type(&self, ep: EndpointAddress) -> Option<TransferType> {
        match self.state(ep) {
            EndpointState::Closed => None,
            _ => Some(self.endpoints[ep.number() as usize][ep.direction().index()].transfer_type),
        }
    }

    /// Endpoints currently open, endpoint 0 excluded.
    pub fn open_endpoints(&self) -> impl Iterator<Item = EndpointAddress> + '_ {
        self.endpoints
            .iter()
            .enumerate()
            .skip(1)
            .flat_map(|(number, pair)| {
                [Direction::Out, Direction::In]
                    .into_iter()
                    .filter(move |direction| {
                        pair[direction.index()].state != EndpointState::Closed
                    })
                    .map(move |direction| EndpointAddress::from_parts(number as u8, direction))
            })
    }

    /// Marks the transfer on `ep` as finished. Returns `false` for a
    /// completion nobody was waiting for.
    pub(crate) fn complete(&mut self, ep: EndpointAddress) -> bool {
        if ep.number() as usize >= MAX_ENDPOINTS {
            return false;
        }
        let slot = self.slot_mut(ep);
        if slot.state == EndpointState::Busy {
            slot.state = EndpointState::Idle;
            true
        } else {
            false
        }
    }

    /// A setup packet aborts whatever endpoint 0 was doing; the hardware has
    /// already cleared any stall on it.
    pub(crate) fn setup_received(&mut self) {
        self.reset_control();
    }

    /// Returns every busy endpoint to idle after completions were lost.
    pub(crate) fn abort_busy(&mut self) -> Vec<EndpointAddress, { 2 * MAX_ENDPOINTS }> {
        let mut aborted = Vec::new();
        for (number, pair) in self.endpoints.iter_mut().enumerate() {
            for direction in [Direction::Out, Direction::In] {
                let slot = &mut pair[direction.index()];
                if slot.state == EndpointState::Busy {
                    slot.state = EndpointState::Idle;
                    // Capacity covers every slot in the table.
                    let _ = aborted.push(EndpointAddress::from_parts(number as u8, direction));
                }
            }
        }
        aborted
    }

    /// Cancels every outstanding transfer and closes all non-control endpoints.
    pub(crate) fn bus_reset(&mut self) {
        self.dcd.close_all();
        self.dcd.set_address(0);
        self.reset_table();
    }

    pub(crate) fn set_address(&mut self, address: u8) {
        self.dcd.set_address(address);
    }

    pub(crate) fn remote_wakeup(&mut self, signalling: bool) {
        self.dcd.remote_wakeup(signalling);
    }

    fn reset_table(&mut self) {
        self.endpoints = [[EndpointSlot::CLOSED; 2]; MAX_ENDPOINTS];
        self.reset_control();
    }

    fn reset_control(&mut self) {
        let control = EndpointSlot::control(self.ep0_size as u16);
        self.endpoints[0] = [control; 2];
    }

    fn slot_mut(&mut self, ep: EndpointAddress) -> &mut EndpointSlot {
        &mut self.endpoints[ep.number() as usize][ep.direction().index()]
    }
}
