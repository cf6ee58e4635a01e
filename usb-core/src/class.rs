use crate::control::SetupPacket;
use crate::controller::{Controller, Dcd};
use crate::descriptor::{EndpointDescriptor, InterfaceDescriptor};
use crate::endpoint::EndpointAddress;
use crate::error::UsbError;

/// A USB class driver registered with [`UsbDevice`](crate::UsbDevice).
///
/// The device core resolves which driver owns which interface and endpoint
/// when the host selects a configuration, and routes requests and transfer
/// completions accordingly. Drivers never see events for endpoints they do
/// not own.
pub trait UsbClass<D: Dcd> {
    /// Whether this driver handles `interface` (alternate setting 0).
    fn claims(&self, interface: &InterfaceDescriptor) -> bool;

    /// An endpoint of a claimed interface was opened.
    fn endpoint_opened(&mut self, _interface: u8, _endpoint: &EndpointDescriptor) {}

    /// All claimed interfaces are open; start the first transfers.
    fn configured(&mut self, _controller: &mut Controller<D>) {}

    /// Bus reset or deconfiguration: forget endpoints and drop buffered data.
    fn reset(&mut self);

    /// Class request with a device-to-host data stage. Returns the number of
    /// bytes written to `buf`.
    fn control_in(&mut self, _setup: &SetupPacket, _buf: &mut [u8]) -> Result<usize, UsbError> {
        Err(UsbError::UnsupportedRequest)
    }

    /// Class request with a host-to-device data stage, or none (`data` empty).
    fn control_out(&mut self, _setup: &SetupPacket, _data: &[u8]) -> Result<(), UsbError> {
        Err(UsbError::UnsupportedRequest)
    }

    fn transfer_complete(
        &mut self,
        _controller: &mut Controller<D>,
        _ep: EndpointAddress,
        _bytes: u16,
    ) {
    }

    /// The controller lost data on `ep`; no transfer is outstanding on it any more.
    fn endpoint_overrun(&mut self, _controller: &mut Controller<D>, _ep: EndpointAddress) {}

    /// The host cleared a halt on `ep`.
    fn halt_cleared(&mut self, _controller: &mut Controller<D>, _ep: EndpointAddress) {}

    /// Periodic work, called on every service pass while configured.
    fn service(&mut self, _controller: &mut Controller<D>) {}
}
