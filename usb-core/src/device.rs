//! The device core: USB device state, standard request handling and routing
//! of class requests and transfer completions to class drivers.

use defmt::{Format, debug, info, trace, warn};

use crate::class::UsbClass;
use crate::control::{
    CONTROL_BUFFER_SIZE, ControlEvent, ControlPipe, Recipient, RequestType, Response, SetupPacket,
    feature, request,
};
use crate::controller::{Controller, Dcd, MAX_ENDPOINTS};
use crate::descriptor::{
    CONFIG_ATTRIBUTE_REMOTE_WAKEUP, CONFIG_ATTRIBUTE_SELF_POWERED, ConfigurationHeader,
    DescriptorIter, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor, Strings,
    descriptor_type, write_language_ids, write_string,
};
use crate::endpoint::{Direction, EndpointAddress, EndpointState};
use crate::error::UsbError;
use crate::event::{Event, EventConsumer};
use crate::time::{Instant, TimeSource};

/// Highest interface number (exclusive) a configuration may use.
pub const MAX_INTERFACES: usize = 8;

/// How long the device drives resume signalling for a remote wakeup.
pub const REMOTE_WAKEUP_SIGNAL_MS: u32 = 10;

#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// No bus reset seen yet.
    Unattached,
    /// Reset, answering on address 0.
    Default,
    Addressed,
    Configured,
}

/// Descriptors served to the host.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptors<'d> {
    pub device: DeviceDescriptor,
    /// Complete configuration descriptor, `wTotalLength` bytes.
    pub configuration: &'d [u8],
    pub strings: Strings<'d>,
}

/// Device state and the endpoint-0 control pipe for one USB peripheral.
///
/// Everything is driven from [`service`](Self::service); the only thing that
/// runs in interrupt context is the [`EventProducer`](crate::EventProducer)
/// matching `events`.
pub struct UsbDevice<'d, 'q, D: Dcd, T: TimeSource, const Q: usize> {
    controller: Controller<D>,
    events: EventConsumer<'q, Q>,
    clock: T,
    descriptors: Descriptors<'d>,
    config_header: ConfigurationHeader,
    control: ControlPipe,
    state: DeviceState,
    address: u8,
    configuration: u8,
    suspended: bool,
    remote_wakeup_enabled: bool,
    wakeup_started: Option<Instant>,
    /// Interface number to index of the claiming class driver.
    interfaces: [Option<u8>; MAX_INTERFACES],
    /// Endpoint to index of the owning class driver.
    endpoint_owners: [[Option<u8>; 2]; MAX_ENDPOINTS],
}

impl<'d, 'q, D: Dcd, T: TimeSource, const Q: usize> UsbDevice<'d, 'q, D, T, Q> {
    /// Validates the descriptors; a `ConfigError` here is fatal.
    pub fn new(
        dcd: D,
        events: EventConsumer<'q, Q>,
        clock: T,
        descriptors: Descriptors<'d>,
    ) -> Result<Self, UsbError> {
        let config_header = ConfigurationHeader::parse(descriptors.configuration)?;
        if descriptors.configuration.len() > CONTROL_BUFFER_SIZE
            || !matches!(descriptors.device.max_packet_size_0, 8 | 16 | 32 | 64)
        {
            return Err(UsbError::ConfigError);
        }
        for raw in DescriptorIter::new(descriptors.configuration) {
            raw?;
        }

        Ok(Self {
            controller: Controller::new(dcd, descriptors.device.max_packet_size_0),
            events,
            clock,
            descriptors,
            config_header,
            control: ControlPipe::new(),
            state: DeviceState::Unattached,
            address: 0,
            configuration: 0,
            suspended: false,
            remote_wakeup_enabled: false,
            wakeup_started: None,
            interfaces: [None; MAX_INTERFACES],
            endpoint_owners: [[None; 2]; MAX_ENDPOINTS],
        })
    }

    /// Resets the controller. The device stays unattached until the host
    /// resets the bus.
    pub fn init(&mut self) {
        info!("USB: init");
        self.controller.init();
        self.control.reset();
        self.state = DeviceState::Unattached;
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn remote_wakeup_enabled(&self) -> bool {
        self.remote_wakeup_enabled
    }

    pub fn controller(&self) -> &Controller<D> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller<D> {
        &mut self.controller
    }

    /// One bounded pass: drains at most a queue's worth of events, advances
    /// remote wakeup signalling, then lets every class driver move data.
    pub fn service(&mut self, classes: &mut [&mut dyn UsbClass<D>]) {
        let dropped = self.events.take_dropped();
        if dropped > 0 {
            warn!("USB: event queue overrun, {} events lost", dropped);
        }

        for _ in 0..self.events.capacity() {
            let Some(event) = self.events.pop() else {
                break;
            };
            self.handle_event(event, classes);
        }

        if dropped > 0 {
            self.recover_lost_events(classes);
        }

        self.poll_remote_wakeup();

        if self.state == DeviceState::Configured {
            for class in classes.iter_mut() {
                class.service(&mut self.controller);
            }
        }
    }

    /// Starts resume signalling. Only valid while suspended and after the
    /// host enabled remote wakeup.
    pub fn remote_wakeup(&mut self) -> Result<(), UsbError> {
        if !self.suspended || !self.remote_wakeup_enabled || self.wakeup_started.is_some() {
            return Err(UsbError::InvalidState);
        }
        debug!("USB: remote wakeup");
        self.controller.remote_wakeup(true);
        self.wakeup_started = Some(self.clock.now());
        Ok(())
    }

    fn poll_remote_wakeup(&mut self) {
        let Some(started) = self.wakeup_started else {
            return;
        };
        if self.clock.now().has_elapsed(started, REMOTE_WAKEUP_SIGNAL_MS) {
            self.controller.remote_wakeup(false);
            self.wakeup_started = None;
            self.suspended = false;
        }
    }

    fn handle_event(&mut self, event: Event, classes: &mut [&mut dyn UsbClass<D>]) {
        trace!("USB: event {}", event);
        if let Event::Setup(_) = event {
            self.controller.dcd_mut().setup_received();
        }
        match event {
            Event::BusReset => self.bus_reset(classes),
            Event::Unplugged => {
                self.bus_reset(classes);
                self.state = DeviceState::Unattached;
                info!("USB: unplugged");
            }
            Event::Suspend => {
                if self.state != DeviceState::Unattached {
                    self.suspended = true;
                }
            }
            Event::Resume => self.suspended = false,
            _ if self.state == DeviceState::Unattached => {
                trace!("USB: ignoring {} before bus reset", event);
            }
            Event::Setup(raw) => self.handle_setup(SetupPacket::parse(&raw), classes),
            Event::TransferComplete { ep, bytes } => self.handle_complete(ep, bytes, classes),
            Event::Overrun { ep } => self.handle_overrun(ep, classes),
        }
    }

    fn bus_reset(&mut self, classes: &mut [&mut dyn UsbClass<D>]) {
        if self.wakeup_started.take().is_some() {
            self.controller.remote_wakeup(false);
        }
        self.controller.bus_reset();
        self.control.reset();
        self.clear_owners();
        for class in classes.iter_mut() {
            class.reset();
        }
        self.state = DeviceState::Default;
        self.address = 0;
        self.configuration = 0;
        self.suspended = false;
        self.remote_wakeup_enabled = false;
        debug!("USB: bus reset");
    }

    fn handle_setup(&mut self, setup: SetupPacket, classes: &mut [&mut dyn UsbClass<D>]) {
        trace!("USB: setup {}", setup);
        self.controller.setup_received();
        self.control.begin(setup);

        let result = match self.dispatch(&setup, classes) {
            Ok(response) => self.control.respond(&mut self.controller, response),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            debug!("USB: stalling request {:#04x}: {}", setup.request, err);
            self.control.reject(&mut self.controller);
        }
    }

    fn dispatch(
        &mut self,
        setup: &SetupPacket,
        classes: &mut [&mut dyn UsbClass<D>],
    ) -> Result<Response, UsbError> {
        match (setup.kind(), setup.recipient()) {
            (RequestType::Standard, Recipient::Device) => self.standard_device(setup, classes),
            (RequestType::Standard, Recipient::Interface) => self.standard_interface(setup),
            (RequestType::Standard, Recipient::Endpoint) => self.standard_endpoint(setup, classes),
            (RequestType::Class, Recipient::Interface | Recipient::Endpoint) => {
                let owner = self.request_owner(setup).ok_or(UsbError::UnsupportedRequest)?;
                self.class_request(owner, setup, classes)
            }
            _ => Err(UsbError::UnsupportedRequest),
        }
    }

    fn class_request(
        &mut self,
        owner: u8,
        setup: &SetupPacket,
        classes: &mut [&mut dyn UsbClass<D>],
    ) -> Result<Response, UsbError> {
        let class = classes
            .get_mut(owner as usize)
            .ok_or(UsbError::UnsupportedRequest)?;
        match setup.direction() {
            Direction::In => {
                let len = class.control_in(setup, self.control.buffer_mut())?;
                Ok(Response::DataIn(len))
            }
            Direction::Out if setup.length == 0 => {
                class.control_out(setup, &[])?;
                Ok(Response::Accept)
            }
            Direction::Out => Ok(Response::DataOut),
        }
    }

    fn standard_device(
        &mut self,
        setup: &SetupPacket,
        classes: &mut [&mut dyn UsbClass<D>],
    ) -> Result<Response, UsbError> {
        match (setup.request, setup.direction()) {
            (request::GET_STATUS, Direction::In) => {
                let mut status = 0u8;
                if self.config_header.attributes & CONFIG_ATTRIBUTE_SELF_POWERED != 0 {
                    status |= 0x01;
                }
                if self.remote_wakeup_enabled {
                    status |= 0x02;
                }
                self.reply(&[status, 0])
            }
            (request::CLEAR_FEATURE | request::SET_FEATURE, Direction::Out) => {
                if setup.value != feature::DEVICE_REMOTE_WAKEUP
                    || self.config_header.attributes & CONFIG_ATTRIBUTE_REMOTE_WAKEUP == 0
                {
                    return Err(UsbError::UnsupportedRequest);
                }
                self.remote_wakeup_enabled = setup.request == request::SET_FEATURE;
                Ok(Response::Accept)
            }
            (request::SET_ADDRESS, Direction::Out) => {
                if setup.value > 127 || setup.index != 0 || setup.length != 0 {
                    return Err(UsbError::UnsupportedRequest);
                }
                match self.state {
                    // applied once the status stage completes
                    DeviceState::Default | DeviceState::Addressed => Ok(Response::Accept),
                    _ => Err(UsbError::InvalidState),
                }
            }
            (request::GET_DESCRIPTOR, Direction::In) => {
                let len = self.write_descriptor(setup)?;
                Ok(Response::DataIn(len))
            }
            (request::GET_CONFIGURATION, Direction::In) => match self.state {
                DeviceState::Addressed | DeviceState::Configured => {
                    let configuration = self.configuration;
                    self.reply(&[configuration])
                }
                _ => Err(UsbError::InvalidState),
            },
            (request::SET_CONFIGURATION, Direction::Out) => {
                self.set_configuration(setup.value as u8, classes)?;
                Ok(Response::Accept)
            }
            _ => Err(UsbError::UnsupportedRequest),
        }
    }

    fn standard_interface(&mut self, setup: &SetupPacket) -> Result<Response, UsbError> {
        if self.state != DeviceState::Configured {
            return Err(UsbError::InvalidState);
        }
        self.interface_owner(setup.interface())
            .ok_or(UsbError::UnsupportedRequest)?;

        match (setup.request, setup.direction()) {
            (request::GET_STATUS, Direction::In) => self.reply(&[0, 0]),
            (request::GET_INTERFACE, Direction::In) => self.reply(&[0]),
            (request::SET_INTERFACE, Direction::Out) if setup.value == 0 => Ok(Response::Accept),
            _ => Err(UsbError::UnsupportedRequest),
        }
    }

    fn standard_endpoint(
        &mut self,
        setup: &SetupPacket,
        classes: &mut [&mut dyn UsbClass<D>],
    ) -> Result<Response, UsbError> {
        let ep = setup.endpoint();
        if !ep.is_control()
            && (self.state != DeviceState::Configured
                || self.controller.state(ep) == EndpointState::Closed)
        {
            return Err(UsbError::UnsupportedRequest);
        }

        match (setup.request, setup.direction()) {
            (request::GET_STATUS, Direction::In) => {
                let halted = self.controller.is_stalled(ep) as u8;
                self.reply(&[halted, 0])
            }
            (request::CLEAR_FEATURE, Direction::Out) if setup.value == feature::ENDPOINT_HALT => {
                if !ep.is_control() {
                    self.controller.clear_stall(ep);
                    if let Some(class) = self
                        .endpoint_owner(ep)
                        .and_then(|owner| classes.get_mut(owner as usize))
                    {
                        class.halt_cleared(&mut self.controller, ep);
                    }
                }
                Ok(Response::Accept)
            }
            (request::SET_FEATURE, Direction::Out) if setup.value == feature::ENDPOINT_HALT => {
                if !ep.is_control() {
                    self.controller.stall(ep);
                }
                Ok(Response::Accept)
            }
            _ => Err(UsbError::UnsupportedRequest),
        }
    }

    fn write_descriptor(&mut self, setup: &SetupPacket) -> Result<usize, UsbError> {
        let (kind, index) = setup.descriptor();
        let buf = self.control.buffer_mut();
        match kind {
            descriptor_type::DEVICE => {
                let bytes = self.descriptors.device.to_bytes();
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            descriptor_type::CONFIGURATION if index == 0 => {
                let bytes = self.descriptors.configuration;
                buf[..bytes.len()].copy_from_slice(bytes);
                Ok(bytes.len())
            }
            descriptor_type::STRING if index == 0 => write_language_ids(buf),
            descriptor_type::STRING => {
                let text = self
                    .descriptors
                    .strings
                    .get(index)
                    .ok_or(UsbError::UnsupportedRequest)?;
                write_string(text, buf)
            }
            // full-speed only: no device qualifier
            _ => Err(UsbError::UnsupportedRequest),
        }
    }

    fn reply(&mut self, data: &[u8]) -> Result<Response, UsbError> {
        self.control.buffer_mut()[..data.len()].copy_from_slice(data);
        Ok(Response::DataIn(data.len()))
    }

    fn set_configuration(
        &mut self,
        value: u8,
        classes: &mut [&mut dyn UsbClass<D>],
    ) -> Result<(), UsbError> {
        match self.state {
            DeviceState::Addressed | DeviceState::Configured => {}
            _ => return Err(UsbError::InvalidState),
        }
        if value != 0 && value != self.config_header.value {
            return Err(UsbError::UnsupportedRequest);
        }
        if self.state == DeviceState::Configured {
            self.deconfigure(classes);
        }
        if value == 0 {
            return Ok(());
        }

        if let Err(err) = self.open_configuration(classes) {
            warn!("USB: configuration {} rejected: {}", value, err);
            self.deconfigure(classes);
            return Err(err);
        }
        self.state = DeviceState::Configured;
        self.configuration = value;

        for (index, class) in classes.iter_mut().enumerate() {
            if self.interfaces.contains(&Some(index as u8)) {
                class.configured(&mut self.controller);
            }
        }
        info!("USB: configured ({})", value);
        Ok(())
    }

    /// Hands every alternate-0 interface to the first class claiming it and
    /// opens the endpoints it declares.
    fn open_configuration(&mut self, classes: &mut [&mut dyn UsbClass<D>]) -> Result<(), UsbError> {
        let configuration = self.descriptors.configuration;
        let mut current: Option<(u8, u8)> = None;

        for raw in DescriptorIter::new(configuration).skip(1) {
            let raw = raw?;
            match raw.descriptor_type {
                descriptor_type::INTERFACE => {
                    let interface = InterfaceDescriptor::parse(raw.bytes)?;
                    if interface.alternate_setting != 0 {
                        current = None;
                        continue;
                    }
                    let owner = classes
                        .iter()
                        .position(|class| class.claims(&interface))
                        .ok_or(UsbError::ConfigError)? as u8;
                    let slot = self
                        .interfaces
                        .get_mut(interface.number as usize)
                        .ok_or(UsbError::ConfigError)?;
                    *slot = Some(owner);
                    current = Some((interface.number, owner));
                }
                descriptor_type::ENDPOINT => {
                    let Some((interface, owner)) = current else {
                        continue;
                    };
                    let endpoint = EndpointDescriptor::parse(raw.bytes)?;
                    self.controller.open_endpoint(&endpoint)?;
                    let address = endpoint.address;
                    self.endpoint_owners[address.number() as usize][address.direction().index()] =
                        Some(owner);
                    classes[owner as usize].endpoint_opened(interface, &endpoint);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn deconfigure(&mut self, classes: &mut [&mut dyn UsbClass<D>]) {
        self.controller.close_all();
        self.clear_owners();
        for class in classes.iter_mut() {
            class.reset();
        }
        self.state = DeviceState::Addressed;
        self.configuration = 0;
        debug!("USB: deconfigured");
    }

    fn clear_owners(&mut self) {
        self.interfaces = [None; MAX_INTERFACES];
        self.endpoint_owners = [[None; 2]; MAX_ENDPOINTS];
    }

    fn interface_owner(&self, interface: u8) -> Option<u8> {
        self.interfaces.get(interface as usize).copied().flatten()
    }

    fn endpoint_owner(&self, ep: EndpointAddress) -> Option<u8> {
        self.endpoint_owners
            .get(ep.number() as usize)
            .and_then(|pair| pair[ep.direction().index()])
    }

    fn request_owner(&self, setup: &SetupPacket) -> Option<u8> {
        match setup.recipient() {
            Recipient::Interface => self.interface_owner(setup.interface()),
            Recipient::Endpoint => self.endpoint_owner(setup.endpoint()),
            _ => None,
        }
    }

    fn handle_complete(
        &mut self,
        ep: EndpointAddress,
        bytes: u16,
        classes: &mut [&mut dyn UsbClass<D>],
    ) {
        if !self.controller.complete(ep) {
            trace!("USB: completion on idle endpoint {:#04x}", ep.as_u8());
            return;
        }
        if ep.is_control() {
            self.control_complete(ep, bytes, classes);
            return;
        }
        match self
            .endpoint_owner(ep)
            .and_then(|owner| classes.get_mut(owner as usize))
        {
            Some(class) => class.transfer_complete(&mut self.controller, ep, bytes),
            None => trace!("USB: completion on unowned endpoint {:#04x}", ep.as_u8()),
        }
    }

    fn control_complete(
        &mut self,
        ep: EndpointAddress,
        bytes: u16,
        classes: &mut [&mut dyn UsbClass<D>],
    ) {
        let result = match self.control.transfer_complete(&mut self.controller, ep, bytes) {
            Ok(ControlEvent::Pending) => Ok(()),
            Ok(ControlEvent::DataReceived) => self.deliver_control_data(classes),
            Ok(ControlEvent::Complete(setup)) => {
                self.request_complete(&setup);
                Ok(())
            }
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            debug!("USB: aborting control transfer: {}", err);
            self.control.reject(&mut self.controller);
        }
    }

    fn deliver_control_data(&mut self, classes: &mut [&mut dyn UsbClass<D>]) -> Result<(), UsbError> {
        let setup = self.control.setup().ok_or(UsbError::ProtocolError)?;
        if setup.kind() != RequestType::Class {
            return Err(UsbError::UnsupportedRequest);
        }
        let class = self
            .request_owner(&setup)
            .and_then(|owner| classes.get_mut(owner as usize))
            .ok_or(UsbError::UnsupportedRequest)?;
        class.control_out(&setup, self.control.data())?;
        self.control.accept_data(&mut self.controller)
    }

    fn request_complete(&mut self, setup: &SetupPacket) {
        let is_set_address = setup.kind() == RequestType::Standard
            && setup.recipient() == Recipient::Device
            && setup.request == request::SET_ADDRESS;
        if !is_set_address {
            return;
        }
        let address = setup.value as u8;
        self.controller.set_address(address);
        self.address = address;
        self.state = if address == 0 {
            DeviceState::Default
        } else {
            DeviceState::Addressed
        };
        info!("USB: address {}", address);
    }

    fn handle_overrun(&mut self, ep: EndpointAddress, classes: &mut [&mut dyn UsbClass<D>]) {
        warn!("USB: overrun on endpoint {:#04x}", ep.as_u8());
        self.controller.complete(ep);
        self.abort_transfer(ep, classes);
    }

    /// Any endpoint still waiting may have had its completion dropped, so
    /// every busy endpoint is treated as overrun.
    fn recover_lost_events(&mut self, classes: &mut [&mut dyn UsbClass<D>]) {
        let aborted = self.controller.abort_busy();
        let mut ep0_aborted = false;
        for ep in aborted {
            if ep.is_control() {
                ep0_aborted = true;
            } else {
                self.abort_transfer(ep, classes);
            }
        }
        if ep0_aborted {
            debug!("USB: aborting control transfer after lost events");
            self.control.reject(&mut self.controller);
        }
    }

    fn abort_transfer(&mut self, ep: EndpointAddress, classes: &mut [&mut dyn UsbClass<D>]) {
        if ep.is_control() {
            self.control.reject(&mut self.controller);
            return;
        }
        if let Some(class) = self
            .endpoint_owner(ep)
            .and_then(|owner| classes.get_mut(owner as usize))
        {
            class.endpoint_overrun(&mut self.controller, ep);
        }
    }
}

#[cfg(test)]
mod test;
