use core::cell::Cell;

use pretty_assertions::assert_eq;

use super::*;
use crate::controller::Transfer;
use crate::descriptor::{ConfigurationBuilder, EndpointDescriptor};
use crate::event::EventQueue;
use crate::mock::{Host, MockDcd, get_descriptor, standard_out};

const EP1_OUT: EndpointAddress = EndpointAddress::from_parts(1, Direction::Out);
const EP1_IN: EndpointAddress = EndpointAddress::from_parts(1, Direction::In);
const EP2_IN: EndpointAddress = EndpointAddress::from_parts(2, Direction::In);

const STRINGS: Strings<'static> = Strings {
    manufacturer: "Acme",
    product: "Test",
    serial_number: "1",
};

#[derive(Default)]
struct TestClass {
    interface: Option<u8>,
    configured: usize,
    resets: usize,
    services: usize,
    overruns: usize,
    completions: Vec<(EndpointAddress, u16)>,
    halts_cleared: Vec<EndpointAddress>,
    received: Vec<u8>,
}

impl UsbClass<MockDcd> for TestClass {
    fn claims(&self, interface: &InterfaceDescriptor) -> bool {
        interface.class == 0xff
    }

    fn endpoint_opened(&mut self, interface: u8, _endpoint: &EndpointDescriptor) {
        self.interface = Some(interface);
    }

    fn configured(&mut self, controller: &mut Controller<MockDcd>) {
        self.configured += 1;
        controller
            .submit_transfer(EP1_OUT, Transfer::Out(64))
            .unwrap();
    }

    fn reset(&mut self) {
        self.resets += 1;
        self.interface = None;
    }

    fn control_in(&mut self, setup: &SetupPacket, buf: &mut [u8]) -> Result<usize, UsbError> {
        match setup.request {
            0x01 => {
                buf[..3].copy_from_slice(&[1, 2, 3]);
                Ok(3)
            }
            0x02 => {
                for (i, byte) in buf[..64].iter_mut().enumerate() {
                    *byte = i as u8;
                }
                Ok(64)
            }
            _ => Err(UsbError::UnsupportedRequest),
        }
    }

    fn control_out(&mut self, setup: &SetupPacket, data: &[u8]) -> Result<(), UsbError> {
        match setup.request {
            0x10 => {
                self.received.extend_from_slice(data);
                Ok(())
            }
            _ => Err(UsbError::UnsupportedRequest),
        }
    }

    fn transfer_complete(
        &mut self,
        _controller: &mut Controller<MockDcd>,
        ep: EndpointAddress,
        bytes: u16,
    ) {
        self.completions.push((ep, bytes));
    }

    fn endpoint_overrun(&mut self, _controller: &mut Controller<MockDcd>, _ep: EndpointAddress) {
        self.overruns += 1;
    }

    fn halt_cleared(&mut self, _controller: &mut Controller<MockDcd>, ep: EndpointAddress) {
        self.halts_cleared.push(ep);
    }

    fn service(&mut self, _controller: &mut Controller<MockDcd>) {
        self.services += 1;
    }
}

/// One vendor interface with a bulk pair, plus an alternate setting whose
/// endpoint must never be opened.
fn build_configuration(buf: &mut [u8], attributes: u8) -> usize {
    let mut builder = ConfigurationBuilder::new(buf, 1, attributes, 100).unwrap();
    builder.interface(0, 2, 0xff, 0, 0).unwrap();
    builder
        .endpoint(&EndpointDescriptor::bulk(EP1_OUT, 64))
        .unwrap();
    builder
        .endpoint(&EndpointDescriptor::bulk(EP1_IN, 64))
        .unwrap();
    builder
        .write(descriptor_type::INTERFACE, &[0, 1, 1, 0xff, 0, 0, 0])
        .unwrap();
    builder
        .endpoint(&EndpointDescriptor::bulk(EP2_IN, 64))
        .unwrap();
    builder.finish()
}

fn descriptors(configuration: &[u8]) -> Descriptors<'_> {
    Descriptors {
        device: DeviceDescriptor::new(0x1209, 0x0001, 64),
        configuration,
        strings: STRINGS,
    }
}

macro_rules! setup {
    ($device:ident, $host:ident, $class:ident, $clock:ident) => {
        setup!($device, $host, $class, $clock, CONFIG_ATTRIBUTE_REMOTE_WAKEUP);
    };
    ($device:ident, $host:ident, $class:ident, $clock:ident, $attributes:expr) => {
        let mut config = [0u8; 64];
        let len = build_configuration(&mut config, $attributes);
        let $clock = Cell::new(0u32);
        let mut queue = EventQueue::<16>::new();
        let (producer, consumer) = queue.split();
        let mut $device = UsbDevice::new(
            MockDcd::new(),
            consumer,
            || $clock.get(),
            descriptors(&config[..len]),
        )
        .unwrap();
        $device.init();
        let mut $host = Host::new(producer);
        let mut $class = TestClass::default();
    };
}

const fn setup_packet(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> SetupPacket {
    SetupPacket {
        request_type,
        request,
        value,
        index,
        length,
    }
}

#[test]
fn invalid_descriptors_are_rejected_up_front() {
    let mut config = [0u8; 64];
    let len = build_configuration(&mut config, 0);
    let mut queue = EventQueue::<4>::new();
    let (_, consumer) = queue.split();
    let wrong_length = UsbDevice::new(MockDcd::new(), consumer, || 0u32, descriptors(&config[..len - 1]));
    assert!(matches!(wrong_length, Err(UsbError::ConfigError)));

    let mut queue = EventQueue::<4>::new();
    let (_, consumer) = queue.split();
    let mut bad_ep0 = descriptors(&config[..len]);
    bad_ep0.device.max_packet_size_0 = 12;
    let bad_ep0 = UsbDevice::new(MockDcd::new(), consumer, || 0u32, bad_ep0);
    assert!(matches!(bad_ep0, Err(UsbError::ConfigError)));
}

#[test]
fn nothing_is_answered_before_the_first_bus_reset() {
    setup!(device, host, class, clock);

    assert!(device.controller().dcd().is_initialized());
    assert_eq!(device.state(), DeviceState::Unattached);
    assert_eq!(
        host.control_read(&mut device, &mut [&mut class], get_descriptor(0x01, 0, 64)),
        None
    );
    assert_eq!(device.state(), DeviceState::Unattached);
}

#[test]
fn bus_reset_enters_the_default_state() {
    setup!(device, host, class, clock);

    host.bus_reset(&mut device, &mut [&mut class]);

    assert_eq!(device.state(), DeviceState::Default);
    assert_eq!(device.address(), 0);
    assert_eq!(class.resets, 1);
}

#[test]
fn device_descriptor_is_truncated_to_wlength() {
    setup!(device, host, class, clock);
    host.bus_reset(&mut device, &mut [&mut class]);

    let full = host
        .control_read(&mut device, &mut [&mut class], get_descriptor(0x01, 0, 64))
        .unwrap();
    let head = host
        .control_read(&mut device, &mut [&mut class], get_descriptor(0x01, 0, 8))
        .unwrap();

    assert_eq!(full.as_slice(), &DeviceDescriptor::new(0x1209, 0x0001, 64).to_bytes());
    assert_eq!(head.as_slice(), &full[..8]);
}

#[test]
fn configuration_descriptor_is_served_whole() {
    setup!(device, host, class, clock);
    host.bus_reset(&mut device, &mut [&mut class]);

    let config = host
        .control_read(&mut device, &mut [&mut class], get_descriptor(0x02, 0, 255))
        .unwrap();

    assert_eq!(config.len(), 9 + 9 + 7 + 7 + 9 + 7);
    assert_eq!(&config[..2], &[9, 0x02]);
}

#[test]
fn string_descriptors_are_served() {
    setup!(device, host, class, clock);
    host.bus_reset(&mut device, &mut [&mut class]);

    let languages = host
        .control_read(&mut device, &mut [&mut class], get_descriptor(0x03, 0, 255))
        .unwrap();
    let product = host
        .control_read(&mut device, &mut [&mut class], get_descriptor(0x03, 2, 255))
        .unwrap();

    assert_eq!(languages.as_slice(), &[4, 0x03, 0x09, 0x04]);
    assert_eq!(product.as_slice(), &[10, 0x03, b'T', 0, b'e', 0, b's', 0, b't', 0]);
}

#[test]
fn unknown_descriptors_stall() {
    setup!(device, host, class, clock);
    host.bus_reset(&mut device, &mut [&mut class]);

    assert_eq!(
        host.control_read(&mut device, &mut [&mut class], get_descriptor(0x06, 0, 10)),
        None
    );
    assert_eq!(
        host.control_read(&mut device, &mut [&mut class], get_descriptor(0x03, 4, 255)),
        None
    );
    assert!(device.controller().dcd().is_stalled(EndpointAddress::CONTROL_IN));

    // the next setup packet clears the stall
    assert!(host
        .control_read(&mut device, &mut [&mut class], get_descriptor(0x01, 0, 18))
        .is_some());
}

#[test]
fn set_address_takes_effect_after_the_status_stage() {
    setup!(device, host, class, clock);
    host.bus_reset(&mut device, &mut [&mut class]);

    host.send(
        &mut device,
        &mut [&mut class],
        Event::Setup(standard_out(request::SET_ADDRESS, 5).to_bytes()),
    );
    assert_eq!(device.address(), 0);
    assert_eq!(device.controller().dcd().address(), 0);

    let status = device
        .controller_mut()
        .dcd_mut()
        .take_in(EndpointAddress::CONTROL_IN)
        .unwrap();
    assert!(status.is_empty());
    host.send(
        &mut device,
        &mut [&mut class],
        Event::TransferComplete {
            ep: EndpointAddress::CONTROL_IN,
            bytes: 0,
        },
    );

    assert_eq!(device.address(), 5);
    assert_eq!(device.controller().dcd().address(), 5);
    assert_eq!(device.state(), DeviceState::Addressed);
}

#[test]
fn device_only_answers_on_its_address() {
    setup!(device, host, class, clock);
    host.bus_reset(&mut device, &mut [&mut class]);
    assert!(host.set_address(&mut device, &mut [&mut class], 5));

    host.address = 0;
    assert_eq!(
        host.control_read(&mut device, &mut [&mut class], get_descriptor(0x01, 0, 18)),
        None
    );

    host.address = 5;
    assert!(host
        .control_read(&mut device, &mut [&mut class], get_descriptor(0x01, 0, 18))
        .is_some());
}

#[test]
fn addresses_above_127_stall() {
    setup!(device, host, class, clock);
    host.bus_reset(&mut device, &mut [&mut class]);

    assert!(!host.set_address(&mut device, &mut [&mut class], 128));
    assert_eq!(device.state(), DeviceState::Default);
}

#[test]
fn address_zero_returns_to_default() {
    setup!(device, host, class, clock);
    host.bus_reset(&mut device, &mut [&mut class]);
    assert!(host.set_address(&mut device, &mut [&mut class], 5));

    assert!(host.set_address(&mut device, &mut [&mut class], 0));

    assert_eq!(device.state(), DeviceState::Default);
    assert_eq!(device.address(), 0);
}

#[test]
fn set_configuration_opens_exactly_the_declared_endpoints() {
    setup!(device, host, class, clock);

    assert!(host.enumerate(&mut device, &mut [&mut class], 5, 1));

    assert_eq!(device.state(), DeviceState::Configured);
    assert_eq!(device.configuration(), 1);
    let open: Vec<EndpointAddress> = device
        .controller()
        .dcd()
        .open_endpoints()
        .iter()
        .map(|endpoint| endpoint.address)
        .collect();
    assert_eq!(open, [EP1_OUT, EP1_IN]);
    assert_eq!(device.controller().state(EP2_IN), EndpointState::Closed);
    assert_eq!(class.interface, Some(0));
    assert_eq!(class.configured, 1);
    assert_eq!(device.controller().dcd().armed_out(EP1_OUT), Some(64));

    let value = host
        .control_read(
            &mut device,
            &mut [&mut class],
            setup_packet(0x80, request::GET_CONFIGURATION, 0, 0, 1),
        )
        .unwrap();
    assert_eq!(value.as_slice(), &[1]);
}

#[test]
fn configuration_needs_an_address() {
    setup!(device, host, class, clock);
    host.bus_reset(&mut device, &mut [&mut class]);

    assert!(!host.set_configuration(&mut device, &mut [&mut class], 1));
    assert_eq!(device.state(), DeviceState::Default);
}

#[test]
fn unknown_configuration_values_stall() {
    setup!(device, host, class, clock);
    host.bus_reset(&mut device, &mut [&mut class]);
    host.set_address(&mut device, &mut [&mut class], 3);

    assert!(!host.set_configuration(&mut device, &mut [&mut class], 2));
    assert_eq!(device.state(), DeviceState::Addressed);
}

#[test]
fn unclaimed_interfaces_fail_configuration() {
    setup!(device, host, class, clock);
    host.bus_reset(&mut device, &mut [&mut class]);
    host.set_address(&mut device, &mut [&mut class], 3);

    assert!(!host.set_configuration(&mut device, &mut [], 1));

    assert_eq!(device.state(), DeviceState::Addressed);
    assert!(device.controller().dcd().open_endpoints().is_empty());
}

#[test]
fn configuration_zero_deconfigures() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);
    let resets = class.resets;

    assert!(host.set_configuration(&mut device, &mut [&mut class], 0));

    assert_eq!(device.state(), DeviceState::Addressed);
    assert_eq!(device.configuration(), 0);
    assert!(device.controller().dcd().open_endpoints().is_empty());
    assert_eq!(class.resets, resets + 1);
}

#[test]
fn bus_reset_is_idempotent() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);

    host.bus_reset(&mut device, &mut [&mut class]);
    let first = (device.state(), device.address(), device.configuration());
    host.bus_reset(&mut device, &mut [&mut class]);
    let second = (device.state(), device.address(), device.configuration());

    assert_eq!(first, (DeviceState::Default, 0, 0));
    assert_eq!(second, first);
    assert_eq!(device.controller().dcd().address(), 0);
    assert!(device.controller().dcd().open_endpoints().is_empty());
    assert_eq!(device.controller().open_endpoints().count(), 0);
}

#[test]
fn packet_aligned_short_replies_end_with_a_zero_length_packet() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);

    // 64 bytes offered, 255 asked: a ZLP has to follow or the read never ends
    let long = host
        .control_read(&mut device, &mut [&mut class], setup_packet(0xa1, 0x02, 0, 0, 255))
        .unwrap();
    let exact = host
        .control_read(&mut device, &mut [&mut class], setup_packet(0xa1, 0x02, 0, 0, 64))
        .unwrap();

    assert_eq!(long.len(), 64);
    assert_eq!(exact.as_slice(), long.as_slice());
}

#[test]
fn class_requests_reach_the_owner() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);

    let reply = host
        .control_read(&mut device, &mut [&mut class], setup_packet(0xa1, 0x01, 0, 0, 8))
        .unwrap();
    let written = host.control_write(
        &mut device,
        &mut [&mut class],
        setup_packet(0x21, 0x10, 0, 0, 3),
        &[7, 8, 9],
    );
    let without_data =
        host.control_write(&mut device, &mut [&mut class], setup_packet(0x21, 0x10, 0, 0, 0), &[]);

    assert_eq!(reply.as_slice(), &[1, 2, 3]);
    assert!(written);
    assert!(without_data);
    assert_eq!(class.received, [7, 8, 9]);
}

#[test]
fn class_requests_to_unclaimed_interfaces_stall() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);

    assert_eq!(
        host.control_read(&mut device, &mut [&mut class], setup_packet(0xa1, 0x01, 0, 3, 8)),
        None
    );
}

#[test]
fn vendor_requests_stall() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);

    assert_eq!(
        host.control_read(&mut device, &mut [&mut class], setup_packet(0xc0, 0x01, 0, 0, 8)),
        None
    );
}

#[test]
fn data_beyond_wlength_is_a_protocol_error() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);

    let accepted = host.control_write(
        &mut device,
        &mut [&mut class],
        setup_packet(0x21, 0x10, 0, 0, 4),
        &[1, 2, 3, 4, 5, 6, 7, 8],
    );

    assert!(!accepted);
    assert!(class.received.is_empty());
    assert!(device.controller().dcd().is_stalled(EndpointAddress::CONTROL_OUT));
    assert_eq!(device.state(), DeviceState::Configured);
}

#[test]
fn get_status_reflects_remote_wakeup() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);
    let get_status = setup_packet(0x80, request::GET_STATUS, 0, 0, 2);

    let before = host.control_read(&mut device, &mut [&mut class], get_status).unwrap();
    assert!(host.control_write(
        &mut device,
        &mut [&mut class],
        standard_out(request::SET_FEATURE, feature::DEVICE_REMOTE_WAKEUP),
        &[],
    ));
    let after = host.control_read(&mut device, &mut [&mut class], get_status).unwrap();

    assert_eq!(before.as_slice(), &[0, 0]);
    assert_eq!(after.as_slice(), &[2, 0]);
    assert!(device.remote_wakeup_enabled());
}

#[test]
fn remote_wakeup_feature_needs_the_configuration_attribute() {
    setup!(device, host, class, clock, 0);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);

    assert!(!host.control_write(
        &mut device,
        &mut [&mut class],
        standard_out(request::SET_FEATURE, feature::DEVICE_REMOTE_WAKEUP),
        &[],
    ));
    assert!(!device.remote_wakeup_enabled());
}

#[test]
fn remote_wakeup_needs_suspend_and_permission() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);

    assert_eq!(device.remote_wakeup(), Err(UsbError::InvalidState));

    host.send(&mut device, &mut [&mut class], Event::Suspend);
    assert!(device.is_suspended());
    assert_eq!(device.remote_wakeup(), Err(UsbError::InvalidState));
    assert_eq!(device.controller().dcd().wakeup_count(), 0);
}

#[test]
fn remote_wakeup_signals_for_ten_milliseconds_across_a_wrap() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);
    host.control_write(
        &mut device,
        &mut [&mut class],
        standard_out(request::SET_FEATURE, feature::DEVICE_REMOTE_WAKEUP),
        &[],
    );
    host.send(&mut device, &mut [&mut class], Event::Suspend);
    clock.set(u32::MAX - 3);

    assert_eq!(device.remote_wakeup(), Ok(()));
    assert!(device.controller().dcd().is_signalling());
    assert_eq!(device.remote_wakeup(), Err(UsbError::InvalidState));

    clock.set(5);
    device.service(&mut [&mut class]);
    assert!(device.controller().dcd().is_signalling());

    clock.set(6);
    device.service(&mut [&mut class]);
    assert!(!device.controller().dcd().is_signalling());
    assert!(!device.is_suspended());
    assert_eq!(device.controller().dcd().wakeup_count(), 1);
}

#[test]
fn suspend_and_resume_toggle_the_flag() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);

    host.send(&mut device, &mut [&mut class], Event::Suspend);
    assert!(device.is_suspended());
    host.send(&mut device, &mut [&mut class], Event::Resume);
    assert!(!device.is_suspended());
    assert_eq!(device.state(), DeviceState::Configured);
}

#[test]
fn unplugging_returns_to_unattached() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);

    host.send(&mut device, &mut [&mut class], Event::Unplugged);

    assert_eq!(device.state(), DeviceState::Unattached);
    assert_eq!(device.address(), 0);
    assert!(device.controller().dcd().open_endpoints().is_empty());
}

#[test]
fn endpoint_halt_can_be_set_queried_and_cleared() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);
    let status = setup_packet(0x82, request::GET_STATUS, 0, 0x81, 2);

    assert!(host.control_write(
        &mut device,
        &mut [&mut class],
        setup_packet(0x02, request::SET_FEATURE, feature::ENDPOINT_HALT, 0x81, 0),
        &[],
    ));
    let halted = host.control_read(&mut device, &mut [&mut class], status).unwrap();
    assert!(host.control_write(
        &mut device,
        &mut [&mut class],
        setup_packet(0x02, request::CLEAR_FEATURE, feature::ENDPOINT_HALT, 0x81, 0),
        &[],
    ));
    let cleared = host.control_read(&mut device, &mut [&mut class], status).unwrap();

    assert_eq!(halted.as_slice(), &[1, 0]);
    assert_eq!(cleared.as_slice(), &[0, 0]);
    assert_eq!(class.halts_cleared, [EP1_IN]);
}

#[test]
fn endpoint_requests_for_closed_endpoints_stall() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);

    assert_eq!(
        host.control_read(
            &mut device,
            &mut [&mut class],
            setup_packet(0x82, request::GET_STATUS, 0, 0x82, 2),
        ),
        None
    );
}

#[test]
fn completions_and_overruns_reach_the_endpoint_owner() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);

    assert!(host.bulk_out(&mut device, &mut [&mut class], EP1_OUT, &[1, 2, 3, 4]));
    host.send(&mut device, &mut [&mut class], Event::Overrun { ep: EP1_IN });

    assert_eq!(class.completions, [(EP1_OUT, 4)]);
    assert_eq!(class.overruns, 1);
}

#[test]
fn lost_completions_release_busy_endpoints() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);
    assert_eq!(device.controller().state(EP1_OUT), EndpointState::Busy);

    for _ in 0..15 {
        host.post(Event::Resume).unwrap();
    }
    let lost = host.post(Event::TransferComplete { ep: EP1_OUT, bytes: 4 });
    device.service(&mut [&mut class]);

    assert!(matches!(lost, Err(UsbError::Overrun)));
    assert!(class.completions.is_empty());
    assert_eq!(class.overruns, 1);
    assert_eq!(device.controller().state(EP1_OUT), EndpointState::Idle);
    assert_eq!(device.state(), DeviceState::Configured);
}

#[test]
fn lost_events_abort_a_pending_control_transfer() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);

    host.post(Event::Setup(setup_packet(0xa1, 0x02, 0, 0, 64).to_bytes()))
        .unwrap();
    device.service(&mut [&mut class]);
    assert_eq!(
        device.controller().state(EndpointAddress::CONTROL_IN),
        EndpointState::Busy
    );

    for _ in 0..16 {
        let _ = host.post(Event::Resume);
    }
    device.service(&mut [&mut class]);

    let dcd = device.controller().dcd();
    assert!(dcd.is_stalled(EndpointAddress::CONTROL_IN));
    assert!(dcd.is_stalled(EndpointAddress::CONTROL_OUT));
    assert_eq!(class.overruns, 1);

    // The next setup packet recovers endpoint 0.
    let reply = host
        .control_read(&mut device, &mut [&mut class], setup_packet(0xa1, 0x01, 0, 0, 8))
        .unwrap();
    assert_eq!(reply.as_slice(), &[1, 2, 3]);
}

#[test]
fn every_dequeued_setup_is_reported_to_the_controller() {
    setup!(device, host, class, clock);

    // ignored before the first bus reset, but still taken off the queue
    host.control_read(&mut device, &mut [&mut class], get_descriptor(0x01, 0, 18));
    host.bus_reset(&mut device, &mut [&mut class]);
    assert_eq!(device.controller().dcd().setup_count(), 1);

    host.enumerate(&mut device, &mut [&mut class], 5, 1);
    host.control_read(&mut device, &mut [&mut class], get_descriptor(0x01, 0, 18));

    assert_eq!(device.controller().dcd().setup_count(), 4);
}

#[test]
fn control_writes_span_several_packets() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);
    let data: Vec<u8> = (0..150).map(|i| i as u8).collect();

    // 64 + 64 + 22
    let accepted = host.control_write(
        &mut device,
        &mut [&mut class],
        setup_packet(0x21, 0x10, 0, 0, 150),
        &data,
    );

    assert!(accepted);
    assert_eq!(class.received.len(), 150);
    assert_eq!(class.received, data);
    assert_eq!(device.controller().dcd().setup_count(), 3);
}

#[test]
fn classes_are_serviced_only_while_configured() {
    setup!(device, host, class, clock);
    host.bus_reset(&mut device, &mut [&mut class]);
    assert_eq!(class.services, 0);

    host.enumerate(&mut device, &mut [&mut class], 5, 1);
    let services = class.services;
    device.service(&mut [&mut class]);

    assert!(services > 0);
    assert_eq!(class.services, services + 1);
}

#[test]
fn interface_requests_answer_for_alternate_zero_only() {
    setup!(device, host, class, clock);
    host.enumerate(&mut device, &mut [&mut class], 5, 1);

    let alternate = host
        .control_read(
            &mut device,
            &mut [&mut class],
            setup_packet(0x81, request::GET_INTERFACE, 0, 0, 1),
        )
        .unwrap();

    assert_eq!(alternate.as_slice(), &[0]);
    assert!(host.control_write(
        &mut device,
        &mut [&mut class],
        setup_packet(0x01, request::SET_INTERFACE, 0, 0, 0),
        &[],
    ));
    assert!(!host.control_write(
        &mut device,
        &mut [&mut class],
        setup_packet(0x01, request::SET_INTERFACE, 1, 0, 0),
        &[],
    ));
}
