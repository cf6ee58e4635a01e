//! Runs the embassy USB driver on behalf of the device core. Hardware
//! activity becomes [`Event`]s on the core's queue, and every [`Dcd`] call
//! the core makes becomes a request the bridge task carries out.

use core::cell::RefCell;

use defmt::{debug, info, trace, warn};
use embassy_executor::SpawnToken;
use embassy_futures::join::join4;
use embassy_futures::select::{Either, select};
use embassy_stm32::{peripherals, usb};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_usb::driver::{
    Bus, ControlPipe, Direction as BusDirection, Driver, Endpoint, EndpointAddress as BusAddress,
    EndpointError, EndpointIn, EndpointOut, EndpointType, Event as BusEvent,
};
use midi::descriptor::{EP_IN, EP_OUT};
use static_cell::StaticCell;
use usb_core::control::{RequestType, request};
use usb_core::controller::FULL_SPEED_MAX_PACKET;
use usb_core::{
    Capabilities, Dcd, Direction, EndpointAddress, EndpointDescriptor, Event, EventProducer,
    SetupPacket, Transfer,
};

pub const EVENT_QUEUE_SIZE: usize = config::EVENT_QUEUE_SIZE;

const MAX_PACKET: usize = FULL_SPEED_MAX_PACKET as usize;

type Packet = heapless::Vec<u8, MAX_PACKET>;

pub type UsbDriver<'d> = usb::Driver<'d, peripherals::USB>;

enum ControlAction {
    In(Packet),
    Out(u16),
    Stall,
}

/// An endpoint-0 action, tagged with the number of the setup packet it
/// answers. Setup packets are numbered in the order they were queued.
struct ControlRequest {
    setup: u32,
    action: ControlAction,
}

enum BusRequest {
    Enable(EndpointAddress, bool),
    Stall(EndpointAddress, bool),
    RemoteWakeup,
}

static CONTROL_REQUESTS: Channel<CriticalSectionRawMutex, ControlRequest, 4> = Channel::new();
static BUS_REQUESTS: Channel<CriticalSectionRawMutex, BusRequest, 8> = Channel::new();
static BULK_OUT_ARM: Signal<CriticalSectionRawMutex, u16> = Signal::new();
static BULK_IN_DATA: Signal<CriticalSectionRawMutex, Packet> = Signal::new();

/// Last OUT data per endpoint number, read back through [`Dcd::read_out`].
static RECEIVED: Mutex<CriticalSectionRawMutex, RefCell<[Packet; 2]>> =
    Mutex::new(RefCell::new([Packet::new(), Packet::new()]));

fn packet(data: &[u8]) -> Packet {
    let len = data.len().min(MAX_PACKET);
    Packet::from_slice(&data[..len]).unwrap_or_default()
}

fn store(ep: EndpointAddress, data: &[u8]) {
    RECEIVED.lock(|received| {
        if let Some(slot) = received.borrow_mut().get_mut(ep.number() as usize) {
            *slot = packet(data);
        }
    });
}

fn request_bus(request: BusRequest) {
    if BUS_REQUESTS.try_send(request).is_err() {
        warn!("USB bridge: bus request queue full");
    }
}

fn request_control(request: ControlRequest) {
    if CONTROL_REQUESTS.try_send(request).is_err() {
        warn!("USB bridge: control request queue full");
    }
}

fn bus_address(ep: EndpointAddress) -> BusAddress {
    let direction = match ep.direction() {
        Direction::In => BusDirection::In,
        Direction::Out => BusDirection::Out,
    };
    BusAddress::from_parts(ep.number() as usize, direction)
}

/// The core's handle on the bridge. Every call returns immediately.
pub struct BridgeDcd {
    /// Number of the setup packet the core is currently answering.
    setup: u32,
}

impl BridgeDcd {
    pub const fn new() -> Self {
        Self { setup: 0 }
    }

    fn request_control(&self, action: ControlAction) {
        request_control(ControlRequest {
            setup: self.setup,
            action,
        });
    }
}

impl Dcd for BridgeDcd {
    fn capabilities(&self) -> Capabilities {
        // endpoint 0 and the MIDI bulk pair
        Capabilities::full_speed(2)
    }

    fn init(&mut self) {
        CONTROL_REQUESTS.clear();
        BUS_REQUESTS.clear();
        BULK_OUT_ARM.reset();
        BULK_IN_DATA.reset();
        RECEIVED.lock(|received| received.borrow_mut().iter_mut().for_each(Packet::clear));
    }

    fn set_address(&mut self, address: u8) {
        // the driver latches it in accept_set_address
        trace!("USB bridge: address {}", address);
    }

    fn open_endpoint(&mut self, descriptor: &EndpointDescriptor) {
        request_bus(BusRequest::Enable(descriptor.address, true));
    }

    fn close_all(&mut self) {
        BULK_OUT_ARM.reset();
        BULK_IN_DATA.reset();
        request_bus(BusRequest::Enable(EP_OUT, false));
        request_bus(BusRequest::Enable(EP_IN, false));
    }

    fn start_transfer(&mut self, ep: EndpointAddress, transfer: Transfer<'_>) {
        match (ep.number(), transfer) {
            (0, Transfer::In(data)) => self.request_control(ControlAction::In(packet(data))),
            (0, Transfer::Out(len)) => self.request_control(ControlAction::Out(len)),
            (_, Transfer::In(data)) if ep == EP_IN => BULK_IN_DATA.signal(packet(data)),
            (_, Transfer::Out(len)) if ep == EP_OUT => BULK_OUT_ARM.signal(len),
            _ => warn!("USB bridge: no driver endpoint for {:#04x}", ep.as_u8()),
        }
    }

    fn read_out(&mut self, ep: EndpointAddress, buf: &mut [u8]) -> usize {
        RECEIVED.lock(|received| {
            let received = received.borrow();
            let Some(data) = received.get(ep.number() as usize) else {
                return 0;
            };
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            len
        })
    }

    fn set_stall(&mut self, ep: EndpointAddress, stalled: bool) {
        if ep.is_control() {
            // endpoint 0 stalls end with the next setup packet
            if stalled {
                self.request_control(ControlAction::Stall);
            }
            return;
        }
        request_bus(BusRequest::Stall(ep, stalled));
    }

    fn remote_wakeup(&mut self, signalling: bool) {
        // the driver times the resume signalling itself
        if signalling {
            request_bus(BusRequest::RemoteWakeup);
        }
    }

    fn setup_received(&mut self) {
        self.setup = self.setup.wrapping_add(1);
    }
}

type Events<'a> = RefCell<&'a mut EventProducer<'static, EVENT_QUEUE_SIZE>>;

/// Returns whether `event` made it into the queue.
fn try_post(events: &Events<'_>, event: Event) -> bool {
    events.borrow_mut().push(event).is_ok()
}

fn post(events: &Events<'_>, event: Event) {
    // a full queue is counted and recovered from by the service pass
    try_post(events, event);
}

pub struct BridgeTaskState<'d> {
    bus: <UsbDriver<'d> as Driver<'d>>::Bus,
    control: <UsbDriver<'d> as Driver<'d>>::ControlPipe,
    ep_out: <UsbDriver<'d> as Driver<'d>>::EndpointOut,
    ep_in: <UsbDriver<'d> as Driver<'d>>::EndpointIn,
    events: EventProducer<'static, EVENT_QUEUE_SIZE>,
}

pub static BRIDGE_TASK_STATE: StaticCell<BridgeTaskState> = StaticCell::new();

pub fn create_bridge_task(
    mut driver: UsbDriver<'static>,
    events: EventProducer<'static, EVENT_QUEUE_SIZE>,
) -> SpawnToken<impl Sized> {
    let ep_out = defmt::unwrap!(driver.alloc_endpoint_out(
        EndpointType::Bulk,
        Some(bus_address(EP_OUT)),
        config::MIDI_EP_SIZE,
        0,
    ));
    let ep_in = defmt::unwrap!(driver.alloc_endpoint_in(
        EndpointType::Bulk,
        Some(bus_address(EP_IN)),
        config::MIDI_EP_SIZE,
        0,
    ));
    let (bus, control) = driver.start(config::ENDPOINT0_SIZE as u16);

    bridge_task(BRIDGE_TASK_STATE.init(BridgeTaskState {
        bus,
        control,
        ep_out,
        ep_in,
        events,
    }))
}

#[embassy_executor::task]
pub async fn bridge_task(state: &'static mut BridgeTaskState<'static>) {
    info!("USB bridge: task starting");

    let events = RefCell::new(&mut state.events);
    join4(
        bus_loop(&mut state.bus, &events),
        control_loop(&mut state.control, &events),
        bulk_out_loop(&mut state.ep_out, &events),
        bulk_in_loop(&mut state.ep_in, &events),
    )
    .await;
}

async fn bus_loop<B: Bus>(bus: &mut B, events: &Events<'_>) {
    loop {
        match select(bus.poll(), BUS_REQUESTS.receive()).await {
            Either::First(event) => match event {
                BusEvent::PowerDetected => {
                    debug!("USB bridge: VBUS detected");
                    bus.enable().await;
                }
                BusEvent::PowerRemoved => {
                    bus.disable().await;
                    post(events, Event::Unplugged);
                }
                BusEvent::Reset => post(events, Event::BusReset),
                BusEvent::Suspend => post(events, Event::Suspend),
                BusEvent::Resume => post(events, Event::Resume),
            },
            Either::Second(request) => match request {
                BusRequest::Enable(ep, enabled) => bus.endpoint_set_enabled(bus_address(ep), enabled),
                BusRequest::Stall(ep, stalled) => bus.endpoint_set_stalled(bus_address(ep), stalled),
                BusRequest::RemoteWakeup => {
                    if bus.remote_wakeup().await.is_err() {
                        warn!("USB bridge: remote wakeup unsupported");
                    }
                }
            },
        }
    }
}

async fn control_loop<C: ControlPipe>(control: &mut C, events: &Events<'_>) {
    let mut queued: u32 = 0;
    let mut next = None;
    loop {
        let raw = match next.take() {
            Some(raw) => raw,
            None => control.setup().await,
        };
        if !try_post(events, Event::Setup(raw)) {
            // the core never sees it
            warn!("USB bridge: setup packet lost, stalling");
            control.reject().await;
            continue;
        }
        queued = queued.wrapping_add(1);
        next = control_transfer(control, events, SetupPacket::parse(&raw), queued).await;
    }
}

fn is_set_address(setup: &SetupPacket) -> bool {
    setup.kind() == RequestType::Standard && setup.request == request::SET_ADDRESS
}

/// Plays the core's endpoint-0 transfers through the driver's stage calls.
/// Returns the setup packet that cut the transfer short, if one did.
async fn control_transfer<C: ControlPipe>(
    control: &mut C,
    events: &Events<'_>,
    setup: SetupPacket,
    number: u32,
) -> Option<[u8; 8]> {
    let mps = control.max_packet_size();
    let mut data_in = false;
    let mut sent = 0;
    let mut received = 0;

    loop {
        let request = match select(CONTROL_REQUESTS.receive(), control.setup()).await {
            Either::First(request) => request,
            Either::Second(raw) => {
                trace!("USB bridge: control transfer abandoned by the host");
                return Some(raw);
            }
        };
        if request.setup != number {
            trace!("USB bridge: dropping reply to setup {}", request.setup);
            continue;
        }

        match request.action {
            ControlAction::Stall => {
                control.reject().await;
                return None;
            }
            ControlAction::In(data) if data.is_empty() && !data_in => {
                if is_set_address(&setup) {
                    control.accept_set_address(setup.value as u8).await;
                } else {
                    control.accept().await;
                }
                post(
                    events,
                    Event::TransferComplete {
                        ep: EndpointAddress::CONTROL_IN,
                        bytes: 0,
                    },
                );
                return None;
            }
            ControlAction::In(data) => {
                let first = !data_in;
                data_in = true;
                sent += data.len();
                let last = data.len() < mps || sent >= setup.length as usize;
                if let Err(err) = control.data_in(&data, first, last).await {
                    warn!("USB bridge: control IN failed: {}", err);
                    post(events, Event::Overrun { ep: EndpointAddress::CONTROL_IN });
                    return None;
                }
                post(
                    events,
                    Event::TransferComplete {
                        ep: EndpointAddress::CONTROL_IN,
                        bytes: data.len() as u16,
                    },
                );
            }
            // the driver runs the status stage after the last data_in
            ControlAction::Out(0) if data_in => {
                post(
                    events,
                    Event::TransferComplete {
                        ep: EndpointAddress::CONTROL_OUT,
                        bytes: 0,
                    },
                );
                return None;
            }
            ControlAction::Out(len) => {
                let mut buf = [0u8; MAX_PACKET];
                let len = (len as usize).min(MAX_PACKET);
                let first = received == 0;
                let last = received + len >= setup.length as usize;
                match control.data_out(&mut buf[..len], first, last).await {
                    Ok(n) => {
                        received += n;
                        store(EndpointAddress::CONTROL_OUT, &buf[..n]);
                        post(
                            events,
                            Event::TransferComplete {
                                ep: EndpointAddress::CONTROL_OUT,
                                bytes: n as u16,
                            },
                        );
                    }
                    Err(err) => {
                        warn!("USB bridge: control OUT failed: {}", err);
                        post(events, Event::Overrun { ep: EndpointAddress::CONTROL_OUT });
                        return None;
                    }
                }
            }
        }
    }
}

async fn bulk_out_loop<E: EndpointOut>(ep: &mut E, events: &Events<'_>) {
    loop {
        let len = (BULK_OUT_ARM.wait().await as usize).min(MAX_PACKET);
        ep.wait_enabled().await;

        let mut buf = [0u8; MAX_PACKET];
        match ep.read(&mut buf[..len]).await {
            Ok(n) => {
                store(EP_OUT, &buf[..n]);
                post(
                    events,
                    Event::TransferComplete {
                        ep: EP_OUT,
                        bytes: n as u16,
                    },
                );
            }
            Err(EndpointError::BufferOverflow) => post(events, Event::Overrun { ep: EP_OUT }),
            // closed by a reset; the core re-arms after the next configuration
            Err(EndpointError::Disabled) => trace!("USB bridge: bulk OUT disabled"),
        }
    }
}

async fn bulk_in_loop<E: EndpointIn>(ep: &mut E, events: &Events<'_>) {
    loop {
        let data = BULK_IN_DATA.wait().await;
        ep.wait_enabled().await;

        match ep.write(&data).await {
            Ok(()) => post(
                events,
                Event::TransferComplete {
                    ep: EP_IN,
                    bytes: data.len() as u16,
                },
            ),
            Err(EndpointError::BufferOverflow) => post(events, Event::Overrun { ep: EP_IN }),
            Err(EndpointError::Disabled) => trace!("USB bridge: bulk IN disabled"),
        }
    }
}
