use defmt::{debug, info, warn};
use embassy_executor::SpawnToken;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{Duration, Ticker};
use midi::{MidiDevice, MidiError, MidiEvent, MidiListener, MidiMessage};
use static_cell::StaticCell;
use usb_core::descriptor::CONFIG_ATTRIBUTE_REMOTE_WAKEUP;
use usb_core::{Descriptors, DeviceDescriptor, EventConsumer, Strings, UsbDevice};

use crate::time::EmbassyClock;
use crate::usb_bridge::{BridgeDcd, EVENT_QUEUE_SIZE};

pub const MIDI_CHANNEL_SIZE: usize = 16;

const SERVICE_PERIOD: Duration = Duration::from_millis(1);

const STRINGS: Strings<'static> = Strings {
    manufacturer: "Sparklet",
    product: "Sparklet MIDI",
    serial_number: "0001",
};

/// Messages received from the host, as typed events.
pub static MIDI_TASK_CHANNEL: Channel<CriticalSectionRawMutex, MidiEvent, MIDI_CHANNEL_SIZE> =
    Channel::new();

/// Messages for the host, drained by the MIDI task on every service pass.
pub static MIDI_OUT_CHANNEL: Channel<CriticalSectionRawMutex, MidiMessage, MIDI_CHANNEL_SIZE> =
    Channel::new();

type Device = MidiDevice<'static, 'static, BridgeDcd, EmbassyClock, EVENT_QUEUE_SIZE>;

pub struct MidiTaskState<'a> {
    midi_listener: MidiListener<'a, CriticalSectionRawMutex, MIDI_CHANNEL_SIZE>,
    device: Device,
    /// Outgoing message refused by a full TX FIFO, retried first.
    pending: Option<MidiMessage>,
}

impl<'a> MidiTaskState<'a> {
    pub fn new(
        midi_listener: MidiListener<'a, CriticalSectionRawMutex, MIDI_CHANNEL_SIZE>,
        device: Device,
    ) -> MidiTaskState<'a> {
        MidiTaskState {
            midi_listener,
            device,
            pending: None,
        }
    }

    fn send_pending(&mut self) {
        while let Some(message) = self
            .pending
            .take()
            .or_else(|| MIDI_OUT_CHANNEL.try_receive().ok())
        {
            match self.device.write_message(message.cable(), message.bytes()) {
                Ok(()) => {}
                Err(MidiError::BufferFull) => {
                    self.pending = Some(message);
                    return;
                }
                Err(err) => warn!("MIDI task: dropping {}: {}", message, err),
            }
        }
    }

    fn receive(&mut self) {
        while let Some(message) = self.device.read_message() {
            self.midi_listener.process_message(&message);
        }
    }
}

pub static MIDI_TASK_STATE: StaticCell<MidiTaskState> = StaticCell::new();
static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();

pub fn create_midi_task(events: EventConsumer<'static, EVENT_QUEUE_SIZE>) -> SpawnToken<impl Sized> {
    let buf = CONFIG_DESCRIPTOR.init([0; 256]);
    let len = defmt::unwrap!(midi::configuration_descriptor(
        buf,
        config::MIDI_CABLES,
        CONFIG_ATTRIBUTE_REMOTE_WAKEUP,
    ));
    let descriptors = Descriptors {
        device: DeviceDescriptor::new(0x1209, 0x0001, config::ENDPOINT0_SIZE),
        configuration: &buf[..len],
        strings: STRINGS,
    };
    let usb = defmt::unwrap!(UsbDevice::new(BridgeDcd::new(), events, EmbassyClock, descriptors));

    let midi_listener = MidiListener::new(MIDI_TASK_CHANNEL.sender());

    midi_task(MIDI_TASK_STATE.init(MidiTaskState::new(midi_listener, MidiDevice::new(usb))))
}

#[embassy_executor::task]
pub async fn midi_task(state: &'static mut MidiTaskState<'static>) {
    info!("MIDI task: starting");
    state.device.init();

    let mut mounted = false;
    let mut ticker = Ticker::every(SERVICE_PERIOD);
    loop {
        state.send_pending();
        state.device.service();
        state.receive();

        if state.device.is_mounted() != mounted {
            mounted = !mounted;
            debug!("MIDI task: mounted {}", mounted);
        }

        ticker.next().await;
    }
}

/// Plays received notes back to the host an octave up.
#[embassy_executor::task]
pub async fn echo_task() {
    let receiver = MIDI_TASK_CHANNEL.receiver();
    let sender = MIDI_OUT_CHANNEL.sender();

    loop {
        let bytes = match receiver.receive().await {
            MidiEvent::NoteOn { channel, key, vel } => [0x90 | channel, key, vel],
            MidiEvent::NoteOff { channel, key, vel } => [0x80 | channel, key, vel],
            event => {
                debug!("Echo: ignoring {}", event);
                continue;
            }
        };
        if bytes[1] > 0x7f - 12 {
            continue;
        }
        let bytes = [bytes[0], bytes[1] + 12, bytes[2]];
        match MidiMessage::new(0, &bytes) {
            Ok(message) => sender.send(message).await,
            Err(err) => warn!("Echo: {}", err),
        }
    }
}
