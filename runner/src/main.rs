#![no_std]
#![no_main]

mod hardware;
mod midi_task;
mod time;
mod usb_bridge;

use defmt::info;
use embassy_executor::Executor;
use static_cell::StaticCell;
use usb_core::EventQueue;

use defmt_rtt as _;
use embassy_stm32 as _;
use panic_probe as _;

static EXECUTOR: StaticCell<Executor> = StaticCell::new();
static EVENT_QUEUE: StaticCell<EventQueue<{ usb_bridge::EVENT_QUEUE_SIZE }>> = StaticCell::new();

#[cortex_m_rt::entry]
fn main() -> ! {
    time::board_init();
    let hardware = hardware::Hardware::get();

    let (producer, consumer) = EVENT_QUEUE.init(EventQueue::new()).split();

    info!("USB-MIDI starting");

    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        defmt::unwrap!(spawner.spawn(usb_bridge::create_bridge_task(
            hardware.usb_driver,
            producer
        )));
        defmt::unwrap!(spawner.spawn(midi_task::create_midi_task(consumer)));
        defmt::unwrap!(spawner.spawn(midi_task::echo_task()));
    })
}
