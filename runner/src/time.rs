use embassy_time::Instant;
use usb_core::TimeSource;

/// Millisecond tick read from the embassy time driver.
pub struct EmbassyClock;

impl TimeSource for EmbassyClock {
    fn now_millis(&self) -> u32 {
        // truncation is the wrap the core expects
        Instant::now().as_millis() as u32
    }
}

/// Board bring-up before the USB stack starts. Clocks and pins are set up
/// by [`Hardware::get`](crate::hardware::Hardware::get), so nothing is left.
pub fn board_init() {}
