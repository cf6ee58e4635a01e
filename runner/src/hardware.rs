use defmt::info;
use embassy_stm32::rcc::{Hsi48Config, mux};
use embassy_stm32::{Config, bind_interrupts, peripherals, usb};

bind_interrupts!(pub struct Irqs {
    USB_DRD_FS => usb::InterruptHandler<peripherals::USB>;
});

pub struct Hardware<'a> {
    pub usb_driver: usb::Driver<'a, peripherals::USB>,
}

impl<'a> Hardware<'a> {
    pub fn get() -> Hardware<'a> {
        info!("Initializing");
        let mut config = Config::default();
        // USB kernel clock, trimmed against SOF
        config.rcc.hsi48 = Some(Hsi48Config {
            sync_from_usb: true,
        });
        config.rcc.mux.usbsel = mux::Usbsel::HSI48;
        let peripherals = embassy_stm32::init(config);

        let usb_driver = usb::Driver::new(peripherals.USB, Irqs, peripherals.PA12, peripherals.PA11);

        Hardware { usb_driver }
    }
}
