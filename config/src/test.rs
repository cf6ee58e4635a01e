use pretty_assertions::assert_eq;

use crate::{
    CONFIG, ConfigError, ENDPOINT0_SIZE, MIDI_RX_BUFSIZE, MIDI_TX_BUFSIZE, Mcu, PortMode, Speed,
    UsbConfig,
};

macro_rules! with {
    ($config:ident => $edit:expr) => {{
        let mut $config: UsbConfig = CONFIG;
        $edit;
        $config.validate()
    }};
}

#[test]
fn shipped_configuration_is_a_full_speed_midi_device() {
    assert_eq!(CONFIG.validate(), Ok(()));
    assert_eq!(CONFIG.mcu, Mcu::Stm32H5);
    assert_eq!(CONFIG.rhport0.mode, PortMode::Device);
    assert_eq!(CONFIG.rhport0.speed, Speed::Full);
    assert_eq!(CONFIG.classes.total(), 1);
    assert_eq!(CONFIG.classes.midi, 1);
    assert_eq!(ENDPOINT0_SIZE, 64);
    assert_eq!((MIDI_RX_BUFSIZE, MIDI_TX_BUFSIZE), (64, 64));
}

#[test]
fn port_zero_must_be_a_device() {
    assert_eq!(
        with!(config => config.rhport0.mode = PortMode::Host),
        Err(ConfigError::NotDeviceMode)
    );
}

#[test]
fn stm32h5_has_no_high_speed_phy() {
    assert_eq!(
        with!(config => config.rhport0.speed = Speed::High),
        Err(ConfigError::UnsupportedSpeed)
    );
}

#[test]
fn endpoint_zero_size_must_be_a_legal_packet_size() {
    assert_eq!(
        with!(config => config.endpoint0_size = 48),
        Err(ConfigError::Endpoint0Size)
    );
    assert_eq!(with!(config => config.endpoint0_size = 8), Ok(()));
}

#[test]
fn some_class_must_be_enabled() {
    assert_eq!(
        with!(config => config.classes.midi = 0),
        Err(ConfigError::NoClassEnabled)
    );
}

#[test]
fn fifos_hold_whole_packets() {
    assert_eq!(
        with!(config => config.midi.tx_bufsize = 62),
        Err(ConfigError::FifoSize)
    );
    assert_eq!(
        with!(config => config.midi.rx_bufsize = 0),
        Err(ConfigError::FifoSize)
    );
}

#[test]
fn midi_settings_are_ignored_without_midi() {
    assert_eq!(
        with!(config => {
            config.classes.midi = 0;
            config.classes.vendor = 1;
            config.midi.cables = 0;
        }),
        Ok(())
    );
}

#[test]
fn cable_count_fits_the_packet_header() {
    assert_eq!(
        with!(config => config.midi.cables = 17),
        Err(ConfigError::CableCount)
    );
}
