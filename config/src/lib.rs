#![cfg_attr(not(test), no_std)]

//! Build-time configuration of the USB device stack.
//!
//! Everything here is fixed per build. [`CONFIG`] is checked by
//! [`UsbConfig::validate`] at compile time, so an inconsistent edit fails the
//! build instead of the enumeration.

use defmt::Format;

#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mcu {
    Stm32H5,
}

impl Mcu {
    /// Fastest speed the on-chip USB peripheral supports.
    pub const fn max_speed(self) -> Speed {
        match self {
            Mcu::Stm32H5 => Speed::Full,
        }
    }
}

#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortMode {
    Disabled,
    Device,
    Host,
}

#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Full,
    High,
}

impl Speed {
    const fn rank(self) -> u8 {
        match self {
            Speed::Full => 0,
            Speed::High => 1,
        }
    }
}

#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootHubPort {
    pub mode: PortMode,
    pub speed: Speed,
}

/// Number of instances of each device class.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classes {
    pub cdc: u8,
    pub msc: u8,
    pub hid: u8,
    pub midi: u8,
    pub vendor: u8,
}

impl Classes {
    pub const fn total(&self) -> u16 {
        self.cdc as u16 + self.msc as u16 + self.hid as u16 + self.midi as u16 + self.vendor as u16
    }
}

#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiConfig {
    /// Receive FIFO size in bytes; holds `rx_bufsize / 4` event packets.
    pub rx_bufsize: usize,
    pub tx_bufsize: usize,
    /// Max packet size of both bulk endpoints.
    pub ep_size: u16,
    /// Virtual cables, each with one IN and one OUT jack pair.
    pub cables: u8,
}

#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbConfig {
    pub mcu: Mcu,
    pub rhport0: RootHubPort,
    pub endpoint0_size: u8,
    pub event_queue_size: usize,
    pub classes: Classes,
    pub midi: MidiConfig,
}

#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Root-hub port 0 must run in device mode.
    NotDeviceMode,
    /// The MCU cannot run the port at the requested speed.
    UnsupportedSpeed,
    Endpoint0Size,
    NoClassEnabled,
    /// A FIFO must hold at least one event packet, in whole packets.
    FifoSize,
    MidiEndpointSize,
    CableCount,
    /// The event queue keeps one slot free, so it needs two.
    EventQueueSize,
}

impl UsbConfig {
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.rhport0.mode, PortMode::Device) {
            return Err(ConfigError::NotDeviceMode);
        }
        if self.rhport0.speed.rank() > self.mcu.max_speed().rank() {
            return Err(ConfigError::UnsupportedSpeed);
        }
        if !matches!(self.endpoint0_size, 8 | 16 | 32 | 64) {
            return Err(ConfigError::Endpoint0Size);
        }
        if self.classes.total() == 0 {
            return Err(ConfigError::NoClassEnabled);
        }
        if self.event_queue_size < 2 {
            return Err(ConfigError::EventQueueSize);
        }
        if self.classes.midi > 0 {
            let midi = &self.midi;
            if midi.rx_bufsize < 4
                || midi.tx_bufsize < 4
                || midi.rx_bufsize % 4 != 0
                || midi.tx_bufsize % 4 != 0
            {
                return Err(ConfigError::FifoSize);
            }
            if !matches!(midi.ep_size, 8 | 16 | 32 | 64) {
                return Err(ConfigError::MidiEndpointSize);
            }
            if midi.cables == 0 || midi.cables > 16 {
                return Err(ConfigError::CableCount);
            }
        }
        Ok(())
    }
}

pub const CONFIG: UsbConfig = UsbConfig {
    mcu: Mcu::Stm32H5,
    rhport0: RootHubPort {
        mode: PortMode::Device,
        speed: Speed::Full,
    },
    endpoint0_size: 64,
    event_queue_size: 32,
    classes: Classes {
        cdc: 0,
        msc: 0,
        hid: 0,
        midi: 1,
        vendor: 0,
    },
    midi: MidiConfig {
        rx_bufsize: 64,
        tx_bufsize: 64,
        ep_size: 64,
        cables: 1,
    },
};

const _: () = assert!(CONFIG.validate().is_ok(), "invalid USB configuration");

pub const ENDPOINT0_SIZE: u8 = CONFIG.endpoint0_size;
pub const EVENT_QUEUE_SIZE: usize = CONFIG.event_queue_size;
pub const MIDI_RX_BUFSIZE: usize = CONFIG.midi.rx_bufsize;
pub const MIDI_TX_BUFSIZE: usize = CONFIG.midi.tx_bufsize;
pub const MIDI_EP_SIZE: u16 = CONFIG.midi.ep_size;
pub const MIDI_CABLES: u8 = CONFIG.midi.cables;

#[cfg(test)]
mod test;
