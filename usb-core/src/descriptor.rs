//! Standard descriptors: the device descriptor, a writer for configuration
//! descriptors, a reader that walks them back, and string descriptor encoding.

use defmt::Format;

use crate::endpoint::{EndpointAddress, TransferType};
use crate::error::UsbError;

pub mod descriptor_type {
    pub const DEVICE: u8 = 0x01;
    pub const CONFIGURATION: u8 = 0x02;
    pub const STRING: u8 = 0x03;
    pub const INTERFACE: u8 = 0x04;
    pub const ENDPOINT: u8 = 0x05;
    pub const DEVICE_QUALIFIER: u8 = 0x06;
    pub const CS_INTERFACE: u8 = 0x24;
    pub const CS_ENDPOINT: u8 = 0x25;
}

/// `bmAttributes` bit set on every configuration.
pub const CONFIG_ATTRIBUTE_RESERVED: u8 = 0x80;
pub const CONFIG_ATTRIBUTE_SELF_POWERED: u8 = 0x40;
pub const CONFIG_ATTRIBUTE_REMOTE_WAKEUP: u8 = 0x20;

/// US English, the only language the string table offers.
pub const LANGUAGE_ID_EN_US: u16 = 0x0409;

const CONFIGURATION_HEADER_LEN: usize = 9;
const INTERFACE_LEN: usize = 9;

#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub usb_version: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub max_packet_size_0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: u16,
    pub manufacturer_string: u8,
    pub product_string: u8,
    pub serial_number_string: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub const LEN: usize = 18;

    /// Device whose class is defined per interface, with one configuration
    /// and strings 1..=3 for manufacturer, product and serial number.
    pub const fn new(vendor_id: u16, product_id: u16, max_packet_size_0: u8) -> Self {
        Self {
            usb_version: 0x0200,
            class: 0,
            subclass: 0,
            protocol: 0,
            max_packet_size_0,
            vendor_id,
            product_id,
            device_version: 0x0100,
            manufacturer_string: 1,
            product_string: 2,
            serial_number_string: 3,
            num_configurations: 1,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let usb = self.usb_version.to_le_bytes();
        let vid = self.vendor_id.to_le_bytes();
        let pid = self.product_id.to_le_bytes();
        let release = self.device_version.to_le_bytes();
        [
            Self::LEN as u8,
            descriptor_type::DEVICE,
            usb[0],
            usb[1],
            self.class,
            self.subclass,
            self.protocol,
            self.max_packet_size_0,
            vid[0],
            vid[1],
            pid[0],
            pid[1],
            release[0],
            release[1],
            self.manufacturer_string,
            self.product_string,
            self.serial_number_string,
            self.num_configurations,
        ]
    }
}

#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub string: u8,
}

impl InterfaceDescriptor {
    pub fn parse(raw: &[u8]) -> Result<Self, UsbError> {
        if raw.len() < INTERFACE_LEN || raw[1] != descriptor_type::INTERFACE {
            return Err(UsbError::ConfigError);
        }
        Ok(Self {
            number: raw[2],
            alternate_setting: raw[3],
            num_endpoints: raw[4],
            class: raw[5],
            subclass: raw[6],
            protocol: raw[7],
            string: raw[8],
        })
    }
}

#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: EndpointAddress,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    /// Length of the standard endpoint descriptor.
    pub const LEN: usize = 7;
    /// Length of the audio-class variant carrying `bRefresh` and `bSynchAddress`.
    pub const AUDIO_LEN: usize = 9;

    pub const fn bulk(address: EndpointAddress, max_packet_size: u16) -> Self {
        Self {
            address,
            transfer_type: TransferType::Bulk,
            max_packet_size,
            interval: 0,
        }
    }

    pub fn parse(raw: &[u8]) -> Result<Self, UsbError> {
        if raw.len() < Self::LEN || raw[1] != descriptor_type::ENDPOINT {
            return Err(UsbError::ConfigError);
        }
        Ok(Self {
            address: raw[2].into(),
            transfer_type: TransferType::from_attributes(raw[3]),
            max_packet_size: u16::from_le_bytes([raw[4], raw[5]]) & 0x07ff,
            interval: raw[6],
        })
    }

    fn body(&self) -> [u8; 5] {
        let size = self.max_packet_size.to_le_bytes();
        [
            self.address.as_u8(),
            self.transfer_type.as_attributes(),
            size[0],
            size[1],
            self.interval,
        ]
    }
}

/// One raw descriptor inside a configuration descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDescriptor<'a> {
    pub descriptor_type: u8,
    pub bytes: &'a [u8],
}

/// Walks the descriptors packed in a configuration descriptor.
///
/// Yields `ConfigError` once and then stops if a length field is zero or
/// runs past the end of the buffer.
pub struct DescriptorIter<'a> {
    remaining: &'a [u8],
}

impl<'a> DescriptorIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { remaining: bytes }
    }
}

impl<'a> Iterator for DescriptorIter<'a> {
    type Item = Result<RawDescriptor<'a>, UsbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        let len = self.remaining[0] as usize;
        if len < 2 || len > self.remaining.len() {
            self.remaining = &[];
            return Some(Err(UsbError::ConfigError));
        }
        let (bytes, rest) = self.remaining.split_at(len);
        self.remaining = rest;
        Some(Ok(RawDescriptor {
            descriptor_type: bytes[1],
            bytes,
        }))
    }
}

/// Reads the fields of a configuration descriptor header.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationHeader {
    pub total_length: u16,
    pub num_interfaces: u8,
    pub value: u8,
    pub attributes: u8,
    pub max_power: u8,
}

impl ConfigurationHeader {
    /// Validates the header and that `wTotalLength` matches the buffer.
    pub fn parse(raw: &[u8]) -> Result<Self, UsbError> {
        if raw.len() < CONFIGURATION_HEADER_LEN
            || raw[0] as usize != CONFIGURATION_HEADER_LEN
            || raw[1] != descriptor_type::CONFIGURATION
        {
            return Err(UsbError::ConfigError);
        }
        let header = Self {
            total_length: u16::from_le_bytes([raw[2], raw[3]]),
            num_interfaces: raw[4],
            value: raw[5],
            attributes: raw[7],
            max_power: raw[8],
        };
        if header.total_length as usize != raw.len() || header.value == 0 {
            return Err(UsbError::ConfigError);
        }
        Ok(header)
    }
}

/// Writes a configuration descriptor into a caller-provided buffer.
///
/// `wTotalLength` and `bNumInterfaces` are patched in by [`finish`](Self::finish).
pub struct ConfigurationBuilder<'a> {
    buf: &'a mut [u8],
    position: usize,
    num_interfaces: u8,
}

impl<'a> ConfigurationBuilder<'a> {
    pub fn new(
        buf: &'a mut [u8],
        value: u8,
        attributes: u8,
        max_power_ma: u16,
    ) -> Result<Self, UsbError> {
        let mut builder = Self {
            buf,
            position: 0,
            num_interfaces: 0,
        };
        builder.write(
            descriptor_type::CONFIGURATION,
            &[
                0,
                0, // wTotalLength
                0, // bNumInterfaces
                value,
                0, // iConfiguration
                attributes | CONFIG_ATTRIBUTE_RESERVED,
                (max_power_ma / 2).min(u8::MAX as u16) as u8,
            ],
        )?;
        Ok(builder)
    }

    /// Writes one descriptor; the length byte and type are prepended.
    pub fn write(&mut self, descriptor_type: u8, body: &[u8]) -> Result<(), UsbError> {
        let len = body.len() + 2;
        if len > u8::MAX as usize || self.position + len > self.buf.len() {
            return Err(UsbError::ConfigError);
        }
        let out = &mut self.buf[self.position..self.position + len];
        out[0] = len as u8;
        out[1] = descriptor_type;
        out[2..].copy_from_slice(body);
        self.position += len;
        Ok(())
    }

    pub fn interface(
        &mut self,
        number: u8,
        num_endpoints: u8,
        class: u8,
        subclass: u8,
        protocol: u8,
    ) -> Result<(), UsbError> {
        self.write(
            descriptor_type::INTERFACE,
            &[number, 0, num_endpoints, class, subclass, protocol, 0],
        )?;
        self.num_interfaces += 1;
        Ok(())
    }

    pub fn endpoint(&mut self, endpoint: &EndpointDescriptor) -> Result<(), UsbError> {
        self.write(descriptor_type::ENDPOINT, &endpoint.body())
    }

    /// Endpoint descriptor with the two trailing audio-class bytes set to zero.
    pub fn audio_endpoint(&mut self, endpoint: &EndpointDescriptor) -> Result<(), UsbError> {
        let body = endpoint.body();
        self.write(
            descriptor_type::ENDPOINT,
            &[body[0], body[1], body[2], body[3], body[4], 0, 0],
        )
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Overwrites bytes already written, for class-specific total lengths.
    pub fn patch(&mut self, position: usize, bytes: &[u8]) -> Result<(), UsbError> {
        let end = position + bytes.len();
        if end > self.position {
            return Err(UsbError::ConfigError);
        }
        self.buf[position..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Returns the total length of the finished descriptor.
    pub fn finish(self) -> usize {
        let total = (self.position as u16).to_le_bytes();
        self.buf[2] = total[0];
        self.buf[3] = total[1];
        self.buf[4] = self.num_interfaces;
        self.position
    }
}

/// Manufacturer, product and serial number, served as string indices 1..=3.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strings<'a> {
    pub manufacturer: &'a str,
    pub product: &'a str,
    pub serial_number: &'a str,
}

impl<'a> Strings<'a> {
    pub fn get(&self, index: u8) -> Option<&'a str> {
        match index {
            1 => Some(self.manufacturer),
            2 => Some(self.product),
            3 => Some(self.serial_number),
            _ => None,
        }
    }
}

/// Encodes the language ID table (string index 0).
pub fn write_language_ids(buf: &mut [u8]) -> Result<usize, UsbError> {
    let id = LANGUAGE_ID_EN_US.to_le_bytes();
    let descriptor = [4, descriptor_type::STRING, id[0], id[1]];
    let out = buf.get_mut(..descriptor.len()).ok_or(UsbError::Overrun)?;
    out.copy_from_slice(&descriptor);
    Ok(descriptor.len())
}

/// Encodes `text` as a UTF-16LE string descriptor.
pub fn write_string(text: &str, buf: &mut [u8]) -> Result<usize, UsbError> {
    if buf.len() < 2 {
        return Err(UsbError::Overrun);
    }
    let mut position = 2;
    for unit in text.encode_utf16() {
        if position + 2 > buf.len() || position + 2 > u8::MAX as usize {
            return Err(UsbError::Overrun);
        }
        buf[position..position + 2].copy_from_slice(&unit.to_le_bytes());
        position += 2;
    }
    buf[0] = position as u8;
    buf[1] = descriptor_type::STRING;
    Ok(position)
}
