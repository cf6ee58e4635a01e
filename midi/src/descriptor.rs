//! Audio Control and MIDI Streaming interface descriptors.
//!
//! Every cable gets four jacks: an embedded IN jack fed by the bulk OUT
//! endpoint and routed to an external OUT jack, and an external IN jack
//! routed to an embedded OUT jack that feeds the bulk IN endpoint.

use usb_core::descriptor::{ConfigurationBuilder, descriptor_type};
use usb_core::{Direction, EndpointAddress, EndpointDescriptor, UsbError};

use crate::message::MAX_CABLE;

pub const AUDIO_CLASS: u8 = 0x01;
pub const AUDIO_CONTROL_SUBCLASS: u8 = 0x01;
pub const MIDI_STREAMING_SUBCLASS: u8 = 0x03;

pub const EP_OUT: EndpointAddress = EndpointAddress::from_parts(1, Direction::Out);
pub const EP_IN: EndpointAddress = EndpointAddress::from_parts(1, Direction::In);

const HEADER: u8 = 0x01;
const MIDI_IN_JACK: u8 = 0x02;
const MIDI_OUT_JACK: u8 = 0x03;
const MS_GENERAL: u8 = 0x01;
const EMBEDDED: u8 = 0x01;
const EXTERNAL: u8 = 0x02;

const JACKS_PER_CABLE: u8 = 4;

const fn embedded_in_jack(cable: u8) -> u8 {
    1 + cable * JACKS_PER_CABLE
}

const fn external_in_jack(cable: u8) -> u8 {
    embedded_in_jack(cable) + 1
}

const fn embedded_out_jack(cable: u8) -> u8 {
    embedded_in_jack(cable) + 2
}

const fn external_out_jack(cable: u8) -> u8 {
    embedded_in_jack(cable) + 3
}

/// Writes the AC interface `first_interface` and the MS interface after it,
/// with bulk endpoints [`EP_OUT`] and [`EP_IN`].
pub fn write_descriptors(
    builder: &mut ConfigurationBuilder<'_>,
    first_interface: u8,
    cables: u8,
    ep_size: u16,
) -> Result<(), UsbError> {
    if cables == 0 || cables > MAX_CABLE + 1 {
        return Err(UsbError::ConfigError);
    }
    let streaming = first_interface + 1;

    builder.interface(first_interface, 0, AUDIO_CLASS, AUDIO_CONTROL_SUBCLASS, 0)?;
    builder.write(
        descriptor_type::CS_INTERFACE,
        &[
            HEADER, 0x00, 0x01, // bcdADC 1.0
            0x09, 0x00, // wTotalLength, just this header
            0x01, streaming,
        ],
    )?;

    builder.interface(streaming, 2, AUDIO_CLASS, MIDI_STREAMING_SUBCLASS, 0)?;
    let ms_start = builder.position();
    builder.write(
        descriptor_type::CS_INTERFACE,
        &[
            HEADER, 0x00, 0x01, // bcdMSC 1.0
            0x00, 0x00, // wTotalLength, patched below
        ],
    )?;
    for cable in 0..cables {
        builder.write(
            descriptor_type::CS_INTERFACE,
            &[MIDI_IN_JACK, EMBEDDED, embedded_in_jack(cable), 0],
        )?;
        builder.write(
            descriptor_type::CS_INTERFACE,
            &[MIDI_IN_JACK, EXTERNAL, external_in_jack(cable), 0],
        )?;
        builder.write(
            descriptor_type::CS_INTERFACE,
            &[
                MIDI_OUT_JACK,
                EMBEDDED,
                embedded_out_jack(cable),
                1,
                external_in_jack(cable),
                1,
                0,
            ],
        )?;
        builder.write(
            descriptor_type::CS_INTERFACE,
            &[
                MIDI_OUT_JACK,
                EXTERNAL,
                external_out_jack(cable),
                1,
                embedded_in_jack(cable),
                1,
                0,
            ],
        )?;
    }

    builder.audio_endpoint(&EndpointDescriptor::bulk(EP_OUT, ep_size))?;
    streaming_endpoint(builder, cables, embedded_in_jack)?;
    builder.audio_endpoint(&EndpointDescriptor::bulk(EP_IN, ep_size))?;
    streaming_endpoint(builder, cables, embedded_out_jack)?;

    let total = ((builder.position() - ms_start) as u16).to_le_bytes();
    builder.patch(ms_start + 5, &total)
}

fn streaming_endpoint(
    builder: &mut ConfigurationBuilder<'_>,
    cables: u8,
    jack: fn(u8) -> u8,
) -> Result<(), UsbError> {
    let mut body = [0u8; 2 + MAX_CABLE as usize + 1];
    body[0] = MS_GENERAL;
    body[1] = cables;
    for cable in 0..cables {
        body[2 + cable as usize] = jack(cable);
    }
    builder.write(descriptor_type::CS_ENDPOINT, &body[..2 + cables as usize])
}

/// Complete configuration descriptor for a device with nothing but MIDI.
pub fn configuration_descriptor(
    buf: &mut [u8],
    cables: u8,
    attributes: u8,
) -> Result<usize, UsbError> {
    let mut builder = ConfigurationBuilder::new(buf, 1, attributes, 100)?;
    write_descriptors(&mut builder, 0, cables, config::MIDI_EP_SIZE)?;
    Ok(builder.finish())
}
