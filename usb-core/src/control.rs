//! Endpoint-0 control transfers: setup packet decoding and the
//! setup → data → status stage machine.

use defmt::{Format, trace, warn};

use crate::controller::{Controller, Dcd, Transfer};
use crate::endpoint::{Direction, EndpointAddress};
use crate::error::UsbError;

/// Size of the buffer holding a control transfer's data stage.
pub const CONTROL_BUFFER_SIZE: usize = 256;

pub mod request {
    pub const GET_STATUS: u8 = 0x00;
    pub const CLEAR_FEATURE: u8 = 0x01;
    pub const SET_FEATURE: u8 = 0x03;
    pub const SET_ADDRESS: u8 = 0x05;
    pub const GET_DESCRIPTOR: u8 = 0x06;
    pub const SET_DESCRIPTOR: u8 = 0x07;
    pub const GET_CONFIGURATION: u8 = 0x08;
    pub const SET_CONFIGURATION: u8 = 0x09;
    pub const GET_INTERFACE: u8 = 0x0a;
    pub const SET_INTERFACE: u8 = 0x0b;
    pub const SYNCH_FRAME: u8 = 0x0c;
}

pub mod feature {
    pub const ENDPOINT_HALT: u16 = 0x00;
    pub const DEVICE_REMOTE_WAKEUP: u16 = 0x01;
}

#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Standard,
    Class,
    Vendor,
    Reserved,
}

#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub const fn parse(raw: &[u8; 8]) -> Self {
        Self {
            request_type: raw[0],
            request: raw[1],
            value: u16::from_le_bytes([raw[2], raw[3]]),
            index: u16::from_le_bytes([raw[4], raw[5]]),
            length: u16::from_le_bytes([raw[6], raw[7]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }

    pub const fn direction(&self) -> Direction {
        if self.request_type & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    pub const fn kind(&self) -> RequestType {
        match (self.request_type >> 5) & 0x03 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    pub const fn recipient(&self) -> Recipient {
        match self.request_type & 0x1f {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            _ => Recipient::Other,
        }
    }

    /// Descriptor type and index of a GET_DESCRIPTOR request.
    pub const fn descriptor(&self) -> (u8, u8) {
        ((self.value >> 8) as u8, self.value as u8)
    }

    pub const fn interface(&self) -> u8 {
        self.index as u8
    }

    pub fn endpoint(&self) -> EndpointAddress {
        (self.index as u8).into()
    }
}

/// How a request handler answers a setup packet.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// No data stage; acknowledge with a zero-length status.
    Accept,
    /// Send the first `n` bytes of the control buffer.
    DataIn(usize),
    /// Receive a data stage, then hand it to the handler.
    DataOut,
}

/// What a completed endpoint-0 transfer meant to the control pipe.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Nothing for the device core to do.
    Pending,
    /// The OUT data stage is complete; it is in [`ControlPipe::data`].
    DataReceived,
    /// The status stage finished; the request has been carried out.
    Complete(SetupPacket),
}

#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    DataIn { total: u16, sent: u16 },
    /// A zero-length packet terminates a short, packet-aligned data stage.
    DataInZlp,
    DataOut { received: u16 },
    /// Handler is processing the received data stage.
    DataOutDone { received: u16 },
    StatusIn,
    StatusOut,
    Stalled,
}

impl Default for ControlPipe {
    fn default() -> Self {
        Self::new()
    }
}

/// The single outstanding control transfer of a device.
pub struct ControlPipe {
    setup: Option<SetupPacket>,
    stage: Stage,
    buf: [u8; CONTROL_BUFFER_SIZE],
}

impl ControlPipe {
    pub const fn new() -> Self {
        Self {
            setup: None,
            stage: Stage::Idle,
            buf: [0; CONTROL_BUFFER_SIZE],
        }
    }

    pub fn setup(&self) -> Option<SetupPacket> {
        self.setup
    }

    /// Starts a new transfer, abandoning any in progress.
    pub fn begin(&mut self, setup: SetupPacket) {
        if !matches!(self.stage, Stage::Idle | Stage::Stalled) {
            trace!("Control: abandoning transfer in stage {}", self.stage);
        }
        self.setup = Some(setup);
        self.stage = Stage::Idle;
    }

    pub fn reset(&mut self) {
        self.setup = None;
        self.stage = Stage::Idle;
    }

    pub fn buffer_mut(&mut self) -> &mut [u8; CONTROL_BUFFER_SIZE] {
        &mut self.buf
    }

    /// Data received in the OUT data stage.
    pub fn data(&self) -> &[u8] {
        match self.stage {
            Stage::DataOutDone { received } => &self.buf[..received as usize],
            _ => &[],
        }
    }

    /// Carries out a handler's response to the current setup packet.
    pub fn respond<D: Dcd>(
        &mut self,
        controller: &mut Controller<D>,
        response: Response,
    ) -> Result<(), UsbError> {
        let Some(setup) = self.setup else {
            return Err(UsbError::ProtocolError);
        };
        match response {
            Response::Accept => self.status_in(controller),
            Response::DataIn(len) => {
                if setup.direction() != Direction::In {
                    return Err(UsbError::ProtocolError);
                }
                if setup.length == 0 {
                    return self.status_in(controller);
                }
                let total = len.min(setup.length as usize).min(CONTROL_BUFFER_SIZE) as u16;
                self.stage = Stage::DataIn { total, sent: 0 };
                self.send_next(controller)
            }
            Response::DataOut => {
                if setup.direction() != Direction::Out
                    || setup.length == 0
                    || setup.length as usize > CONTROL_BUFFER_SIZE
                {
                    return Err(UsbError::UnsupportedRequest);
                }
                self.stage = Stage::DataOut { received: 0 };
                self.receive_next(controller, setup.length)
            }
        }
    }

    /// Accepts the data stage handed out by [`ControlEvent::DataReceived`].
    pub fn accept_data<D: Dcd>(&mut self, controller: &mut Controller<D>) -> Result<(), UsbError> {
        if !matches!(self.stage, Stage::DataOutDone { .. }) {
            return Err(UsbError::ProtocolError);
        }
        self.status_in(controller)
    }

    /// Answers the current request with a protocol stall on endpoint 0.
    pub fn reject<D: Dcd>(&mut self, controller: &mut Controller<D>) {
        controller.stall(EndpointAddress::CONTROL_IN);
        controller.stall(EndpointAddress::CONTROL_OUT);
        self.stage = Stage::Stalled;
    }

    /// Advances the stage machine after a transfer on endpoint 0 completed.
    pub fn transfer_complete<D: Dcd>(
        &mut self,
        controller: &mut Controller<D>,
        ep: EndpointAddress,
        bytes: u16,
    ) -> Result<ControlEvent, UsbError> {
        let Some(setup) = self.setup else {
            return Ok(ControlEvent::Pending);
        };
        let mps = controller.ep0_size() as u16;

        match (self.stage, ep.direction()) {
            (Stage::DataIn { total, sent }, Direction::In) => {
                let sent = sent + bytes;
                if sent < total {
                    self.stage = Stage::DataIn { total, sent };
                    self.send_next(controller)?;
                } else if bytes == mps && sent < setup.length {
                    self.stage = Stage::DataInZlp;
                    controller.submit_transfer(EndpointAddress::CONTROL_IN, Transfer::In(&[]))?;
                } else {
                    self.status_out(controller)?;
                }
                Ok(ControlEvent::Pending)
            }
            (Stage::DataInZlp, Direction::In) => {
                self.status_out(controller)?;
                Ok(ControlEvent::Pending)
            }
            (Stage::DataOut { received }, Direction::Out) => {
                let offset = received as usize;
                let total = received as usize + bytes as usize;
                if total > setup.length as usize {
                    warn!(
                        "Control: host sent {} bytes, wLength is {}",
                        total, setup.length
                    );
                    return Err(UsbError::ProtocolError);
                }
                let copied =
                    controller.read(EndpointAddress::CONTROL_OUT, &mut self.buf[offset..total]);
                if copied != bytes as usize {
                    return Err(UsbError::Overrun);
                }
                let received = total as u16;
                if received == setup.length || bytes < mps {
                    self.stage = Stage::DataOutDone { received };
                    Ok(ControlEvent::DataReceived)
                } else {
                    self.stage = Stage::DataOut { received };
                    self.receive_next(controller, setup.length - received)?;
                    Ok(ControlEvent::Pending)
                }
            }
            (Stage::StatusIn, Direction::In) | (Stage::StatusOut, Direction::Out) => {
                self.stage = Stage::Idle;
                self.setup = None;
                Ok(ControlEvent::Complete(setup))
            }
            (stage, direction) => {
                trace!("Control: stray completion {} in stage {}", direction, stage);
                Ok(ControlEvent::Pending)
            }
        }
    }

    fn send_next<D: Dcd>(&mut self, controller: &mut Controller<D>) -> Result<(), UsbError> {
        let Stage::DataIn { total, sent } = self.stage else {
            return Err(UsbError::ProtocolError);
        };
        let mps = controller.ep0_size() as usize;
        let start = sent as usize;
        let end = (start + mps).min(total as usize);
        controller.submit_transfer(
            EndpointAddress::CONTROL_IN,
            Transfer::In(&self.buf[start..end]),
        )
    }

    fn receive_next<D: Dcd>(
        &mut self,
        controller: &mut Controller<D>,
        remaining: u16,
    ) -> Result<(), UsbError> {
        let len = remaining.min(controller.ep0_size() as u16);
        controller.submit_transfer(EndpointAddress::CONTROL_OUT, Transfer::Out(len))
    }

    fn status_in<D: Dcd>(&mut self, controller: &mut Controller<D>) -> Result<(), UsbError> {
        self.stage = Stage::StatusIn;
        controller.submit_transfer(EndpointAddress::CONTROL_IN, Transfer::In(&[]))
    }

    fn status_out<D: Dcd>(&mut self, controller: &mut Controller<D>) -> Result<(), UsbError> {
        self.stage = Stage::StatusOut;
        controller.submit_transfer(EndpointAddress::CONTROL_OUT, Transfer::Out(0))
    }
}
