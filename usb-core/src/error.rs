use core::fmt;

use defmt::Format;

/// Errors raised by the device controller abstraction and the device core.
///
/// Only `ConfigError` is fatal, and only during start-up. The request errors
/// are answered with a stall on endpoint 0 and never reach the application.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbError {
    /// Endpoint or descriptor setup the controller cannot satisfy.
    ConfigError,
    /// A transfer is already outstanding on the endpoint, or it is halted.
    EndpointBusy,
    /// The host violated the control transfer contract.
    ProtocolError,
    /// Request not recognized or not valid for the addressed recipient.
    UnsupportedRequest,
    /// Events or data were lost because a buffer was full.
    Overrun,
    /// Operation not valid in the current device state.
    InvalidState,
}

impl fmt::Display for UsbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            UsbError::ConfigError => "endpoint or descriptor configuration not supported",
            UsbError::EndpointBusy => "endpoint busy",
            UsbError::ProtocolError => "control transfer protocol violation",
            UsbError::UnsupportedRequest => "unsupported request",
            UsbError::Overrun => "data overrun",
            UsbError::InvalidState => "invalid device state",
        };
        f.write_str(text)
    }
}

impl core::error::Error for UsbError {}
