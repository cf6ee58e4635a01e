#![cfg_attr(not(test), no_std)]

//! Portable USB device stack core: the controller abstraction, the
//! event hand-off from interrupt context, and the device state machine that
//! answers standard requests and routes everything else to class drivers.

pub mod class;
pub mod control;
pub mod controller;
pub mod descriptor;
pub mod device;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod time;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use class::UsbClass;
pub use control::{ControlPipe, SetupPacket};
pub use controller::{Capabilities, Controller, Dcd, Transfer};
pub use descriptor::{DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor, Strings};
pub use device::{Descriptors, DeviceState, UsbDevice};
pub use endpoint::{Direction, EndpointAddress, EndpointState, TransferType};
pub use error::UsbError;
pub use event::{Event, EventConsumer, EventProducer, EventQueue};
pub use time::{Instant, TimeSource};
