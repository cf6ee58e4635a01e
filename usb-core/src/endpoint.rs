use defmt::Format;

/// Direction of USB traffic, seen from the host.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host to device.
    Out,
    /// Device to host.
    In,
}

impl Direction {
    pub(crate) const fn index(self) -> usize {
        match self {
            Direction::Out => 0,
            Direction::In => 1,
        }
    }
}

/// Endpoint number plus direction bit, as found in `bEndpointAddress`.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointAddress(u8);

impl EndpointAddress {
    pub const CONTROL_OUT: Self = Self(0x00);
    pub const CONTROL_IN: Self = Self(0x80);

    const DIRECTION_BIT: u8 = 0x80;
    const NUMBER_MASK: u8 = 0x0f;

    pub const fn from_parts(number: u8, direction: Direction) -> Self {
        let number = number & Self::NUMBER_MASK;
        match direction {
            Direction::Out => Self(number),
            Direction::In => Self(number | Self::DIRECTION_BIT),
        }
    }

    pub const fn number(self) -> u8 {
        self.0 & Self::NUMBER_MASK
    }

    pub const fn direction(self) -> Direction {
        if self.0 & Self::DIRECTION_BIT != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    pub const fn is_control(self) -> bool {
        self.number() == 0
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl From<u8> for EndpointAddress {
    fn from(value: u8) -> Self {
        Self(value & (Self::DIRECTION_BIT | Self::NUMBER_MASK))
    }
}

impl From<EndpointAddress> for u8 {
    fn from(address: EndpointAddress) -> Self {
        address.0
    }
}

/// Transfer type from the low bits of `bmAttributes`.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl TransferType {
    pub const fn from_attributes(attributes: u8) -> Self {
        match attributes & 0x03 {
            0 => TransferType::Control,
            1 => TransferType::Isochronous,
            2 => TransferType::Bulk,
            _ => TransferType::Interrupt,
        }
    }

    pub const fn as_attributes(self) -> u8 {
        match self {
            TransferType::Control => 0,
            TransferType::Isochronous => 1,
            TransferType::Bulk => 2,
            TransferType::Interrupt => 3,
        }
    }
}

/// Transfer state of one endpoint direction.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Closed,
    Idle,
    Busy,
    Stalled,
}
