//! CAN frame types shared by the transports and the protocol layer

/// The COB ID offset for SDO requests sent to a node (client to server)
pub const SDO_REQ_BASE: u16 = 0x600;
/// The COB ID offset for SDO responses sent by a node (server to client)
pub const SDO_RESP_BASE: u16 = 0x580;

/// A CAN identifier, either an 11-bit standard ID or a 29-bit extended ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CanId {
    /// An extended 29-bit identifier
    Extended(u32),
    /// A standard 11-bit identifier
    Std(u16),
}

impl CanId {
    /// Create a new standard ID
    pub const fn std(id: u16) -> Self {
        Self::Std(id & 0x7FF)
    }

    /// Create a new extended ID
    pub const fn extended(id: u32) -> Self {
        Self::Extended(id & 0x1FFF_FFFF)
    }

    /// Get the raw identifier value
    pub fn raw(&self) -> u32 {
        match self {
            CanId::Extended(id) => *id,
            CanId::Std(id) => *id as u32,
        }
    }

    /// Returns true if this is an extended ID
    pub fn is_extended(&self) -> bool {
        matches!(self, CanId::Extended(_))
    }
}

impl core::fmt::Display for CanId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CanId::Extended(id) => write!(f, "{id:08X}"),
            CanId::Std(id) => write!(f, "{id:03X}"),
        }
    }
}

/// A classic CAN frame with up to 8 data bytes
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanMessage {
    id: CanId,
    data: [u8; 8],
    dlc: u8,
    rtr: bool,
}

impl CanMessage {
    /// Create a new data frame
    ///
    /// Data beyond 8 bytes is ignored
    pub fn new(id: CanId, data: &[u8]) -> Self {
        let dlc = data.len().min(8);
        let mut buf = [0; 8];
        buf[..dlc].copy_from_slice(&data[..dlc]);
        Self {
            id,
            data: buf,
            dlc: dlc as u8,
            rtr: false,
        }
    }

    /// Create a new remote transmission request frame
    pub fn new_rtr(id: CanId) -> Self {
        Self {
            id,
            data: [0; 8],
            dlc: 0,
            rtr: true,
        }
    }

    /// Get the identifier of the frame
    pub fn id(&self) -> CanId {
        self.id
    }

    /// Get the data bytes of the frame
    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    /// Returns true if the frame is a remote transmission request
    pub fn is_rtr(&self) -> bool {
        self.rtr
    }
}

impl core::fmt::Debug for CanMessage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ", self.id)?;
        if self.rtr {
            return write!(f, " RTR");
        }
        for b in self.data() {
            write!(f, " {b:02X}")?;
        }
        Ok(())
    }
}

/// Error conditions reported by a CAN controller in an error frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CanError {
    /// A bit was read back differently than it was sent
    Bit,
    /// A bit stuffing violation was detected
    Stuff,
    /// A fixed-form field contained an illegal value
    Form,
    /// No acknowledge was received for a transmitted frame
    Ack,
    /// The received CRC did not match
    Crc,
    /// Any other controller specific error
    Other(u8),
}

impl CanError {
    /// Build an error from the raw error class bits of an error frame
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Bit,
            2 => Self::Stuff,
            3 => Self::Form,
            4 => Self::Ack,
            5 => Self::Crc,
            _ => Self::Other(raw),
        }
    }
}

impl core::fmt::Display for CanError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CanError::Other(raw) => write!(f, "CAN error 0x{raw:02X}"),
            _ => write!(f, "CAN {self:?} error"),
        }
    }
}

impl std::error::Error for CanError {}
