//! Types for representing node IDs
//!

use crate::messages::{CanId, SDO_REQ_BASE, SDO_RESP_BASE};

/// The address of one drive controller on the bus
///
/// Valid addresses are 1 to 127. Each node owns two SDO COB IDs: requests are sent to
/// `0x600 + id`, and the node answers on `0x580 + id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u8);

impl NodeId {
    /// Try to create a new NodeId
    ///
    /// It will fail if value is invalid (i.e. <1 or >127)
    pub const fn new(value: u8) -> Result<Self, InvalidNodeIdError> {
        if value > 0 && value < 128 {
            Ok(NodeId(value))
        } else {
            Err(InvalidNodeIdError(value))
        }
    }

    /// Get the raw node ID as a u8
    pub fn raw(&self) -> u8 {
        self.0
    }

    /// The COB ID on which SDO requests are sent to this node
    pub fn sdo_request_id(&self) -> CanId {
        CanId::std(SDO_REQ_BASE + self.0 as u16)
    }

    /// The COB ID on which this node sends its SDO responses
    pub fn sdo_response_id(&self) -> CanId {
        CanId::std(SDO_RESP_BASE + self.0 as u16)
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<NodeId> for u8 {
    fn from(value: NodeId) -> Self {
        value.raw()
    }
}

impl TryFrom<u8> for NodeId {
    type Error = InvalidNodeIdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Error for converting u8 to a NodeId
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidNodeIdError(pub u8);

impl core::fmt::Display for InvalidNodeIdError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Invalid node ID {} (must be 1-127)", self.0)
    }
}
impl std::error::Error for InvalidNodeIdError {}
