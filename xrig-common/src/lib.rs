//! Common functionality shared among other xrig crates.
//!
//! This holds the pieces which do not depend on a running bus: CAN message types, the expedited
//! SDO wire format, the object dictionary entries used on the rig's drive controllers, status word
//! decoding, step/unit conversion and the rig configuration file.
//!
//! Most users will have no reason to depend on this crate directly, as it is re-exported by
//! `xrig-client`.
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod constants;
pub mod drive_state;
pub mod messages;
pub mod node_id;
pub mod rig_config;
pub mod sdo;
pub mod traits;
pub mod units;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
mod socketcan;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub use socketcan::{
    open_socketcan, ReceiveError, SocketCanReceiver, SocketCanSendError, SocketCanSender,
};

pub use constants::ObjectRef;
pub use drive_state::DriveState;
pub use messages::{CanError, CanId, CanMessage};
pub use node_id::NodeId;
pub use units::StepMapping;
