//! Control of the xrig X-ray imaging rig
//!
//! The stages of the rig are driven by CiA-402 axis controllers on a CAN bus. This crate provides
//! the layers between the bus and a front end:
//!
//! - [`SdoClient`]: expedited reads and writes of drive objects, shared by all axes on a bus
//! - [`AxisController`]: the drive objects of one axis, in user units
//! - [`MotionAxis`]: blocking and cancellable moves
//! - [`scan`]: execution of scan plans, synchronized with a [`CameraSession`]
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(target_os = "linux")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use xrig_client::{open_socketcan, MotionAxis, RigConfig, SdoClient};
//!
//! let config = RigConfig::default();
//! let (tx, rx) = open_socketcan(&config.bus.interface)?;
//! let client = Arc::new(SdoClient::new(tx, rx));
//! let rot = MotionAxis::from_config(client, config.axis("rot")?, &config.motion)?;
//! rot.move_blocking(90.0, None).await?;
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod axis;
pub mod camera;
pub mod motion;
pub mod scan;
mod sdo_client;

pub use axis::AxisController;
pub use camera::{CameraError, CameraSession, DryRunCamera, ExposeOutcome};
pub use motion::{MotionAxis, MotionConfig, MotionError};
pub use sdo_client::{SdoClient, SdoClientError, DEFAULT_RESPONSE_TIMEOUT};

#[cfg(target_os = "linux")]
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub use xrig_common::{open_socketcan, SocketCanReceiver, SocketCanSender};

pub use xrig_common as common;
pub use xrig_common::rig_config::RigConfig;
