//! Rig configuration
//!
//! A rig config is a TOML file describing the bus, the axes attached to it, and the timing
//! parameters used when moving and scanning. Every section is optional; missing values fall back
//! to the defaults of the lab rig.
//!
//! # Example
//!
//! ```toml
//! [bus]
//! interface = "can0"
//! response_timeout_ms = 150
//!
//! [motion]
//! poll_interval_ms = 100
//! move_timeout_s = 300
//!
//! [scan]
//! exposure_poll_interval_ms = 1000
//! exposure_timeout_margin_s = 30
//!
//! [[axis]]
//! name = "rot"
//! node_id = 3
//! steps_per_unit = 1000
//! ref_pos_steps = 230360
//! ref_pos = 0
//! max_rate = 1200000
//! unit = "deg"
//! ```
use std::{path::Path, time::Duration};

use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::{
    node_id::NodeId,
    units::{InvalidMappingError, StepMapping},
};

/// Error returned when loading a rig configuration
#[derive(Debug, Snafu)]
pub enum RigConfigError {
    /// Failed to read the config file
    #[snafu(display("IO error reading {path}: {source}"))]
    Io {
        /// The file being read
        path: String,
        /// The underlying error
        source: std::io::Error,
    },
    /// Failed to parse the TOML
    #[snafu(display("Error parsing rig config: {source}"))]
    Parse {
        /// The underlying error
        source: toml::de::Error,
    },
    /// An axis has an invalid node ID
    #[snafu(display("Axis {axis} has invalid node ID {node_id}"))]
    InvalidNodeId {
        /// Axis name
        axis: String,
        /// The offending ID
        node_id: u8,
    },
    /// An axis has an invalid step mapping
    #[snafu(display("Axis {axis}: {source}"))]
    InvalidMapping {
        /// Axis name
        axis: String,
        /// The underlying error
        source: InvalidMappingError,
    },
    /// Two axes share a name or a node ID
    #[snafu(display("Duplicate axis {what}"))]
    DuplicateAxis {
        /// Description of the duplicated value
        what: String,
    },
    /// A referenced axis does not exist
    #[snafu(display("No axis named {name}"))]
    NoSuchAxis {
        /// The requested name
        name: String,
    },
}

fn default_interface() -> String {
    "can0".into()
}

fn default_response_timeout_ms() -> u64 {
    150
}

/// Bus settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// Name of the CAN interface, e.g. "can0"
    #[serde(default = "default_interface")]
    pub interface: String,
    /// How long to wait for an SDO response
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl BusConfig {
    /// The SDO response timeout
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_move_timeout_s() -> u64 {
    300
}

/// Motion timing
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MotionTiming {
    /// Interval between status word reads while waiting on a move
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on a blocking move
    #[serde(default = "default_move_timeout_s")]
    pub move_timeout_s: u64,
}

impl Default for MotionTiming {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            move_timeout_s: default_move_timeout_s(),
        }
    }
}

fn default_exposure_poll_interval_ms() -> u64 {
    1000
}

fn default_exposure_timeout_margin_s() -> u64 {
    30
}

/// Scan timing
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScanTiming {
    /// Interval between exposure-finished polls
    #[serde(default = "default_exposure_poll_interval_ms")]
    pub exposure_poll_interval_ms: u64,
    /// Time allowed beyond the exposure time before an exposure is considered hung
    #[serde(default = "default_exposure_timeout_margin_s")]
    pub exposure_timeout_margin_s: u64,
}

impl Default for ScanTiming {
    fn default() -> Self {
        Self {
            exposure_poll_interval_ms: default_exposure_poll_interval_ms(),
            exposure_timeout_margin_s: default_exposure_timeout_margin_s(),
        }
    }
}

fn default_max_rate() -> u32 {
    1_200_000
}

fn default_unit() -> String {
    "mm".into()
}

/// Configuration of one motorized axis
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AxisConfig {
    /// Short name used on the command line and in scan logs
    pub name: String,
    /// Node ID of the axis controller
    pub node_id: u8,
    /// Steps per mm or degree
    pub steps_per_unit: f64,
    /// Step count at the reference position
    pub ref_pos_steps: i32,
    /// Reference position in user units
    pub ref_pos: f64,
    /// Maximum positioning rate in steps per 64 seconds
    #[serde(default = "default_max_rate")]
    pub max_rate: u32,
    /// Unit label
    #[serde(default = "default_unit")]
    pub unit: String,
    /// True if this controller's digital output switches power to the stages
    #[serde(default)]
    pub power_gate: bool,
}

impl AxisConfig {
    /// Get the validated node ID
    pub fn node(&self) -> Result<NodeId, RigConfigError> {
        NodeId::new(self.node_id).map_err(|_| {
            InvalidNodeIdSnafu {
                axis: self.name.clone(),
                node_id: self.node_id,
            }
            .build()
        })
    }

    /// Get the validated step mapping
    pub fn mapping(&self) -> Result<StepMapping, RigConfigError> {
        StepMapping::new(self.steps_per_unit, self.ref_pos_steps, self.ref_pos).context(
            InvalidMappingSnafu {
                axis: self.name.clone(),
            },
        )
    }

    /// The default positioning rate: half the maximum
    pub fn default_rate(&self) -> u32 {
        self.max_rate / 2
    }
}

/// The complete rig configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RigConfig {
    /// Bus settings
    #[serde(default)]
    pub bus: BusConfig,
    /// Motion timing
    #[serde(default)]
    pub motion: MotionTiming,
    /// Scan timing
    #[serde(default)]
    pub scan: ScanTiming,
    /// The axes on the bus
    #[serde(default = "default_axes", rename = "axis")]
    pub axes: Vec<AxisConfig>,
}

fn default_axes() -> Vec<AxisConfig> {
    vec![
        AxisConfig {
            name: "y".into(),
            node_id: 1,
            steps_per_unit: 2400.0,
            ref_pos_steps: 11976,
            ref_pos: 0.0,
            max_rate: 1_200_000,
            unit: "mm".into(),
            power_gate: true,
        },
        AxisConfig {
            name: "z".into(),
            node_id: 2,
            steps_per_unit: 1600.0,
            ref_pos_steps: -9056,
            ref_pos: 300.0,
            max_rate: 1_200_000,
            unit: "mm".into(),
            power_gate: false,
        },
        AxisConfig {
            name: "rot".into(),
            node_id: 3,
            steps_per_unit: 1000.0,
            ref_pos_steps: 230360,
            ref_pos: 0.0,
            max_rate: 1_200_000,
            unit: "deg".into(),
            power_gate: false,
        },
    ]
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            motion: MotionTiming::default(),
            scan: ScanTiming::default(),
            axes: default_axes(),
        }
    }
}

impl RigConfig {
    /// Read a rig configuration from a TOML string
    pub fn load_from_str(s: &str) -> Result<Self, RigConfigError> {
        let config: RigConfig = toml::from_str(s).context(ParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a rig configuration from a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, RigConfigError> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        Self::load_from_str(&s)
    }

    /// Check every axis, and that no name or node ID is used twice
    pub fn validate(&self) -> Result<(), RigConfigError> {
        for (i, axis) in self.axes.iter().enumerate() {
            axis.node()?;
            axis.mapping()?;
            for other in &self.axes[i + 1..] {
                if other.name == axis.name {
                    return DuplicateAxisSnafu {
                        what: format!("name {}", axis.name),
                    }
                    .fail();
                }
                if other.node_id == axis.node_id {
                    return DuplicateAxisSnafu {
                        what: format!("node ID {}", axis.node_id),
                    }
                    .fail();
                }
            }
        }
        Ok(())
    }

    /// Look up an axis by name
    pub fn axis(&self, name: &str) -> Result<&AxisConfig, RigConfigError> {
        self.axes
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| NoSuchAxisSnafu { name }.build())
    }

    /// The axis whose controller gates stage power, if any
    pub fn power_gate_axis(&self) -> Option<&AxisConfig> {
        self.axes.iter().find(|a| a.power_gate)
    }
}
