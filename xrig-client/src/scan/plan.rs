use std::{path::PathBuf, time::Duration};

use snafu::Snafu;

/// File name extension of the images written by the detector
pub const IMAGE_EXTENSION: &str = ".tif";

/// How axis 1 moves during a scan
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MovementMode {
    /// Axis 1 is stopped at each grid position while the exposures are taken
    Stepped,
    /// Axis 1 sweeps from start to end at constant speed while exposures are taken back to back
    Continuous,
}

/// The range covered by one axis
#[derive(Clone, Debug, PartialEq)]
pub struct AxisSweep {
    /// Name of the axis, as used in the rig configuration
    pub axis: String,
    /// First position
    pub start: f64,
    /// Last position
    pub end: f64,
    /// Number of grid points
    pub steps: u32,
}

impl AxisSweep {
    /// Create a new sweep
    pub fn new(axis: impl Into<String>, start: f64, end: f64, steps: u32) -> Self {
        Self {
            axis: axis.into(),
            start,
            end,
            steps,
        }
    }

    fn divisor(&self, mode: MovementMode) -> f64 {
        match mode {
            MovementMode::Stepped => self.steps as f64 - 1.0,
            MovementMode::Continuous => self.steps as f64,
        }
    }

    /// The distance between grid points, or 0 if there is only one point
    pub fn step_size(&self, mode: MovementMode) -> f64 {
        let div = self.divisor(mode);
        if div <= 0.0 {
            0.0
        } else {
            (self.end - self.start) / div
        }
    }

    /// The position of grid point `i`
    ///
    /// In stepped mode the grid includes both end points. In continuous mode, point `i` is where
    /// the `i`th of `steps` equal slices of the sweep begins.
    pub fn position(&self, i: u32, mode: MovementMode) -> f64 {
        self.start + i as f64 * self.step_size(mode)
    }
}

/// Error returned when a scan plan cannot be executed
#[derive(Clone, Debug, PartialEq, Snafu)]
pub enum PlanValidationError {
    /// An axis has no grid points
    #[snafu(display("Axis {axis} has zero steps"))]
    ZeroSteps {
        /// Name of the axis
        axis: String,
    },
    /// No exposures per point
    #[snafu(display("Exposure count must be at least 1"))]
    ZeroExposures,
    /// The exposure time is not a positive number
    #[snafu(display("Invalid exposure time {exposure_time}"))]
    InvalidExposureTime {
        /// The offending value
        exposure_time: f64,
    },
    /// The file name prefix is empty or contains characters outside `[A-Za-z0-9_-]`
    #[snafu(display("Invalid file name prefix {prefix:?}"))]
    InvalidPrefix {
        /// The offending prefix
        prefix: String,
    },
    /// Both sweeps use the same axis
    #[snafu(display("Axis {axis} is used for both sweeps"))]
    SameAxis {
        /// Name of the axis
        axis: String,
    },
    /// The number of exposures in the scan does not fit in a u32
    #[snafu(display(
        "Too many exposures: {steps1} x {steps2} points with {exposures} exposures each"
    ))]
    TooManyPoints {
        /// Steps on axis 1
        steps1: u32,
        /// Steps on axis 2
        steps2: u32,
        /// Exposures per point
        exposures: u32,
    },
}

/// Indices of one exposure within the scan grid
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridPoint {
    /// Linear index of the exposure, 0 based
    pub index: u32,
    /// Index of the grid point (exposure index divided by exposures per point)
    pub point: u32,
    /// Grid index on axis 1
    pub i1: u32,
    /// Grid index on axis 2 (0 for single axis scans)
    pub i2: u32,
    /// True for the first exposure at this grid point
    pub first_exposure: bool,
}

/// Everything needed to run a scan
#[derive(Clone, Debug, PartialEq)]
pub struct ScanPlan {
    /// The inner axis
    pub axis1: AxisSweep,
    /// The optional outer axis, moved once per row of axis 1
    pub axis2: Option<AxisSweep>,
    /// How axis 1 moves
    pub mode: MovementMode,
    /// Exposure time in seconds
    pub exposure_time: f64,
    /// Number of exposures taken at each grid point
    pub exposures: u32,
    /// Image file name prefix
    pub prefix: String,
    /// Image directory on the detector side
    pub image_path: String,
    /// Where the scan log is written
    pub log_path: PathBuf,
}

fn valid_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl ScanPlan {
    /// Check that the plan can be executed
    pub fn validate(&self) -> Result<(), PlanValidationError> {
        for sweep in std::iter::once(&self.axis1).chain(self.axis2.as_ref()) {
            if sweep.steps == 0 {
                return ZeroStepsSnafu {
                    axis: &sweep.axis,
                }
                .fail();
            }
        }
        if let Some(axis2) = &self.axis2 {
            if axis2.axis == self.axis1.axis {
                return SameAxisSnafu {
                    axis: &axis2.axis,
                }
                .fail();
            }
        }
        if self.exposures == 0 {
            return ZeroExposuresSnafu.fail();
        }
        if !self.exposure_time.is_finite()
            || self.exposure_time <= 0.0
            || Duration::try_from_secs_f64(self.exposure_time).is_err()
        {
            return InvalidExposureTimeSnafu {
                exposure_time: self.exposure_time,
            }
            .fail();
        }
        if !valid_prefix(&self.prefix) {
            return InvalidPrefixSnafu {
                prefix: &self.prefix,
            }
            .fail();
        }
        let steps2 = self.steps2();
        if self
            .axis1
            .steps
            .checked_mul(steps2)
            .and_then(|n| n.checked_mul(self.exposures))
            .is_none()
        {
            return TooManyPointsSnafu {
                steps1: self.axis1.steps,
                steps2,
                exposures: self.exposures,
            }
            .fail();
        }
        Ok(())
    }

    /// Number of steps on axis 2, 1 for a single axis scan
    pub fn steps2(&self) -> u32 {
        self.axis2.as_ref().map(|s| s.steps).unwrap_or(1)
    }

    /// Total number of exposures in the scan
    ///
    /// Saturates for plans which fail [`Self::validate`] with [`PlanValidationError::TooManyPoints`].
    pub fn total_points(&self) -> u32 {
        self.axis1
            .steps
            .saturating_mul(self.steps2())
            .saturating_mul(self.exposures)
    }

    /// The time spent exposing, ignoring moves
    pub fn estimated_duration(&self) -> Duration {
        let secs = self.axis1.steps as f64
            * self.steps2() as f64
            * self.exposure_time
            * self.exposures as f64;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }

    /// Speed of axis 1 during a continuous sweep, in units per second
    ///
    /// The sweep covers one row in the time taken by all exposures of the row.
    pub fn sweep_speed(&self) -> f64 {
        (self.axis1.end - self.axis1.start).abs()
            / (self.exposure_time * self.exposures as f64 * self.axis1.steps as f64)
    }

    /// Decompose a linear exposure index into grid indices
    pub fn grid_point(&self, index: u32) -> GridPoint {
        let point = index / self.exposures;
        GridPoint {
            index,
            point,
            i1: point % self.axis1.steps,
            i2: point / self.axis1.steps,
            first_exposure: index % self.exposures == 0,
        }
    }

    /// The image file name for exposure `index`
    ///
    /// Images are numbered from 1.
    pub fn file_name(&self, index: u32) -> String {
        format!("{}{:04}{IMAGE_EXTENSION}", self.prefix, index + 1)
    }
}
