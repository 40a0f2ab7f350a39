//! The interface the scan coordinator uses to drive the detector
use std::time::Duration;

use snafu::Snafu;
use tokio::time::Instant;

/// Error returned by a [`CameraSession`]
#[derive(Clone, Debug, PartialEq, Snafu)]
pub enum CameraError {
    /// The camera refused to start an exposure
    #[snafu(display("Camera rejected exposure of {file_name}"))]
    Rejected {
        /// The file name of the rejected exposure
        file_name: String,
    },
    /// The exposure did not finish in time
    #[snafu(display("Exposure of {file_name} did not finish within {timeout:?}"))]
    Timeout {
        /// The file name of the exposure
        file_name: String,
        /// The time allowed
        timeout: Duration,
    },
    /// Communication with the camera failed
    #[snafu(display("Camera communication failed: {message}"))]
    Io {
        /// A description of the failure
        message: String,
    },
}

/// Result of requesting an exposure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExposeOutcome {
    /// The camera accepted the request
    pub accepted: bool,
    /// The exposure was already complete when the request returned
    pub finished: bool,
}

/// A session with an area detector
///
/// Implementations translate these calls into the detector's control protocol.
pub trait CameraSession: Send {
    /// Set the exposure time in seconds
    fn set_exposure_time(
        &mut self,
        seconds: f64,
    ) -> impl core::future::Future<Output = Result<(), CameraError>> + Send;

    /// Set the exposure period in seconds
    fn set_exposure_period(
        &mut self,
        seconds: f64,
    ) -> impl core::future::Future<Output = Result<(), CameraError>> + Send;

    /// Set the directory, as seen by the detector, where images are written
    fn set_image_path(
        &mut self,
        path: &str,
    ) -> impl core::future::Future<Output = Result<(), CameraError>> + Send;

    /// Start one exposure, writing the image to `file_name`
    fn expose(
        &mut self,
        file_name: &str,
    ) -> impl core::future::Future<Output = Result<ExposeOutcome, CameraError>> + Send;

    /// Returns true once the current exposure has completed
    fn poll_finished(
        &mut self,
    ) -> impl core::future::Future<Output = Result<bool, CameraError>> + Send;

    /// Abort the current exposure
    fn abort(&mut self) -> impl core::future::Future<Output = Result<(), CameraError>> + Send;
}

/// A camera which only keeps time
///
/// Every exposure is accepted and finishes once the exposure time has elapsed. This allows the
/// motion of a scan to be rehearsed without a detector attached.
#[derive(Debug, Default)]
pub struct DryRunCamera {
    exposure_time: Duration,
    started: Option<Instant>,
    exposures: Vec<String>,
}

impl DryRunCamera {
    /// Create a new dry run camera
    pub fn new() -> Self {
        Self::default()
    }

    /// File names of all exposures requested so far
    pub fn exposures(&self) -> &[String] {
        &self.exposures
    }
}

impl CameraSession for DryRunCamera {
    async fn set_exposure_time(&mut self, seconds: f64) -> Result<(), CameraError> {
        self.exposure_time = Duration::try_from_secs_f64(seconds).map_err(|e| {
            IoSnafu {
                message: e.to_string(),
            }
            .build()
        })?;
        Ok(())
    }

    async fn set_exposure_period(&mut self, _seconds: f64) -> Result<(), CameraError> {
        Ok(())
    }

    async fn set_image_path(&mut self, path: &str) -> Result<(), CameraError> {
        log::info!("Dry run: images would be written to {path}");
        Ok(())
    }

    async fn expose(&mut self, file_name: &str) -> Result<ExposeOutcome, CameraError> {
        log::info!("Dry run: exposing {file_name}");
        self.exposures.push(file_name.to_string());
        self.started = Some(Instant::now());
        Ok(ExposeOutcome {
            accepted: true,
            finished: self.exposure_time.is_zero(),
        })
    }

    async fn poll_finished(&mut self) -> Result<bool, CameraError> {
        Ok(match self.started {
            Some(t) => t.elapsed() >= self.exposure_time,
            None => true,
        })
    }

    async fn abort(&mut self) -> Result<(), CameraError> {
        self.started = None;
        Ok(())
    }
}
