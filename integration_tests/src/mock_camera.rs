//! A scriptable camera recording every call made by the scan coordinator
use std::sync::{Arc, Mutex};

use xrig_client::{CameraError, CameraSession, ExposeOutcome};

#[derive(Debug, Default)]
struct CameraModel {
    exposure_time: Option<f64>,
    exposure_period: Option<f64>,
    image_path: Option<String>,
    exposures: Vec<String>,
    polls_to_finish: u32,
    polls_left: u32,
    hang_from: Option<usize>,
    reject: Option<String>,
    aborts: u32,
    polls: u32,
}

/// A camera whose exposures finish after a configurable number of polls
///
/// Clones share state, so a test can keep one clone to inspect while the rig owns the other.
#[derive(Clone, Debug, Default)]
pub struct MockCamera {
    model: Arc<Mutex<CameraModel>>,
}

impl MockCamera {
    /// A camera whose exposures complete on the first poll
    pub fn new() -> Self {
        let camera = Self::default();
        camera.set_polls_to_finish(1);
        camera
    }

    /// Number of polls before an exposure reports finished; 0 finishes within `expose`
    pub fn set_polls_to_finish(&self, polls: u32) {
        self.model.lock().unwrap().polls_to_finish = polls;
    }

    /// Never finish exposures from the `index`th (0 based) on
    pub fn hang_from(&self, index: usize) {
        self.model.lock().unwrap().hang_from = Some(index);
    }

    /// Refuse to start the exposure of `file_name`
    pub fn reject(&self, file_name: &str) {
        self.model.lock().unwrap().reject = Some(file_name.to_string());
    }

    pub fn exposures(&self) -> Vec<String> {
        self.model.lock().unwrap().exposures.clone()
    }

    pub fn exposure_time(&self) -> Option<f64> {
        self.model.lock().unwrap().exposure_time
    }

    pub fn exposure_period(&self) -> Option<f64> {
        self.model.lock().unwrap().exposure_period
    }

    pub fn image_path(&self) -> Option<String> {
        self.model.lock().unwrap().image_path.clone()
    }

    pub fn aborts(&self) -> u32 {
        self.model.lock().unwrap().aborts
    }

    /// Number of `poll_finished` calls so far
    pub fn polls(&self) -> u32 {
        self.model.lock().unwrap().polls
    }
}

impl CameraSession for MockCamera {
    async fn set_exposure_time(&mut self, seconds: f64) -> Result<(), CameraError> {
        self.model.lock().unwrap().exposure_time = Some(seconds);
        Ok(())
    }

    async fn set_exposure_period(&mut self, seconds: f64) -> Result<(), CameraError> {
        self.model.lock().unwrap().exposure_period = Some(seconds);
        Ok(())
    }

    async fn set_image_path(&mut self, path: &str) -> Result<(), CameraError> {
        self.model.lock().unwrap().image_path = Some(path.to_string());
        Ok(())
    }

    async fn expose(&mut self, file_name: &str) -> Result<ExposeOutcome, CameraError> {
        let mut model = self.model.lock().unwrap();
        if model.reject.as_deref() == Some(file_name) {
            return Ok(ExposeOutcome {
                accepted: false,
                finished: false,
            });
        }
        model.exposures.push(file_name.to_string());
        let hung = model
            .hang_from
            .is_some_and(|k| model.exposures.len() > k);
        model.polls_left = if hung { u32::MAX } else { model.polls_to_finish };
        Ok(ExposeOutcome {
            accepted: true,
            finished: model.polls_left == 0,
        })
    }

    async fn poll_finished(&mut self) -> Result<bool, CameraError> {
        let mut model = self.model.lock().unwrap();
        model.polls += 1;
        if model.polls_left == u32::MAX {
            return Ok(false);
        }
        model.polls_left = model.polls_left.saturating_sub(1);
        Ok(model.polls_left == 0)
    }

    async fn abort(&mut self) -> Result<(), CameraError> {
        self.model.lock().unwrap().aborts += 1;
        Ok(())
    }
}
