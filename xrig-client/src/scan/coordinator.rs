use std::{
    fmt::Display,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use snafu::{ResultExt, Snafu};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use xrig_common::{
    rig_config::ScanTiming,
    traits::{AsyncCanReceiver, AsyncCanSender},
};

use crate::{
    camera::{CameraError, CameraSession},
    motion::{MotionAxis, MotionError},
    scan::{
        log::{PointRecord, PositionSpan, ScanLog},
        plan::{MovementMode, PlanValidationError, ScanPlan},
    },
};

/// Added to the exposure time to get the exposure period
pub const EXPOSURE_PERIOD_MARGIN_S: f64 = 0.005;

/// Lifecycle of the coordinator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanState {
    /// No scan is active
    Idle,
    /// The point loop is executing
    Running,
    /// The point loop has ended and the hardware is being released
    Finishing,
    /// A stop was requested and the worker is unwinding
    Cancelling,
}

/// How a scan ended
#[derive(Clone, Debug, PartialEq)]
pub enum ScanOutcome {
    /// Every exposure was taken
    Completed {
        /// Number of exposures logged
        points: u32,
    },
    /// The scan was stopped
    Cancelled {
        /// Number of exposures logged before the stop
        points: u32,
    },
    /// The scan ended on an error
    Failed {
        /// Description of the error
        reason: String,
    },
}

impl ScanOutcome {
    /// True if every exposure was taken
    pub fn is_completed(&self) -> bool {
        matches!(self, ScanOutcome::Completed { .. })
    }
}

impl Display for ScanOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanOutcome::Completed { points } => write!(f, "Scan completed ({points} images)"),
            ScanOutcome::Cancelled { points } => {
                write!(f, "Scan cancelled after {points} images")
            }
            ScanOutcome::Failed { reason } => write!(f, "Scan failed: {reason}"),
        }
    }
}

/// Snapshot of a running scan
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanProgress {
    /// Linear index of the exposure in progress
    pub index: u32,
    /// Total number of exposures in the scan
    pub total: u32,
    /// Number of exposures completed and logged
    pub completed: u32,
    /// File name of the most recently started exposure
    pub last_file_name: Option<String>,
    /// The most recently completed exposure
    pub last_record: Option<PointRecord>,
}

/// Error returned when a scan cannot be started or joined
#[derive(Debug, Snafu)]
pub enum ScanError {
    /// The plan is invalid
    #[snafu(display("Invalid scan plan: {source}"))]
    InvalidPlan {
        /// The validation failure
        source: PlanValidationError,
    },
    /// A scan is already running
    AlreadyRunning,
    /// The plan names an axis the rig does not have
    #[snafu(display("Rig has no axis named {name}"))]
    UnknownAxis {
        /// The requested name
        name: String,
    },
    /// The scan log could not be created
    #[snafu(display("Failed to create scan log {}: {source}", path.display()))]
    CreateLog {
        /// Path of the log
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },
    /// There is no scan to join
    NotStarted,
    /// A previous worker failed and did not hand back the rig
    #[snafu(display("The rig was lost when a scan worker failed"))]
    RigLost,
    /// The worker task panicked; the rig is lost
    #[snafu(display("Scan worker failed: {message}"))]
    WorkerFailed {
        /// Description of the failure
        message: String,
    },
}

/// Timing of the exposure wait
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScanConfig {
    /// Interval between exposure-finished polls
    pub exposure_poll_interval: Duration,
    /// Time allowed beyond the exposure time before an exposure is considered hung
    pub exposure_timeout_margin: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exposure_poll_interval: Duration::from_secs(1),
            exposure_timeout_margin: Duration::from_secs(30),
        }
    }
}

impl From<&ScanTiming> for ScanConfig {
    fn from(value: &ScanTiming) -> Self {
        Self {
            exposure_poll_interval: Duration::from_millis(value.exposure_poll_interval_ms),
            exposure_timeout_margin: Duration::from_secs(value.exposure_timeout_margin_s),
        }
    }
}

/// The hardware a scan runs on
#[derive(Debug)]
pub struct Rig<S, R, C> {
    /// The axes available to scans
    pub axes: Vec<MotionAxis<S, R>>,
    /// The detector
    pub camera: C,
}

impl<S: AsyncCanSender, R: AsyncCanReceiver, C> Rig<S, R, C> {
    /// Create a new rig
    pub fn new(axes: Vec<MotionAxis<S, R>>, camera: C) -> Self {
        Self { axes, camera }
    }

    /// Look up an axis by name
    pub fn axis(&self, name: &str) -> Option<&MotionAxis<S, R>> {
        self.axes.iter().find(|a| a.name() == name)
    }

    fn axis_index(&self, name: &str) -> Result<usize, ScanError> {
        self.axes
            .iter()
            .position(|a| a.name() == name)
            .ok_or_else(|| UnknownAxisSnafu { name }.build())
    }
}

#[derive(Debug)]
struct Shared {
    state: ScanState,
    progress: ScanProgress,
    outcome: Option<ScanOutcome>,
    cancel: CancellationToken,
}

/// A cloneable handle for observing and stopping scans from other tasks or threads
#[derive(Debug, Clone)]
pub struct ScanHandle {
    shared: Arc<Mutex<Shared>>,
}

impl ScanHandle {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current state
    pub fn state(&self) -> ScanState {
        self.lock().state
    }

    /// A snapshot of the progress of the current or last scan
    pub fn progress(&self) -> ScanProgress {
        self.lock().progress.clone()
    }

    /// The outcome of the last finished scan
    pub fn outcome(&self) -> Option<ScanOutcome> {
        self.lock().outcome.clone()
    }

    /// Request the running scan to stop
    ///
    /// The worker notices the request within one polling interval, stops the axes, aborts the
    /// exposure and closes the log. Has no effect unless a scan is running.
    pub fn stop(&self) {
        let mut shared = self.lock();
        if shared.state == ScanState::Running {
            log::info!("Stopping scan");
            shared.state = ScanState::Cancelling;
            shared.cancel.cancel();
        }
    }

    fn set_state(&self, state: ScanState) {
        self.lock().state = state;
    }

    /// Move from Running to Finishing; a scan being cancelled stays in Cancelling
    fn begin_finishing(&self) {
        let mut shared = self.lock();
        if shared.state == ScanState::Running {
            shared.state = ScanState::Finishing;
        }
    }
}

/// Executes scan plans on a rig
///
/// The coordinator owns the rig while idle. [`Self::start`] moves it into a worker task, and
/// [`Self::join`] takes it back once the scan has ended.
#[derive(Debug)]
pub struct ScanCoordinator<S, R, C> {
    config: ScanConfig,
    handle: ScanHandle,
    rig: Option<Rig<S, R, C>>,
    worker: Option<JoinHandle<Rig<S, R, C>>>,
}

impl<S, R, C> ScanCoordinator<S, R, C>
where
    S: AsyncCanSender + 'static,
    R: AsyncCanReceiver + 'static,
    C: CameraSession + Sync + 'static,
{
    /// Create a new coordinator for `rig`
    pub fn new(rig: Rig<S, R, C>, config: ScanConfig) -> Self {
        Self {
            config,
            handle: ScanHandle {
                shared: Arc::new(Mutex::new(Shared {
                    state: ScanState::Idle,
                    progress: ScanProgress::default(),
                    outcome: None,
                    cancel: CancellationToken::new(),
                })),
            },
            rig: Some(rig),
            worker: None,
        }
    }

    /// Get a handle for observing and stopping scans
    pub fn handle(&self) -> ScanHandle {
        self.handle.clone()
    }

    /// The rig, unless a scan is holding it
    pub fn rig(&self) -> Option<&Rig<S, R, C>> {
        self.rig.as_ref()
    }

    /// Take the rig back, unless a scan is holding it
    pub fn into_rig(self) -> Option<Rig<S, R, C>> {
        self.rig
    }

    /// The current state
    pub fn state(&self) -> ScanState {
        self.handle.state()
    }

    /// A snapshot of the progress of the current or last scan
    pub fn progress(&self) -> ScanProgress {
        self.handle.progress()
    }

    /// Request the running scan to stop
    pub fn stop(&self) {
        self.handle.stop()
    }

    /// Validate `plan`, create its log and start executing it
    ///
    /// A previous scan which has ended but not been joined is joined first.
    pub async fn start(&mut self, plan: ScanPlan) -> Result<(), ScanError> {
        if let Some(worker) = &self.worker {
            if !worker.is_finished() {
                return AlreadyRunningSnafu.fail();
            }
            self.join().await?;
        }
        plan.validate().context(InvalidPlanSnafu)?;

        let Some(rig) = self.rig.take() else {
            return RigLostSnafu.fail();
        };
        let axes = match Self::resolve_axes(&rig, &plan) {
            Ok(axes) => axes,
            Err(e) => {
                self.rig = Some(rig);
                return Err(e);
            }
        };
        let log = match ScanLog::create(
            &plan.log_path,
            &plan.axis1.axis,
            plan.axis2.as_ref().map(|s| s.axis.as_str()),
        )
        .await
        {
            Ok(log) => log,
            Err(source) => {
                self.rig = Some(rig);
                return Err(ScanError::CreateLog {
                    path: plan.log_path.clone(),
                    source,
                });
            }
        };

        let cancel = CancellationToken::new();
        {
            let mut shared = self.handle.lock();
            shared.state = ScanState::Running;
            shared.outcome = None;
            shared.cancel = cancel.clone();
            shared.progress = ScanProgress {
                total: plan.total_points(),
                ..Default::default()
            };
        }

        log::info!(
            "Starting scan of {} images, estimated exposure time {:?}",
            plan.total_points(),
            plan.estimated_duration()
        );
        let run = ScanRun {
            plan,
            rig,
            axes,
            log: Some(log),
            config: self.config,
            handle: self.handle.clone(),
            cancel,
            exposing: false,
            sweeping: false,
            completed: 0,
        };
        self.worker = Some(tokio::spawn(run.run()));
        Ok(())
    }

    fn resolve_axes(
        rig: &Rig<S, R, C>,
        plan: &ScanPlan,
    ) -> Result<(usize, Option<usize>), ScanError> {
        let axis1 = rig.axis_index(&plan.axis1.axis)?;
        let axis2 = match &plan.axis2 {
            Some(sweep) => Some(rig.axis_index(&sweep.axis)?),
            None => None,
        };
        Ok((axis1, axis2))
    }

    /// Wait for the scan to end and take back the rig
    pub async fn join(&mut self) -> Result<ScanOutcome, ScanError> {
        let Some(worker) = self.worker.take() else {
            return NotStartedSnafu.fail();
        };
        match worker.await {
            Ok(rig) => {
                self.rig = Some(rig);
                Ok(self.handle.outcome().unwrap_or(ScanOutcome::Failed {
                    reason: "no outcome recorded".into(),
                }))
            }
            Err(e) => {
                self.handle.set_state(ScanState::Idle);
                WorkerFailedSnafu {
                    message: e.to_string(),
                }
                .fail()
            }
        }
    }
}

/// Why the point loop ended early
enum Interrupt {
    Cancelled,
    Failed(String),
}

impl From<MotionError> for Interrupt {
    fn from(value: MotionError) -> Self {
        match value {
            MotionError::Cancelled { .. } => Interrupt::Cancelled,
            e => Interrupt::Failed(e.to_string()),
        }
    }
}

impl From<CameraError> for Interrupt {
    fn from(value: CameraError) -> Self {
        Interrupt::Failed(value.to_string())
    }
}

impl From<std::io::Error> for Interrupt {
    fn from(value: std::io::Error) -> Self {
        Interrupt::Failed(format!("Failed writing scan log: {value}"))
    }
}

/// State owned by the worker task
struct ScanRun<S, R, C> {
    plan: ScanPlan,
    rig: Rig<S, R, C>,
    axes: (usize, Option<usize>),
    log: Option<ScanLog>,
    config: ScanConfig,
    handle: ScanHandle,
    cancel: CancellationToken,
    exposing: bool,
    sweeping: bool,
    completed: u32,
}

impl<S, R, C> ScanRun<S, R, C>
where
    S: AsyncCanSender,
    R: AsyncCanReceiver,
    C: CameraSession,
{
    fn axis1(&self) -> &MotionAxis<S, R> {
        &self.rig.axes[self.axes.0]
    }

    fn axis2(&self) -> Option<&MotionAxis<S, R>> {
        self.axes.1.map(|i| &self.rig.axes[i])
    }

    async fn run(mut self) -> Rig<S, R, C> {
        let result = self.execute().await;

        let outcome = match result {
            Ok(()) => ScanOutcome::Completed {
                points: self.completed,
            },
            Err(Interrupt::Cancelled) => ScanOutcome::Cancelled {
                points: self.completed,
            },
            Err(Interrupt::Failed(reason)) => {
                log::error!("Scan failed: {reason}");
                ScanOutcome::Failed { reason }
            }
        };
        self.handle.begin_finishing();

        self.release(outcome.is_completed()).await;

        log::info!("{outcome}");
        {
            let mut shared = self.handle.lock();
            shared.state = ScanState::Idle;
            shared.outcome = Some(outcome);
        }
        self.rig
    }

    /// Leave the hardware stopped and under joystick control, and close the log
    async fn release(&mut self, completed: bool) {
        if self.exposing {
            if let Err(e) = self.rig.camera.abort().await {
                log::error!("Failed to abort exposure: {e}");
            }
            self.exposing = false;
        }

        let moving = !completed || self.sweeping;
        let mut axes = vec![self.axes.0];
        axes.extend(self.axes.1);
        for i in axes {
            let axis = &self.rig.axes[i];
            if moving {
                axis.stop_quietly().await;
            } else if let Err(e) = axis.finish_movement().await {
                log::error!("Failed to release axis {}: {e}", axis.name());
            }
        }
        self.sweeping = false;

        if let Some(log) = self.log.take() {
            if let Err(e) = log.close().await {
                log::error!("Failed to close scan log: {e}");
            }
        }
    }

    async fn execute(&mut self) -> Result<(), Interrupt> {
        let camera = &mut self.rig.camera;
        camera.set_exposure_time(self.plan.exposure_time).await?;
        camera
            .set_exposure_period(self.plan.exposure_time + EXPOSURE_PERIOD_MARGIN_S)
            .await?;
        camera.set_image_path(&self.plan.image_path).await?;

        let total = self.plan.total_points();
        let mut row = None;
        for index in 0..total {
            if self.cancel.is_cancelled() {
                return Err(Interrupt::Cancelled);
            }
            let point = self.plan.grid_point(index);
            if row != Some(point.i2) {
                row = Some(point.i2);
                self.start_row(point.i2).await?;
            }
            if self.plan.mode == MovementMode::Stepped && point.first_exposure {
                let target = self.plan.axis1.position(point.i1, MovementMode::Stepped);
                self.axis1()
                    .move_until_cancelled(target, None, &self.cancel)
                    .await?;
            }
            self.expose_point(index).await?;
        }
        Ok(())
    }

    /// Position the axes at the beginning of row `i2`
    async fn start_row(&mut self, i2: u32) -> Result<(), Interrupt> {
        if let (Some(axis2), Some(sweep)) = (self.axis2(), &self.plan.axis2) {
            let target = sweep.position(i2, MovementMode::Stepped);
            log::info!("Row {i2}: moving {} to {target}", axis2.name());
            axis2.move_until_cancelled(target, None, &self.cancel).await?;
        }

        let start = self.plan.axis1.start;
        match self.plan.mode {
            MovementMode::Stepped => {
                self.axis1()
                    .move_until_cancelled(start, None, &self.cancel)
                    .await?;
            }
            MovementMode::Continuous => {
                if self.sweeping {
                    self.axis1().stop().await?;
                    self.sweeping = false;
                }
                self.axis1()
                    .move_until_cancelled(start, None, &self.cancel)
                    .await?;
                let speed = self.plan.sweep_speed();
                log::info!(
                    "Sweeping {} to {} at {speed}/s",
                    self.axis1().name(),
                    self.plan.axis1.end
                );
                self.axis1()
                    .start_move(self.plan.axis1.end, Some(speed))
                    .await?;
                self.sweeping = true;
            }
        }
        Ok(())
    }

    async fn positions(&self) -> Result<(f64, Option<f64>), Interrupt> {
        let p1 = self.axis1().position().await?;
        let p2 = match self.axis2() {
            Some(axis) => Some(axis.position().await?),
            None => None,
        };
        Ok((p1, p2))
    }

    async fn expose_point(&mut self, index: u32) -> Result<(), Interrupt> {
        let start = self.positions().await?;
        let file_name = self.plan.file_name(index);
        {
            let mut shared = self.handle.lock();
            shared.progress.index = index;
            shared.progress.last_file_name = Some(file_name.clone());
        }

        log::debug!("Exposing {file_name}");
        let outcome = self.rig.camera.expose(&file_name).await?;
        if !outcome.accepted {
            return Err(CameraError::Rejected { file_name }.into());
        }
        self.exposing = true;
        if !outcome.finished {
            self.wait_for_exposure(&file_name).await?;
        }

        // The point stays in flight until its record is logged
        let end = self.positions().await?;
        let record = PointRecord {
            index,
            axis1: PositionSpan {
                start: start.0,
                end: end.0,
            },
            axis2: start.1.zip(end.1).map(|(start, end)| PositionSpan { start, end }),
            exposure_time: self.plan.exposure_time,
            file_name,
        };
        if let Some(log) = &mut self.log {
            log.append(&record).await?;
        }
        self.exposing = false;
        self.completed += 1;

        let mut shared = self.handle.lock();
        shared.progress.completed = self.completed;
        shared.progress.last_record = Some(record);
        Ok(())
    }

    async fn wait_for_exposure(&mut self, file_name: &str) -> Result<(), Interrupt> {
        let timeout = Duration::try_from_secs_f64(self.plan.exposure_time)
            .ok()
            .and_then(|t| t.checked_add(self.config.exposure_timeout_margin));
        let Some((timeout, deadline)) =
            timeout.and_then(|t| Some((t, Instant::now().checked_add(t)?)))
        else {
            return Err(Interrupt::Failed(format!(
                "Exposure time {} s of {file_name} is out of range",
                self.plan.exposure_time
            )));
        };
        loop {
            let wake = Instant::now()
                .checked_add(self.config.exposure_poll_interval)
                .map_or(deadline, |t| t.min(deadline));
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Interrupt::Cancelled),
                _ = tokio::time::sleep_until(wake) => {}
            }
            if self.rig.camera.poll_finished().await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(CameraError::Timeout {
                    file_name: file_name.to_string(),
                    timeout,
                }
                .into());
            }
        }
    }
}
