//! Blocking and non-blocking moves on top of [`AxisController`]
use std::{sync::Arc, time::Duration};

use snafu::{ResultExt, Snafu};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use xrig_common::{
    rig_config::{AxisConfig, MotionTiming, RigConfigError},
    traits::{AsyncCanReceiver, AsyncCanSender},
};

use crate::{
    axis::AxisController,
    sdo_client::{SdoClient, SdoClientError},
};

/// Error returned by [`MotionAxis`] moves
#[derive(Clone, Debug, PartialEq, Snafu)]
pub enum MotionError {
    /// Communication with the drive failed
    #[snafu(display("Axis {axis}: {source}"))]
    Sdo {
        /// Name of the axis
        axis: String,
        /// The underlying error
        source: SdoClientError,
    },
    /// The drive did not report target reached in time
    #[snafu(display("Axis {axis} did not reach {target} within {timeout:?}"))]
    MoveTimeout {
        /// Name of the axis
        axis: String,
        /// The commanded position
        target: f64,
        /// The time allowed
        timeout: Duration,
    },
    /// The move was cancelled
    #[snafu(display("Move of axis {axis} cancelled"))]
    Cancelled {
        /// Name of the axis
        axis: String,
    },
}

impl MotionError {
    /// Get the underlying SDO error, if this error came from the bus
    pub fn sdo_error(&self) -> Option<&SdoClientError> {
        match self {
            MotionError::Sdo { source, .. } => Some(source),
            _ => None,
        }
    }
}

type Result<T> = std::result::Result<T, MotionError>;

/// Timing of moves
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionConfig {
    /// Interval between status word reads while waiting on a move
    pub poll_interval: Duration,
    /// Upper bound on the duration of a blocking move
    pub move_timeout: Duration,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            move_timeout: Duration::from_secs(300),
        }
    }
}

impl From<&MotionTiming> for MotionConfig {
    fn from(value: &MotionTiming) -> Self {
        Self {
            poll_interval: Duration::from_millis(value.poll_interval_ms),
            move_timeout: Duration::from_secs(value.move_timeout_s),
        }
    }
}

/// A named axis with move primitives
#[derive(Debug)]
pub struct MotionAxis<S, R> {
    name: String,
    unit: String,
    default_speed: f64,
    config: MotionConfig,
    axis: AxisController<S, R>,
}

impl<S: AsyncCanSender, R: AsyncCanReceiver> MotionAxis<S, R> {
    /// Create a new axis
    ///
    /// `default_speed` is used for moves which do not give a speed.
    pub fn new(
        name: impl Into<String>,
        axis: AxisController<S, R>,
        default_speed: f64,
        config: MotionConfig,
    ) -> Self {
        Self {
            name: name.into(),
            unit: String::new(),
            default_speed,
            config,
            axis,
        }
    }

    /// Create an axis from its configuration entry
    ///
    /// The default speed is half the configured maximum rate.
    pub fn from_config(
        client: Arc<SdoClient<S, R>>,
        cfg: &AxisConfig,
        timing: &MotionTiming,
    ) -> std::result::Result<Self, RigConfigError> {
        let mapping = cfg.mapping()?;
        let axis = AxisController::new(client, cfg.node()?, mapping);
        let mut motion = Self::new(
            cfg.name.clone(),
            axis,
            mapping.rate_to_speed(cfg.default_rate()),
            timing.into(),
        );
        motion.unit = cfg.unit.clone();
        Ok(motion)
    }

    /// The axis name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unit label of positions on this axis
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// The speed used when a move does not specify one
    pub fn default_speed(&self) -> f64 {
        self.default_speed
    }

    /// The move timing
    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// The underlying axis controller
    pub fn controller(&self) -> &AxisController<S, R> {
        &self.axis
    }

    /// Move to `position` and wait for the drive to report target reached
    ///
    /// Takes the axis from the joystick, resets faults, writes the target and polls the status
    /// word. The joystick is enabled again once the move completes. If the target is not reached
    /// within the move timeout, the axis is stopped and [`MotionError::MoveTimeout`] is returned.
    pub async fn move_blocking(&self, position: f64, speed: Option<f64>) -> Result<()> {
        self.move_until_cancelled(position, speed, &CancellationToken::new())
            .await
    }

    /// Like [`Self::move_blocking`], but the wait ends early when `cancel` fires
    ///
    /// On cancellation the axis is stopped and [`MotionError::Cancelled`] is returned. The token
    /// is checked on every poll, so the reaction time is bounded by the poll interval.
    pub async fn move_until_cancelled(
        &self,
        position: f64,
        speed: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let speed = speed.unwrap_or(self.default_speed);
        self.axis.prepare_movement().await.context(SdoSnafu {
            axis: &self.name,
        })?;

        let result = match self.command_move(position, speed).await {
            Ok(()) => self.wait_for_target(position, cancel).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            if matches!(e, MotionError::Sdo { .. }) {
                self.release_quietly().await;
            } else {
                self.stop_quietly().await;
            }
            return Err(e);
        }

        self.finish_movement().await
    }

    async fn command_move(&self, position: f64, speed: f64) -> Result<()> {
        self.axis.reset_faults().await.context(SdoSnafu {
            axis: &self.name,
        })?;
        self.axis
            .set_target(position, speed)
            .await
            .context(SdoSnafu { axis: &self.name })
    }

    async fn wait_for_target(&self, position: f64, cancel: &CancellationToken) -> Result<()> {
        let deadline = Instant::now() + self.config.move_timeout;
        loop {
            if self.finished_moving().await? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return MoveTimeoutSnafu {
                    axis: &self.name,
                    target: position,
                    timeout: self.config.move_timeout,
                }
                .fail();
            }
            let wake = (now + self.config.poll_interval).min(deadline);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return CancelledSnafu { axis: &self.name }.fail();
                }
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    /// Start a move and return without waiting for it to complete
    ///
    /// Faults are only reset when the drive is not already in OperationEnabled, so that a move in
    /// progress can be retargeted without interrupting it.
    pub async fn start_move(&self, position: f64, speed: Option<f64>) -> Result<()> {
        let speed = speed.unwrap_or(self.default_speed);
        self.axis.prepare_movement().await.context(SdoSnafu {
            axis: &self.name,
        })?;
        let result = self.retarget(position, speed).await;
        if result.is_err() {
            self.release_quietly().await;
        }
        result
    }

    async fn retarget(&self, position: f64, speed: f64) -> Result<()> {
        let state = self.axis.state().await.context(SdoSnafu {
            axis: &self.name,
        })?;
        if !state.is_enabled() {
            log::info!("Axis {} is in state {state}, resetting", self.name);
            self.axis.reset_faults().await.context(SdoSnafu {
                axis: &self.name,
            })?;
        }
        self.axis
            .set_target(position, speed)
            .await
            .context(SdoSnafu { axis: &self.name })
    }

    /// Returns true once the last move has completed
    pub async fn finished_moving(&self) -> Result<bool> {
        self.axis
            .target_reached()
            .await
            .context(SdoSnafu { axis: &self.name })
    }

    /// Give the axis back to the joystick
    pub async fn finish_movement(&self) -> Result<()> {
        self.axis
            .finish_movement()
            .await
            .context(SdoSnafu { axis: &self.name })
    }

    /// The actual position in user units
    pub async fn position(&self) -> Result<f64> {
        self.axis
            .position()
            .await
            .context(SdoSnafu { axis: &self.name })
    }

    /// Quick stop the axis and give it back to the joystick
    pub async fn stop(&self) -> Result<()> {
        self.axis
            .quick_stop()
            .await
            .context(SdoSnafu { axis: &self.name })?;
        self.finish_movement().await
    }

    /// Give the axis back to the joystick after a failed move, logging rather than returning a
    /// failure
    async fn release_quietly(&self) {
        if let Err(e) = self.finish_movement().await {
            log::error!("Failed to release axis {} to the joystick: {e}", self.name);
        }
    }

    /// Stop the axis, logging rather than returning a failure
    pub(crate) async fn stop_quietly(&self) {
        if let Err(e) = self.stop().await {
            log::error!("Failed to stop axis {}: {e}", self.name);
        }
    }
}
