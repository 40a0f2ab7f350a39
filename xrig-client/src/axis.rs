//! Control of a single CiA-402 axis controller
use std::sync::Arc;

use xrig_common::{
    constants::{control, objects, values},
    drive_state::{self, DriveState},
    traits::{AsyncCanReceiver, AsyncCanSender},
    NodeId, StepMapping,
};

use crate::sdo_client::{SdoClient, SdoClientError};

type Result<T> = std::result::Result<T, SdoClientError>;

/// Access to the drive objects of one axis controller
///
/// Positions and speeds are given in user units (mm or degrees) and converted to steps using the
/// axis' [`StepMapping`]. No operation retries: any SDO error is returned to the caller as is.
#[derive(Debug)]
pub struct AxisController<S, R> {
    node: NodeId,
    mapping: StepMapping,
    client: Arc<SdoClient<S, R>>,
}

impl<S, R> Clone for AxisController<S, R> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            mapping: self.mapping,
            client: self.client.clone(),
        }
    }
}

impl<S: AsyncCanSender, R: AsyncCanReceiver> AxisController<S, R> {
    /// Create a controller for the drive at `node`
    pub fn new(client: Arc<SdoClient<S, R>>, node: NodeId, mapping: StepMapping) -> Self {
        Self {
            node,
            mapping,
            client,
        }
    }

    /// The node ID of the drive
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The step mapping used for this axis
    pub fn mapping(&self) -> &StepMapping {
        &self.mapping
    }

    /// Bring the drive from Fault (or any other state) to OperationEnabled
    ///
    /// Writes the control word sequence fault reset, shutdown, switch on, enable operation. The
    /// status word is read back after each step for diagnostics. The sequence stops at the first
    /// failure.
    pub async fn reset_faults(&self) -> Result<()> {
        for cmd in control::FAULT_RESET_SEQUENCE {
            self.write_control_word(cmd).await?;
            let status = self.status().await?;
            log::debug!(
                "Node {}: control word 0x{cmd:02X}, status 0x{status:04X} ({})",
                self.node,
                DriveState::from_status_word(status)
            );
        }
        Ok(())
    }

    /// Take the axis away from the manual joystick before a commanded move
    pub async fn prepare_movement(&self) -> Result<()> {
        self.client
            .write(self.node, objects::JOYSTICK_INPUT, values::JOYSTICK_DISABLE)
            .await
    }

    /// Give the axis back to the manual joystick
    pub async fn finish_movement(&self) -> Result<()> {
        self.client
            .write(self.node, objects::JOYSTICK_INPUT, values::JOYSTICK_ENABLE)
            .await
    }

    /// Write a new target position and positioning speed
    ///
    /// With the drive in OperationEnabled, the move starts as soon as the target is written.
    pub async fn set_target(&self, position: f64, speed: f64) -> Result<()> {
        let steps = self.mapping.pos_to_steps(position);
        let rate = self.mapping.speed_to_rate(speed);
        log::debug!(
            "Node {}: target {position} ({steps} steps) at {speed}/s ({rate} steps/64s)",
            self.node
        );
        self.client
            .write_i32(self.node, objects::TARGET_POSITION, steps)
            .await?;
        self.client
            .write_u32(self.node, objects::PROFILE_VELOCITY, rate)
            .await
    }

    /// Read the status word
    pub async fn status(&self) -> Result<u16> {
        self.client.read_u16(self.node, objects::STATUS_WORD).await
    }

    /// Read the control word
    pub async fn control_word(&self) -> Result<u16> {
        self.client.read_u16(self.node, objects::CONTROL_WORD).await
    }

    /// Write the control word
    ///
    /// The drives accept the control word as a 4 byte download (command 0x23), zero extended.
    pub async fn write_control_word(&self, value: u16) -> Result<()> {
        self.client
            .write(self.node, objects::CONTROL_WORD, value.into())
            .await
    }

    /// Read the target position, in steps
    pub async fn target_position(&self) -> Result<i32> {
        self.client.read_i32(self.node, objects::TARGET_POSITION).await
    }

    /// Read the actual position, in steps
    pub async fn actual_position(&self) -> Result<i32> {
        self.client.read_i32(self.node, objects::ACTUAL_POSITION).await
    }

    /// Read the position demand, in steps
    pub async fn position_demand(&self) -> Result<i32> {
        self.client.read_i32(self.node, objects::POSITION_DEMAND).await
    }

    /// Read the target speed, in user units per second
    pub async fn target_speed(&self) -> Result<f64> {
        let rate = self
            .client
            .read_u32(self.node, objects::PROFILE_VELOCITY)
            .await?;
        Ok(self.mapping.rate_to_speed(rate))
    }

    /// Returns true once the last commanded move has completed
    pub async fn target_reached(&self) -> Result<bool> {
        Ok(drive_state::target_reached(self.status().await?))
    }

    /// Read and decode the drive state
    pub async fn state(&self) -> Result<DriveState> {
        Ok(DriveState::from_status_word(self.status().await?))
    }

    /// Read the actual position in user units
    pub async fn position(&self) -> Result<f64> {
        Ok(self.mapping.steps_to_pos(self.actual_position().await?))
    }

    /// Stop the current move with the drive's quick stop deceleration
    pub async fn quick_stop(&self) -> Result<()> {
        self.write_control_word(control::QUICK_STOP).await
    }

    /// Switch the stage power output on this controller
    pub async fn set_drive_power(&self, on: bool) -> Result<()> {
        let value = if on {
            values::DRIVE_POWER_ON
        } else {
            values::DRIVE_POWER_OFF
        };
        self.client
            .write(self.node, objects::DIGITAL_OUTPUTS, value)
            .await
    }
}
