//! A simulated CiA-402 stepper drive answering expedited SDO requests
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{task::JoinHandle, time::Instant};
use xrig_common::{
    constants::{objects, status::TARGET_REACHED, ObjectRef},
    drive_state::DriveState,
    sdo::{AbortCode, SdoRequest, SdoResponse},
    traits::{AsyncCanReceiver, AsyncCanSender},
    CanMessage, NodeId,
};

use crate::sim_bus::SimBus;

/// Profile velocity a drive powers up with, in steps per 64 s
pub const INITIAL_RATE: u32 = 640_000;

#[derive(Clone, Copy, Debug)]
struct Move {
    from: f64,
    to: f64,
    start: Instant,
    /// steps per second
    speed: f64,
}

impl Move {
    fn position(&self, now: Instant) -> f64 {
        let dist = self.to - self.from;
        let travelled = now.duration_since(self.start).as_secs_f64() * self.speed;
        if travelled >= dist.abs() {
            self.to
        } else {
            self.from + travelled * dist.signum()
        }
    }

    fn done(&self, now: Instant) -> bool {
        self.position(now) == self.to
    }
}

#[derive(Debug)]
struct DriveModel {
    state: DriveState,
    objects: HashMap<ObjectRef, u32>,
    position: f64,
    motion: Option<Move>,
    speed_factor: f64,
    control_words: Vec<u16>,
    requests: Vec<SdoRequest>,
    aborts: HashMap<ObjectRef, AbortCode>,
    mute: bool,
    stray_frames: bool,
}

fn status_bits(state: DriveState) -> u16 {
    match state {
        DriveState::NotReadyToSwitchOn => 0x0200,
        DriveState::SwitchOnDisabled => 0x0250,
        DriveState::ReadyToSwitchOn => 0x0231,
        DriveState::SwitchedOn => 0x0233,
        DriveState::OperationEnabled => 0x0237,
        DriveState::QuickStopActive => 0x0217,
        DriveState::FaultReactionActive => 0x021F,
        DriveState::Fault => 0x0218,
        DriveState::Unknown(raw) => raw,
    }
}

impl DriveModel {
    fn new() -> Self {
        let mut objects = HashMap::new();
        objects.insert(objects::JOYSTICK_INPUT, 0xFE);
        objects.insert(objects::CONTROL_WORD, 0x3F);
        objects.insert(objects::TARGET_POSITION, 0);
        objects.insert(objects::PROFILE_VELOCITY, INITIAL_RATE);
        objects.insert(objects::DIGITAL_OUTPUTS, 0);
        Self {
            state: DriveState::OperationEnabled,
            objects,
            position: 0.0,
            motion: None,
            speed_factor: 1.0,
            control_words: Vec::new(),
            requests: Vec::new(),
            aborts: HashMap::new(),
            mute: false,
            stray_frames: false,
        }
    }

    /// Advance the motion to `now`
    fn update(&mut self, now: Instant) {
        if let Some(m) = self.motion {
            self.position = m.position(now);
            if m.done(now) {
                self.motion = None;
            }
        }
    }

    fn halt(&mut self) {
        self.motion = None;
    }

    fn start_move(&mut self, now: Instant) {
        if self.state != DriveState::OperationEnabled {
            return;
        }
        let target = self.objects[&objects::TARGET_POSITION] as i32 as f64;
        let rate = self.objects[&objects::PROFILE_VELOCITY].max(1) as f64;
        self.motion = Some(Move {
            from: self.position,
            to: target,
            start: now,
            speed: rate / 64.0 * self.speed_factor,
        });
    }

    fn status_word(&self) -> u16 {
        let mut status = status_bits(self.state);
        if self.motion.is_none() {
            status |= TARGET_REACHED;
        }
        status
    }

    fn write_control_word(&mut self, cw: u16) {
        use DriveState::*;
        self.control_words.push(cw);
        let next = if cw & 0x80 != 0 && self.state.is_fault() {
            SwitchOnDisabled
        } else if self.state.is_fault() {
            self.state
        } else if cw & 0x02 == 0 {
            SwitchOnDisabled
        } else if cw & 0x06 == 0x02 {
            match self.state {
                OperationEnabled | QuickStopActive => QuickStopActive,
                _ => SwitchOnDisabled,
            }
        } else {
            match (cw & 0x0F, self.state) {
                (0x06 | 0x0E, _) => ReadyToSwitchOn,
                (0x07, ReadyToSwitchOn | OperationEnabled | SwitchedOn) => SwitchedOn,
                (0x0F, SwitchedOn | OperationEnabled | QuickStopActive) => OperationEnabled,
                (0x0F, ReadyToSwitchOn) => SwitchedOn,
                (_, state) => state,
            }
        };
        if next != OperationEnabled {
            self.halt();
        }
        self.state = next;
    }

    fn read(&mut self, object: ObjectRef) -> Result<SdoResponse, AbortCode> {
        let value = match object {
            objects::STATUS_WORD => {
                return Ok(SdoResponse::expedited_upload(
                    object,
                    &self.status_word().to_le_bytes(),
                ))
            }
            objects::CONTROL_WORD => {
                let cw = self.objects[&object] as u16;
                return Ok(SdoResponse::expedited_upload(object, &cw.to_le_bytes()));
            }
            objects::ACTUAL_POSITION | objects::POSITION_DEMAND => {
                self.position.round() as i32 as u32
            }
            _ => *self.objects.get(&object).ok_or(AbortCode::NoSuchObject)?,
        };
        Ok(SdoResponse::expedited_upload(object, &value.to_le_bytes()))
    }

    fn write(&mut self, object: ObjectRef, data: [u8; 4], now: Instant) -> Result<(), AbortCode> {
        let value = u32::from_le_bytes(data);
        match object {
            objects::STATUS_WORD | objects::ACTUAL_POSITION | objects::POSITION_DEMAND => {
                return Err(AbortCode::ReadOnly)
            }
            objects::CONTROL_WORD => {
                self.objects.insert(object, value);
                self.write_control_word(value as u16);
            }
            objects::TARGET_POSITION => {
                self.objects.insert(object, value);
                self.start_move(now);
            }
            objects::PROFILE_VELOCITY => {
                self.objects.insert(object, value);
                // Set points are applied immediately, so a speed change re-plans the move
                if let Some(m) = self.motion {
                    self.motion = Some(Move {
                        from: self.position,
                        start: now,
                        speed: value.max(1) as f64 / 64.0 * self.speed_factor,
                        ..m
                    });
                }
            }
            _ => {
                if !self.objects.contains_key(&object) {
                    return Err(AbortCode::NoSuchObject);
                }
                self.objects.insert(object, value);
            }
        }
        Ok(())
    }

    fn handle(&mut self, req: SdoRequest, now: Instant) -> Option<SdoResponse> {
        self.requests.push(req);
        self.update(now);
        let object = req.object();
        if let Some(code) = self.aborts.get(&object) {
            return Some(SdoResponse::abort(object, *code));
        }
        let result = match req {
            SdoRequest::Upload { object } => self.read(object),
            SdoRequest::Download { object, data, .. } => self
                .write(object, data, now)
                .map(|_| SdoResponse::download_acknowledge(object)),
            SdoRequest::Abort { .. } => return None,
        };
        Some(result.unwrap_or_else(|code| SdoResponse::abort(object, code)))
    }
}

/// A simulated drive attached to a [`SimBus`]
///
/// The drive starts in OperationEnabled at position 0. Moves run at the profile velocity,
/// multiplied by the speed factor so that tests do not have to wait for real stage speeds.
pub struct SimDrive {
    node: NodeId,
    model: Arc<Mutex<DriveModel>>,
    task: JoinHandle<()>,
}

impl SimDrive {
    pub fn spawn(bus: &mut SimBus, node_id: u8) -> Self {
        let node = NodeId::new(node_id).unwrap();
        let model = Arc::new(Mutex::new(DriveModel::new()));
        let (mut tx, mut rx) = bus.new_port();
        let task_model = model.clone();
        let task = tokio::spawn(async move {
            let req_id = node.sdo_request_id();
            let resp_id = node.sdo_response_id();
            while let Ok(msg) = rx.recv().await {
                if msg.id() != req_id {
                    continue;
                }
                let Ok(req) = SdoRequest::try_from(msg.data()) else {
                    continue;
                };
                let (resp, mute, stray) = {
                    let mut model = task_model.lock().unwrap();
                    let resp = model.handle(req, Instant::now());
                    (resp, model.mute, model.stray_frames)
                };
                if mute {
                    continue;
                }
                if let Some(resp) = resp {
                    if stray {
                        // A response to some other object, and a frame from a different node
                        let other = ObjectRef::new(req.object().index ^ 0x0100, 0);
                        let bogus = SdoResponse::expedited_upload(other, &[0xAA, 0xAA]);
                        tx.send(CanMessage::new(resp_id, &bogus.to_bytes())).await.ok();
                        let other_node = NodeId::new(node.raw() % 127 + 1).unwrap();
                        tx.send(CanMessage::new(
                            other_node.sdo_response_id(),
                            &SdoResponse::download_acknowledge(req.object()).to_bytes(),
                        ))
                        .await
                        .ok();
                        // Frames that do not parse as SDO responses at all
                        tx.send(CanMessage::new(resp_id, &[0x20, 0x99, 0x99, 0, 0, 0, 0, 0]))
                            .await
                            .ok();
                        tx.send(CanMessage::new(resp_id, &[0x00, 0x41])).await.ok();
                    }
                    tx.send(CanMessage::new(resp_id, &resp.to_bytes())).await.ok();
                }
            }
        });
        Self { node, model, task }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    fn with<T>(&self, f: impl FnOnce(&mut DriveModel) -> T) -> T {
        let mut model = self.model.lock().unwrap();
        model.update(Instant::now());
        f(&mut model)
    }

    /// Control words written so far
    pub fn control_words(&self) -> Vec<u16> {
        self.with(|m| m.control_words.clone())
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<SdoRequest> {
        self.with(|m| m.requests.clone())
    }

    /// Values written to `object`, in order
    pub fn writes_to(&self, object: ObjectRef) -> Vec<u32> {
        self.with(|m| {
            m.requests
                .iter()
                .filter_map(|r| match *r {
                    SdoRequest::Download {
                        object: o, data, ..
                    } if o == object => Some(u32::from_le_bytes(data)),
                    _ => None,
                })
                .collect()
        })
    }

    pub fn clear_log(&self) {
        self.with(|m| {
            m.control_words.clear();
            m.requests.clear();
        })
    }

    pub fn state(&self) -> DriveState {
        self.with(|m| m.state)
    }

    pub fn position(&self) -> i32 {
        self.with(|m| m.position.round() as i32)
    }

    pub fn object(&self, object: ObjectRef) -> Option<u32> {
        self.with(|m| m.objects.get(&object).copied())
    }

    pub fn is_moving(&self) -> bool {
        self.with(|m| m.motion.is_some())
    }

    /// Put the drive at a position, stopped
    pub fn set_position(&self, steps: i32) {
        self.with(|m| {
            m.halt();
            m.position = steps as f64;
        })
    }

    /// Put the drive in Fault, stopping any motion
    pub fn set_fault(&self) {
        self.with(|m| {
            m.halt();
            m.state = DriveState::Fault;
        })
    }

    pub fn set_speed_factor(&self, factor: f64) {
        self.with(|m| m.speed_factor = factor)
    }

    /// Answer every access to `object` with an abort
    pub fn abort_on(&self, object: ObjectRef, code: AbortCode) {
        self.with(|m| {
            m.aborts.insert(object, code);
        })
    }

    pub fn clear_aborts(&self) {
        self.with(|m| m.aborts.clear())
    }

    /// Stop answering requests
    pub fn set_mute(&self, mute: bool) {
        self.with(|m| m.mute = mute)
    }

    /// Precede every response with frames the client must ignore
    pub fn set_stray_frames(&self, stray: bool) {
        self.with(|m| m.stray_frames = stray)
    }
}

impl Drop for SimDrive {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Wait until `f` returns true, polling every few milliseconds
pub async fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    f()
}
