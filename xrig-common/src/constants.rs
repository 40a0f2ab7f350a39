//! Constants defining the drive objects and special values used on the rig
//!
//! The axis controllers implement the CiA-402 drive profile, plus a vendor object for the manual
//! joystick input. Only the handful of objects the control software touches are listed here.

/// Reference to one sub-object in a node's object dictionary
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// The object index
    pub index: u16,
    /// The sub index
    pub sub: u8,
}

impl ObjectRef {
    /// Create a new object reference
    pub const fn new(index: u16, sub: u8) -> Self {
        Self { index, sub }
    }
}

impl core::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:04X}sub{}", self.index, self.sub)
    }
}

/// Object dictionary entries on the drive controllers
pub mod objects {
    use super::ObjectRef;

    /// Vendor object enabling/disabling the manual joystick input
    pub const JOYSTICK_INPUT: ObjectRef = ObjectRef::new(0x2118, 0);
    /// CiA-402 control word (u16)
    pub const CONTROL_WORD: ObjectRef = ObjectRef::new(0x6040, 0);
    /// CiA-402 status word (u16)
    pub const STATUS_WORD: ObjectRef = ObjectRef::new(0x6041, 0);
    /// Actual position in raw motor increments (i32)
    ///
    /// This is the internal increment count (0x6063), not the scaled position (0x6064); the step
    /// mapping works on increments.
    pub const ACTUAL_POSITION: ObjectRef = ObjectRef::new(0x6063, 0);
    /// Target position in steps (i32)
    pub const TARGET_POSITION: ObjectRef = ObjectRef::new(0x607A, 0);
    /// Profile velocity in steps per 64 seconds (u32)
    pub const PROFILE_VELOCITY: ObjectRef = ObjectRef::new(0x6081, 0);
    /// Position demand value in steps (i32)
    ///
    /// This is the set point the profile generator is currently commanding; it walks towards the
    /// target position while a move is in progress.
    pub const POSITION_DEMAND: ObjectRef = ObjectRef::new(0x60FC, 0);
    /// Digital outputs (u32)
    pub const DIGITAL_OUTPUTS: ObjectRef = ObjectRef::new(0x60FE, 1);
}

/// Control word commands
pub mod control {
    /// Fault reset (rising edge on bit 7)
    pub const FAULT_RESET: u16 = 0x86;
    /// Shutdown: transition to ReadyToSwitchOn
    pub const SHUTDOWN: u16 = 0x06;
    /// Switch on: transition to SwitchedOn
    pub const SWITCH_ON: u16 = 0x07;
    /// Enable operation with immediate set point changes
    ///
    /// This is the default control word on the rig controllers, so a new target position starts a
    /// move as soon as it is written.
    pub const ENABLE_OPERATION: u16 = 0x3F;
    /// Quick stop, keeping the other enable bits set
    pub const QUICK_STOP: u16 = 0x3B;

    /// The control words written, in order, to bring a drive from Fault to OperationEnabled
    pub const FAULT_RESET_SEQUENCE: [u16; 4] = [FAULT_RESET, SHUTDOWN, SWITCH_ON, ENABLE_OPERATION];
}

/// Status word bits
pub mod status {
    /// Set when the last commanded motion has completed
    pub const TARGET_REACHED: u16 = 0x0400;
}

/// Special values used to access vendor objects
pub mod values {
    /// Written to the joystick object to disable manual control
    pub const JOYSTICK_DISABLE: u32 = 0xFF;
    /// Written to the joystick object to give control back to the joystick
    pub const JOYSTICK_ENABLE: u32 = 0xFE;
    /// Digital output pattern which switches stage power on (DOUT1)
    pub const DRIVE_POWER_ON: u32 = 0x0001_0000;
    /// Digital output pattern which switches stage power off
    pub const DRIVE_POWER_OFF: u32 = 0;
}
