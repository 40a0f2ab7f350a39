//! Conversion between user units (mm or degrees) and motor steps

use snafu::Snafu;

/// Error creating a [`StepMapping`]
#[derive(Clone, Copy, Debug, PartialEq, Snafu)]
#[snafu(display("steps_per_unit must be finite and non-zero, got {steps_per_unit}"))]
pub struct InvalidMappingError {
    /// The rejected scale factor
    pub steps_per_unit: f64,
}

/// A fixed affine map between a position in user units and motor steps
///
/// `steps = round((pos - ref_pos) * steps_per_unit + ref_pos_steps)`
///
/// The same parameters are used in both directions for the lifetime of the mapping, so converting
/// a position to steps and back is exact to within one step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepMapping {
    steps_per_unit: f64,
    ref_pos_steps: i32,
    ref_pos: f64,
}

impl StepMapping {
    /// Motor rates are expressed in steps per this many seconds
    pub const RATE_PERIOD_S: f64 = 64.0;

    /// Create a new mapping
    ///
    /// # Arguments
    /// - `steps_per_unit`: Steps per mm or per degree. Must be non-zero.
    /// - `ref_pos_steps`: The step count at the reference position
    /// - `ref_pos`: The reference position in user units
    pub fn new(
        steps_per_unit: f64,
        ref_pos_steps: i32,
        ref_pos: f64,
    ) -> Result<Self, InvalidMappingError> {
        if steps_per_unit == 0.0 || !steps_per_unit.is_finite() {
            return InvalidMappingSnafu { steps_per_unit }.fail();
        }
        Ok(Self {
            steps_per_unit,
            ref_pos_steps,
            ref_pos,
        })
    }

    /// Steps per user unit
    pub fn steps_per_unit(&self) -> f64 {
        self.steps_per_unit
    }

    /// Convert a position in user units to motor steps
    pub fn pos_to_steps(&self, pos: f64) -> i32 {
        let steps = ((pos - self.ref_pos) * self.steps_per_unit + self.ref_pos_steps as f64).round();
        steps.clamp(i32::MIN as f64, i32::MAX as f64) as i32
    }

    /// Convert motor steps to a position in user units
    pub fn steps_to_pos(&self, steps: i32) -> f64 {
        (steps as f64 - self.ref_pos_steps as f64) / self.steps_per_unit + self.ref_pos
    }

    /// Convert a speed in user units per second to the controller rate (steps per 64 seconds)
    ///
    /// The direction of motion is given by the target position, so the sign of `speed` is ignored.
    pub fn speed_to_rate(&self, speed: f64) -> u32 {
        let rate = (speed * self.steps_per_unit * Self::RATE_PERIOD_S).abs().round();
        rate.min(u32::MAX as f64) as u32
    }

    /// Convert a controller rate (steps per 64 seconds) to user units per second
    pub fn rate_to_speed(&self, rate: u32) -> f64 {
        rate as f64 / Self::RATE_PERIOD_S / self.steps_per_unit.abs()
    }

    /// The size of one step in user units
    pub fn resolution(&self) -> f64 {
        1.0 / self.steps_per_unit.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_reference_point() {
        let map = StepMapping::new(1600.0, -9056, 300.0).unwrap();
        assert_eq!(-9056, map.pos_to_steps(300.0));
        assert_eq!(-9056 + 1600, map.pos_to_steps(301.0));
        assert_eq!(300.0, map.steps_to_pos(-9056));
    }

    #[test]
    fn test_rejects_zero_scale() {
        assert!(StepMapping::new(0.0, 0, 0.0).is_err());
        assert!(StepMapping::new(f64::NAN, 0, 0.0).is_err());
    }

    #[test]
    fn test_speed_rate() {
        let map = StepMapping::new(1000.0, 230360, 0.0).unwrap();
        // 1 deg/s = 1000 steps/s = 64000 steps per 64 s
        assert_eq!(64000, map.speed_to_rate(1.0));
        assert_eq!(64000, map.speed_to_rate(-1.0));
        assert_eq!(1.0, map.rate_to_speed(64000));
    }

    #[test]
    fn test_round_trip_random() {
        let mut rng = rand::rng();
        for _ in 0..200 {
            let steps_per_unit = match rng.random_bool(0.5) {
                true => rng.random_range(1.0..5000.0),
                false => -rng.random_range(1.0..5000.0),
            };
            let ref_pos_steps = rng.random_range(-1_000_000..1_000_000);
            let ref_pos = rng.random_range(-500.0..500.0);
            let map = StepMapping::new(steps_per_unit, ref_pos_steps, ref_pos).unwrap();
            for _ in 0..50 {
                let pos = rng.random_range(-360.0..360.0);
                let back = map.steps_to_pos(map.pos_to_steps(pos));
                assert!(
                    (back - pos).abs() <= map.resolution(),
                    "{map:?}: {pos} -> {back}"
                );
            }
        }
    }
}
