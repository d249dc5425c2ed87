//! Per-joint calibration and the angle -> native signal mapping.
//!
//! A native signal is whatever the backend understands: a position count
//! (0-1000) on the LX-16A bus, or a pulse width in microseconds on the PWM
//! expanders. The mapping is the same for both:
//!
//! 1. mirror the angle if the joint is reversed (`max_deg - angle`)
//! 2. interpolate `[0, max_deg]` onto `[signal_min, signal_max]`
//! 3. add the calibration trim
//! 4. clamp to `[signal_min, signal_max]`

use serde::{Deserialize, Serialize};

use crate::leg::{JointId, LegId, PerJoint, PerLeg};

/// Hobby PWM servo pulse range (us)
pub const PWM_MIN_US: u16 = 500;
pub const PWM_CENTER_US: u16 = 1500;
pub const PWM_MAX_US: u16 = 2500;

/// LX-16A position range
pub const LX16A_MIN_POS: u16 = 0;
pub const LX16A_CENTER_POS: u16 = 500;
pub const LX16A_MAX_POS: u16 = 1000;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CalibrationError {
    #[error("{leg} {joint}: signal range must satisfy min < center < max (got {min}/{center}/{max})")]
    InvalidRange {
        leg: LegId,
        joint: JointId,
        min: u16,
        center: u16,
        max: u16,
    },

    #[error("{leg} {joint}: direction must be 1 or -1 (got {direction})")]
    InvalidDirection {
        leg: LegId,
        joint: JointId,
        direction: i8,
    },
}

/// Calibration record for one joint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointCalibration {
    pub signal_min: u16,
    pub signal_max: u16,
    pub signal_center: u16,
    /// 1 = normal, -1 = mirrored (right-side legs)
    pub direction: i8,
    /// Trim added after interpolation, in native units
    #[serde(default)]
    pub offset: i16,
}

impl JointCalibration {
    pub fn pwm(direction: i8) -> Self {
        Self {
            signal_min: PWM_MIN_US,
            signal_max: PWM_MAX_US,
            signal_center: PWM_CENTER_US,
            direction,
            offset: 0,
        }
    }

    pub fn lx16a(direction: i8, offset: i16) -> Self {
        Self {
            signal_min: LX16A_MIN_POS,
            signal_max: LX16A_MAX_POS,
            signal_center: LX16A_CENTER_POS,
            direction,
            offset,
        }
    }

    pub fn validate(&self, leg: LegId, joint: JointId) -> Result<(), CalibrationError> {
        if !(self.signal_min < self.signal_center && self.signal_center < self.signal_max) {
            return Err(CalibrationError::InvalidRange {
                leg,
                joint,
                min: self.signal_min,
                center: self.signal_center,
                max: self.signal_max,
            });
        }
        if self.direction != 1 && self.direction != -1 {
            return Err(CalibrationError::InvalidDirection {
                leg,
                joint,
                direction: self.direction,
            });
        }
        Ok(())
    }

    pub fn center(&self) -> u16 {
        self.signal_center
    }

    /// Map a servo-domain angle (0..=max_deg) to the native signal.
    ///
    /// Out-of-range results are clamped, never rejected.
    pub fn signal_for(&self, angle_deg: f32, max_deg: f32) -> u16 {
        let angle = if angle_deg.is_finite() {
            angle_deg.clamp(0.0, max_deg)
        } else {
            max_deg / 2.0
        };
        let angle = if self.direction < 0 { max_deg - angle } else { angle };

        let span = f32::from(self.signal_max) - f32::from(self.signal_min);
        let signal = f32::from(self.signal_min) + (angle / max_deg) * span + f32::from(self.offset);

        signal
            .round()
            .clamp(f32::from(self.signal_min), f32::from(self.signal_max)) as u16
    }
}

/// Calibration for all 18 joints.
///
/// Loaded at startup and only ever replaced as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationTable(pub PerLeg<PerJoint<JointCalibration>>);

impl CalibrationTable {
    /// Default PWM table: left legs normal, right legs mirrored
    pub fn pwm_default() -> Self {
        Self(PerLeg::from_fn(|leg| {
            PerJoint::from_fn(|_| JointCalibration::pwm(default_direction(leg)))
        }))
    }

    /// Default LX-16A table: left legs normal, right legs mirrored, no trim
    pub fn lx16a_default() -> Self {
        Self(PerLeg::from_fn(|leg| {
            PerJoint::from_fn(|_| JointCalibration::lx16a(default_direction(leg), 0))
        }))
    }

    pub fn get(&self, leg: LegId, joint: JointId) -> &JointCalibration {
        &self.0[leg][joint]
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        for (leg, joints) in self.0.iter() {
            for (joint, cal) in joints.iter() {
                cal.validate(leg, joint)?;
            }
        }
        Ok(())
    }
}

fn default_direction(leg: LegId) -> i8 {
    if leg.is_right() { -1 } else { 1 }
}

/// Angle -> signal conversion for every joint of the robot
#[derive(Debug, Clone)]
pub struct SignalMap {
    table: CalibrationTable,
    max_deg: f32,
}

impl SignalMap {
    pub fn new(table: CalibrationTable, max_deg: f32) -> Result<Self, CalibrationError> {
        table.validate()?;
        Ok(Self { table, max_deg })
    }

    pub fn angle_to_signal(&self, leg: LegId, joint: JointId, angle_deg: f32) -> u16 {
        self.table.get(leg, joint).signal_for(angle_deg, self.max_deg)
    }

    pub fn center(&self, leg: LegId, joint: JointId) -> u16 {
        self.table.get(leg, joint).center()
    }

    pub fn table(&self) -> &CalibrationTable {
        &self.table
    }

    pub fn max_deg(&self) -> f32 {
        self.max_deg
    }
}
