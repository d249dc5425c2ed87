// Timeouts, topics, robot configuration
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::gait::GaitParams;
use crate::leg::{FootPosition, LegId, PerJoint, PerLeg};
use crate::motor::calibration::{CalibrationError, CalibrationTable};
use crate::motor::kinematics::{AngleDomain, LinkLengths};
use crate::motor::lewansoul;
use crate::motor::pca9685::{self, PwmChannel};

// Runtime loop frequency (command drain + telemetry)
pub const LOOP_HZ: u64 = 20;

// Zenoh topics
pub const TOPIC_CMD_GAIT: &str = "hexapod/cmd/gait"; // commands
pub const TOPIC_LEGS: &str = "hexapod/state/legs"; // foot positions
pub const TOPIC_HEALTH: &str = "hexapod/state/health"; // health status

// Serial port for the LX-16A bus (Raspberry Pi UART)
pub const SERIAL_PORT: &str = "/dev/serial0";

// I2C bus with the two PCA9685 expanders
pub const I2C_BUS: &str = "/dev/i2c-1";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid calibration: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Invalid link lengths for {leg}: {links:?}")]
    InvalidLinks { leg: LegId, links: LinkLengths },

    #[error("Invalid gait parameter {field}: {value}")]
    InvalidGait { field: &'static str, value: f32 },
}

/// Everything that describes one physical robot.
///
/// Built once at startup and handed to the leg controller; nothing in the
/// motion core reads global tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Link lengths shared by all legs
    pub links: LinkLengths,
    /// Per-leg link lengths, where a leg differs from `links`
    pub link_overrides: PerLeg<Option<LinkLengths>>,
    pub domain: AngleDomain,
    /// Leg mounting angles in the body frame (degrees, front = 0)
    pub mount_angles: PerLeg<f32>,
    pub calibration: CalibrationTable,
    /// LX-16A bus ids
    pub servo_ids: PerLeg<PerJoint<u8>>,
    /// PCA9685 wiring
    pub pwm_channels: PerLeg<PerJoint<PwmChannel>>,
    pub pwm_addresses: [u8; 2],
    pub gait: GaitParams,
}

impl Default for RobotConfig {
    /// Small hexapod: SG90 servos on two PCA9685 boards
    fn default() -> Self {
        Self {
            links: LinkLengths::new(25.0, 55.0, 75.0),
            link_overrides: PerLeg::default(),
            domain: AngleDomain::PWM_180,
            //      FRONT (0)
            //   L1       R1    (330, 30)
            //   L2--[B]--R2    (270, 90)
            //   L3       R3    (210, 150)
            mount_angles: PerLeg([330.0, 270.0, 210.0, 30.0, 90.0, 150.0]),
            calibration: CalibrationTable::pwm_default(),
            servo_ids: lewansoul::default_servo_ids(),
            pwm_channels: pca9685::default_channels(),
            pwm_addresses: pca9685::DEFAULT_ADDRESSES,
            gait: GaitParams::default(),
        }
    }
}

impl RobotConfig {
    /// Large hexapod: 18 LX-16A serial bus servos
    pub fn lx16a() -> Self {
        Self {
            links: LinkLengths::new(50.0, 80.0, 120.0),
            domain: AngleDomain::LX16A_240,
            //      FRONT (0)
            //   L1 (30°)    R1 (330°)
            //   L2 (90°)    R2 (270°)
            //   L3 (150°)   R3 (210°)
            mount_angles: PerLeg([30.0, 90.0, 150.0, 330.0, 270.0, 210.0]),
            calibration: CalibrationTable::lx16a_default(),
            gait: GaitParams::lx16a(),
            ..Self::default()
        }
    }

    /// Read a JSON config; missing fields fall back to the small-hexapod defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        info!("Loaded robot config from {}", path.display());
        Ok(config)
    }

    /// Reject values the motion core cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.calibration.validate()?;

        for leg in LegId::ALL {
            let links = self.links_for(leg);
            if !links.is_valid() {
                return Err(ConfigError::InvalidLinks { leg, links });
            }
        }

        let g = &self.gait;
        let positive = [
            ("stand_height", g.stand_height),
            ("stance_width", g.stance_width),
            ("rise_step", g.rise_step),
            ("turn_increment_deg", g.turn_increment_deg),
            ("cycle_time_ms", g.cycle_time_ms as f32),
            ("wave_step_ms", f32::from(g.wave_step_ms)),
            ("ripple_phase_ms", f32::from(g.ripple_phase_ms)),
            ("rise_step_ms", f32::from(g.rise_step_ms)),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidGait { field, value });
            }
        }

        let finite = [
            ("sit_height", g.sit_height),
            ("step_length", g.step_length),
            ("step_height", g.step_height),
            ("tilt_lever", g.tilt_lever),
            ("curl_radius", g.curl_radius),
            ("curl_height", g.curl_height),
            ("flat_height", g.flat_height),
        ];
        if let Some((field, value)) = finite.into_iter().find(|(_, v)| !v.is_finite()) {
            return Err(ConfigError::InvalidGait { field, value });
        }

        let reach = LegId::ALL
            .iter()
            .map(|&leg| self.links_for(leg).max_reach())
            .fold(f32::INFINITY, f32::min);
        if g.stand_height > reach {
            return Err(ConfigError::InvalidGait {
                field: "stand_height",
                value: g.stand_height,
            });
        }
        Ok(())
    }

    pub fn links_for(&self, leg: LegId) -> LinkLengths {
        self.link_overrides[leg].unwrap_or(self.links)
    }

    /// Foot position `radius` mm out from the hip along the leg's mounting angle
    pub fn stance_at(&self, leg: LegId, radius: f32, z: f32) -> FootPosition {
        let (sin_a, cos_a) = self.mount_angles[leg].to_radians().sin_cos();
        FootPosition::new(radius * cos_a, radius * sin_a, z)
    }

    /// Default stance at a body height
    pub fn stance(&self, leg: LegId, height: f32) -> FootPosition {
        self.stance_at(leg, self.gait.stance_width, -height)
    }
}
