// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::gait::{BodyPose, GaitKind};
use crate::leg::{FootPosition, PerLeg};

fn default_steps() -> u32 {
    1
}

fn default_cycles() -> u32 {
    1
}

fn default_period_ms() -> u32 {
    1000
}

// Command from teleop/scripts -> runtime
// Tagged by "type", e.g. {"type": "walk", "gait": "ripple", "direction": 90, "steps": 4}
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GaitCommand {
    /// Stand at `height` mm, or the configured stand height
    Stand {
        #[serde(default)]
        height: Option<f32>,
    },
    Sit,
    Home,
    /// Direction in degrees: 0 = forward, 90 = left
    Walk {
        #[serde(default)]
        gait: GaitKind,
        #[serde(default)]
        direction: f32,
        #[serde(default = "default_steps")]
        steps: u32,
    },
    Rotate {
        angle: f32,
        #[serde(default = "default_steps")]
        steps: u32,
    },
    /// Positive = left
    Turn { angle: f32 },
    BodyShift {
        #[serde(default)]
        dx: f32,
        #[serde(default)]
        dy: f32,
        #[serde(default)]
        dz: f32,
    },
    BodyTilt {
        #[serde(default)]
        pitch: f32,
        #[serde(default)]
        roll: f32,
    },
    Twist { angle: f32 },
    WaveBody {
        amplitude: f32,
        #[serde(default = "default_cycles")]
        cycles: u32,
        #[serde(default = "default_period_ms")]
        period_ms: u32,
    },
    CenterAll,
    Startup,
    Shutdown,
    /// Cancel the running gait at the next phase boundary and drop queued commands
    Stop,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    /// Nothing running
    Idle,
    Executing,
    /// Last gait stopped early by a Stop command
    Cancelled,
    /// Last gait failed at the actuator port
    Fault,
}

// Leg telemetry from runtime -> observers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LegStates {
    pub pose: BodyPose,
    pub positions: PerLeg<FootPosition>,
    /// Moves clamped onto the reachable envelope since startup
    pub clamped_moves: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_command_defaults() {
        let cmd: GaitCommand = serde_json::from_str(r#"{"type": "walk"}"#).unwrap();
        assert_eq!(
            cmd,
            GaitCommand::Walk {
                gait: GaitKind::Tripod,
                direction: 0.0,
                steps: 1
            }
        );

        let cmd: GaitCommand =
            serde_json::from_str(r#"{"type": "walk", "gait": "ripple", "direction": 90, "steps": 4}"#).unwrap();
        assert_eq!(
            cmd,
            GaitCommand::Walk {
                gait: GaitKind::Ripple,
                direction: 90.0,
                steps: 4
            }
        );
    }

    #[test]
    fn test_unit_commands_parse() {
        let cmd: GaitCommand = serde_json::from_str(r#"{"type": "stop"}"#).unwrap();
        assert_eq!(cmd, GaitCommand::Stop);
        let cmd: GaitCommand = serde_json::from_str(r#"{"type": "stand"}"#).unwrap();
        assert_eq!(cmd, GaitCommand::Stand { height: None });
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(serde_json::from_str::<GaitCommand>(r#"{"type": "fly"}"#).is_err());
        assert!(serde_json::from_str::<GaitCommand>(r#"{"type": "turn"}"#).is_err());
    }

    #[test]
    fn test_health_wire_format() {
        assert_eq!(serde_json::to_string(&RuntimeHealth::Fault).unwrap(), "\"fault\"");
    }
}
