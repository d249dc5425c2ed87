// Actuator port: the only thing the motion core knows about hardware
//
// Backends:
// - LewansoulBus (framed serial, see lewansoul.rs)
// - PwmServoBus (PCA9685 expanders, see pca9685.rs)
// - SimulatedPort (in-memory, used for --backend sim and in tests)

use tracing::trace;

use super::protocol::EncodeError;
use crate::leg::{JointId, LegId, PerJoint, PerLeg};

/// Error types for actuator dispatch
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("PWM expander {chip} error: {reason}")]
    Pwm { chip: u8, reason: String },

    #[error("Invalid PWM channel {chip}:{channel}")]
    InvalidChannel { chip: u8, channel: u8 },
}

/// Backend-agnostic actuator interface.
///
/// `prepare` stages a command without moving anything; `commit_broadcast`
/// starts every staged command at the same instant.
pub trait ActuatorPort {
    /// Move one joint immediately. `duration_ms == 0` means max speed.
    fn write(&mut self, leg: LegId, joint: JointId, signal: u16, duration_ms: u16) -> Result<(), PortError>;

    /// Stage a move for the next broadcast commit
    fn prepare(&mut self, leg: LegId, joint: JointId, signal: u16, duration_ms: u16) -> Result<(), PortError>;

    /// Start all staged moves simultaneously
    fn commit_broadcast(&mut self) -> Result<(), PortError>;

    /// Drop every staged move so the next commit starts only what is staged after this
    fn discard_staged(&mut self) -> Result<(), PortError>;

    /// Present signal of a joint, `None` if nothing answered (or no feedback channel)
    fn read(&mut self, leg: LegId, joint: JointId) -> Option<u16>;

    /// Torque on
    fn enable(&mut self, leg: LegId, joint: JointId) -> Result<(), PortError>;

    /// Torque off
    fn disable(&mut self, leg: LegId, joint: JointId) -> Result<(), PortError>;
}

impl<P: ActuatorPort + ?Sized> ActuatorPort for Box<P> {
    fn write(&mut self, leg: LegId, joint: JointId, signal: u16, duration_ms: u16) -> Result<(), PortError> {
        (**self).write(leg, joint, signal, duration_ms)
    }

    fn prepare(&mut self, leg: LegId, joint: JointId, signal: u16, duration_ms: u16) -> Result<(), PortError> {
        (**self).prepare(leg, joint, signal, duration_ms)
    }

    fn commit_broadcast(&mut self) -> Result<(), PortError> {
        (**self).commit_broadcast()
    }

    fn discard_staged(&mut self) -> Result<(), PortError> {
        (**self).discard_staged()
    }

    fn read(&mut self, leg: LegId, joint: JointId) -> Option<u16> {
        (**self).read(leg, joint)
    }

    fn enable(&mut self, leg: LegId, joint: JointId) -> Result<(), PortError> {
        (**self).enable(leg, joint)
    }

    fn disable(&mut self, leg: LegId, joint: JointId) -> Result<(), PortError> {
        (**self).disable(leg, joint)
    }
}

/// Everything a [`SimulatedPort`] was asked to do, in order
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PortEvent {
    Write { leg: LegId, joint: JointId, signal: u16, duration_ms: u16 },
    Prepare { leg: LegId, joint: JointId, signal: u16, duration_ms: u16 },
    Commit { staged: usize },
    Discard { dropped: usize },
    Enable { leg: LegId, joint: JointId },
    Disable { leg: LegId, joint: JointId },
}

/// In-memory actuator port.
///
/// Tracks the signal each joint would be holding and records every event.
#[derive(Debug, Default)]
pub struct SimulatedPort {
    signals: PerLeg<PerJoint<Option<u16>>>,
    torque: PerLeg<PerJoint<bool>>,
    staged: Vec<(LegId, JointId, u16)>,
    events: Vec<PortEvent>,
    feedback: bool,
}

impl SimulatedPort {
    pub fn new() -> Self {
        Self {
            feedback: true,
            ..Self::default()
        }
    }

    /// Port that never answers reads, like the PWM backend
    pub fn without_feedback() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[PortEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn commit_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, PortEvent::Commit { .. }))
            .count()
    }

    pub fn write_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, PortEvent::Write { .. }))
            .count()
    }

    pub fn signal(&self, leg: LegId, joint: JointId) -> Option<u16> {
        self.signals[leg][joint]
    }

    pub fn torque_enabled(&self, leg: LegId, joint: JointId) -> bool {
        self.torque[leg][joint]
    }
}

impl ActuatorPort for SimulatedPort {
    fn write(&mut self, leg: LegId, joint: JointId, signal: u16, duration_ms: u16) -> Result<(), PortError> {
        trace!("[sim] write {} {} -> {} ({}ms)", leg, joint, signal, duration_ms);
        self.signals[leg][joint] = Some(signal);
        self.events.push(PortEvent::Write { leg, joint, signal, duration_ms });
        Ok(())
    }

    fn prepare(&mut self, leg: LegId, joint: JointId, signal: u16, duration_ms: u16) -> Result<(), PortError> {
        trace!("[sim] prepare {} {} -> {} ({}ms)", leg, joint, signal, duration_ms);
        self.staged.push((leg, joint, signal));
        self.events.push(PortEvent::Prepare { leg, joint, signal, duration_ms });
        Ok(())
    }

    fn commit_broadcast(&mut self) -> Result<(), PortError> {
        let staged = self.staged.len();
        for (leg, joint, signal) in self.staged.drain(..) {
            self.signals[leg][joint] = Some(signal);
        }
        trace!("[sim] commit {} staged moves", staged);
        self.events.push(PortEvent::Commit { staged });
        Ok(())
    }

    fn discard_staged(&mut self) -> Result<(), PortError> {
        let dropped = self.staged.len();
        self.staged.clear();
        trace!("[sim] discard {} staged moves", dropped);
        self.events.push(PortEvent::Discard { dropped });
        Ok(())
    }

    fn read(&mut self, leg: LegId, joint: JointId) -> Option<u16> {
        if self.feedback { self.signals[leg][joint] } else { None }
    }

    fn enable(&mut self, leg: LegId, joint: JointId) -> Result<(), PortError> {
        self.torque[leg][joint] = true;
        self.events.push(PortEvent::Enable { leg, joint });
        Ok(())
    }

    fn disable(&mut self, leg: LegId, joint: JointId) -> Result<(), PortError> {
        self.torque[leg][joint] = false;
        self.events.push(PortEvent::Disable { leg, joint });
        Ok(())
    }
}
