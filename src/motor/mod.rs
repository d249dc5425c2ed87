// Motor control module for the hexapod legs
//
// Provides:
// - 3-DOF leg inverse/forward kinematics
// - Joint calibration (angle -> native signal)
// - Actuator port abstraction with batched prepare/commit
// - LX-16A serial protocol and bus backend
// - PCA9685 PWM backend
// - High-level leg controller API

pub mod calibration;
pub mod driver;
pub mod kinematics;
pub mod lewansoul;
pub mod pca9685;
pub mod port;
pub mod protocol;

pub use calibration::{CalibrationError, CalibrationTable, JointCalibration, SignalMap};
pub use driver::LegController;
pub use kinematics::{AngleDomain, IkSolution, JointAngles, LinkLengths, ReachabilityWarning};
pub use lewansoul::LewansoulBus;
pub use pca9685::PwmServoBus;
pub use port::{ActuatorPort, PortError, SimulatedPort};
pub use protocol::{DecodeError, EncodeError, Frame, FrameScanner};
