// Leg controller for the hexapod
//
// Combines kinematics, calibration and an actuator port into a per-leg API.
// Owns the foot position of every leg; positions change only after the port
// accepted the command.

use tracing::{debug, info, warn};

use super::calibration::{CalibrationError, CalibrationTable, SignalMap};
use super::kinematics::{self, AngleDomain, JointAngles, LinkLengths, ReachabilityWarning};
use super::port::{ActuatorPort, PortError};
use crate::config::RobotConfig;
use crate::leg::{FootPosition, JointId, LegId, PerJoint, PerLeg};

/// High-level controller for all six legs
pub struct LegController<P> {
    port: P,
    signals: SignalMap,
    domain: AngleDomain,
    links: PerLeg<LinkLengths>,
    positions: PerLeg<FootPosition>,
    pending: PerLeg<Option<FootPosition>>,
}

impl<P: ActuatorPort> LegController<P> {
    /// Build from a robot configuration.
    ///
    /// Nothing is sent to the actuators here; every leg starts at the default
    /// stance of the configured stand height.
    pub fn new(config: &RobotConfig, port: P) -> Result<Self, CalibrationError> {
        let signals = SignalMap::new(config.calibration, config.domain.max_deg)?;
        let links = PerLeg::from_fn(|leg| config.links_for(leg));
        let positions = PerLeg::from_fn(|leg| config.stance(leg, config.gait.stand_height));

        info!(
            "Leg controller ready: links {:?}, domain 0-{}°",
            config.links, config.domain.max_deg
        );

        Ok(Self {
            port,
            signals,
            domain: config.domain,
            links,
            positions,
            pending: PerLeg::default(),
        })
    }

    /// Solve IK for a leg and convert to native signals
    fn signals_for(&self, leg: LegId, target: FootPosition) -> ([u16; 3], Option<ReachabilityWarning>) {
        let solution = kinematics::solve_position(target, &self.links[leg], &self.domain);
        if let Some(ref w) = solution.warning {
            warn!("{}: {}", leg, w);
        }
        (self.angles_to_signals(leg, &solution.angles), solution.warning)
    }

    fn angles_to_signals(&self, leg: LegId, angles: &JointAngles) -> [u16; 3] {
        let a = angles.as_array();
        JointId::ALL.map(|joint| self.signals.angle_to_signal(leg, joint, a[joint.index()]))
    }

    /// Move one leg right now.
    ///
    /// Unreachable targets still move (clamped pose) and still update the
    /// stored position; the warning is returned for the caller to inspect.
    pub fn move_leg(
        &mut self,
        leg: LegId,
        target: FootPosition,
        duration_ms: u16,
    ) -> Result<Option<ReachabilityWarning>, PortError> {
        let (signals, warning) = self.signals_for(leg, target);
        debug!("Move {} to {:?} -> {:?} ({}ms)", leg, target, signals, duration_ms);

        for joint in JointId::ALL {
            self.port.write(leg, joint, signals[joint.index()], duration_ms)?;
        }

        self.positions[leg] = target;
        Ok(warning)
    }

    /// Move a leg relative to where it is now
    pub fn move_leg_relative(
        &mut self,
        leg: LegId,
        dx: f32,
        dy: f32,
        dz: f32,
        duration_ms: u16,
    ) -> Result<Option<ReachabilityWarning>, PortError> {
        let target = self.positions[leg].offset(dx, dy, dz);
        self.move_leg(leg, target, duration_ms)
    }

    /// Stage a leg move for the next [`commit`](Self::commit).
    ///
    /// If the port rejects any joint, the whole batch staged so far is
    /// discarded; the next commit starts only moves prepared after the failure.
    pub fn prepare(
        &mut self,
        leg: LegId,
        target: FootPosition,
        duration_ms: u16,
    ) -> Result<Option<ReachabilityWarning>, PortError> {
        let (signals, warning) = self.signals_for(leg, target);
        for joint in JointId::ALL {
            if let Err(e) = self.port.prepare(leg, joint, signals[joint.index()], duration_ms) {
                warn!("Prepare {} {} failed, dropping batch: {}", leg, joint, e);
                self.discard();
                return Err(e);
            }
        }
        self.pending[leg] = Some(target);
        Ok(warning)
    }

    /// Drop the staged batch without moving anything
    pub fn discard(&mut self) {
        self.pending = PerLeg::default();
        if let Err(e) = self.port.discard_staged() {
            warn!("Could not discard staged moves: {}", e);
        }
    }

    /// Start every staged move with one broadcast, then record the new positions
    pub fn commit(&mut self) -> Result<(), PortError> {
        let result = self.port.commit_broadcast();
        let pending = std::mem::take(&mut self.pending);
        result?;

        for (leg, target) in pending.iter() {
            if let Some(target) = target {
                self.positions[leg] = *target;
            }
        }
        Ok(())
    }

    /// Move several legs so they all start at the same instant.
    ///
    /// Returns the legs whose target had to be clamped.
    pub fn move_legs(
        &mut self,
        targets: &[(LegId, FootPosition)],
        duration_ms: u16,
    ) -> Result<Vec<(LegId, ReachabilityWarning)>, PortError> {
        let mut warnings = Vec::new();
        for &(leg, target) in targets {
            if let Some(w) = self.prepare(leg, target, duration_ms)? {
                warnings.push((leg, w));
            }
        }
        self.commit()?;
        Ok(warnings)
    }

    /// Drive one joint to a servo-domain angle, bypassing IK
    pub fn set_joint_angle(
        &mut self,
        leg: LegId,
        joint: JointId,
        angle_deg: f32,
        duration_ms: u16,
    ) -> Result<(), PortError> {
        let signal = self.signals.angle_to_signal(leg, joint, angle_deg);
        self.port.write(leg, joint, signal, duration_ms)
    }

    /// Every joint to its calibrated center, synchronized
    pub fn center_all(&mut self, duration_ms: u16) -> Result<(), PortError> {
        for leg in LegId::ALL {
            for joint in JointId::ALL {
                let center = self.signals.center(leg, joint);
                self.port.prepare(leg, joint, center, duration_ms)?;
            }
        }
        self.port.commit_broadcast()
    }

    pub fn enable(&mut self, leg: LegId, joint: JointId) -> Result<(), PortError> {
        self.port.enable(leg, joint)
    }

    pub fn disable(&mut self, leg: LegId, joint: JointId) -> Result<(), PortError> {
        self.port.disable(leg, joint)
    }

    /// Torque on for all 18 joints
    pub fn enable_all(&mut self) -> Result<(), PortError> {
        info!("Enabling torque on all joints");
        for leg in LegId::ALL {
            for joint in JointId::ALL {
                self.port.enable(leg, joint)?;
            }
        }
        Ok(())
    }

    /// Torque off for all 18 joints (legs can be moved by hand)
    pub fn disable_all(&mut self) -> Result<(), PortError> {
        info!("Disabling torque on all joints");
        for leg in LegId::ALL {
            for joint in JointId::ALL {
                self.port.disable(leg, joint)?;
            }
        }
        Ok(())
    }

    /// Present native signal of one joint, `None` if nothing answered
    pub fn read_state(&mut self, leg: LegId, joint: JointId) -> Option<u16> {
        let state = self.port.read(leg, joint);
        if state.is_none() {
            debug!("No state from {} {}", leg, joint);
        }
        state
    }

    pub fn read_all(&mut self) -> PerLeg<PerJoint<Option<u16>>> {
        PerLeg::from_fn(|leg| PerJoint::from_fn(|joint| self.read_state(leg, joint)))
    }

    /// Swap in a new calibration table; positions are kept
    pub fn replace_calibration(&mut self, table: CalibrationTable) -> Result<(), CalibrationError> {
        self.signals = SignalMap::new(table, self.domain.max_deg)?;
        info!("Calibration table replaced");
        Ok(())
    }

    pub fn position(&self, leg: LegId) -> FootPosition {
        self.positions[leg]
    }

    pub fn positions(&self) -> &PerLeg<FootPosition> {
        &self.positions
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }
}
