//! Gait engine: walking patterns and body poses built from synchronized phases.
//!
//! Every multi-leg move goes through [`LegController::move_legs`], i.e. one
//! prepare/commit batch, followed by a blocking wait for the phase duration.
//! Phases never overlap. A [`CancelToken`] is checked before each phase, so
//! a gait stops at a phase boundary and never inside a committed move.
//!
//! Leg groupings:
//!
//! | Gait   | Legs moving at once | Grouping                       |
//! |--------|---------------------|--------------------------------|
//! | Tripod | 3                   | {L1, R2, L3} / {R1, L2, R3}    |
//! | Ripple | 1 + shifting stance | R1 R2 R3 L3 L2 L1              |
//! | Wave   | 1                   | R3 R2 R1 L3 L2 L1              |

use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RobotConfig;
use crate::leg::{FootPosition, LegId, PerLeg};
use crate::messages::{GaitCommand, LegStates};
use crate::motor::driver::LegController;
use crate::motor::port::{ActuatorPort, PortError};

/// Tripod A: front-left, mid-right, back-left
pub const TRIPOD_A: [LegId; 3] = [LegId::L1, LegId::R2, LegId::L3];
/// Tripod B: front-right, mid-left, back-right
pub const TRIPOD_B: [LegId; 3] = [LegId::R1, LegId::L2, LegId::R3];

/// Wave gait: back to front, right side then left side
pub const WAVE_SEQUENCE: [LegId; 6] = [
    LegId::R3,
    LegId::R2,
    LegId::R1,
    LegId::L3,
    LegId::L2,
    LegId::L1,
];

/// Ripple gait: front to back on the right, back to front on the left
pub const RIPPLE_SEQUENCE: [LegId; 6] = [
    LegId::R1,
    LegId::R2,
    LegId::R3,
    LegId::L3,
    LegId::L2,
    LegId::L1,
];

/// Body-wave resolution
const WAVE_BODY_STEPS: u32 = 20;

#[derive(Debug, thiserror::Error)]
pub enum GaitError {
    #[error("Actuator dispatch failed: {0}")]
    Port(#[from] PortError),

    #[error("Gait cancelled")]
    Cancelled,
}

/// Locomotion pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GaitKind {
    /// Fastest, three legs on the ground
    #[default]
    Tripod,
    /// Slowest, five legs on the ground
    Wave,
    /// In between: one leg swings while the stance legs keep shifting
    Ripple,
}

impl GaitKind {
    pub fn groups(self) -> GaitPhaseGroup {
        match self {
            GaitKind::Tripod => GaitPhaseGroup::Tripods([TRIPOD_A, TRIPOD_B]),
            GaitKind::Wave => GaitPhaseGroup::Sequence(WAVE_SEQUENCE),
            GaitKind::Ripple => GaitPhaseGroup::Sequence(RIPPLE_SEQUENCE),
        }
    }
}

/// How a gait partitions the legs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaitPhaseGroup {
    /// Two disjoint sets of three
    Tripods([[LegId; 3]; 2]),
    /// Every leg once per cycle, in order
    Sequence([LegId; 6]),
}

impl GaitPhaseGroup {
    /// True if every leg appears exactly once across the groups
    pub fn is_partition(&self) -> bool {
        let legs: Vec<LegId> = match self {
            GaitPhaseGroup::Tripods(sets) => sets.iter().flatten().copied().collect(),
            GaitPhaseGroup::Sequence(seq) => seq.to_vec(),
        };
        legs.len() == 6 && LegId::ALL.iter().all(|leg| legs.iter().filter(|l| *l == leg).count() == 1)
    }
}

/// Discrete body states used by startup and shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyPose {
    Unknown,
    Curled,
    Flat,
    Sitting,
    Standing,
}

/// Gait tuning (mm, ms, degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaitParams {
    pub stand_height: f32,
    pub sit_height: f32,
    pub stance_width: f32,
    pub step_length: f32,
    pub step_height: f32,
    /// One full tripod cycle (both halves)
    pub cycle_time_ms: u32,
    /// Each wave sub-phase (lift, swing, plant)
    pub wave_step_ms: u16,
    /// Ripple swing phase; the plant phase takes half
    pub ripple_phase_ms: u16,
    /// Body poses (shift, tilt, twist)
    pub pose_ms: u16,
    /// Startup/shutdown settle delay per pose
    pub settle_ms: u16,
    /// Height increment while rising or lowering
    pub rise_step: f32,
    pub rise_step_ms: u16,
    /// Lever arm for tilt height deltas
    pub tilt_lever: f32,
    /// Rotation per cycle used by turn_left / turn_right
    pub turn_increment_deg: f32,
    /// Wave gait: shift the stance legs back while a leg plants
    pub wave_compensation: bool,
    pub curl_radius: f32,
    pub curl_height: f32,
    pub flat_height: f32,
}

impl Default for GaitParams {
    fn default() -> Self {
        Self {
            stand_height: 50.0,
            sit_height: 20.0,
            stance_width: 80.0,
            step_length: 40.0,
            step_height: 30.0,
            cycle_time_ms: 400,
            wave_step_ms: 50,
            ripple_phase_ms: 100,
            pose_ms: 300,
            settle_ms: 300,
            rise_step: 10.0,
            rise_step_ms: 100,
            tilt_lever: 50.0,
            turn_increment_deg: 30.0,
            wave_compensation: true,
            curl_radius: 30.0,
            curl_height: 20.0,
            flat_height: 10.0,
        }
    }
}

impl GaitParams {
    /// Tuning for the large LX-16A hexapod
    pub fn lx16a() -> Self {
        Self {
            stand_height: 80.0,
            sit_height: 30.0,
            stance_width: 100.0,
            step_length: 60.0,
            step_height: 40.0,
            cycle_time_ms: 600,
            wave_step_ms: 150,
            ripple_phase_ms: 150,
            curl_radius: 60.0,
            curl_height: 30.0,
            flat_height: 20.0,
            ..Self::default()
        }
    }
}

/// Blocking wait at each phase boundary
pub trait PhaseClock {
    fn wait(&mut self, duration: Duration);
}

/// Sleeps the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadClock;

impl PhaseClock for ThreadClock {
    fn wait(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Shared stop flag, checked before every phase
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn ms(value: f32) -> u16 {
    value.round().clamp(0.0, f32::from(u16::MAX)) as u16
}

/// Step vector for a heading in degrees (0 = forward, 90 = left)
fn step_vector(direction_deg: f32, length: f32) -> (f32, f32) {
    let (sin_d, cos_d) = direction_deg.to_radians().sin_cos();
    (length * cos_d, length * sin_d)
}

/// Heights from `from` to `to` (inclusive) in `step` increments
fn height_ramp(from: f32, to: f32, step: f32) -> impl Iterator<Item = f32> {
    let step = step.abs().max(1.0);
    let count = ((to - from).abs() / step).floor() as u32;
    let sign = if to >= from { 1.0 } else { -1.0 };
    (0..=count).map(move |i| from + sign * step * i as f32)
}

/// Sequences leg moves into gaits and poses
pub struct GaitEngine<P, C = ThreadClock> {
    legs: LegController<P>,
    params: GaitParams,
    mount_angles: PerLeg<f32>,
    clock: C,
    cancel: CancelToken,
    pose: BodyPose,
    clamped_moves: usize,
    /// Body heights beyond this are out of reach for the shortest leg
    max_height: f32,
}

impl<P: ActuatorPort> GaitEngine<P, ThreadClock> {
    pub fn new(config: &RobotConfig, legs: LegController<P>) -> Self {
        Self::with_clock(config, legs, ThreadClock)
    }
}

impl<P: ActuatorPort, C: PhaseClock> GaitEngine<P, C> {
    pub fn with_clock(config: &RobotConfig, legs: LegController<P>, clock: C) -> Self {
        Self {
            legs,
            params: config.gait,
            mount_angles: config.mount_angles,
            clock,
            cancel: CancelToken::new(),
            pose: BodyPose::Unknown,
            clamped_moves: 0,
            max_height: LegId::ALL
                .iter()
                .map(|&leg| config.links_for(leg).max_reach())
                .fold(f32::INFINITY, f32::min),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn legs(&self) -> &LegController<P> {
        &self.legs
    }

    pub fn legs_mut(&mut self) -> &mut LegController<P> {
        &mut self.legs
    }

    pub fn params(&self) -> &GaitParams {
        &self.params
    }

    pub fn set_params(&mut self, params: GaitParams) {
        self.params = params;
    }

    pub fn pose(&self) -> BodyPose {
        self.pose
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Moves that had to be clamped onto the leg envelope so far
    pub fn clamped_moves(&self) -> usize {
        self.clamped_moves
    }

    /// Snapshot for telemetry
    pub fn leg_states(&self) -> LegStates {
        LegStates {
            pose: self.pose,
            positions: *self.legs.positions(),
            clamped_moves: self.clamped_moves,
        }
    }

    fn position(&self, leg: LegId) -> FootPosition {
        self.legs.position(leg)
    }

    fn stance_at(&self, leg: LegId, radius: f32, z: f32) -> FootPosition {
        let (sin_a, cos_a) = self.mount_angles[leg].to_radians().sin_cos();
        FootPosition::new(radius * cos_a, radius * sin_a, z)
    }

    /// One synchronized phase: batch all targets, commit once, wait it out
    fn phase(&mut self, targets: &[(LegId, FootPosition)], duration_ms: u16) -> Result<(), GaitError> {
        self.phase_then_wait(targets, duration_ms, duration_ms)
    }

    fn phase_then_wait(
        &mut self,
        targets: &[(LegId, FootPosition)],
        duration_ms: u16,
        wait_ms: u16,
    ) -> Result<(), GaitError> {
        if self.cancel.is_cancelled() {
            debug!("Cancelled before phase");
            return Err(GaitError::Cancelled);
        }

        let warnings = self.legs.move_legs(targets, duration_ms)?;
        self.clamped_moves += warnings.len();

        self.clock.wait(Duration::from_millis(u64::from(wait_ms)));
        Ok(())
    }

    /// Keep a body height finite and inside what the legs can reach
    fn clamp_height(&self, height: f32) -> f32 {
        let clamped = if height.is_finite() {
            height.clamp(-self.max_height, self.max_height)
        } else {
            self.params.stand_height
        };
        if clamped != height {
            warn!("Body height {} out of reach, using {}", height, clamped);
        }
        clamped
    }

    /// Targets for `legs` computed from their current positions
    fn targets(&self, legs: &[LegId], f: impl Fn(FootPosition) -> FootPosition) -> Vec<(LegId, FootPosition)> {
        legs.iter().map(|&leg| (leg, f(self.position(leg)))).collect()
    }

    // === Basic poses ===

    /// Neutral stance at `height` (mm below the hips)
    pub fn stand(&mut self, height: f32, duration_ms: u16) -> Result<(), GaitError> {
        let height = self.clamp_height(height);
        info!("Stand at {}mm", height);
        let targets: Vec<_> = LegId::ALL
            .iter()
            .map(|&leg| (leg, self.stance_at(leg, self.params.stance_width, -height)))
            .collect();
        self.phase(&targets, duration_ms)?;
        self.params.stand_height = height;
        self.pose = BodyPose::Standing;
        Ok(())
    }

    /// Lower the body; the configured stand height is kept for the next stand
    pub fn sit(&mut self, duration_ms: u16) -> Result<(), GaitError> {
        info!("Sit");
        let z = -self.params.sit_height;
        let targets: Vec<_> = LegId::ALL
            .iter()
            .map(|&leg| (leg, self.stance_at(leg, self.params.stance_width, z)))
            .collect();
        self.phase(&targets, duration_ms)?;
        self.pose = BodyPose::Sitting;
        Ok(())
    }

    pub fn home(&mut self, duration_ms: u16) -> Result<(), GaitError> {
        self.stand(self.params.stand_height, duration_ms)
    }

    // === Tripod gait ===

    /// Walk `steps` full tripod cycles towards `direction_deg` (0 = forward, 90 = left)
    pub fn walk(&mut self, direction_deg: f32, steps: u32) -> Result<(), GaitError> {
        let (dx, dy) = step_vector(direction_deg, self.params.step_length);
        // Three sub-phases per half cycle
        let sub_ms = ms(self.params.cycle_time_ms as f32 / 2.0 / 3.0);
        info!("Tripod walk: direction={}°, steps={}", direction_deg, steps);

        for _ in 0..steps {
            self.tripod_step(&TRIPOD_A, &TRIPOD_B, dx, dy, sub_ms)?;
            self.tripod_step(&TRIPOD_B, &TRIPOD_A, dx, dy, sub_ms)?;
        }
        Ok(())
    }

    /// Half a tripod cycle: lift, swing + push, lower
    fn tripod_step(
        &mut self,
        swing: &[LegId; 3],
        stance: &[LegId; 3],
        dx: f32,
        dy: f32,
        sub_ms: u16,
    ) -> Result<(), GaitError> {
        let lift = self.params.step_height;
        let ground = -self.params.stand_height;

        let targets = self.targets(swing, |p| p.offset(0.0, 0.0, lift));
        self.phase(&targets, sub_ms)?;

        let mut targets = self.targets(swing, |p| p.offset(dx, dy, 0.0));
        targets.extend(self.targets(stance, |p| p.offset(-dx / 2.0, -dy / 2.0, 0.0)));
        self.phase(&targets, sub_ms)?;

        let targets = self.targets(swing, |p| p.with_z(ground));
        self.phase(&targets, sub_ms)
    }

    pub fn walk_forward(&mut self, steps: u32) -> Result<(), GaitError> {
        self.walk(0.0, steps)
    }

    pub fn walk_backward(&mut self, steps: u32) -> Result<(), GaitError> {
        self.walk(180.0, steps)
    }

    pub fn strafe_left(&mut self, steps: u32) -> Result<(), GaitError> {
        self.walk(90.0, steps)
    }

    pub fn strafe_right(&mut self, steps: u32) -> Result<(), GaitError> {
        self.walk(270.0, steps)
    }

    // === Rotation ===

    /// Rotate in place, `angle_deg` per cycle (positive = counter-clockwise)
    pub fn rotate(&mut self, angle_deg: f32, steps: u32) -> Result<(), GaitError> {
        let half_rad = (angle_deg / 2.0).to_radians();
        let sub_ms = ms(self.params.cycle_time_ms as f32 / 2.0 / 2.0);
        info!("Rotate: {}° x {}", angle_deg, steps);

        for _ in 0..steps {
            self.rotate_tripod(&TRIPOD_A, &TRIPOD_B, half_rad, sub_ms)?;
            self.rotate_tripod(&TRIPOD_B, &TRIPOD_A, half_rad, sub_ms)?;
        }
        Ok(())
    }

    /// Swing legs turn with the body, stance legs turn against it
    fn rotate_tripod(
        &mut self,
        swing: &[LegId; 3],
        stance: &[LegId; 3],
        rad: f32,
        sub_ms: u16,
    ) -> Result<(), GaitError> {
        let lift = self.params.step_height;
        let ground = -self.params.stand_height;

        let targets = self.targets(swing, |p| p.offset(0.0, 0.0, lift));
        self.phase(&targets, sub_ms)?;

        let mut targets = self.targets(swing, |p| p.rotated(rad).with_z(ground));
        targets.extend(self.targets(stance, |p| p.rotated(-rad)));
        self.phase(&targets, sub_ms)
    }

    fn turn_steps(&self, angle_deg: f32) -> u32 {
        let increment = self.params.turn_increment_deg;
        if increment.is_nan() || increment <= 0.0 {
            return 1;
        }
        ((angle_deg.abs() / increment) as u32).max(1)
    }

    pub fn turn_left(&mut self, angle_deg: f32) -> Result<(), GaitError> {
        let steps = self.turn_steps(angle_deg);
        self.rotate(self.params.turn_increment_deg, steps)
    }

    pub fn turn_right(&mut self, angle_deg: f32) -> Result<(), GaitError> {
        let steps = self.turn_steps(angle_deg);
        self.rotate(-self.params.turn_increment_deg, steps)
    }

    // === Wave and ripple gaits ===

    /// One leg at a time; five feet stay planted throughout
    pub fn wave_walk(&mut self, direction_deg: f32, cycles: u32) -> Result<(), GaitError> {
        let (dx, dy) = step_vector(direction_deg, self.params.step_length);
        let step_ms = self.params.wave_step_ms;
        let lift = self.params.step_height;
        let ground = -self.params.stand_height;
        info!("Wave walk: direction={}°, cycles={}", direction_deg, cycles);

        for _ in 0..cycles {
            for leg in WAVE_SEQUENCE {
                let start = self.position(leg);

                self.phase(&[(leg, start.offset(0.0, 0.0, lift))], step_ms)?;
                self.phase(&[(leg, start.offset(dx, dy, lift))], step_ms)?;

                let mut plant = vec![(leg, start.offset(dx, dy, 0.0).with_z(ground))];
                if self.params.wave_compensation {
                    let others: Vec<LegId> = LegId::ALL.into_iter().filter(|&l| l != leg).collect();
                    plant.extend(self.targets(&others, |p| p.offset(-dx / 5.0, -dy / 5.0, 0.0)));
                }
                self.phase(&plant, step_ms)?;
            }
        }
        Ok(())
    }

    /// Wave-like sequence where the stance legs keep pushing while a leg swings
    pub fn ripple_walk(&mut self, direction_deg: f32, cycles: u32) -> Result<(), GaitError> {
        let (dx, dy) = step_vector(direction_deg, self.params.step_length);
        let swing_ms = self.params.ripple_phase_ms;
        let plant_ms = swing_ms / 2;
        let lift = self.params.step_height;
        let ground = -self.params.stand_height;
        // Five shifts of d/5 per cycle bring each stance leg back one full step
        let (sx, sy) = (-dx / 10.0, -dy / 10.0);
        info!("Ripple walk: direction={}°, cycles={}", direction_deg, cycles);

        for _ in 0..cycles {
            for leg in RIPPLE_SEQUENCE {
                let others: Vec<LegId> = LegId::ALL.into_iter().filter(|&l| l != leg).collect();

                let mut targets = vec![(leg, self.position(leg).offset(dx, dy, lift))];
                targets.extend(self.targets(&others, |p| p.offset(sx, sy, 0.0)));
                self.phase(&targets, swing_ms)?;

                let mut targets = vec![(leg, self.position(leg).with_z(ground))];
                targets.extend(self.targets(&others, |p| p.offset(sx, sy, 0.0)));
                self.phase(&targets, plant_ms)?;
            }
        }
        Ok(())
    }

    /// Walk with any gait
    pub fn walk_with(&mut self, gait: GaitKind, direction_deg: f32, steps: u32) -> Result<(), GaitError> {
        match gait {
            GaitKind::Tripod => self.walk(direction_deg, steps),
            GaitKind::Wave => self.wave_walk(direction_deg, steps),
            GaitKind::Ripple => self.ripple_walk(direction_deg, steps),
        }
    }

    // === Body movements ===

    /// Shift the body; the feet move the opposite way
    pub fn body_shift(&mut self, dx: f32, dy: f32, dz: f32, duration_ms: u16) -> Result<(), GaitError> {
        let targets = self.targets(&LegId::ALL, |p| p.offset(-dx, -dy, -dz));
        self.phase(&targets, duration_ms)
    }

    /// Pitch and roll in degrees.
    ///
    /// Each foot's height changes by `lever * cos(mount) * sin(pitch) + lever * sin(mount) * sin(roll)`.
    /// Heights are relative to the stand height, so `body_tilt(0, 0)` levels the body.
    pub fn body_tilt(&mut self, pitch_deg: f32, roll_deg: f32, duration_ms: u16) -> Result<(), GaitError> {
        let sin_pitch = pitch_deg.to_radians().sin();
        let sin_roll = roll_deg.to_radians().sin();
        let lever = self.params.tilt_lever;
        let ground = -self.params.stand_height;

        let targets: Vec<_> = LegId::ALL
            .iter()
            .map(|&leg| {
                let (sin_a, cos_a) = self.mount_angles[leg].to_radians().sin_cos();
                let dz = lever * cos_a * sin_pitch + lever * sin_a * sin_roll;
                (leg, self.position(leg).with_z(ground + dz))
            })
            .collect();
        self.phase(&targets, duration_ms)
    }

    /// Rotate the hips over planted feet (positive = counter-clockwise)
    pub fn twist(&mut self, angle_deg: f32, duration_ms: u16) -> Result<(), GaitError> {
        let rad = angle_deg.to_radians();
        let targets = self.targets(&LegId::ALL, |p| p.rotated(rad));
        self.phase(&targets, duration_ms)
    }

    /// Bob the body up and down, then settle back at stand height
    pub fn wave_body(&mut self, amplitude: f32, cycles: u32, period_ms: u32) -> Result<(), GaitError> {
        let step_ms = ms(period_ms as f32 / WAVE_BODY_STEPS as f32);
        let ground = -self.params.stand_height;

        for _ in 0..cycles {
            for i in 0..WAVE_BODY_STEPS {
                let phase = TAU * i as f32 / WAVE_BODY_STEPS as f32;
                let dz = amplitude * phase.sin();
                let targets = self.targets(&LegId::ALL, |p| p.with_z(ground - dz));
                self.phase(&targets, step_ms)?;
            }
        }

        let targets = self.targets(&LegId::ALL, |p| p.with_z(ground));
        self.phase(&targets, step_ms)
    }

    // === Startup / shutdown ===

    fn all_at(&self, radius: f32, z: f32) -> Vec<(LegId, FootPosition)> {
        LegId::ALL
            .iter()
            .map(|&leg| (leg, self.stance_at(leg, radius, z)))
            .collect()
    }

    /// Curled -> flat -> standing
    pub fn startup(&mut self) -> Result<(), GaitError> {
        info!("Startup sequence");
        let settle = self.params.settle_ms;
        self.legs.enable_all()?;

        let curled = self.all_at(self.params.curl_radius, -self.params.curl_height);
        self.phase(&curled, settle)?;
        self.pose = BodyPose::Curled;

        let flat = self.all_at(self.params.stance_width, -self.params.flat_height);
        self.phase(&flat, settle)?;
        self.pose = BodyPose::Flat;

        let step_ms = self.params.rise_step_ms;
        let stand_height = self.clamp_height(self.params.stand_height);
        for height in height_ramp(self.params.flat_height, stand_height, self.params.rise_step) {
            let targets = self.targets(&LegId::ALL, |p| p.with_z(-height));
            self.phase(&targets, step_ms)?;
        }
        // Ramp may stop short of a stand height that is not a multiple of the step
        let targets = self.all_at(self.params.stance_width, -stand_height);
        self.phase_then_wait(&targets, step_ms, settle)?;

        self.pose = BodyPose::Standing;
        Ok(())
    }

    /// Standing -> flat -> curled, then torque off
    pub fn shutdown(&mut self) -> Result<(), GaitError> {
        info!("Shutdown sequence");
        let settle = self.params.settle_ms;
        let step_ms = self.params.rise_step_ms;

        let start = self.clamp_height(-self.position(LegId::L1).z);
        for height in height_ramp(start, self.params.flat_height, self.params.rise_step) {
            let targets = self.targets(&LegId::ALL, |p| p.with_z(-height));
            self.phase(&targets, step_ms)?;
        }

        let flat = self.all_at(self.params.stance_width, -self.params.flat_height);
        self.phase(&flat, settle)?;
        self.pose = BodyPose::Flat;

        let curled = self.all_at(self.params.curl_radius, -self.params.curl_height);
        self.phase(&curled, settle)?;
        self.pose = BodyPose::Curled;

        self.legs.disable_all()?;
        Ok(())
    }

    /// Run one command to completion (or until cancelled)
    pub fn execute(&mut self, command: &GaitCommand) -> Result<(), GaitError> {
        let pose_ms = self.params.pose_ms;
        match *command {
            GaitCommand::Stand { height } => {
                let height = height.unwrap_or(self.params.stand_height);
                self.stand(height, pose_ms)
            }
            GaitCommand::Sit => self.sit(pose_ms),
            GaitCommand::Home => self.home(pose_ms),
            GaitCommand::Walk { gait, direction, steps } => self.walk_with(gait, direction, steps),
            GaitCommand::Rotate { angle, steps } => self.rotate(angle, steps),
            GaitCommand::Turn { angle } if angle >= 0.0 => self.turn_left(angle),
            GaitCommand::Turn { angle } => self.turn_right(angle),
            GaitCommand::BodyShift { dx, dy, dz } => self.body_shift(dx, dy, dz, pose_ms),
            GaitCommand::BodyTilt { pitch, roll } => self.body_tilt(pitch, roll, pose_ms),
            GaitCommand::Twist { angle } => self.twist(angle, pose_ms),
            GaitCommand::WaveBody { amplitude, cycles, period_ms } => {
                self.wave_body(amplitude, cycles, period_ms)
            }
            GaitCommand::CenterAll => {
                self.legs.center_all(self.params.settle_ms)?;
                self.clock.wait(Duration::from_millis(u64::from(self.params.settle_ms)));
                // Joint centers are not a foot pose
                self.pose = BodyPose::Unknown;
                Ok(())
            }
            GaitCommand::Startup => self.startup(),
            GaitCommand::Shutdown => self.shutdown(),
            // Handled by whoever owns the cancel token
            GaitCommand::Stop => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::port::{PortEvent, SimulatedPort};

    /// Records waits instead of sleeping; can trip a cancel token after N waits
    #[derive(Default)]
    struct TestClock {
        waits: Vec<Duration>,
        cancel_after: Option<(usize, CancelToken)>,
    }

    impl PhaseClock for TestClock {
        fn wait(&mut self, duration: Duration) {
            self.waits.push(duration);
            if let Some((n, token)) = &self.cancel_after {
                if self.waits.len() >= *n {
                    token.cancel();
                }
            }
        }
    }

    fn engine() -> GaitEngine<SimulatedPort, TestClock> {
        let config = RobotConfig::default();
        let legs = LegController::new(&config, SimulatedPort::new()).unwrap();
        GaitEngine::with_clock(&config, legs, TestClock::default())
    }

    fn positions(engine: &GaitEngine<SimulatedPort, TestClock>) -> PerLeg<FootPosition> {
        *engine.legs().positions()
    }

    #[test]
    fn test_groupings_partition_all_legs() {
        for kind in [GaitKind::Tripod, GaitKind::Wave, GaitKind::Ripple] {
            assert!(kind.groups().is_partition(), "{:?} grouping", kind);
        }
        for leg in TRIPOD_A {
            assert!(!TRIPOD_B.contains(&leg));
        }
        assert!(!GaitPhaseGroup::Tripods([TRIPOD_A, TRIPOD_A]).is_partition());
    }

    #[test]
    fn test_stand_sets_height_on_every_leg() {
        let mut engine = engine();
        engine.stand(50.0, 300).unwrap();
        engine.stand(50.0, 300).unwrap();
        for (_, pos) in engine.legs().positions().iter() {
            assert_eq!(pos.z, -50.0);
        }
        assert_eq!(engine.pose(), BodyPose::Standing);
    }

    #[test]
    fn test_every_phase_is_one_broadcast() {
        let mut engine = engine();
        engine.stand(50.0, 300).unwrap();
        engine.walk(0.0, 1).unwrap();

        let port = engine.legs().port();
        // 1 stand + 2 halves x 3 sub-phases
        assert_eq!(port.commit_count(), 7);
        assert_eq!(port.write_count(), 0, "no immediate moves inside gait phases");
        assert_eq!(engine.clock().waits.len(), 7);
    }

    #[test]
    fn test_tripod_stance_legs_push_half_a_step() {
        let mut engine = engine();
        engine.stand(50.0, 300).unwrap();
        let step = engine.params().step_length;

        let before = positions(&engine);
        engine.tripod_step(&TRIPOD_A, &TRIPOD_B, step, 0.0, 10).unwrap();
        let mid = positions(&engine);
        engine.tripod_step(&TRIPOD_B, &TRIPOD_A, step, 0.0, 10).unwrap();
        let after = positions(&engine);

        for leg in TRIPOD_B {
            // Stance in the first half
            assert!((mid[leg].planar_distance(&before[leg]) - step / 2.0).abs() < 1e-3);
        }
        for leg in TRIPOD_A {
            // Swing in the first half, stance in the second
            assert!((mid[leg].planar_distance(&before[leg]) - step).abs() < 1e-3);
            assert!((after[leg].planar_distance(&mid[leg]) - step / 2.0).abs() < 1e-3);
            assert_eq!(after[leg].z, -50.0);
        }
    }

    #[test]
    fn test_tripod_phases_move_three_legs_then_six() {
        let mut engine = engine();
        engine.stand(50.0, 300).unwrap();
        engine.legs_mut().port_mut().clear_events();
        engine.walk(90.0, 1).unwrap();

        let staged: Vec<usize> = engine
            .legs()
            .port()
            .events()
            .iter()
            .filter_map(|e| match e {
                PortEvent::Commit { staged } => Some(*staged),
                _ => None,
            })
            .collect();
        // lift 3 legs, swing+push 6 legs, lower 3 legs (x3 joints), twice
        assert_eq!(staged, vec![9, 18, 9, 9, 18, 9]);
    }

    #[test]
    fn test_rotation_swing_and_stance_turn_opposite() {
        let mut engine = engine();
        engine.stand(50.0, 300).unwrap();
        let before = positions(&engine);
        let rad = 10f32.to_radians();
        engine.rotate_tripod(&TRIPOD_A, &TRIPOD_B, rad, 10).unwrap();
        let after = positions(&engine);

        let bearing = |p: &FootPosition| p.y.atan2(p.x);
        for leg in TRIPOD_A {
            assert!((bearing(&after[leg]) - bearing(&before[leg]) - rad).abs() < 1e-3);
            assert_eq!(after[leg].z, -50.0);
        }
        for leg in TRIPOD_B {
            assert!((bearing(&after[leg]) - bearing(&before[leg]) + rad).abs() < 1e-3);
        }
    }

    #[test]
    fn test_turn_uses_increments() {
        let mut engine = engine();
        engine.stand(50.0, 300).unwrap();
        engine.legs_mut().port_mut().clear_events();
        engine.turn_left(90.0).unwrap();
        // 3 cycles x 2 halves x 2 phases
        assert_eq!(engine.legs().port().commit_count(), 12);
    }

    #[test]
    fn test_wave_moves_one_leg_at_a_time() {
        let mut engine = engine();
        engine.params.wave_compensation = false;
        engine.stand(50.0, 300).unwrap();
        engine.legs_mut().port_mut().clear_events();
        let before = positions(&engine);
        let step = engine.params().step_length;

        engine.wave_walk(0.0, 1).unwrap();
        let port = engine.legs().port();
        assert_eq!(port.commit_count(), 18);
        assert!(port.events().iter().all(|e| match e {
            PortEvent::Commit { staged } => *staged == 3,
            _ => true,
        }));

        let after = positions(&engine);
        for leg in LegId::ALL {
            assert!((after[leg].x - before[leg].x - step).abs() < 1e-3);
            assert_eq!(after[leg].z, -50.0);
        }
    }

    #[test]
    fn test_wave_compensation_returns_feet_to_stance() {
        let mut engine = engine();
        engine.stand(50.0, 300).unwrap();
        let before = positions(&engine);
        engine.wave_walk(0.0, 1).unwrap();
        let after = positions(&engine);
        // +step for the leg's own swing, 5 x -step/5 while the others plant
        for leg in LegId::ALL {
            assert!(after[leg].planar_distance(&before[leg]) < 1e-3, "{} drifted", leg);
        }
    }

    #[test]
    fn test_ripple_keeps_stance_legs_moving() {
        let mut engine = engine();
        engine.stand(50.0, 300).unwrap();
        engine.legs_mut().port_mut().clear_events();
        let before = positions(&engine);

        engine.ripple_walk(0.0, 1).unwrap();
        let port = engine.legs().port();
        assert_eq!(port.commit_count(), 12);
        assert!(port.events().iter().all(|e| match e {
            PortEvent::Commit { staged } => *staged == 18,
            _ => true,
        }));

        let after = positions(&engine);
        for leg in LegId::ALL {
            assert!(after[leg].planar_distance(&before[leg]) < 1e-3);
            assert_eq!(after[leg].z, -50.0);
        }
    }

    #[test]
    fn test_tilt_is_relative_to_stand_height() {
        let mut engine = engine();
        engine.stand(50.0, 300).unwrap();
        engine.body_tilt(0.0, 15.0, 100).unwrap();
        let tilted = positions(&engine);
        // R2 mounted at 90°: full roll lever; L2 at 270°: opposite side
        assert!(tilted[LegId::R2].z > -50.0);
        assert!(tilted[LegId::L2].z < -50.0);

        engine.body_tilt(0.0, 0.0, 100).unwrap();
        for (_, pos) in engine.legs().positions().iter() {
            assert!((pos.z + 50.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_body_shift_moves_feet_opposite() {
        let mut engine = engine();
        engine.stand(50.0, 300).unwrap();
        let before = positions(&engine);
        engine.body_shift(10.0, 0.0, 5.0, 100).unwrap();
        let after = positions(&engine);
        for leg in LegId::ALL {
            assert!((after[leg].x - (before[leg].x - 10.0)).abs() < 1e-4);
            assert!((after[leg].z - (before[leg].z - 5.0)).abs() < 1e-4);
        }
    }

    #[test]
    fn test_wave_body_settles_at_stand_height() {
        let mut engine = engine();
        engine.stand(50.0, 300).unwrap();
        engine.wave_body(15.0, 1, 800).unwrap();
        for (_, pos) in engine.legs().positions().iter() {
            assert!((pos.z + 50.0).abs() < 1e-4);
        }
        assert_eq!(engine.clock().waits.len(), 1 + WAVE_BODY_STEPS as usize + 1);
    }

    #[test]
    fn test_startup_and_shutdown_sequence() {
        let mut engine = engine();
        engine.startup().unwrap();
        assert_eq!(engine.pose(), BodyPose::Standing);
        for (leg, pos) in engine.legs().positions().iter() {
            assert_eq!(pos.z, -50.0);
            assert!(engine.legs().port().torque_enabled(leg, crate::leg::JointId::Femur));
        }

        engine.shutdown().unwrap();
        assert_eq!(engine.pose(), BodyPose::Curled);
        for (leg, pos) in engine.legs().positions().iter() {
            assert_eq!(pos.z, -engine.params().curl_height);
            assert!(!engine.legs().port().torque_enabled(leg, crate::leg::JointId::Tibia));
        }
    }

    #[test]
    fn test_cancel_stops_between_phases() {
        let mut engine = engine();
        engine.stand(50.0, 300).unwrap();
        let token = engine.cancel_token();
        engine.clock.cancel_after = Some((3, token.clone()));

        let result = engine.walk(0.0, 4);
        assert!(matches!(result, Err(GaitError::Cancelled)));
        // stand plus two walk phases
        assert_eq!(engine.legs().port().commit_count(), 3);

        token.reset();
        engine.clock.cancel_after = None;
        assert!(engine.stand(50.0, 300).is_ok());
    }

    #[test]
    fn test_unreachable_targets_do_not_abort() {
        let mut engine = engine();
        engine.stand(50.0, 300).unwrap();
        let before = engine.legs().position(LegId::L1);
        engine.body_shift(-200.0, 0.0, 0.0, 100).unwrap();
        assert!(engine.clamped_moves() > 0);
        // Requested position is kept even when the pose was clamped
        assert!((engine.legs().position(LegId::L1).x - (before.x + 200.0)).abs() < 1e-3);
    }

    #[test]
    fn test_execute_dispatch() {
        let mut engine = engine();
        engine.execute(&GaitCommand::Stand { height: Some(45.0) }).unwrap();
        assert_eq!(engine.legs().position(LegId::R1).z, -45.0);

        engine
            .execute(&GaitCommand::Walk { gait: GaitKind::Ripple, direction: 0.0, steps: 1 })
            .unwrap();
        engine.execute(&GaitCommand::Turn { angle: -30.0 }).unwrap();
        engine.execute(&GaitCommand::Sit).unwrap();
        assert_eq!(engine.pose(), BodyPose::Sitting);
        assert_eq!(engine.legs().position(LegId::R1).z, -20.0);
    }

    #[test]
    fn test_huge_stand_height_is_clamped_and_shutdown_finishes() {
        let mut engine = engine();
        engine.execute(&GaitCommand::Stand { height: Some(1e30) }).unwrap();
        // 55 + 75 mm legs
        assert_eq!(engine.legs().position(LegId::L1).z, -130.0);
        assert_eq!(engine.params().stand_height, 130.0);

        engine.legs_mut().port_mut().clear_events();
        engine.execute(&GaitCommand::Shutdown).unwrap();
        // 130 down to 10 in 10mm steps, then flat and curled
        assert_eq!(engine.legs().port().commit_count(), 15);
        assert_eq!(engine.pose(), BodyPose::Curled);
    }

    #[test]
    fn test_nan_stand_height_keeps_configured_height() {
        let mut engine = engine();
        engine.execute(&GaitCommand::Stand { height: Some(f32::NAN) }).unwrap();
        for (_, pos) in engine.legs().positions().iter() {
            assert_eq!(pos.z, -50.0);
        }
        assert_eq!(engine.params().stand_height, 50.0);
    }

    #[test]
    fn test_turn_with_zero_increment_runs_one_cycle() {
        let mut engine = engine();
        engine.stand(50.0, 300).unwrap();
        let mut params = *engine.params();
        params.turn_increment_deg = 0.0;
        engine.set_params(params);
        engine.legs_mut().port_mut().clear_events();
        engine.turn_left(90.0).unwrap();
        assert_eq!(engine.legs().port().commit_count(), 4);
    }

    #[test]
    fn test_height_ramp_is_inclusive_and_bounded() {
        let down: Vec<f32> = height_ramp(50.0, 10.0, 10.0).collect();
        assert_eq!(down, vec![50.0, 40.0, 30.0, 20.0, 10.0]);
        let up: Vec<f32> = height_ramp(10.0, 35.0, 10.0).collect();
        assert_eq!(up, vec![10.0, 20.0, 30.0]);
        assert_eq!(height_ramp(10.0, 20.0, 0.0).count(), 11);
    }
}
