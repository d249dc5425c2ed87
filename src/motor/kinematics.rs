// Three-joint leg inverse kinematics
// Converts a foot position in the leg-local frame to coxa/femur/tibia servo angles.

use serde::{Deserialize, Serialize};

use crate::leg::FootPosition;

/// Perturbation applied to x when the target sits exactly above the hip pivot
const DEGENERATE_X_MM: f32 = 0.1;

/// Horizontal reach used when the foot is inside the coxa length
const MIN_HORIZONTAL_REACH_MM: f32 = 1.0;

/// Clamped reach stays this far inside the [min, max] envelope
pub const REACH_MARGIN_MM: f32 = 1.0;

/// Link lengths of one leg (mm)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkLengths {
    pub coxa: f32,
    pub femur: f32,
    pub tibia: f32,
}

impl LinkLengths {
    pub const fn new(coxa: f32, femur: f32, tibia: f32) -> Self {
        Self { coxa, femur, tibia }
    }

    pub fn min_reach(&self) -> f32 {
        (self.femur - self.tibia).abs()
    }

    pub fn max_reach(&self) -> f32 {
        self.femur + self.tibia
    }

    /// Finite lengths with room for the reach margin on both links
    pub fn is_valid(&self) -> bool {
        let link_ok = |len: f32| len.is_finite() && len > 2.0 * REACH_MARGIN_MM;
        self.coxa.is_finite() && self.coxa >= 0.0 && link_ok(self.femur) && link_ok(self.tibia)
    }
}

/// Servo angle convention for a given servo family.
///
/// Angles returned by [`solve`] live in `[0, max_deg]`. The coxa is centered
/// at `coxa_offset_deg`, the femur carries a mechanical zero offset, and the
/// tibia is inverted (`max_deg - knee_angle`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleDomain {
    pub max_deg: f32,
    pub coxa_offset_deg: f32,
    pub femur_offset_deg: f32,
}

impl AngleDomain {
    /// Hobby PWM servos: 0-180°, centered at 90°
    pub const PWM_180: AngleDomain = AngleDomain {
        max_deg: 180.0,
        coxa_offset_deg: 90.0,
        femur_offset_deg: 0.0,
    };

    /// LX-16A bus servos: 0-240°, centered at 120°, femur horn mounted 30° off
    pub const LX16A_240: AngleDomain = AngleDomain {
        max_deg: 240.0,
        coxa_offset_deg: 120.0,
        femur_offset_deg: 30.0,
    };

    pub fn clamp(&self, angle: f32) -> f32 {
        angle.clamp(0.0, self.max_deg)
    }
}

/// Servo angles for one leg, degrees in the servo domain
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JointAngles {
    pub coxa: f32,
    pub femur: f32,
    pub tibia: f32,
}

impl JointAngles {
    pub fn as_array(&self) -> [f32; 3] {
        [self.coxa, self.femur, self.tibia]
    }
}

/// Emitted when the target lies outside the leg envelope and the reach was clamped
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error(
    "IK target reach {requested:.1}mm outside [{min:.1}, {max:.1}]mm, clamped to {clamped:.1}mm"
)]
pub struct ReachabilityWarning {
    pub requested: f32,
    pub clamped: f32,
    pub min: f32,
    pub max: f32,
}

/// Result of a solve: always a pose, plus a warning if the reach was clamped
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IkSolution {
    pub angles: JointAngles,
    pub warning: Option<ReachabilityWarning>,
}

/// Solve the leg IK for a foot target at (x, y, z).
///
/// Never fails: unreachable targets are pulled back onto the envelope and the
/// solution carries a [`ReachabilityWarning`].
pub fn solve(x: f32, y: f32, z: f32, links: &LinkLengths, domain: &AngleDomain) -> IkSolution {
    // atan2(0, 0) has no meaningful bearing
    let x = if x == 0.0 && y == 0.0 { DEGENERATE_X_MM } else { x };

    let coxa_deg = y.atan2(x).to_degrees();

    let horizontal = (x.hypot(y) - links.coxa).max(MIN_HORIZONTAL_REACH_MM);
    let requested = horizontal.hypot(z);

    let min_reach = links.min_reach();
    let max_reach = links.max_reach();

    let (reach, warning) = if requested < min_reach || requested > max_reach {
        let (lo, hi) = (min_reach + REACH_MARGIN_MM, max_reach - REACH_MARGIN_MM);
        // Envelope thinner than the margin collapses to its middle
        let clamped = if lo <= hi {
            requested.clamp(lo, hi)
        } else {
            (min_reach + max_reach) / 2.0
        };
        let warning = ReachabilityWarning {
            requested,
            clamped,
            min: min_reach,
            max: max_reach,
        };
        (clamped, Some(warning))
    } else {
        (requested, None)
    };

    let (f, t) = (links.femur, links.tibia);

    // Knee angle between femur and tibia
    let cos_knee = (f * f + t * t - reach * reach) / (2.0 * f * t);
    let knee_deg = cos_knee.clamp(-1.0, 1.0).acos().to_degrees();

    // Femur angle: bearing down to the foot plus the femur/reach-line angle
    let cos_lift = (f * f + reach * reach - t * t) / (2.0 * f * reach);
    let lift_deg = cos_lift.clamp(-1.0, 1.0).acos().to_degrees();
    let femur_deg = (-z).atan2(horizontal).to_degrees() + lift_deg;

    let angles = JointAngles {
        coxa: domain.clamp(domain.coxa_offset_deg + coxa_deg),
        femur: domain.clamp(femur_deg + domain.femur_offset_deg),
        tibia: domain.clamp(domain.max_deg - knee_deg),
    };

    IkSolution { angles, warning }
}

/// Convenience wrapper taking a [`FootPosition`]
pub fn solve_position(target: FootPosition, links: &LinkLengths, domain: &AngleDomain) -> IkSolution {
    solve(target.x, target.y, target.z, links, domain)
}

/// Forward kinematics: servo-domain angles back to a foot position.
///
/// Exact inverse of [`solve`] for targets that needed no clamping.
pub fn forward(angles: &JointAngles, links: &LinkLengths, domain: &AngleDomain) -> FootPosition {
    let coxa_rad = (angles.coxa - domain.coxa_offset_deg).to_radians();
    let knee_rad = (domain.max_deg - angles.tibia).to_radians();
    let femur_rad = (angles.femur - domain.femur_offset_deg).to_radians();

    let (f, t) = (links.femur, links.tibia);
    let reach = (f * f + t * t - 2.0 * f * t * knee_rad.cos()).max(0.0).sqrt();

    let cos_lift = (f * f + reach * reach - t * t) / (2.0 * f * reach);
    let lift_rad = cos_lift.clamp(-1.0, 1.0).acos();
    let bearing_down = femur_rad - lift_rad;

    let horizontal = reach * bearing_down.cos();
    let z = -reach * bearing_down.sin();
    let radial = horizontal + links.coxa;

    FootPosition::new(radial * coxa_rad.cos(), radial * coxa_rad.sin(), z)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: LinkLengths = LinkLengths::new(25.0, 55.0, 75.0);
    const LARGE: LinkLengths = LinkLengths::new(50.0, 80.0, 120.0);

    fn assert_close(a: FootPosition, b: FootPosition, tol: f32) {
        assert!(
            (a.x - b.x).abs() < tol && (a.y - b.y).abs() < tol && (a.z - b.z).abs() < tol,
            "{:?} != {:?}",
            a,
            b
        );
    }

    #[test]
    fn test_default_stance_in_servo_domain() {
        let sol = solve(80.0, 0.0, -50.0, &SMALL, &AngleDomain::PWM_180);
        println!("Stance angles: {:?}", sol.angles);

        assert!(sol.warning.is_none());
        for angle in sol.angles.as_array() {
            assert!((0.0..=180.0).contains(&angle), "angle {} out of domain", angle);
        }
        // Straight out means the coxa sits at its center
        assert!((sol.angles.coxa - 90.0).abs() < 1e-4);
    }

    #[test]
    fn test_round_trip_within_envelope() {
        let targets = [
            (80.0, 0.0, -50.0),
            (70.0, 20.0, -40.0),
            (60.0, -25.0, -60.0),
            (90.0, 10.0, -30.0),
        ];
        for (x, y, z) in targets {
            let sol = solve(x, y, z, &SMALL, &AngleDomain::PWM_180);
            assert!(sol.warning.is_none(), "({}, {}, {}) should be reachable", x, y, z);
            let back = forward(&sol.angles, &SMALL, &AngleDomain::PWM_180);
            assert_close(back, FootPosition::new(x, y, z), 0.05);
        }
    }

    #[test]
    fn test_round_trip_lx16a_domain() {
        for (x, y, z) in [(100.0, 0.0, -80.0), (120.0, 30.0, -60.0), (90.0, -40.0, -100.0)] {
            let sol = solve(x, y, z, &LARGE, &AngleDomain::LX16A_240);
            assert!(sol.warning.is_none());
            let back = forward(&sol.angles, &LARGE, &AngleDomain::LX16A_240);
            assert_close(back, FootPosition::new(x, y, z), 0.05);
        }
    }

    #[test]
    fn test_out_of_reach_is_clamped_and_warned() {
        // Far beyond femur + tibia
        let far = solve(400.0, 0.0, -50.0, &SMALL, &AngleDomain::PWM_180);
        let warning = far.warning.expect("far target should warn");
        assert!(warning.clamped > warning.min && warning.clamped < warning.max);
        assert!(far.angles.as_array().iter().all(|a| a.is_finite()));

        // Closer than |femur - tibia|
        let near = solve(30.0, 0.0, -5.0, &SMALL, &AngleDomain::PWM_180);
        let warning = near.warning.expect("near target should warn");
        assert!(warning.clamped > warning.min && warning.clamped < warning.max);
        assert!(near.angles.as_array().iter().all(|a| a.is_finite()));
    }

    #[test]
    fn test_degenerate_origin_target() {
        let sol = solve(0.0, 0.0, -60.0, &SMALL, &AngleDomain::PWM_180);
        for angle in sol.angles.as_array() {
            assert!(angle.is_finite());
            assert!((0.0..=180.0).contains(&angle));
        }
    }

    #[test]
    fn test_coxa_follows_bearing() {
        let left = solve(60.0, 30.0, -50.0, &SMALL, &AngleDomain::PWM_180);
        let right = solve(60.0, -30.0, -50.0, &SMALL, &AngleDomain::PWM_180);
        assert!(left.angles.coxa > 90.0);
        assert!(right.angles.coxa < 90.0);
        assert!((left.angles.femur - right.angles.femur).abs() < 1e-4);
    }

    #[test]
    fn test_thin_envelope_uses_its_middle() {
        // Both links shorter than the margin: [min + 1, max - 1] is empty
        let tiny = LinkLengths::new(10.0, 0.5, 0.4);
        let sol = solve(50.0, 0.0, -20.0, &tiny, &AngleDomain::PWM_180);
        let warning = sol.warning.expect("target far outside a tiny leg");
        assert!((warning.clamped - 0.5).abs() < 1e-6);
        assert!(sol.angles.as_array().iter().all(|a| a.is_finite()));
    }

    #[test]
    fn test_link_validity() {
        assert!(SMALL.is_valid());
        assert!(LARGE.is_valid());
        assert!(LinkLengths::new(0.0, 55.0, 75.0).is_valid());
        assert!(!LinkLengths::new(10.0, 0.5, 0.4).is_valid());
        assert!(!LinkLengths::new(-1.0, 55.0, 75.0).is_valid());
        assert!(!LinkLengths::new(25.0, f32::NAN, 75.0).is_valid());
        assert!(!LinkLengths::new(25.0, 55.0, f32::INFINITY).is_valid());
    }
}
