// Leg and joint identifiers plus the fixed-size tables indexed by them
//
// The leg and joint sets are closed, so every per-leg / per-joint map is a
// plain array indexed by the enum. There is no "missing key" case.

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// One of the six legs.
///
/// Numbering, looking down on the body with the front at the top:
///
/// ```text
///        FRONT
///    L1         R1
///    L2 --[B]-- R2
///    L3         R3
///        REAR
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegId {
    L1,
    L2,
    L3,
    R1,
    R2,
    R3,
}

impl LegId {
    pub const ALL: [LegId; 6] = [
        LegId::L1,
        LegId::L2,
        LegId::L3,
        LegId::R1,
        LegId::R2,
        LegId::R3,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_right(self) -> bool {
        matches!(self, LegId::R1 | LegId::R2 | LegId::R3)
    }

    pub fn name(self) -> &'static str {
        match self {
            LegId::L1 => "L1",
            LegId::L2 => "L2",
            LegId::L3 => "L3",
            LegId::R1 => "R1",
            LegId::R2 => "R2",
            LegId::R3 => "R3",
        }
    }
}

impl fmt::Display for LegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Leg joints, ordered proximal to distal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointId {
    Coxa,
    Femur,
    Tibia,
}

impl JointId {
    pub const ALL: [JointId; 3] = [JointId::Coxa, JointId::Femur, JointId::Tibia];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            JointId::Coxa => "coxa",
            JointId::Femur => "femur",
            JointId::Tibia => "tibia",
        }
    }
}

impl fmt::Display for JointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Foot position in the leg-local frame, millimeters.
///
/// Origin at the hip pivot, x/y horizontal, z vertical with negative values
/// below the hip.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FootPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl FootPosition {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, dx: f32, dy: f32, dz: f32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn with_z(self, z: f32) -> Self {
        Self::new(self.x, self.y, z)
    }

    /// Rotate (x, y) about the hip pivot by `angle_rad`, counter-clockwise.
    pub fn rotated(self, angle_rad: f32) -> Self {
        let (sin_r, cos_r) = angle_rad.sin_cos();
        Self::new(
            self.x * cos_r - self.y * sin_r,
            self.x * sin_r + self.y * cos_r,
            self.z,
        )
    }

    /// Horizontal distance to another position.
    pub fn planar_distance(&self, other: &FootPosition) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// One value per leg, indexed by [`LegId`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerLeg<T>(pub [T; 6]);

impl<T> PerLeg<T> {
    pub fn from_fn(mut f: impl FnMut(LegId) -> T) -> Self {
        Self(LegId::ALL.map(&mut f))
    }

    pub fn iter(&self) -> impl Iterator<Item = (LegId, &T)> {
        LegId::ALL.into_iter().zip(self.0.iter())
    }

    pub fn map<U>(&self, mut f: impl FnMut(LegId, &T) -> U) -> PerLeg<U> {
        PerLeg::from_fn(|leg| f(leg, &self[leg]))
    }
}

impl<T> Index<LegId> for PerLeg<T> {
    type Output = T;

    fn index(&self, leg: LegId) -> &T {
        &self.0[leg.index()]
    }
}

impl<T> IndexMut<LegId> for PerLeg<T> {
    fn index_mut(&mut self, leg: LegId) -> &mut T {
        &mut self.0[leg.index()]
    }
}

/// One value per joint, indexed by [`JointId`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerJoint<T>(pub [T; 3]);

impl<T> PerJoint<T> {
    pub fn from_fn(mut f: impl FnMut(JointId) -> T) -> Self {
        Self(JointId::ALL.map(&mut f))
    }

    pub fn iter(&self) -> impl Iterator<Item = (JointId, &T)> {
        JointId::ALL.into_iter().zip(self.0.iter())
    }
}

impl<T> Index<JointId> for PerJoint<T> {
    type Output = T;

    fn index(&self, joint: JointId) -> &T {
        &self.0[joint.index()]
    }
}

impl<T> IndexMut<JointId> for PerJoint<T> {
    fn index_mut(&mut self, joint: JointId) -> &mut T {
        &mut self.0[joint.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leg_indexing_covers_all_legs() {
        let table = PerLeg::from_fn(|leg| leg.index());
        for leg in LegId::ALL {
            assert_eq!(table[leg], leg.index());
        }
        assert_eq!(LegId::ALL.iter().filter(|l| l.is_right()).count(), 3);
    }

    #[test]
    fn test_rotation_preserves_radius() {
        let p = FootPosition::new(80.0, 10.0, -50.0);
        let r = p.rotated(0.3);
        let before = p.x.hypot(p.y);
        let after = r.x.hypot(r.y);
        assert!((before - after).abs() < 1e-4);
        assert_eq!(r.z, -50.0);
    }

    #[test]
    fn test_per_leg_serializes_as_array() {
        let table = PerLeg::from_fn(|leg| leg.index() as u8);
        let json = serde_json::to_string(&table).unwrap();
        assert_eq!(json, "[0,1,2,3,4,5]");
    }
}
