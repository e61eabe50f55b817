//! Joint-angle geometry on keypoint triples.
//!
//! All angles are in degrees in `[0, 180]`. Degenerate geometry (a zero-length
//! limb vector, non-finite coordinates) yields exactly `0.0` rather than NaN.
//! A side whose keypoints are not all confident yields `None`, never `0.0`.

use nalgebra::Vector2;

use crate::pose::{Keypoint, KeypointIndex, Pose, Side};

/// Per-side angle pair; `None` means insufficient keypoint confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SideAngles {
    pub left: Option<f32>,
    pub right: Option<f32>,
}

pub type ShoulderAngles = SideAngles;
pub type ElbowAngles = SideAngles;

impl SideAngles {
    pub fn get(&self, side: Side) -> Option<f32> {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    fn from_fn(mut f: impl FnMut(Side) -> Option<f32>) -> Self {
        Self { left: f(Side::Left), right: f(Side::Right) }
    }
}

/// Interior angle at vertex `b` formed by `a-b-c`.
///
/// Computed in f64 so that very short or very long limbs keep their angle;
/// only a zero-length vector counts as degenerate.
pub fn angle_at(a: (f32, f32), b: (f32, f32), c: (f32, f32)) -> f32 {
    let v = |p: (f32, f32)| Vector2::new(f64::from(p.0), f64::from(p.1));
    let ba = v(a) - v(b);
    let bc = v(c) - v(b);

    let (ba_sq, bc_sq) = (ba.norm_squared(), bc.norm_squared());
    if !ba_sq.is_finite() || !bc_sq.is_finite() || ba_sq == 0.0 || bc_sq == 0.0 {
        return 0.0;
    }
    let cos = (ba.dot(&bc) / (ba_sq.sqrt() * bc_sq.sqrt())).clamp(-1.0, 1.0);
    if cos.is_nan() {
        return 0.0;
    }
    (cos.acos().to_degrees() as f32).clamp(0.0, 180.0)
}

fn point(kp: &Keypoint) -> (f32, f32) {
    (kp.x, kp.y)
}

/// Angle at `vertex` if all three keypoints clear the threshold.
fn confident_angle(
    pose: &Pose,
    threshold: f32,
    a: KeypointIndex,
    vertex: KeypointIndex,
    c: KeypointIndex,
) -> Option<f32> {
    let (a, b, c) = (pose.get(a), pose.get(vertex), pose.get(c));
    if a.is_confident(threshold) && b.is_confident(threshold) && c.is_confident(threshold) {
        Some(angle_at(point(a), point(b), point(c)))
    } else {
        None
    }
}

/// Shoulder flexion: vertex shoulder, reference hip, moving elbow.
///
/// Each side is computed independently.
pub fn shoulder_angles(pose: &Pose, threshold: f32) -> ShoulderAngles {
    SideAngles::from_fn(|side| confident_angle(pose, threshold, side.hip(), side.shoulder(), side.elbow()))
}

/// Arm angle at the elbow (shoulder-elbow-wrist).
pub fn elbow_angles(pose: &Pose, threshold: f32) -> ElbowAngles {
    SideAngles::from_fn(|side| confident_angle(pose, threshold, side.shoulder(), side.elbow(), side.wrist()))
}

/// Upper arm measured against the image vertical through the shoulder.
///
/// Alternative to [`shoulder_angles`] that ignores trunk lean. Image y grows
/// downwards, so the reference points up.
pub fn shoulder_elevation(pose: &Pose, threshold: f32) -> SideAngles {
    SideAngles::from_fn(|side| {
        let shoulder = pose.get(side.shoulder());
        let elbow = pose.get(side.elbow());
        if !(shoulder.is_confident(threshold) && elbow.is_confident(threshold)) {
            return None;
        }
        let up = (shoulder.x, shoulder.y - 1.0);
        Some(angle_at(up, point(shoulder), point(elbow)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::CoordinateSpace;

    fn kp(name: KeypointIndex, x: f32, y: f32, score: f32) -> Keypoint {
        Keypoint::new(name, x, y, score)
    }

    fn arm_pose(elbow_score: f32) -> Pose {
        Pose::from_keypoints(
            [
                kp(KeypointIndex::LeftHip, 100.0, 200.0, 0.9),
                kp(KeypointIndex::LeftShoulder, 100.0, 100.0, 0.9),
                kp(KeypointIndex::LeftElbow, 150.0, 100.0, elbow_score),
                kp(KeypointIndex::LeftWrist, 200.0, 100.0, 0.9),
            ],
            CoordinateSpace::Source,
        )
    }

    #[test]
    fn test_right_angle_shoulder() {
        let angles = shoulder_angles(&arm_pose(0.9), 0.15);
        let left = angles.left.unwrap();
        assert!((left - 90.0).abs() < 1e-4, "left={}", left);
        assert_eq!(angles.right, None);
    }

    #[test]
    fn test_low_confidence_elbow_is_none() {
        let angles = shoulder_angles(&arm_pose(0.05), 0.15);
        assert_eq!(angles.left, None);
    }

    #[test]
    fn test_threshold_is_strict() {
        let angles = shoulder_angles(&arm_pose(0.15), 0.15);
        assert_eq!(angles.left, None);
    }

    #[test]
    fn test_angle_range() {
        let points = [(0.0, 0.0), (10.0, 0.0), (-3.0, 7.5), (120.0, -44.0), (0.001, 0.002), (-50.0, -50.0)];
        for &a in &points {
            for &b in &points {
                for &c in &points {
                    let angle = angle_at(a, b, c);
                    assert!((0.0..=180.0).contains(&angle), "{:?} {:?} {:?} -> {}", a, b, c, angle);
                }
            }
        }
    }

    #[test]
    fn test_symmetry() {
        let (a, b, c) = ((3.0, 4.0), (0.0, 0.0), (-2.0, 9.0));
        assert_eq!(angle_at(a, b, c), angle_at(c, b, a));
    }

    #[test]
    fn test_coincident_points_are_zero() {
        assert_eq!(angle_at((5.0, 5.0), (5.0, 5.0), (10.0, 0.0)), 0.0);
        assert_eq!(angle_at((0.0, 0.0), (5.0, 5.0), (5.0, 5.0)), 0.0);
        assert_eq!(angle_at((f32::NAN, 0.0), (5.0, 5.0), (1.0, 1.0)), 0.0);
    }

    #[test]
    fn test_small_and_large_vectors_not_degenerate() {
        assert!((angle_at((1e-4, 0.0), (0.0, 0.0), (0.0, 1e-4)) - 90.0).abs() < 1e-3);
        assert!((angle_at((2e19, 0.0), (0.0, 0.0), (0.0, 2e19)) - 90.0).abs() < 1e-3);
        assert!((angle_at((1e-20, 0.0), (0.0, 0.0), (1e-20, 1e-20)) - 45.0).abs() < 1e-3);
        assert!((angle_at((f32::MAX, 0.0), (0.0, 0.0), (-f32::MAX, 0.0)) - 180.0).abs() < 1e-3);
    }

    #[test]
    fn test_collinear_extremes() {
        assert!((angle_at((-1.0, 0.0), (0.0, 0.0), (1.0, 0.0)) - 180.0).abs() < 1e-4);
        assert!(angle_at((1.0, 0.0), (0.0, 0.0), (2.0, 0.0)).abs() < 1e-4);
    }

    #[test]
    fn test_shoulder_on_hip_is_zero() {
        let pose = Pose::from_keypoints(
            [
                kp(KeypointIndex::RightHip, 80.0, 80.0, 0.9),
                kp(KeypointIndex::RightShoulder, 80.0, 80.0, 0.9),
                kp(KeypointIndex::RightElbow, 120.0, 80.0, 0.9),
            ],
            CoordinateSpace::Source,
        );
        assert_eq!(shoulder_angles(&pose, 0.15).right, Some(0.0));
    }

    #[test]
    fn test_sides_independent() {
        let pose = Pose::from_keypoints(
            [
                kp(KeypointIndex::LeftHip, 100.0, 200.0, 0.9),
                kp(KeypointIndex::LeftShoulder, 100.0, 100.0, 0.9),
                kp(KeypointIndex::LeftElbow, 100.0, 0.0, 0.9),
                kp(KeypointIndex::RightHip, 300.0, 200.0, 0.9),
                kp(KeypointIndex::RightShoulder, 300.0, 100.0, 0.1),
                kp(KeypointIndex::RightElbow, 350.0, 100.0, 0.9),
            ],
            CoordinateSpace::Source,
        );
        let angles = shoulder_angles(&pose, 0.15);
        assert!((angles.left.unwrap() - 180.0).abs() < 1e-4);
        assert_eq!(angles.get(Side::Right), None);
    }

    #[test]
    fn test_elbow_straight_arm() {
        let angles = elbow_angles(&arm_pose(0.9), 0.15);
        assert!((angles.left.unwrap() - 180.0).abs() < 1e-4);
        assert_eq!(angles.right, None);
    }

    #[test]
    fn test_shoulder_elevation_vertical_reference() {
        // 腕が水平なら垂直基準から 90°
        let angles = shoulder_elevation(&arm_pose(0.9), 0.15);
        assert!((angles.left.unwrap() - 90.0).abs() < 1e-4);

        // 腕を真上に上げた状態は 0°
        let raised = Pose::from_keypoints(
            [
                kp(KeypointIndex::LeftShoulder, 100.0, 100.0, 0.9),
                kp(KeypointIndex::LeftElbow, 100.0, 40.0, 0.9),
            ],
            CoordinateSpace::Source,
        );
        assert!(shoulder_elevation(&raised, 0.15).left.unwrap().abs() < 1e-4);
    }
}
