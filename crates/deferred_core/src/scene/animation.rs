//! Keyframed camera animation
//!
//! Keyframes are authored with Euler angles in Y (yaw), X (pitch), Z (roll) order and
//! stored as unit quaternions. Sampling interpolates position linearly and rotation by
//! spherical linear interpolation, so a segment always follows the shortest arc at a
//! constant angular rate.

use crate::foundation::math::{Quat, Vec3};

/// One camera pose at a point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraKeyframe {
    /// Seconds from animation start
    pub time: f32,
    /// World-space position
    pub position: Vec3,
    /// Orientation
    pub rotation: Quat,
}

/// Orientation from Euler angles applied yaw (Y), then pitch (X), then roll (Z)
pub fn rotation_from_euler_yxz(euler: Vec3) -> Quat {
    Quat::from_axis_angle(&Vec3::y_axis(), euler.y)
        * Quat::from_axis_angle(&Vec3::x_axis(), euler.x)
        * Quat::from_axis_angle(&Vec3::z_axis(), euler.z)
}

/// Time-sorted keyframe track
#[derive(Debug, Clone, Default)]
pub struct CameraAnimation {
    keyframes: Vec<CameraKeyframe>,
}

impl CameraAnimation {
    /// Empty track
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a keyframe, keeping the track sorted by time
    pub fn add_keyframe(&mut self, time: f32, position: Vec3, euler_yxz: Vec3) {
        let keyframe = CameraKeyframe {
            time,
            position,
            rotation: rotation_from_euler_yxz(euler_yxz),
        };
        let index = self.keyframes.partition_point(|k| k.time <= time);
        self.keyframes.insert(index, keyframe);
    }

    /// Keyframes in time order
    pub fn keyframes(&self) -> &[CameraKeyframe] {
        &self.keyframes
    }

    /// Time of the last keyframe, 0 for an empty track
    pub fn end_time(&self) -> f32 {
        self.keyframes.last().map_or(0.0, |k| k.time)
    }

    /// Pose at `time`, clamped to the first/last keyframe outside the track
    pub fn sample(&self, time: f32) -> Option<(Vec3, Quat)> {
        let first = self.keyframes.first()?;
        let last = self.keyframes.last()?;
        if time <= first.time {
            return Some((first.position, first.rotation));
        }
        if time >= last.time {
            return Some((last.position, last.rotation));
        }

        let next = self.keyframes.partition_point(|k| k.time < time);
        let (a, b) = (&self.keyframes[next - 1], &self.keyframes[next]);
        let span = b.time - a.time;
        let t = if span > 0.0 { (time - a.time) / span } else { 1.0 };

        let position = a.position.lerp(&b.position, t);
        let rotation = a
            .rotation
            .try_slerp(&b.rotation, t, 1.0e-6)
            .unwrap_or(if t < 0.5 { a.rotation } else { b.rotation });
        Some((position, rotation))
    }
}

/// Looping playback clock for a [`CameraAnimation`]
#[derive(Debug, Clone, Copy, Default)]
pub struct AnimationClock {
    time: f32,
}

impl AnimationClock {
    /// Current playback time
    pub fn time(&self) -> f32 {
        self.time
    }

    /// Restart from zero
    pub fn reset(&mut self) {
        self.time = 0.0;
    }

    /// Advance by `dt`, wrapping to zero once `end_time` is passed
    pub fn advance(&mut self, dt: f32, end_time: f32) -> f32 {
        self.time += dt;
        if self.time > end_time {
            self.time = 0.0;
        }
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    fn track() -> CameraAnimation {
        let mut animation = CameraAnimation::new();
        animation.add_keyframe(2.0, Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, FRAC_PI_2, 0.0));
        animation.add_keyframe(0.0, Vec3::zeros(), Vec3::zeros());
        animation
    }

    #[test]
    fn test_keyframes_sorted_on_insert() {
        let animation = track();
        let times: Vec<f32> = animation.keyframes().iter().map(|k| k.time).collect();
        assert_eq!(times, vec![0.0, 2.0]);
        assert_eq!(animation.end_time(), 2.0);
    }

    #[test]
    fn test_sample_clamps_outside_track() {
        let animation = track();
        let (before, _) = animation.sample(-1.0).unwrap();
        let (after, _) = animation.sample(10.0).unwrap();
        assert_eq!(before, Vec3::zeros());
        assert_eq!(after, Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_midpoint_uses_constant_rate_rotation() {
        let animation = track();
        let (position, rotation) = animation.sample(1.0).unwrap();
        assert_relative_eq!(position.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(rotation.angle(), FRAC_PI_2 / 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_large_span_takes_short_arc() {
        let mut animation = CameraAnimation::new();
        animation.add_keyframe(0.0, Vec3::zeros(), Vec3::new(0.0, 0.1, 0.0));
        animation.add_keyframe(1.0, Vec3::zeros(), Vec3::new(0.0, 2.0 * std::f32::consts::PI - 0.1, 0.0));
        let (_, mid) = animation.sample(0.5).unwrap();
        // Euler blending would swing through yaw = pi; the short arc passes yaw = 0
        let forward = mid * Vec3::new(0.0, 0.0, -1.0);
        assert_relative_eq!(forward, Vec3::new(0.0, 0.0, -1.0), epsilon = 1e-4);
    }

    #[test]
    fn test_empty_track_has_no_pose() {
        assert!(CameraAnimation::new().sample(0.0).is_none());
    }

    #[test]
    fn test_clock_wraps_after_end() {
        let mut clock = AnimationClock::default();
        clock.advance(1.5, 2.0);
        assert_eq!(clock.advance(1.0, 2.0), 0.0);
        clock.advance(0.5, 2.0);
        clock.reset();
        assert_eq!(clock.time(), 0.0);
    }
}
