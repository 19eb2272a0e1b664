//! Range-scan preprocessing: neighborhood-averaged distance estimates
//! that tolerate missing lidar returns.

/// Samples per scan, one per degree.
pub const SCAN_SIZE: usize = 360;

/// Scan angles for the left, right and front obstacle estimates.
pub const LEFT_ANGLE_DEG: i32 = 90;
pub const RIGHT_ANGLE_DEG: i32 = 270;
pub const FRONT_ANGLE_DEG: i32 = 0;

/// Average of the valid lidar distances in a +/- `half_window` neighborhood
/// around `center_angle_deg`, wrapping indices modulo 360.
///
/// A sample that is not finite counts as "no return" and is excluded from
/// the average. Returns `None` when there is no scan yet, and
/// `f32::INFINITY` when every sample in the window is invalid (nothing
/// detected, as opposed to unmeasured).
pub fn average_distance(
    scan: Option<&[f32]>,
    center_angle_deg: i32,
    half_window: i32,
) -> Option<f32> {
    let scan = scan?;

    let mut sum = 0.0;
    let mut count = 0u32;
    for offset in -half_window..=half_window {
        let idx = (center_angle_deg + offset).rem_euclid(SCAN_SIZE as i32) as usize;
        match scan.get(idx) {
            Some(&neighbor) if neighbor.is_finite() => {
                sum += neighbor;
                count += 1;
            }
            _ => {}
        }
    }

    if count > 0 {
        Some(sum / count as f32)
    } else {
        Some(f32::INFINITY)
    }
}

/// Scan angle at which the leader sits, given the signed bearing offset
/// reported by the tag tracker. The scan is indexed counter-clockwise, so
/// a positive bearing maps to `360 - bearing`.
pub fn leader_scan_angle(bearing_deg: f32) -> i32 {
    (360 - bearing_deg as i32).rem_euclid(SCAN_SIZE as i32)
}

/// Left/right/front distance estimates, derived once per scan.
/// `f32::INFINITY` in a field means nothing was detected in that direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalDistances {
    pub left: f32,
    pub right: f32,
    pub front: f32,
}

impl DirectionalDistances {
    /// Extract the three directional averages from a full scan.
    pub fn from_scan(scan: &[f32], half_window: i32) -> Self {
        let sample = |angle| {
            // The scan is present, so the average can only be a value.
            average_distance(Some(scan), angle, half_window).unwrap_or(f32::INFINITY)
        };
        Self {
            left: sample(LEFT_ANGLE_DEG),
            right: sample(RIGHT_ANGLE_DEG),
            front: sample(FRONT_ANGLE_DEG),
        }
    }

    /// Distance to the closest detected obstacle in any of the three
    /// directions.
    pub fn closest(&self) -> f32 {
        self.left.min(self.right).min(self.front)
    }
}
