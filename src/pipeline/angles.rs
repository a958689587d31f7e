//! Joint angle extraction from 3D landmark geometry.
//!
//! Every division is guarded: a denominator whose magnitude is below
//! [`EPSILON`] is replaced by `EPSILON`, so no configuration of finite
//! landmarks produces NaN or infinity.
//!
//! Sign conventions, identical for both sides:
//! - yaw is the lateral spread of the upper arm, `atan(|Δx| / |Δy|)`;
//! - pitch is `atan((shoulder.z - wrist.z) / |Δy|)`, positive when the wrist
//!   is nearer the camera than the shoulder;
//! - elbow is the angle between shoulder→elbow and wrist→elbow, 180° when
//!   the arm is straight.

use crate::types::{
    JointAngleSample, JointKey, LEFT_ELBOW, LEFT_SHOULDER, LEFT_WRIST, Landmark, LandmarkSet,
    RIGHT_ELBOW, RIGHT_SHOULDER, RIGHT_WRIST,
};

pub const EPSILON: f32 = 1e-6;

#[derive(Clone, Copy, Debug)]
struct Arm {
    shoulder: usize,
    elbow: usize,
    wrist: usize,
}

const LEFT_ARM: Arm = Arm {
    shoulder: LEFT_SHOULDER,
    elbow: LEFT_ELBOW,
    wrist: LEFT_WRIST,
};

const RIGHT_ARM: Arm = Arm {
    shoulder: RIGHT_SHOULDER,
    elbow: RIGHT_ELBOW,
    wrist: RIGHT_WRIST,
};

fn guard(denominator: f64) -> f64 {
    if denominator.abs() < EPSILON as f64 {
        (EPSILON as f64).copysign(denominator)
    } else {
        denominator
    }
}

// Differences and products are taken in f64: no pair of finite f32
// coordinates can overflow there.
fn delta(a: f32, b: f32) -> f64 {
    a as f64 - b as f64
}

pub fn yaw(shoulder: Landmark, elbow: Landmark) -> f32 {
    let dx = delta(shoulder.x, elbow.x).abs();
    let dy = delta(shoulder.y, elbow.y).abs();
    (dx / guard(dy)).atan().to_degrees() as f32
}

pub fn pitch(shoulder: Landmark, wrist: Landmark) -> f32 {
    let dz = delta(shoulder.z, wrist.z);
    let dy = delta(shoulder.y, wrist.y).abs();
    (dz / guard(dy)).atan().to_degrees() as f32
}

pub fn elbow_bend(shoulder: Landmark, elbow: Landmark, wrist: Landmark) -> f32 {
    let a = [
        delta(shoulder.x, elbow.x),
        delta(shoulder.y, elbow.y),
        delta(shoulder.z, elbow.z),
    ];
    let b = [
        delta(wrist.x, elbow.x),
        delta(wrist.y, elbow.y),
        delta(wrist.z, elbow.z),
    ];
    let dot = a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
    let norm_a = (a[0] * a[0] + a[1] * a[1] + a[2] * a[2]).sqrt();
    let norm_b = (b[0] * b[0] + b[1] * b[1] + b[2] * b[2]).sqrt();
    let cos = dot / guard(norm_a * norm_b);
    let cos = if cos.is_nan() { 0.0 } else { cos.clamp(-1.0, 1.0) };
    cos.acos().to_degrees() as f32
}

/// Computes all six joint angles, in degrees, from one landmark set.
pub fn extract_angles(pose: &LandmarkSet) -> JointAngleSample {
    let arm = |side: Arm| {
        (
            pose.get(side.shoulder),
            pose.get(side.elbow),
            pose.get(side.wrist),
        )
    };
    let (ls, le, lw) = arm(LEFT_ARM);
    let (rs, re, rw) = arm(RIGHT_ARM);

    JointAngleSample::from_fn(|key| match key {
        JointKey::LeftShoulderYaw => yaw(ls, le),
        JointKey::RightShoulderYaw => yaw(rs, re),
        JointKey::LeftShoulderPitch => pitch(ls, lw),
        JointKey::RightShoulderPitch => pitch(rs, rw),
        JointKey::LeftElbow => elbow_bend(ls, le, lw),
        JointKey::RightElbow => elbow_bend(rs, re, rw),
    })
}
