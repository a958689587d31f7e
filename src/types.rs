use std::{collections::BTreeMap, time::Instant};

use serde::{Deserialize, Serialize};

use crate::error::PipelineFault;

pub const NUM_LANDMARKS: usize = 33;

/// Anatomical name of every pose landmark, indexed by landmark id.
pub const POSE_LANDMARK_NAMES: [&str; NUM_LANDMARKS] = [
    "nose",
    "left_eye_inner",
    "left_eye",
    "left_eye_outer",
    "right_eye_inner",
    "right_eye",
    "right_eye_outer",
    "left_ear",
    "right_ear",
    "mouth_left",
    "mouth_right",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_pinky",
    "right_pinky",
    "left_index",
    "right_index",
    "left_thumb",
    "right_thumb",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
    "left_heel",
    "right_heel",
    "left_foot_index",
    "right_foot_index",
];

pub const LEFT_SHOULDER: usize = 11;
pub const RIGHT_SHOULDER: usize = 12;
pub const LEFT_ELBOW: usize = 13;
pub const RIGHT_ELBOW: usize = 14;
pub const LEFT_WRIST: usize = 15;
pub const RIGHT_WRIST: usize = 16;

/// Landmarks the angle geometry reads; a detection with any of these
/// non-finite is rejected.
pub const ARM_LANDMARKS: [usize; 6] = [
    LEFT_SHOULDER,
    RIGHT_SHOULDER,
    LEFT_ELBOW,
    RIGHT_ELBOW,
    LEFT_WRIST,
    RIGHT_WRIST,
];

pub fn landmark_name(index: usize) -> Option<&'static str> {
    POSE_LANDMARK_NAMES.get(index).copied()
}

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub seq: u64,
    pub timestamp: Instant,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self {
            x,
            y,
            z,
            visibility,
        }
    }

    pub fn with_z(self, z: f32) -> Self {
        Self { z, ..self }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// The full 33-point body pose of a single person.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkSet {
    points: [Landmark; NUM_LANDMARKS],
}

impl LandmarkSet {
    pub fn new(points: [Landmark; NUM_LANDMARKS]) -> Self {
        Self { points }
    }

    /// Builds a set from estimator output, rejecting wrong counts and
    /// unusable arm landmarks.
    pub fn from_vec(points: Vec<Landmark>) -> Result<Self, PipelineFault> {
        let count = points.len();
        let points: [Landmark; NUM_LANDMARKS] = points.try_into().map_err(|_| {
            PipelineFault::data(format!(
                "expected {NUM_LANDMARKS} landmarks, got {count}"
            ))
        })?;
        let set = Self { points };
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<(), PipelineFault> {
        for index in ARM_LANDMARKS {
            if !self.points[index].is_finite() {
                return Err(PipelineFault::data(format!(
                    "landmark {} is not finite",
                    POSE_LANDMARK_NAMES[index]
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Landmark {
        self.points[index]
    }

    pub fn points(&self) -> &[Landmark; NUM_LANDMARKS] {
        &self.points
    }

    pub fn map<F>(&self, mut f: F) -> Self
    where
        F: FnMut(usize, Landmark) -> Landmark,
    {
        let mut points = self.points;
        for (index, point) in points.iter_mut().enumerate() {
            *point = f(index, *point);
        }
        Self { points }
    }
}

/// Row-major metric depth grid aligned to one downsampled frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DepthMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl DepthMap {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> anyhow::Result<Self> {
        let expected = width as usize * height as usize;
        if values.len() != expected {
            anyhow::bail!(
                "depth grid size mismatch: got {}, expected {}x{}={}",
                values.len(),
                width,
                height,
                expected
            );
        }
        // Negative or NaN depth is not physical; floor it at zero.
        let values = values
            .into_iter()
            .map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 })
            .collect();
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn filled(width: u32, height: u32, depth: f32) -> Self {
        Self {
            width,
            height,
            values: vec![depth.max(0.0); width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn at(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.width as usize + col]
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointKey {
    LeftShoulderYaw,
    RightShoulderYaw,
    LeftShoulderPitch,
    RightShoulderPitch,
    LeftElbow,
    RightElbow,
}

impl JointKey {
    pub const COUNT: usize = 6;

    pub const ALL: [JointKey; Self::COUNT] = [
        JointKey::LeftShoulderYaw,
        JointKey::RightShoulderYaw,
        JointKey::LeftShoulderPitch,
        JointKey::RightShoulderPitch,
        JointKey::LeftElbow,
        JointKey::RightElbow,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            JointKey::LeftShoulderYaw => "left_shoulder_yaw",
            JointKey::RightShoulderYaw => "right_shoulder_yaw",
            JointKey::LeftShoulderPitch => "left_shoulder_pitch",
            JointKey::RightShoulderPitch => "right_shoulder_pitch",
            JointKey::LeftElbow => "left_elbow",
            JointKey::RightElbow => "right_elbow",
        }
    }
}

/// One degree value for every [`JointKey`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    into = "BTreeMap<JointKey, f32>",
    try_from = "BTreeMap<JointKey, f32>"
)]
pub struct JointAngleSample {
    values: [f32; JointKey::COUNT],
}

impl JointAngleSample {
    pub fn from_fn<F>(mut f: F) -> Self
    where
        F: FnMut(JointKey) -> f32,
    {
        let mut values = [0.0; JointKey::COUNT];
        for key in JointKey::ALL {
            values[key.index()] = f(key);
        }
        Self { values }
    }

    pub fn get(&self, key: JointKey) -> f32 {
        self.values[key.index()]
    }

    pub fn set(&mut self, key: JointKey, value: f32) {
        self.values[key.index()] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (JointKey, f32)> + '_ {
        JointKey::ALL.into_iter().map(|key| (key, self.get(key)))
    }

    pub fn map<F>(&self, mut f: F) -> Self
    where
        F: FnMut(JointKey, f32) -> f32,
    {
        Self::from_fn(|key| f(key, self.get(key)))
    }
}

impl From<JointAngleSample> for BTreeMap<JointKey, f32> {
    fn from(sample: JointAngleSample) -> Self {
        sample.iter().collect()
    }
}

impl TryFrom<BTreeMap<JointKey, f32>> for JointAngleSample {
    type Error = String;

    fn try_from(map: BTreeMap<JointKey, f32>) -> Result<Self, Self::Error> {
        let mut sample = JointAngleSample::default();
        for key in JointKey::ALL {
            let value = map
                .get(&key)
                .copied()
                .ok_or_else(|| format!("missing joint {}", key.label()))?;
            sample.set(key, value);
        }
        Ok(sample)
    }
}

/// A published sample: what leaves the pipeline for one processed frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AngleRecord {
    pub frame: u64,
    pub timestamp_ms: u64,
    pub angles: JointAngleSample,
}
