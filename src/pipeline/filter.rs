use crate::types::{JointAngleSample, JointKey};

pub const MIN_ANGLE: f32 = 0.0;
pub const MAX_ANGLE: f32 = 90.0;

/// Bounds one angle to the actuator-safe range. NaN maps to the lower bound.
pub fn clamp_angle(value: f32) -> f32 {
    if value.is_nan() {
        return MIN_ANGLE;
    }
    value.clamp(MIN_ANGLE, MAX_ANGLE)
}

pub fn clamp_sample(sample: &JointAngleSample) -> JointAngleSample {
    sample.map(|_, value| clamp_angle(value))
}

/// Per-joint exponential moving average that persists across frames.
///
/// `alpha` weights the newest sample: 1.0 passes input through, 0.0 holds
/// the first sample for the rest of the session.
#[derive(Clone, Debug)]
pub struct TemporalFilter {
    alpha: f32,
    prev: Option<JointAngleSample>,
}

impl TemporalFilter {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            prev: None,
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn apply(&mut self, raw: &JointAngleSample) -> JointAngleSample {
        let prev = match self.prev {
            Some(prev) => prev,
            None => {
                self.prev = Some(*raw);
                return *raw;
            }
        };

        let a = self.alpha;
        let filtered =
            JointAngleSample::from_fn(|key: JointKey| a * raw.get(key) + (1.0 - a) * prev.get(key));
        self.prev = Some(filtered);
        filtered
    }

    pub fn state(&self) -> Option<&JointAngleSample> {
        self.prev.as_ref()
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq_f32(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    fn uniform(value: f32) -> JointAngleSample {
        JointAngleSample::from_fn(|_| value)
    }

    fn ramp(offset: f32) -> JointAngleSample {
        JointAngleSample::from_fn(|key| offset + key.index() as f32 * 10.0)
    }

    #[test]
    fn test_clamp_range_and_idempotence() {
        let inputs = [
            f32::NEG_INFINITY,
            -1e9,
            -0.0,
            0.0,
            1e-7,
            45.0,
            89.999,
            90.0,
            90.0001,
            1e9,
            f32::INFINITY,
            f32::NAN,
        ];
        for x in inputs {
            let once = clamp_angle(x);
            assert!((MIN_ANGLE..=MAX_ANGLE).contains(&once), "{x} -> {once}");
            assert_eq!(clamp_angle(once), once);
        }
    }

    #[test]
    fn test_clamp_is_monotonic() {
        let mut prev = clamp_angle(-200.0);
        let mut x = -200.0f32;
        while x <= 200.0 {
            let y = clamp_angle(x);
            assert!(y >= prev);
            prev = y;
            x += 0.25;
        }
    }

    #[test]
    fn test_clamp_sample_is_pointwise() {
        let raw = JointAngleSample::from_fn(|key| key.index() as f32 * 40.0 - 20.0);
        let clamped = clamp_sample(&raw);
        assert_eq!(clamped.get(JointKey::LeftShoulderYaw), 0.0);
        assert_eq!(clamped.get(JointKey::RightShoulderYaw), 20.0);
        assert_eq!(clamped.get(JointKey::LeftShoulderPitch), 60.0);
        assert_eq!(clamped.get(JointKey::RightShoulderPitch), 90.0);
        assert_eq!(clamped.get(JointKey::RightElbow), 90.0);
    }

    #[test]
    fn test_first_sample_passthrough() {
        let mut filter = TemporalFilter::new(0.1);
        assert_eq!(filter.apply(&ramp(3.0)), ramp(3.0));
    }

    #[test]
    fn test_alpha_one_reproduces_input() {
        let mut filter = TemporalFilter::new(1.0);
        for i in 0..10 {
            let raw = ramp(i as f32 * 7.5);
            assert_eq!(filter.apply(&raw), raw);
        }
    }

    #[test]
    fn test_alpha_zero_holds_first_sample() {
        let mut filter = TemporalFilter::new(0.0);
        let first = ramp(1.0);
        filter.apply(&first);
        for i in 0..10 {
            assert_eq!(filter.apply(&ramp(50.0 + i as f32)), first);
        }
    }

    #[test]
    fn test_smoothing_persists_across_frames() {
        let mut filter = TemporalFilter::new(0.5);
        filter.apply(&uniform(0.0));
        let second = filter.apply(&uniform(80.0));
        let third = filter.apply(&uniform(80.0));
        assert!(approx_eq_f32(second.get(JointKey::LeftElbow), 40.0, 1e-6));
        assert!(approx_eq_f32(third.get(JointKey::LeftElbow), 60.0, 1e-6));
    }

    #[test]
    fn test_default_alpha_converges_slowly() {
        let mut filter = TemporalFilter::new(0.1);
        filter.apply(&uniform(0.0));
        let out = filter.apply(&uniform(90.0));
        assert!(approx_eq_f32(out.get(JointKey::RightShoulderYaw), 9.0, 1e-5));
    }

    #[test]
    fn test_reset() {
        let mut filter = TemporalFilter::new(0.0);
        filter.apply(&uniform(10.0));
        filter.reset();
        assert!(filter.state().is_none());
        assert_eq!(filter.apply(&uniform(70.0)), uniform(70.0));
    }
}
