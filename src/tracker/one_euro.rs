use std::time::Instant;

use crate::config::SmoothingConfig;
use crate::pose::{KeypointIndex, Pose};

/// Low-pass filter component
struct LowPassFilter {
    prev: Option<f32>,
}

impl LowPassFilter {
    fn new() -> Self {
        Self { prev: None }
    }

    fn filter(&mut self, value: f32, alpha: f32) -> f32 {
        match self.prev {
            Some(prev) => {
                let result = alpha * value + (1.0 - alpha) * prev;
                self.prev = Some(result);
                result
            }
            None => {
                self.prev = Some(value);
                value
            }
        }
    }

    fn reset(&mut self) {
        self.prev = None;
    }
}

/// alpha = 1 / (1 + tau/Te), tau = 1/(2*pi*fc)
fn smoothing_factor(te: f32, cutoff: f32) -> f32 {
    let r = 2.0 * std::f32::consts::PI * cutoff * te;
    r / (r + 1.0)
}

/// One Euro Filter for a single scalar value
struct ScalarFilter {
    min_cutoff: f32,
    beta: f32,
    d_cutoff: f32,
    x_filter: LowPassFilter,
    dx_filter: LowPassFilter,
    prev_value: Option<f32>,
}

impl ScalarFilter {
    fn new(min_cutoff: f32, beta: f32, d_cutoff: f32) -> Self {
        Self {
            min_cutoff,
            beta,
            d_cutoff,
            x_filter: LowPassFilter::new(),
            dx_filter: LowPassFilter::new(),
            prev_value: None,
        }
    }

    fn filter(&mut self, value: f32, dt: f32) -> f32 {
        let dx = match self.prev_value {
            Some(prev) if dt > 0.0 => (value - prev) / dt,
            _ => 0.0,
        };
        self.prev_value = Some(value);

        let edx = self.dx_filter.filter(dx, smoothing_factor(dt, self.d_cutoff));
        let cutoff = self.min_cutoff + self.beta * edx.abs();
        self.x_filter.filter(value, smoothing_factor(dt, cutoff))
    }

    fn reset(&mut self) {
        self.x_filter.reset();
        self.dx_filter.reset();
        self.prev_value = None;
    }
}

/// One Euro Filter over the 17 keypoint positions of consecutive poses.
///
/// Runs in whatever pixel space the poses are in. A keypoint whose score
/// drops to `reset_below` or lower is passed through unchanged and its filter
/// restarts, so a reacquired joint does not drag in a stale position.
pub struct KeypointSmoother {
    filters: [[ScalarFilter; 2]; KeypointIndex::COUNT],
    reset_below: f32,
    last_time: Option<Instant>,
}

impl KeypointSmoother {
    pub fn new(min_cutoff: f32, beta: f32, d_cutoff: f32, reset_below: f32) -> Self {
        Self {
            filters: std::array::from_fn(|_| {
                [
                    ScalarFilter::new(min_cutoff, beta, d_cutoff),
                    ScalarFilter::new(min_cutoff, beta, d_cutoff),
                ]
            }),
            reset_below,
            last_time: None,
        }
    }

    pub fn from_config(config: &SmoothingConfig, reset_below: f32) -> Self {
        Self::new(config.min_cutoff, config.beta, config.d_cutoff, reset_below)
    }

    /// `at` is the capture time of the frame the pose came from.
    pub fn apply(&mut self, pose: &Pose, at: Instant) -> Pose {
        let dt = match self.last_time {
            Some(t) => {
                let d = at.saturating_duration_since(t).as_secs_f32();
                if d > 0.0 { d } else { 1.0 / 30.0 }
            }
            None => 0.0,
        };
        self.last_time = Some(at);

        let reset_below = self.reset_below;
        let filters = &mut self.filters;
        pose.map_positions(pose.space(), |kp| {
            let [fx, fy] = &mut filters[kp.name as usize];
            if kp.score <= reset_below {
                fx.reset();
                fy.reset();
                return (kp.x, kp.y);
            }
            (fx.filter(kp.x, dt), fy.filter(kp.y, dt))
        })
    }

    pub fn reset(&mut self) {
        for pair in &mut self.filters {
            for f in pair {
                f.reset();
            }
        }
        self.last_time = None;
    }
}
