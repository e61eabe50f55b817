//! Frame-to-frame movement classification and session range of motion.

use crate::angles::ShoulderAngles;
use crate::pose::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementDirection {
    /// Angle grew by more than the threshold (arm moving away from the trunk).
    Raising,
    /// Angle shrank by more than the threshold.
    Lowering,
    Steady,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShoulderMovement {
    pub side: Side,
    pub angle: f32,
    pub direction: MovementDirection,
    /// |current - previous| in degrees, 0 without a previous sample.
    pub step: f32,
}

/// Classify the change between two consecutive angle samples of one side.
///
/// `None` when there is no current angle. Without a previous angle the
/// movement is `Steady` with a zero step.
pub fn analyze_movement(
    current: Option<f32>,
    previous: Option<f32>,
    side: Side,
    threshold_deg: f32,
) -> Option<ShoulderMovement> {
    let angle = current?;
    let (direction, step) = match previous {
        Some(prev) => {
            let direction = if angle > prev + threshold_deg {
                MovementDirection::Raising
            } else if angle < prev - threshold_deg {
                MovementDirection::Lowering
            } else {
                MovementDirection::Steady
            };
            (direction, (angle - prev).abs())
        }
        None => (MovementDirection::Steady, 0.0),
    };
    Some(ShoulderMovement { side, angle, direction, step })
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Extent {
    min: f32,
    max: f32,
    samples: u32,
}

/// Running min/max of the shoulder angle per side over a session.
#[derive(Debug, Clone, Default)]
pub struct RangeOfMotion {
    left: Option<Extent>,
    right: Option<Extent>,
}

impl RangeOfMotion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Missing sides are skipped, not recorded as zero.
    pub fn record(&mut self, angles: &ShoulderAngles) {
        for side in Side::BOTH {
            if let Some(angle) = angles.get(side).filter(|a| a.is_finite()) {
                let slot = self.slot_mut(side);
                *slot = Some(match *slot {
                    Some(e) => Extent {
                        min: e.min.min(angle),
                        max: e.max.max(angle),
                        samples: e.samples + 1,
                    },
                    None => Extent { min: angle, max: angle, samples: 1 },
                });
            }
        }
    }

    fn slot_mut(&mut self, side: Side) -> &mut Option<Extent> {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    fn slot(&self, side: Side) -> Option<Extent> {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub fn min(&self, side: Side) -> Option<f32> {
        self.slot(side).map(|e| e.min)
    }

    /// Peak angle reached.
    pub fn max(&self, side: Side) -> Option<f32> {
        self.slot(side).map(|e| e.max)
    }

    pub fn span(&self, side: Side) -> Option<f32> {
        self.slot(side).map(|e| e.max - e.min)
    }

    pub fn samples(&self, side: Side) -> u32 {
        self.slot(side).map_or(0, |e| e.samples)
    }

    pub fn reset(&mut self) {
        self.left = None;
        self.right = None;
    }
}
