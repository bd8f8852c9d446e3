use crate::types::{Finger, FingerSet, SensorFrame};
use std::collections::BTreeMap;

/// Default activation threshold on the normalized drop, user-configurable.
pub const DEFAULT_THRESHOLD: f32 = 0.15;

/// Tutorial debounce: a finger must fall below `threshold * RELEASE_FACTOR`
/// before it can satisfy the next expected press again.
pub const RELEASE_FACTOR: f32 = 0.4;

/// Frames sampled during calibration, and the cadence between reads.
pub const CALIBRATION_SAMPLES: u32 = 30;
pub const CALIBRATION_INTERVAL_MS: u64 = 20;

// ─── Baselines ──────────────────────────────────────────────────────────────

/// Per-finger rest values established by calibration. Fingers without a
/// baseline are excluded from activation checks entirely.
#[derive(Debug, Clone, Default)]
pub struct Baselines {
    values: [Option<f64>; 5],
}

impl Baselines {
    pub fn get(&self, f: Finger) -> Option<f64> {
        self.values[f.slot()]
    }

    pub fn set(&mut self, f: Finger, rest: f64) {
        self.values[f.slot()] = Some(rest);
    }

    pub fn clear(&mut self) {
        self.values = [None; 5];
    }

    /// Calibrated iff at least one finger has a baseline.
    pub fn is_calibrated(&self) -> bool {
        self.values.iter().any(|v| v.is_some())
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        Finger::ALL
            .iter()
            .filter_map(|&f| self.get(f).map(|v| (f.name().to_string(), v)))
            .collect()
    }
}

/// Accumulates calibration frames; per finger, baseline = mean of samples.
/// Fingers that never appeared in a decoded frame retain no baseline.
#[derive(Debug, Default)]
pub struct CalibrationAccumulator {
    sums: [f64; 5],
    counts: [u32; 5],
}

impl CalibrationAccumulator {
    pub fn add(&mut self, frame: &SensorFrame) {
        for f in Finger::ALL {
            self.sums[f.slot()] += f64::from(frame.value(f));
            self.counts[f.slot()] += 1;
        }
    }

    pub fn finish(self) -> Baselines {
        let mut baselines = Baselines::default();
        for f in Finger::ALL {
            let n = self.counts[f.slot()];
            if n > 0 {
                baselines.set(f, self.sums[f.slot()] / f64::from(n));
            }
        }
        baselines
    }
}

// ─── Activation detection ───────────────────────────────────────────────────

/// Pressed/released transitions between two consecutive ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delta {
    pub pressed: FingerSet,
    pub released: FingerSet,
}

/// Result of evaluating one frame: the normalized drop per finger (None for
/// uncalibrated fingers), the current active set, and the transition if the
/// set changed.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub drops: [Option<f32>; 5],
    pub current: FingerSet,
    pub delta: Option<Delta>,
}

/// Converts calibrated baselines + readings into the pressed-finger set.
///
/// Invariant: after `evaluate`, a finger is active iff its normalized drop
/// exceeded the threshold on the most recent frame.
#[derive(Debug, Default)]
pub struct ActivationDetector {
    current: FingerSet,
}

impl ActivationDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> FingerSet {
        self.current
    }

    /// Forget the active set, e.g. on disconnect.
    pub fn reset(&mut self) {
        self.current = FingerSet::empty();
    }

    pub fn evaluate(
        &mut self,
        frame: &SensorFrame,
        baselines: &Baselines,
        threshold: f32,
    ) -> Tick {
        let mut drops = [None; 5];
        let mut next = FingerSet::empty();

        for f in Finger::ALL {
            let Some(rest) = baselines.get(f) else {
                continue;
            };
            let drop = ((rest - f64::from(frame.value(f))) / f.range()) as f32;
            drops[f.slot()] = Some(drop);
            if drop > threshold {
                next.insert(f);
            }
        }

        let delta = if next != self.current {
            let mut pressed = FingerSet::empty();
            let mut released = FingerSet::empty();
            for f in Finger::ALL {
                match (self.current.contains(f), next.contains(f)) {
                    (false, true) => pressed.insert(f),
                    (true, false) => released.insert(f),
                    _ => {}
                }
            }
            Some(Delta { pressed, released })
        } else {
            None
        };

        self.current = next;
        Tick {
            drops,
            current: next,
            delta,
        }
    }
}
