use crate::frame::{self, FRAME_FIELDS};
use crate::link::SensorLink;
use crate::types::{Finger, FingerSet};
use log::info;
use std::thread;
use std::time::{Duration, Instant};

use Finger::{Index as I, Middle as M, Pinky as P, Ring as R, Thumb as T};

/// Raw resting value emitted for every finger channel.
pub const SIM_REST: u32 = 500_000;

/// How deep a simulated press bends the sensor, as a fraction of the
/// finger's normalization range. Comfortably above the default threshold.
const PRESS_DEPTH: f64 = 0.5;

/// One encoded frame every 5 ms, roughly the glove's real output rate.
const TICK: Duration = Duration::from_millis(5);

/// Byte-stream source that plays a looping gesture script, so the whole
/// pipeline can be exercised without hardware. Frames are paced against a
/// start instant rather than accumulated sleeps, so the output rate stays
/// honest under scheduling jitter.
pub struct GloveSimulator {
    segments: Vec<(u64, FingerSet)>,
    total_ms: u64,
    started: Instant,
    tick: u64,
    pending: Vec<u8>,
}

impl GloveSimulator {
    pub fn new() -> Self {
        Self::with_script(demo_script())
    }

    pub fn with_script(segments: Vec<(u64, FingerSet)>) -> Self {
        let total_ms = segments.iter().map(|(ms, _)| ms).sum::<u64>().max(1);
        info!(
            "Simulator: {} segments looping every {:.1}s",
            segments.len(),
            total_ms as f64 / 1000.0
        );
        Self {
            segments,
            total_ms,
            started: Instant::now(),
            tick: 0,
            pending: Vec::new(),
        }
    }

    fn pressed_at(&self, elapsed_ms: u64) -> FingerSet {
        let mut t = elapsed_ms % self.total_ms;
        for &(ms, set) in &self.segments {
            if t < ms {
                return set;
            }
            t -= ms;
        }
        FingerSet::empty()
    }

    fn next_frame(&mut self) -> Vec<u8> {
        let deadline = self.started + TICK * self.tick as u32;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.tick += 1;

        let pressed = self.pressed_at(self.started.elapsed().as_millis() as u64);
        // Small deterministic wobble keeps values looking alive without
        // crossing the activation threshold
        let wobble = (self.tick as f32 * 0.37).sin() * 300.0;

        let mut fields = [0u32; FRAME_FIELDS];
        for f in Finger::ALL {
            let mut value = SIM_REST as f64 + wobble as f64;
            if pressed.contains(f) {
                value -= PRESS_DEPTH * f.range();
            }
            fields[f.channel()] = value as u32;
        }

        let mut bytes = Vec::new();
        // Every so often, leak a couple of junk bytes ahead of the marker
        // the way a freshly opened serial port does
        if self.tick % 64 == 0 {
            bytes.extend_from_slice(&[0x00, 0x7F]);
        }
        bytes.extend_from_slice(&frame::encode(&fields));
        bytes
    }
}

impl Default for GloveSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorLink for GloveSimulator {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, String> {
        if self.pending.is_empty() {
            self.pending = self.next_frame();
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn describe(&self) -> String {
        "simulator".to_string()
    }
}

/// A looping demo: rest for calibration headroom, a five-finger scale up
/// and down, a chord grab, then a little drum-style pattern.
fn demo_script() -> Vec<(u64, FingerSet)> {
    let solo = |f: Finger| -> FingerSet { [f].into_iter().collect() };
    let rest = FingerSet::empty();
    vec![
        // Quiet lead-in so a calibrate command right after startup sees rest
        (1500, rest),
        // Scale up
        (300, solo(T)),
        (100, rest),
        (300, solo(I)),
        (100, rest),
        (300, solo(M)),
        (100, rest),
        (300, solo(R)),
        (100, rest),
        (300, solo(P)),
        (400, rest),
        // Scale down
        (300, solo(P)),
        (100, rest),
        (300, solo(R)),
        (100, rest),
        (300, solo(M)),
        (100, rest),
        (300, solo(I)),
        (100, rest),
        (300, solo(T)),
        (500, rest),
        // Chord grab: thumb + middle + pinky held together
        (800, [T, M, P].into_iter().collect()),
        (400, rest),
        // Alternating pair, drum-pattern cadence
        (150, solo(T)),
        (150, rest),
        (150, solo(I)),
        (150, rest),
        (150, solo(T)),
        (150, rest),
        (150, solo(I)),
        (1000, rest),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_BYTES;

    fn read_one_frame(sim: &mut GloveSimulator) -> crate::types::SensorFrame {
        let mut collected = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = sim.read(&mut buf).unwrap();
            collected.extend_from_slice(&buf[..n]);
            if let Some(pos) = frame::find_sync(&collected) {
                if collected.len() >= pos + FRAME_BYTES {
                    return frame::decode(&collected[pos..]).unwrap();
                }
            }
        }
    }

    #[test]
    fn test_emits_decodable_frames_at_rest() {
        let mut sim = GloveSimulator::with_script(vec![(10_000, FingerSet::empty())]);
        let frame = read_one_frame(&mut sim);
        for f in Finger::ALL {
            let v = frame.value(f) as f64;
            assert!((v - SIM_REST as f64).abs() < 1000.0, "{f}: {v}");
        }
    }

    #[test]
    fn test_pressed_finger_drops_well_below_rest() {
        let pressed: FingerSet = [Finger::Index].into_iter().collect();
        let mut sim = GloveSimulator::with_script(vec![(10_000, pressed)]);
        let frame = read_one_frame(&mut sim);
        let drop =
            (SIM_REST as f64 - frame.value(Finger::Index) as f64) / Finger::Index.range();
        assert!(drop > 0.4, "drop {drop}");
        // Unpressed fingers stay near rest
        let thumb_drop =
            (SIM_REST as f64 - frame.value(Finger::Thumb) as f64) / Finger::Thumb.range();
        assert!(thumb_drop.abs() < 0.05);
    }

    #[test]
    fn test_script_loops() {
        let sim = GloveSimulator::with_script(vec![
            (100, [Finger::Thumb].into_iter().collect()),
            (100, FingerSet::empty()),
        ]);
        assert!(sim.pressed_at(50).contains(Finger::Thumb));
        assert!(sim.pressed_at(150).is_empty());
        assert!(sim.pressed_at(250).contains(Finger::Thumb)); // wrapped
    }
}
