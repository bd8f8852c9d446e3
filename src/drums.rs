use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use std::sync::Arc;

/// Length of every percussive sample in seconds.
pub const DRUM_SECONDS: f32 = 0.4;

/// The fixed percussive sample set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrumKind {
    Kick,
    Snare,
    Hihat,
    Tom,
    Clap,
    Cymbal,
}

impl DrumKind {
    pub const ALL: [DrumKind; 6] = [
        DrumKind::Kick,
        DrumKind::Snare,
        DrumKind::Hihat,
        DrumKind::Tom,
        DrumKind::Clap,
        DrumKind::Cymbal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DrumKind::Kick => "kick",
            DrumKind::Snare => "snare",
            DrumKind::Hihat => "hihat",
            DrumKind::Tom => "tom",
            DrumKind::Clap => "clap",
            DrumKind::Cymbal => "cymbal",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        DrumKind::ALL.into_iter().find(|d| d.name() == name)
    }

    fn slot(self) -> usize {
        match self {
            DrumKind::Kick => 0,
            DrumKind::Snare => 1,
            DrumKind::Hihat => 2,
            DrumKind::Tom => 3,
            DrumKind::Clap => 4,
            DrumKind::Cymbal => 5,
        }
    }
}

/// All drum samples, generated once at startup and shared with the renderer.
pub struct DrumBank {
    samples: [Arc<Vec<f32>>; 6],
}

impl DrumBank {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            samples: DrumKind::ALL.map(|k| Arc::new(generate(k, sample_rate))),
        }
    }

    pub fn sample(&self, kind: DrumKind) -> Arc<Vec<f32>> {
        self.samples[kind.slot()].clone()
    }
}

/// Render one percussive sample buffer. Deterministic: the noise source is
/// seeded per drum kind, so repeated runs produce identical buffers.
pub fn generate(kind: DrumKind, sample_rate: u32) -> Vec<f32> {
    let n = (sample_rate as f32 * DRUM_SECONDS) as usize;
    let sr = sample_rate as f32;
    let mut rng = StdRng::seed_from_u64(0x52_49_50 + kind.slot() as u64);
    let t = |i: usize| i as f32 / sr;

    let mut wave = vec![0.0f32; n];
    match kind {
        DrumKind::Kick => {
            // Pitch-dropping fundamental plus a sub layer and a short click
            for (i, s) in wave.iter_mut().enumerate() {
                let t = t(i);
                let freq = 55.0 * (-2.0 * t).exp();
                *s = (TAU * freq * t).sin() * (-3.0 * t).exp()
                    + 0.6 * (TAU * 35.0 * t).sin() * (-4.0 * t).exp()
                    + 0.2 * noise(&mut rng) * (-80.0 * t).exp();
            }
        }
        DrumKind::Snare => {
            for (i, s) in wave.iter_mut().enumerate() {
                let t = t(i);
                *s = 0.4 * (TAU * 180.0 * t).sin() * (-25.0 * t).exp()
                    + 0.6 * noise(&mut rng) * (-18.0 * t).exp();
            }
        }
        DrumKind::Hihat => {
            // Differentiated decaying noise: high-pass tick
            let mut prev = 0.0f32;
            for (i, s) in wave.iter_mut().enumerate() {
                let cur = noise(&mut rng) * (-35.0 * t(i)).exp();
                *s = cur - prev;
                prev = cur;
            }
        }
        DrumKind::Tom => {
            for (i, s) in wave.iter_mut().enumerate() {
                let t = t(i);
                let freq = 90.0 * (-4.0 * t).exp();
                *s = (TAU * freq * t).sin() * (-8.0 * t).exp();
            }
        }
        DrumKind::Clap => {
            // Five staggered noise bursts with per-burst decay
            for burst in 0..5 {
                let offset =
                    ((burst as f32 * 0.012 + rng.gen_range(0.0..0.005)) * sr) as usize;
                if offset >= n {
                    continue;
                }
                let remaining = n - offset;
                let gain = 0.7f32.powi(burst);
                for j in 0..remaining {
                    let env = (-60.0 * 0.1 * j as f32 / remaining as f32).exp();
                    wave[offset + j] += noise(&mut rng) * env * gain;
                }
            }
            for (i, s) in wave.iter_mut().enumerate() {
                *s *= (-12.0 * t(i)).exp();
            }
            for (i, s) in wave.iter_mut().enumerate() {
                *s += 0.15 * noise(&mut rng) * (-6.0 * t(i)).exp();
            }
        }
        DrumKind::Cymbal => {
            for (i, s) in wave.iter_mut().enumerate() {
                let t = t(i);
                *s = noise(&mut rng) * (-2.5 * t).exp() + 0.4 * noise(&mut rng) * (-t).exp();
            }
        }
    }

    normalize(&mut wave, 0.75);
    wave
}

fn noise(rng: &mut StdRng) -> f32 {
    rng.gen_range(-1.0..1.0)
}

fn normalize(wave: &mut [f32], peak: f32) {
    let max = wave.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if max > 0.0 {
        let scale = peak / max;
        for s in wave.iter_mut() {
            *s *= scale;
        }
    }
}
