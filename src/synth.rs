use crate::drums::{DrumBank, DrumKind};
use crate::sounds::Instrument;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, trace, warn};
use std::f32::consts::TAU;
use std::sync::Arc;

pub const SAMPLE_RATE: u32 = 44_100;
pub const BLOCK_SIZE: usize = 256;

/// Fixed output headroom applied to the sustained mix before one-shots.
const HEADROOM: f32 = 0.3;

/// Depth of the control→render command queue. Commands arrive at activation
/// rate (a few per second); 64 is generous.
const COMMAND_QUEUE: usize = 64;

enum SynthCommand {
    SetVoices(Vec<f32>),
    SetInstrument(Instrument),
    Trigger(DrumKind),
}

/// Non-blocking control surface for the sensor/control threads.
///
/// Commands travel over a bounded lock-free channel and are drained by the
/// renderer at the start of the next block, so a one-shot queued during
/// rendering starts on the very next block — never dropped, never
/// double-started. `try_send` keeps every call bounded: if the render side
/// has stalled the command is dropped rather than blocking the caller.
#[derive(Clone)]
pub struct SynthHandle {
    tx: Sender<SynthCommand>,
}

impl SynthHandle {
    /// Replace the sustained frequency set. Frequencies already sounding
    /// keep their phase; new ones start at phase 0; removed ones are
    /// discarded (re-activating restarts from phase 0).
    pub fn set_active_frequencies(&self, freqs: Vec<f32>) {
        self.send(SynthCommand::SetVoices(freqs));
    }

    pub fn set_instrument(&self, instrument: Instrument) {
        self.send(SynthCommand::SetInstrument(instrument));
    }

    pub fn trigger(&self, drum: DrumKind) {
        self.send(SynthCommand::Trigger(drum));
    }

    pub fn silence(&self) {
        self.set_active_frequencies(Vec::new());
    }

    fn send(&self, cmd: SynthCommand) {
        if self.tx.try_send(cmd).is_err() {
            warn!("synth command queue full — dropping command");
        }
    }
}

/// One sustained oscillator, identified by frequency, with a phase that
/// persists across render blocks while the voice is alive.
struct Voice {
    freq: f32,
    phase: f32,
}

/// An in-flight percussive sample: id + read cursor into a shared buffer.
/// Ids come from a monotonic counter, so rapid re-triggers of the same drum
/// are always independent instances.
struct OneShot {
    id: u64,
    sample: Arc<Vec<f32>>,
    cursor: usize,
}

/// The render side of the engine. Owned by the audio callback; the only
/// cross-thread contact is the command channel drained at block start.
pub struct Renderer {
    rx: Receiver<SynthCommand>,
    voices: Vec<Voice>,
    one_shots: Vec<OneShot>,
    instrument: Instrument,
    drums: DrumBank,
    sample_rate: u32,
    next_shot_id: u64,
    swap: Vec<Voice>,
}

/// Build a connected control-handle/renderer pair.
pub fn engine(sample_rate: u32) -> (SynthHandle, Renderer) {
    let (tx, rx) = bounded(COMMAND_QUEUE);
    (
        SynthHandle { tx },
        Renderer {
            rx,
            voices: Vec::new(),
            one_shots: Vec::new(),
            instrument: Instrument::Sine,
            drums: DrumBank::new(sample_rate),
            sample_rate,
            next_shot_id: 0,
            swap: Vec::new(),
        },
    )
}

impl Renderer {
    /// Render one block into `out`. Invoked on the audio device's schedule;
    /// steady state performs no allocation and never blocks.
    pub fn render(&mut self, out: &mut [f32]) {
        self.drain_commands();
        out.fill(0.0);
        let n = out.len();
        let sr = self.sample_rate as f32;

        // Sustained voices: phase-continuous waveforms per instrument
        for voice in &mut self.voices {
            let step = TAU * voice.freq / sr;
            for (i, s) in out.iter_mut().enumerate() {
                *s += sample_voice(self.instrument, voice.phase, step, i);
            }
            voice.phase = (voice.phase + step * n as f32) % TAU;
        }
        let scale = HEADROOM / self.voices.len().max(1) as f32;
        for s in out.iter_mut() {
            *s *= scale;
        }

        // One-shots mix in additively at unity gain
        for shot in &mut self.one_shots {
            let take = (shot.sample.len() - shot.cursor).min(n);
            for (s, v) in out[..take].iter_mut().zip(&shot.sample[shot.cursor..]) {
                *s += v;
            }
            shot.cursor += take;
        }
        self.one_shots.retain(|shot| {
            let done = shot.cursor >= shot.sample.len();
            if done {
                trace!("one-shot {} finished", shot.id);
            }
            !done
        });

        // Hard clip — distortion prevention, not a soft limiter
        for s in out.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn pending_one_shots(&self) -> usize {
        self.one_shots.len()
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.rx.try_recv() {
            match cmd {
                SynthCommand::SetVoices(freqs) => self.replace_voices(freqs),
                SynthCommand::SetInstrument(instrument) => {
                    debug!("instrument → {}", instrument.name());
                    self.instrument = instrument;
                    if instrument == Instrument::Drums {
                        self.voices.clear();
                    }
                }
                SynthCommand::Trigger(drum) => {
                    let id = self.next_shot_id;
                    self.next_shot_id += 1;
                    self.one_shots.push(OneShot {
                        id,
                        sample: self.drums.sample(drum),
                        cursor: 0,
                    });
                }
            }
        }
    }

    fn replace_voices(&mut self, freqs: Vec<f32>) {
        if self.instrument == Instrument::Drums {
            self.voices.clear();
            return;
        }
        self.swap.clear();
        for freq in freqs {
            let phase = self
                .voices
                .iter()
                .find(|v| v.freq == freq)
                .map_or(0.0, |v| v.phase);
            self.swap.push(Voice { freq, phase });
        }
        std::mem::swap(&mut self.voices, &mut self.swap);
    }
}

/// Sample `i` of a voice whose carried phase is `phase` and per-sample
/// angular step is `step` (2πf/sr).
#[inline]
fn sample_voice(instrument: Instrument, phase: f32, step: f32, i: usize) -> f32 {
    let a = phase + step * i as f32;
    match instrument {
        Instrument::Sine => a.sin(),
        Instrument::Soft => 0.6 * a.sin() + 0.3 * (2.0 * a).sin(),
        Instrument::Bell => a.sin() + 0.5 * (2.0 * a).sin(),
        Instrument::Pad => {
            // Slightly detuned second partial sharing the carried phase
            let b = phase + step * 1.002 * i as f32;
            0.4 * a.sin() + 0.3 * b.sin()
        }
        Instrument::Drums => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drums::DRUM_SECONDS;

    fn render_n(renderer: &mut Renderer, blocks: usize, size: usize) -> Vec<f32> {
        let mut all = Vec::with_capacity(blocks * size);
        let mut buf = vec![0.0f32; size];
        for _ in 0..blocks {
            renderer.render(&mut buf);
            all.extend_from_slice(&buf);
        }
        all
    }

    #[test]
    fn test_silence_when_idle() {
        let (_handle, mut renderer) = engine(SAMPLE_RATE);
        let out = render_n(&mut renderer, 2, BLOCK_SIZE);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_block_boundaries_are_phase_continuous() {
        // N blocks of size B must equal one render of size N*B
        let freqs = vec![262.0f32, 330.0, 392.0];

        let (handle, mut chunked) = engine(SAMPLE_RATE);
        handle.set_active_frequencies(freqs.clone());
        let a = render_n(&mut chunked, 8, BLOCK_SIZE);

        let (handle, mut whole) = engine(SAMPLE_RATE);
        handle.set_active_frequencies(freqs);
        let b = render_n(&mut whole, 1, 8 * BLOCK_SIZE);

        for (i, (x, y)) in a.iter().zip(&b).enumerate() {
            assert!((x - y).abs() < 1e-3, "sample {i}: {x} vs {y}");
        }
    }

    #[test]
    fn test_surviving_frequency_keeps_phase() {
        let (handle, mut renderer) = engine(SAMPLE_RATE);
        handle.set_active_frequencies(vec![440.0]);
        let first = render_n(&mut renderer, 1, BLOCK_SIZE);

        // Re-send the same set: the 440 Hz voice must continue, not restart
        handle.set_active_frequencies(vec![440.0]);
        let second = render_n(&mut renderer, 1, BLOCK_SIZE);

        let (handle, mut reference) = engine(SAMPLE_RATE);
        handle.set_active_frequencies(vec![440.0]);
        let expected = render_n(&mut reference, 2, BLOCK_SIZE);
        for (i, (x, y)) in first.iter().chain(&second).zip(&expected).enumerate() {
            assert!((x - y).abs() < 1e-3, "sample {i}");
        }
    }

    #[test]
    fn test_removed_frequency_restarts_at_phase_zero() {
        let (handle, mut renderer) = engine(SAMPLE_RATE);
        handle.set_active_frequencies(vec![440.0]);
        render_n(&mut renderer, 3, BLOCK_SIZE);
        handle.set_active_frequencies(vec![]);
        render_n(&mut renderer, 1, BLOCK_SIZE);

        // Re-activated: waveform must match a fresh engine's first block
        handle.set_active_frequencies(vec![440.0]);
        let reborn = render_n(&mut renderer, 1, BLOCK_SIZE);

        let (handle, mut fresh) = engine(SAMPLE_RATE);
        handle.set_active_frequencies(vec![440.0]);
        let expected = render_n(&mut fresh, 1, BLOCK_SIZE);
        for (x, y) in reborn.iter().zip(&expected) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_mix_normalization_and_headroom() {
        let (handle, mut renderer) = engine(SAMPLE_RATE);
        handle.set_active_frequencies(vec![440.0]);
        let out = render_n(&mut renderer, 1, BLOCK_SIZE);
        // Single sine voice: peak ≈ HEADROOM
        let peak = out.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak <= HEADROOM + 1e-6);
        assert!(peak > HEADROOM * 0.9);
    }

    #[test]
    fn test_output_is_hard_clipped() {
        let (handle, mut renderer) = engine(SAMPLE_RATE);
        // Stack several one-shots so their sum exceeds 1.0 somewhere
        for _ in 0..8 {
            handle.trigger(DrumKind::Kick);
        }
        let out = render_n(&mut renderer, 4, BLOCK_SIZE);
        assert!(out.iter().all(|&s| (-1.0..=1.0).contains(&s)));
    }

    #[test]
    fn test_one_shot_emits_exactly_sample_length() {
        let (handle, mut renderer) = engine(SAMPLE_RATE);
        handle.trigger(DrumKind::Tom);

        let sample_len = (SAMPLE_RATE as f32 * DRUM_SECONDS) as usize;
        let blocks = sample_len.div_ceil(BLOCK_SIZE);
        let out = render_n(&mut renderer, blocks, BLOCK_SIZE);
        assert!(out[..sample_len].iter().any(|&s| s != 0.0));
        // Tail past the sample end is silent
        assert!(out[sample_len..].iter().all(|&s| s == 0.0));
        assert_eq!(renderer.pending_one_shots(), 0);

        // And it contributes nothing afterward
        let after = render_n(&mut renderer, 1, BLOCK_SIZE);
        assert!(after.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_double_trigger_sums_linearly() {
        let (handle, mut renderer) = engine(SAMPLE_RATE);
        handle.trigger(DrumKind::Snare);
        handle.trigger(DrumKind::Snare);
        let doubled = render_n(&mut renderer, 2, BLOCK_SIZE);

        let (handle, mut single) = engine(SAMPLE_RATE);
        handle.trigger(DrumKind::Snare);
        let once = render_n(&mut single, 2, BLOCK_SIZE);

        for (d, s) in doubled.iter().zip(&once) {
            let expected = (2.0 * s).clamp(-1.0, 1.0);
            assert!((d - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_trigger_starts_on_next_block() {
        let (handle, mut renderer) = engine(SAMPLE_RATE);
        let mut buf = vec![0.0f32; BLOCK_SIZE];
        renderer.render(&mut buf);
        handle.trigger(DrumKind::Hihat);
        // Queued after a block: must be admitted at the start of the next one
        renderer.render(&mut buf);
        assert!(buf.iter().any(|&s| s != 0.0));
        assert_eq!(renderer.pending_one_shots(), 1);
    }

    #[test]
    fn test_drums_instrument_forces_empty_sustain() {
        let (handle, mut renderer) = engine(SAMPLE_RATE);
        handle.set_active_frequencies(vec![262.0, 330.0]);
        let mut buf = vec![0.0f32; BLOCK_SIZE];
        renderer.render(&mut buf);
        assert_eq!(renderer.active_voices(), 2);

        handle.set_instrument(Instrument::Drums);
        handle.set_active_frequencies(vec![262.0]);
        renderer.render(&mut buf);
        assert_eq!(renderer.active_voices(), 0);
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_instrument_waveform_shapes() {
        // First samples of each instrument at phase 0 follow the table
        let step = TAU * 440.0 / SAMPLE_RATE as f32;
        for i in 0..32 {
            let a = step * i as f32;
            assert!((sample_voice(Instrument::Sine, 0.0, step, i) - a.sin()).abs() < 1e-6);
            assert!(
                (sample_voice(Instrument::Soft, 0.0, step, i)
                    - (0.6 * a.sin() + 0.3 * (2.0 * a).sin()))
                .abs()
                    < 1e-6
            );
            assert!(
                (sample_voice(Instrument::Bell, 0.0, step, i)
                    - (a.sin() + 0.5 * (2.0 * a).sin()))
                .abs()
                    < 1e-6
            );
        }
    }
}
