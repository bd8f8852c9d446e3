use crate::sounds::{Patch, SoundKind, SoundSpec};
use crate::synth::SynthHandle;
use crate::types::{
    EventSound, FingerSet, Notification, Recording, RecordedEvent, SessionClock,
};
use crossbeam_channel::Sender;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often a sleeping playback thread re-checks its cancel flag. Matches
/// the sensor polling interval so a stop command takes effect within one
/// poll tick.
const CANCEL_POLL: Duration = Duration::from_millis(5);

// ─── Recording ──────────────────────────────────────────────────────────────

/// An in-progress recording: append-only timed events against a fresh clock.
pub struct RecordingState {
    clock: SessionClock,
    events: Vec<RecordedEvent>,
}

impl RecordingState {
    pub fn start() -> Self {
        Self {
            clock: SessionClock::new(),
            events: Vec::new(),
        }
    }

    /// Capture one activation delta: the newly pressed fingers and their
    /// resolved sounds under the patch active at this instant. A release
    /// with nothing newly pressed appends an empty event, so playback can
    /// reproduce the release at its recorded time.
    pub fn capture(&mut self, pressed: FingerSet, patch: &Patch) {
        let sounds = pressed
            .iter()
            .map(|f| {
                let sound = patch.sound(f);
                EventSound {
                    finger: f,
                    sound: sound.token.clone(),
                    kind: sound.kind,
                }
            })
            .collect();
        self.events.push(RecordedEvent {
            time: self.clock.elapsed_secs(),
            fingers: pressed.to_vec(),
            sounds,
            preset: patch.name.clone(),
        });
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Freeze the event list and report total elapsed duration.
    pub fn finish(self, preset: &str) -> Recording {
        Recording {
            duration: self.clock.elapsed_secs(),
            events: self.events,
            preset: preset.to_string(),
        }
    }
}

// ─── Playback ───────────────────────────────────────────────────────────────

/// Replay a recording against a fresh clock. Blocks the calling thread
/// until the last event has fired or `cancel` is raised; either way it ends
/// by broadcasting an empty active set and `playback_stopped`.
///
/// Drum-kind sounds are re-triggered as one-shots; the event's finger set
/// is broadcast and its sustained tones become the new active frequency
/// set, exactly as in live play. Tokens are re-resolved here so stored
/// recordings survive patch edits.
pub fn run_playback(
    recording: &Recording,
    synth: &SynthHandle,
    notif_tx: &Sender<Notification>,
    cancel: &Arc<AtomicBool>,
) {
    info!(
        "playback: {} events over {:.1}s (preset {})",
        recording.events.len(),
        recording.duration,
        recording.preset
    );
    let _ = notif_tx.send(Notification::PlaybackStarted);
    let clock = SessionClock::new();

    for event in &recording.events {
        if !wait_until(&clock, event.time, cancel) {
            debug!("playback cancelled at t={:.2}s", clock.elapsed_secs());
            break;
        }

        let mut tones = Vec::new();
        for sound in &event.sounds {
            match crate::sounds::FingerSound::parse(&sound.sound).spec {
                SoundSpec::Drum(kind) => synth.trigger(kind),
                SoundSpec::Tones(mut t) if sound.kind != SoundKind::None => {
                    tones.append(&mut t)
                }
                _ => {}
            }
        }
        tones.sort_by(|a, b| a.partial_cmp(b).expect("finite frequencies"));
        tones.dedup();
        synth.set_active_frequencies(tones);
        let _ = notif_tx.send(Notification::Fingers {
            active: event.fingers.clone(),
        });
    }

    synth.silence();
    let _ = notif_tx.send(Notification::Fingers { active: Vec::new() });
    let _ = notif_tx.send(Notification::PlaybackStopped);
}

/// Sleep until `clock` reaches `target` seconds, re-checking the cancel
/// flag every poll tick. Returns false if cancelled.
fn wait_until(clock: &SessionClock, target: f64, cancel: &Arc<AtomicBool>) -> bool {
    loop {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        let remaining = target - clock.elapsed_secs();
        if remaining <= 0.0 {
            return true;
        }
        std::thread::sleep(CANCEL_POLL.min(Duration::from_secs_f64(remaining)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sounds::builtin_patches;
    use crate::synth::{engine, SAMPLE_RATE};
    use crate::types::Finger;
    use crossbeam_channel::unbounded;
    use std::time::Instant;

    fn piano() -> Patch {
        builtin_patches()
            .into_iter()
            .find(|p| p.name == "piano")
            .unwrap()
    }

    fn set(fingers: &[Finger]) -> FingerSet {
        fingers.iter().copied().collect()
    }

    #[test]
    fn test_capture_stores_resolved_metadata() {
        let mut rec = RecordingState::start();
        rec.capture(set(&[Finger::Thumb, Finger::Index]), &piano());
        let recording = rec.finish("piano");
        assert_eq!(recording.events.len(), 1);
        let event = &recording.events[0];
        assert_eq!(event.fingers, vec![Finger::Thumb, Finger::Index]);
        assert_eq!(event.sounds[0].sound, "C");
        assert_eq!(event.sounds[0].kind, SoundKind::Note);
        assert_eq!(event.preset, "piano");
    }

    #[test]
    fn test_release_delta_appends_empty_event() {
        let mut rec = RecordingState::start();
        rec.capture(set(&[Finger::Thumb]), &piano());
        rec.capture(FingerSet::empty(), &piano());
        let recording = rec.finish("piano");
        assert_eq!(recording.events.len(), 2);
        assert!(recording.events[1].fingers.is_empty());
        assert!(recording.events[1].sounds.is_empty());
    }

    #[test]
    fn test_capture_times_are_monotonic() {
        let mut rec = RecordingState::start();
        rec.capture(set(&[Finger::Thumb]), &piano());
        std::thread::sleep(Duration::from_millis(20));
        rec.capture(set(&[Finger::Ring]), &piano());
        let recording = rec.finish("piano");
        assert!(recording.events[0].time <= recording.events[1].time);
        assert!(recording.duration >= recording.events[1].time);
    }

    #[test]
    fn test_playback_fires_events_in_order_and_on_time() {
        let (synth, _renderer) = engine(SAMPLE_RATE);
        let (tx, rx) = unbounded();
        let cancel = Arc::new(AtomicBool::new(false));

        let recording = Recording {
            events: vec![RecordedEvent {
                time: 0.15,
                fingers: vec![Finger::Thumb],
                sounds: vec![EventSound {
                    finger: Finger::Thumb,
                    sound: "C".to_string(),
                    kind: SoundKind::Note,
                }],
                preset: "piano".to_string(),
            }],
            duration: 0.2,
            preset: "piano".to_string(),
        };

        let started = Instant::now();
        run_playback(&recording, &synth, &tx, &cancel);

        let notifs: Vec<Notification> = rx.try_iter().collect();
        assert_eq!(notifs[0], Notification::PlaybackStarted);
        assert_eq!(
            notifs[1],
            Notification::Fingers {
                active: vec![Finger::Thumb]
            }
        );
        assert_eq!(notifs[2], Notification::Fingers { active: Vec::new() });
        assert_eq!(notifs[3], Notification::PlaybackStopped);
        // The event must not fire early
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_playback_cancel_skips_remaining_events() {
        let (synth, _renderer) = engine(SAMPLE_RATE);
        let (tx, rx) = unbounded();
        let cancel = Arc::new(AtomicBool::new(true)); // cancelled up front

        let recording = Recording {
            events: vec![RecordedEvent {
                time: 5.0,
                fingers: vec![Finger::Pinky],
                sounds: Vec::new(),
                preset: "piano".to_string(),
            }],
            duration: 5.0,
            preset: "piano".to_string(),
        };

        let started = Instant::now();
        run_playback(&recording, &synth, &tx, &cancel);
        assert!(started.elapsed() < Duration::from_secs(1));

        let notifs: Vec<Notification> = rx.try_iter().collect();
        // No event fired, but the shutdown broadcast still happens
        assert_eq!(notifs[0], Notification::PlaybackStarted);
        assert_eq!(notifs[1], Notification::Fingers { active: Vec::new() });
        assert_eq!(notifs[2], Notification::PlaybackStopped);
    }

    #[test]
    fn test_playback_triggers_drums_as_one_shots() {
        let (synth, mut renderer) = engine(SAMPLE_RATE);
        let (tx, _rx) = unbounded();
        let cancel = Arc::new(AtomicBool::new(false));

        let recording = Recording {
            events: vec![RecordedEvent {
                time: 0.0,
                fingers: vec![Finger::Thumb],
                sounds: vec![EventSound {
                    finger: Finger::Thumb,
                    sound: "kick".to_string(),
                    kind: SoundKind::Drum,
                }],
                preset: "drums".to_string(),
            }],
            duration: 0.1,
            preset: "drums".to_string(),
        };
        run_playback(&recording, &synth, &tx, &cancel);

        let mut buf = vec![0.0f32; 256];
        renderer.render(&mut buf);
        assert_eq!(renderer.pending_one_shots(), 1);
        assert!(buf.iter().any(|&s| s != 0.0));
    }
}
