use crate::detector::{ActivationDetector, RELEASE_FACTOR};
use crate::frame::{self, FRAME_BYTES};
use crate::link::SensorLink;
use crate::session::Session;
use crate::sounds::SoundSpec;
use crate::synth::SynthHandle;
use crate::tutorial::TutorialEvent;
use crate::types::{Mode, Notification};
use crossbeam_channel::Sender;
use log::{debug, error, info};
use std::sync::Arc;

/// Bytes pulled per poll. Holds one frame plus slack for resync junk.
const READ_CHUNK: usize = 64;

/// Pulls bytes off the glove link, decodes frames, and turns activation
/// transitions into audio and notifications. One instance per connection;
/// runs on its own thread until the session is marked disconnected.
pub struct SensorReaderLoop {
    link: Box<dyn SensorLink>,
    session: Arc<Session>,
    synth: SynthHandle,
    notif_tx: Sender<Notification>,
    detector: ActivationDetector,
    frame_count: u64,
}

impl SensorReaderLoop {
    pub fn new(
        link: Box<dyn SensorLink>,
        session: Arc<Session>,
        synth: SynthHandle,
        notif_tx: Sender<Notification>,
    ) -> Self {
        Self {
            link,
            session,
            synth,
            notif_tx,
            detector: ActivationDetector::new(),
            frame_count: 0,
        }
    }

    /// Blocks the calling thread until disconnect or a fatal link error.
    pub fn run(&mut self) {
        info!("Sensor loop started on {}", self.link.describe());
        let mut buf = [0u8; READ_CHUNK];

        while self.session.is_connected() {
            match self.link.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    let chunk = buf[..n].to_vec();
                    self.handle_chunk(&chunk);
                }
                Err(e) => {
                    error!("Link error, disconnecting: {}", e);
                    self.session.set_connected(false);
                    self.session.state.lock().unwrap().reset_on_disconnect();
                    let _ = self.notif_tx.send(Notification::Error { message: e });
                    let _ = self.notif_tx.send(Notification::Status {
                        connected: false,
                        calibrated: false,
                    });
                }
            }
        }

        self.synth.silence();
        let _ = self.notif_tx.send(Notification::Fingers { active: Vec::new() });
        info!("Sensor loop stopped after {} frames", self.frame_count);
    }

    /// Decode every complete frame in one read's worth of bytes. A frame
    /// split across reads is dropped; the stream resyncs on the next marker.
    pub fn handle_chunk(&mut self, bytes: &[u8]) {
        let mut window = bytes;
        while let Some(pos) = frame::find_sync(window) {
            if window.len() < pos + FRAME_BYTES {
                break;
            }
            if pos > 0 {
                debug!("Skipping {} bytes to sync", pos);
            }
            if let Some(frame) = frame::decode(&window[pos..pos + FRAME_BYTES]) {
                self.tick(frame);
            }
            window = &window[pos + FRAME_BYTES..];
        }
    }

    /// Process one decoded frame end to end.
    pub fn tick(&mut self, frame: crate::types::SensorFrame) {
        self.frame_count += 1;
        *self.session.latest_frame.lock().unwrap() = Some(frame);

        // While calibrating, frames only feed the latest-frame slot
        if self.session.is_calibrating() {
            return;
        }

        let mut state = self.session.state.lock().unwrap();
        if !state.is_calibrated() {
            return;
        }
        if state.mode == Mode::Playback {
            // Live input is muted while a recording replays
            return;
        }

        let threshold = state.threshold;
        let tick = self.detector.evaluate(&frame, &state.baselines, threshold);

        if state.mode == Mode::Tutorial {
            if let Some(t) = state.tutorial.as_mut() {
                match t.tick(&tick.drops, threshold, threshold * RELEASE_FACTOR) {
                    Some(TutorialEvent::Progress { step, next, total }) => {
                        let _ = self.notif_tx.send(Notification::TutorialProgress {
                            step,
                            next_finger: next,
                            total,
                        });
                    }
                    Some(TutorialEvent::Complete) => {
                        info!("Tutorial '{}' complete", t.id);
                        let _ = self.notif_tx.send(Notification::TutorialComplete {
                            tutorial: t.id.clone(),
                        });
                    }
                    None => {}
                }
            }
        }

        let Some(delta) = tick.delta else {
            return;
        };
        let patch = state.patch().clone();

        if state.mode == Mode::Record {
            if let Some(rec) = state.recording.as_mut() {
                rec.capture(delta.pressed, &patch);
            }
        }
        drop(state);

        // Drums fire once per press; sustained tones follow the full
        // active set so chords build and release naturally
        for f in delta.pressed.iter() {
            if let SoundSpec::Drum(kind) = patch.sound(f).spec {
                self.synth.trigger(kind);
            }
        }
        let mut tones: Vec<f32> = tick
            .current
            .iter()
            .flat_map(|f| match &patch.sound(f).spec {
                SoundSpec::Tones(t) => t.clone(),
                _ => Vec::new(),
            })
            .collect();
        tones.sort_by(|a, b| a.partial_cmp(b).expect("finite frequencies"));
        tones.dedup();
        self.synth.set_active_frequencies(tones);
        self.session.bump_voice_gen();

        let _ = self.notif_tx.send(Notification::Fingers {
            active: tick.current.to_vec(),
        });
    }
}
