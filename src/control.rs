use crate::detector::{CalibrationAccumulator, CALIBRATION_INTERVAL_MS, CALIBRATION_SAMPLES};
use crate::link::SensorLink;
use crate::performance::{self, RecordingState};
use crate::session::Session;
use crate::sensor_loop::SensorReaderLoop;
use crate::sounds::{Instrument, SoundSpec};
use crate::synth::SynthHandle;
use crate::tutorial::{self, TutorialSession};
use crate::types::{Command, Finger, Mode, Notification};
use crossbeam_channel::{Receiver, Sender};
use log::{info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How long a test-sound preview rings before it is silenced.
const TEST_SOUND_MS: u64 = 300;

/// Builds a fresh link per connect attempt, so reconnecting after an
/// unplug re-opens the port instead of reusing a dead handle.
pub type LinkFactory = Box<dyn Fn() -> Result<Box<dyn SensorLink>, String> + Send>;

/// Owns the command side of the engine: every UI command funnels through
/// `handle`, one at a time, on the control thread. Long operations
/// (calibration) buffer commands that arrive meanwhile; playback runs on
/// its own thread so the control loop stays responsive.
pub struct ControlContext {
    session: Arc<Session>,
    synth: SynthHandle,
    notif_tx: Sender<Notification>,
    link_factory: LinkFactory,
    pending: VecDeque<Command>,
    sensor_thread: Option<thread::JoinHandle<()>>,
    playback_cancel: Option<Arc<AtomicBool>>,
}

impl ControlContext {
    pub fn new(
        session: Arc<Session>,
        synth: SynthHandle,
        notif_tx: Sender<Notification>,
        link_factory: LinkFactory,
    ) -> Self {
        Self {
            session,
            synth,
            notif_tx,
            link_factory,
            pending: VecDeque::new(),
            sensor_thread: None,
            playback_cancel: None,
        }
    }

    /// Blocks the calling thread, dispatching commands until the channel
    /// closes (all clients and the server gone).
    pub fn run(&mut self, command_rx: Receiver<Command>) {
        loop {
            let cmd = match self.pending.pop_front() {
                Some(c) => c,
                None => match command_rx.recv() {
                    Ok(c) => c,
                    Err(_) => break,
                },
            };
            self.handle(cmd, &command_rx);
        }
        info!("Control loop stopped");
    }

    pub fn handle(&mut self, cmd: Command, command_rx: &Receiver<Command>) {
        match cmd {
            Command::Connect => self.connect(),
            Command::Disconnect => self.disconnect(),
            Command::Calibrate => self.calibrate(command_rx),
            Command::SetPreset { preset } => self.set_preset(&preset),
            Command::SetMapping {
                finger,
                sound,
                kind,
            } => self.set_mapping(finger, &sound, kind),
            Command::SetCustomInstrument { instrument } => self.set_instrument(&instrument),
            Command::SetThreshold { value } => self.set_threshold(value),
            Command::SetMode { mode } => self.set_mode(mode),
            Command::StartTutorial { tutorial } => self.start_tutorial(&tutorial),
            Command::ResetTutorial => self.reset_tutorial(),
            Command::StartRecording => self.start_recording(),
            Command::StopRecording => self.stop_recording(),
            Command::Playback { recording } => self.start_playback(recording),
            Command::StopPlayback => self.stop_playback(),
            Command::TestSound { finger } => self.test_sound(finger),
        }
    }

    fn error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        let _ = self.notif_tx.send(Notification::Error { message });
    }

    fn send_status(&self) {
        let calibrated = self.session.state.lock().unwrap().is_calibrated();
        let _ = self.notif_tx.send(Notification::Status {
            connected: self.session.is_connected(),
            calibrated,
        });
    }

    // ─── Connection ─────────────────────────────────────────────────────────

    fn connect(&mut self) {
        if self.session.is_connected() {
            self.send_status();
            return;
        }
        let link = match (self.link_factory)() {
            Ok(link) => link,
            Err(e) => {
                self.error(e);
                return;
            }
        };
        self.session.set_connected(true);

        let mut looper = SensorReaderLoop::new(
            link,
            self.session.clone(),
            self.synth.clone(),
            self.notif_tx.clone(),
        );
        self.sensor_thread = Some(
            thread::Builder::new()
                .name("sensor-loop".into())
                .spawn(move || looper.run())
                .expect("spawn sensor loop"),
        );
        self.send_status();
    }

    fn disconnect(&mut self) {
        self.cancel_playback();
        self.session.set_connected(false);
        if let Some(handle) = self.sensor_thread.take() {
            let _ = handle.join();
        }
        self.session.state.lock().unwrap().reset_on_disconnect();
        *self.session.latest_frame.lock().unwrap() = None;
        self.synth.silence();
        self.send_status();
    }

    // ─── Calibration ────────────────────────────────────────────────────────

    /// Sample the resting hand for ~600 ms and set per-finger baselines to
    /// the mean. Commands arriving meanwhile are buffered and handled
    /// afterwards, except Disconnect, which aborts the calibration.
    fn calibrate(&mut self, command_rx: &Receiver<Command>) {
        if !self.session.is_connected() {
            self.error("calibrate: not connected");
            return;
        }
        info!(
            "Calibrating: {} samples at {} ms",
            CALIBRATION_SAMPLES, CALIBRATION_INTERVAL_MS
        );
        self.session.set_calibrating(true);
        let mut acc = CalibrationAccumulator::default();
        let mut aborted = false;

        for _ in 0..CALIBRATION_SAMPLES {
            thread::sleep(Duration::from_millis(CALIBRATION_INTERVAL_MS));

            while let Ok(cmd) = command_rx.try_recv() {
                if matches!(cmd, Command::Disconnect) {
                    aborted = true;
                }
                self.pending.push_back(cmd);
            }
            if aborted || !self.session.is_connected() {
                aborted = true;
                break;
            }
            if let Some(frame) = *self.session.latest_frame.lock().unwrap() {
                acc.add(&frame);
            }
        }
        self.session.set_calibrating(false);

        if aborted {
            self.error("calibration aborted");
            return;
        }
        let baselines = acc.finish();
        if !baselines.is_calibrated() {
            self.error("calibration saw no frames; is the glove streaming?");
            return;
        }
        let map = baselines.to_map();
        info!("Calibrated: {:?}", map);
        self.session.state.lock().unwrap().baselines = baselines;
        let _ = self
            .notif_tx
            .send(Notification::Calibrated { baselines: map });
        self.send_status();
    }

    // ─── Sound configuration ────────────────────────────────────────────────

    fn set_preset(&mut self, preset: &str) {
        let mut state = self.session.state.lock().unwrap();
        let Some(patch) = state.patches.iter().find(|p| p.name == preset) else {
            drop(state);
            self.error(format!("unknown preset: {}", preset));
            return;
        };
        let instrument = patch.instrument;
        state.current_preset = preset.to_string();
        drop(state);

        self.synth.set_instrument(instrument);
        self.synth.silence();
        let _ = self.notif_tx.send(Notification::PresetChanged {
            preset: preset.to_string(),
        });
    }

    fn set_mapping(&mut self, finger: Finger, sound: &str, kind: Option<crate::sounds::SoundKind>) {
        {
            let mut state = self.session.state.lock().unwrap();
            let name = state.current_preset.clone();
            let Some(patch) = state.patch_mut(&name) else {
                return;
            };
            patch.set_sound(finger, sound, kind);
        }
        let _ = self.notif_tx.send(Notification::MappingUpdated {
            finger,
            sound: sound.to_string(),
        });
    }

    fn set_instrument(&mut self, name: &str) {
        let Some(instrument) = Instrument::from_name(name) else {
            self.error(format!("unknown instrument: {}", name));
            return;
        };
        {
            let mut state = self.session.state.lock().unwrap();
            let preset = state.current_preset.clone();
            if let Some(patch) = state.patch_mut(&preset) {
                patch.instrument = instrument;
            }
        }
        self.synth.set_instrument(instrument);
        let _ = self.notif_tx.send(Notification::InstrumentChanged {
            instrument: name.to_string(),
        });
    }

    fn set_threshold(&mut self, value: f32) {
        if !value.is_finite() || !(0.0..1.0).contains(&value) || value == 0.0 {
            self.error(format!("threshold out of range: {}", value));
            return;
        }
        self.session.state.lock().unwrap().threshold = value;
        info!("Threshold set to {:.3}", value);
        let _ = self.notif_tx.send(Notification::ThresholdChanged);
    }

    // ─── Modes ──────────────────────────────────────────────────────────────

    fn set_mode(&mut self, mode: Mode) {
        if mode != Mode::Playback {
            self.cancel_playback();
        }
        self.session.state.lock().unwrap().set_mode(mode);
        self.synth.silence();
        let _ = self.notif_tx.send(Notification::ModeChanged { mode });
    }

    fn start_tutorial(&mut self, id: &str) {
        let Some(def) = tutorial::find(id) else {
            self.error(format!("unknown tutorial: {}", id));
            return;
        };
        let session = TutorialSession::new(def);
        let next = session.expected().expect("tutorials are non-empty");
        // Tutorials prompt single notes, so they always run on the piano
        // patch regardless of what was selected before
        let instrument = {
            let mut state = self.session.state.lock().unwrap();
            state.mode = Mode::Tutorial;
            state.tutorial = Some(session);
            state.current_preset = "piano".to_string();
            state.patch().instrument
        };
        self.synth.set_instrument(instrument);
        self.synth.silence();
        let _ = self.notif_tx.send(Notification::PresetChanged {
            preset: "piano".to_string(),
        });
        let _ = self.notif_tx.send(Notification::TutorialStarted {
            tutorial: def.id.to_string(),
            name: def.name.to_string(),
            sequence: def.sequence.to_vec(),
            total: def.sequence.len(),
            next_finger: next,
        });
        let _ = self
            .notif_tx
            .send(Notification::ModeChanged { mode: Mode::Tutorial });
    }

    fn reset_tutorial(&mut self) {
        let mut state = self.session.state.lock().unwrap();
        let Some(t) = state.tutorial.as_mut() else {
            drop(state);
            self.error("reset_tutorial: no tutorial running");
            return;
        };
        t.reset();
        let next = t.expected().expect("tutorials are non-empty");
        let total = t.total();
        drop(state);
        let _ = self.notif_tx.send(Notification::TutorialReset {
            next_finger: next,
            total,
        });
    }

    // ─── Recording and playback ─────────────────────────────────────────────

    fn start_recording(&mut self) {
        {
            let mut state = self.session.state.lock().unwrap();
            state.mode = Mode::Record;
            state.recording = Some(RecordingState::start());
        }
        let _ = self.notif_tx.send(Notification::RecordingStarted);
        let _ = self
            .notif_tx
            .send(Notification::ModeChanged { mode: Mode::Record });
    }

    fn stop_recording(&mut self) {
        let (recording, preset) = {
            let mut state = self.session.state.lock().unwrap();
            let rec = state.recording.take();
            state.mode = Mode::Play;
            (rec, state.current_preset.clone())
        };
        let Some(rec) = recording else {
            self.error("stop_recording: nothing is recording");
            return;
        };
        let recording = rec.finish(&preset);
        info!(
            "Recording stopped: {} events, {:.1}s",
            recording.events.len(),
            recording.duration
        );
        let _ = self
            .notif_tx
            .send(Notification::RecordingStopped { recording });
        let _ = self
            .notif_tx
            .send(Notification::ModeChanged { mode: Mode::Play });
    }

    fn start_playback(&mut self, recording: crate::types::Recording) {
        self.cancel_playback();
        // Timbre follows the patch the recording was made under, not
        // whatever is live (a drums patch would mute a piano recording)
        let recorded_instrument = {
            let mut state = self.session.state.lock().unwrap();
            state.set_mode(Mode::Playback);
            state
                .patches
                .iter()
                .find(|p| p.name == recording.preset)
                .map(|p| p.instrument)
        };

        // Playback takes over the voice set; a pending preview clear
        // must not fire into it
        self.session.bump_voice_gen();

        let cancel = Arc::new(AtomicBool::new(false));
        self.playback_cancel = Some(cancel.clone());

        let session = self.session.clone();
        let synth = self.synth.clone();
        let notif_tx = self.notif_tx.clone();
        let _ = thread::Builder::new()
            .name("playback".into())
            .spawn(move || {
                if let Some(instrument) = recorded_instrument {
                    synth.set_instrument(instrument);
                }
                performance::run_playback(&recording, &synth, &notif_tx, &cancel);
                let mut state = session.state.lock().unwrap();
                let live_instrument = state.patch().instrument;
                if state.mode == Mode::Playback {
                    state.set_mode(Mode::Play);
                }
                drop(state);
                synth.set_instrument(live_instrument);
                let _ = notif_tx.send(Notification::ModeChanged { mode: Mode::Play });
            })
            .expect("spawn playback");
    }

    fn stop_playback(&mut self) {
        self.cancel_playback();
    }

    fn cancel_playback(&mut self) {
        if let Some(cancel) = self.playback_cancel.take() {
            cancel.store(true, Ordering::Relaxed);
        }
    }

    // ─── Previews ───────────────────────────────────────────────────────────

    /// Audition the current mapping for one finger without pressing it.
    /// Sustained tones auto-silence after a short ring.
    fn test_sound(&mut self, finger: Finger) {
        let sound = {
            let state = self.session.state.lock().unwrap();
            state.patch().sound(finger).clone()
        };
        match sound.spec {
            SoundSpec::Drum(kind) => self.synth.trigger(kind),
            SoundSpec::Tones(tones) => {
                let gen = self.session.bump_voice_gen();
                self.synth.set_active_frequencies(tones);
                let synth = self.synth.clone();
                let session = self.session.clone();
                let _ = thread::Builder::new()
                    .name("test-sound".into())
                    .spawn(move || {
                        thread::sleep(Duration::from_millis(TEST_SOUND_MS));
                        // A live press or newer preview has taken over the
                        // voice set; leave it alone
                        if session.voice_gen() == gen {
                            synth.silence();
                        }
                    });
            }
            SoundSpec::Silent => {}
        }
    }
}
