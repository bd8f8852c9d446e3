use crate::detector::{Baselines, DEFAULT_THRESHOLD};
use crate::performance::RecordingState;
use crate::sounds::{builtin_patches, Patch};
use crate::tutorial::TutorialSession;
use crate::types::{Mode, SensorFrame};
use log::debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// The one session aggregate shared between the control context and the
/// sensor loop. Replaces free-standing globals: constructed at startup,
/// reset on disconnect, dropped on shutdown.
///
/// Writer roles: baselines — calibration; active set — sensor loop;
/// patches/threshold/mode — control context. Readers take the mutex
/// briefly and copy out what they need; nothing holds it across I/O.
pub struct Session {
    pub state: Mutex<SessionState>,
    /// Most recent decoded frame, refreshed by the sensor loop every tick.
    /// Calibration samples from here without touching the link.
    pub latest_frame: Mutex<Option<SensorFrame>>,
    connected: AtomicBool,
    calibrating: AtomicBool,
    /// Bumped on every sustained-voice update. A deferred auto-clear (the
    /// test-sound preview) only fires if its generation is still current.
    voice_gen: AtomicU64,
}

pub struct SessionState {
    pub baselines: Baselines,
    pub threshold: f32,
    pub patches: Vec<Patch>,
    pub current_preset: String,
    pub mode: Mode,
    pub tutorial: Option<TutorialSession>,
    pub recording: Option<RecordingState>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState {
                baselines: Baselines::default(),
                threshold: DEFAULT_THRESHOLD,
                patches: builtin_patches(),
                current_preset: "piano".to_string(),
                mode: Mode::Play,
                tutorial: None,
                recording: None,
            }),
            latest_frame: Mutex::new(None),
            connected: AtomicBool::new(false),
            calibrating: AtomicBool::new(false),
            voice_gen: AtomicU64::new(0),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibrating.load(Ordering::Acquire)
    }

    pub fn set_calibrating(&self, calibrating: bool) {
        self.calibrating.store(calibrating, Ordering::Release);
    }

    pub fn bump_voice_gen(&self) -> u64 {
        self.voice_gen.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn voice_gen(&self) -> u64 {
        self.voice_gen.load(Ordering::Acquire)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn patch(&self) -> &Patch {
        self.patches
            .iter()
            .find(|p| p.name == self.current_preset)
            .unwrap_or(&self.patches[0])
    }

    pub fn patch_by_name(&self, name: &str) -> Option<&Patch> {
        self.patches.iter().find(|p| p.name == name)
    }

    pub fn patch_mut(&mut self, name: &str) -> Option<&mut Patch> {
        self.patches.iter_mut().find(|p| p.name == name)
    }

    pub fn is_calibrated(&self) -> bool {
        self.baselines.is_calibrated()
    }

    /// Switch mode. Entering `play` clears any tutorial session; entering
    /// `tutorial` resets the session and re-arms every finger.
    pub fn set_mode(&mut self, mode: Mode) {
        debug!("mode {:?} → {:?}", self.mode, mode);
        self.mode = mode;
        match mode {
            Mode::Play => self.tutorial = None,
            Mode::Tutorial => {
                if let Some(t) = self.tutorial.as_mut() {
                    t.reset();
                }
            }
            Mode::Record | Mode::Playback => {}
        }
    }

    /// Back to a blank slate after the glove goes away.
    pub fn reset_on_disconnect(&mut self) {
        self.baselines.clear();
        self.tutorial = None;
        self.recording = None;
        self.mode = Mode::Play;
    }
}
