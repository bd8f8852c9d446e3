use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

// ─── Fingers ────────────────────────────────────────────────────────────────

/// One flex sensor per finger. The set is fixed by the glove hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Finger {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Finger {
    pub const ALL: [Finger; 5] = [
        Finger::Thumb,
        Finger::Index,
        Finger::Middle,
        Finger::Ring,
        Finger::Pinky,
    ];

    /// Index of this finger's field inside a decoded sensor frame.
    /// Channels 0, 2, and 7–9 are reserved by the firmware.
    pub fn channel(self) -> usize {
        match self {
            Finger::Thumb => 1,
            Finger::Index => 3,
            Finger::Middle => 4,
            Finger::Ring => 5,
            Finger::Pinky => 6,
        }
    }

    /// Hardware-specific normalization range: the raw-value swing between
    /// rest and a full bend. Measured per finger on the flex sensors.
    pub fn range(self) -> f64 {
        match self {
            Finger::Thumb => 139_000.0,
            Finger::Index => 184_000.0,
            Finger::Middle => 139_000.0,
            Finger::Ring => 140_000.0,
            Finger::Pinky => 168_000.0,
        }
    }

    /// Position in `Finger::ALL`, used for flat per-finger arrays.
    pub fn slot(self) -> usize {
        match self {
            Finger::Thumb => 0,
            Finger::Index => 1,
            Finger::Middle => 2,
            Finger::Ring => 3,
            Finger::Pinky => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Finger::Thumb => "thumb",
            Finger::Index => "index",
            Finger::Middle => "middle",
            Finger::Ring => "ring",
            Finger::Pinky => "pinky",
        }
    }
}

impl fmt::Display for Finger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of fingers packed into a bitmask. Iteration order is thumb→pinky.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FingerSet(u8);

impl FingerSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Self(0b1_1111)
    }

    pub fn insert(&mut self, f: Finger) {
        self.0 |= 1 << f.slot();
    }

    pub fn remove(&mut self, f: Finger) {
        self.0 &= !(1 << f.slot());
    }

    pub fn contains(self, f: Finger) -> bool {
        self.0 & (1 << f.slot()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = Finger> {
        Finger::ALL.into_iter().filter(move |f| self.contains(*f))
    }

    pub fn to_vec(self) -> Vec<Finger> {
        self.iter().collect()
    }
}

impl FromIterator<Finger> for FingerSet {
    fn from_iter<I: IntoIterator<Item = Finger>>(iter: I) -> Self {
        let mut set = FingerSet::empty();
        for f in iter {
            set.insert(f);
        }
        set
    }
}

// ─── Sensor data ────────────────────────────────────────────────────────────

/// One decoded record from the glove: ten raw u32 channels, of which only
/// the five finger channels are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorFrame {
    pub fields: [u32; 10],
}

impl SensorFrame {
    pub fn value(&self, f: Finger) -> u32 {
        self.fields[f.channel()]
    }
}

// ─── Modes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Play,
    Tutorial,
    Record,
    Playback,
}

// ─── Recordings ─────────────────────────────────────────────────────────────

/// Sound metadata captured for one newly pressed finger at record time.
/// The token is stored verbatim so stored recordings replay under the
/// parsing rules in force when they were made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSound {
    pub finger: Finger,
    pub sound: String,
    pub kind: crate::sounds::SoundKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Seconds since recording start.
    pub time: f64,
    /// Fingers newly pressed on this tick.
    pub fingers: Vec<Finger>,
    pub sounds: Vec<EventSound>,
    /// Patch active when the event was captured.
    pub preset: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub events: Vec<RecordedEvent>,
    /// Total elapsed seconds at stop time.
    pub duration: f64,
    /// Patch active when recording stopped.
    pub preset: String,
}

// ─── Commands (UI → engine) ─────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Connect,
    Disconnect,
    Calibrate,
    SetPreset {
        preset: String,
    },
    SetMapping {
        finger: Finger,
        #[serde(alias = "chord")]
        sound: String,
        #[serde(default, alias = "sound_type")]
        kind: Option<crate::sounds::SoundKind>,
    },
    SetCustomInstrument {
        instrument: String,
    },
    SetThreshold {
        value: f32,
    },
    SetMode {
        mode: Mode,
    },
    StartTutorial {
        tutorial: String,
    },
    ResetTutorial,
    StartRecording,
    StopRecording,
    Playback {
        recording: Recording,
    },
    StopPlayback,
    TestSound {
        finger: Finger,
    },
}

// ─── Notifications (engine → UI) ────────────────────────────────────────────

/// Discrete fire-and-forget events for the UI channel. Delivery order
/// matches emission order; no acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Fingers {
        active: Vec<Finger>,
    },
    TutorialStarted {
        tutorial: String,
        name: String,
        sequence: Vec<Finger>,
        total: usize,
        next_finger: Finger,
    },
    TutorialProgress {
        step: usize,
        next_finger: Finger,
        total: usize,
    },
    TutorialComplete {
        tutorial: String,
    },
    TutorialReset {
        next_finger: Finger,
        total: usize,
    },
    RecordingStarted,
    RecordingStopped {
        recording: Recording,
    },
    PlaybackStarted,
    PlaybackStopped,
    Calibrated {
        baselines: BTreeMap<String, f64>,
    },
    Status {
        connected: bool,
        calibrated: bool,
    },
    PresetChanged {
        preset: String,
    },
    MappingUpdated {
        finger: Finger,
        sound: String,
    },
    InstrumentChanged {
        instrument: String,
    },
    ThresholdChanged,
    ModeChanged {
        mode: Mode,
    },
    Error {
        message: String,
    },
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock for the session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finger_set_insert_remove() {
        let mut set = FingerSet::empty();
        assert!(set.is_empty());
        set.insert(Finger::Thumb);
        set.insert(Finger::Pinky);
        assert_eq!(set.len(), 2);
        assert!(set.contains(Finger::Thumb));
        assert!(!set.contains(Finger::Middle));
        set.remove(Finger::Thumb);
        assert_eq!(set.to_vec(), vec![Finger::Pinky]);
    }

    #[test]
    fn test_finger_set_iteration_order() {
        let set: FingerSet = [Finger::Pinky, Finger::Thumb, Finger::Middle]
            .into_iter()
            .collect();
        assert_eq!(
            set.to_vec(),
            vec![Finger::Thumb, Finger::Middle, Finger::Pinky]
        );
    }

    #[test]
    fn test_finger_serde_names() {
        let json = serde_json::to_string(&Finger::Thumb).unwrap();
        assert_eq!(json, "\"thumb\"");
        let f: Finger = serde_json::from_str("\"pinky\"").unwrap();
        assert_eq!(f, Finger::Pinky);
    }

    #[test]
    fn test_command_tag_parsing() {
        let cmd: Command =
            serde_json::from_str(r#"{"type":"set_threshold","value":0.2}"#).unwrap();
        match cmd {
            Command::SetThreshold { value } => assert!((value - 0.2).abs() < 1e-6),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_set_mapping_accepts_legacy_chord_key() {
        let cmd: Command = serde_json::from_str(
            r#"{"type":"set_mapping","finger":"ring","chord":"C_maj"}"#,
        )
        .unwrap();
        match cmd {
            Command::SetMapping {
                finger,
                sound,
                kind,
            } => {
                assert_eq!(finger, Finger::Ring);
                assert_eq!(sound, "C_maj");
                assert!(kind.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_set_mapping_accepts_sound_type_key() {
        let cmd: Command = serde_json::from_str(
            r#"{"type":"set_mapping","finger":"index","sound":"kick","sound_type":"drum"}"#,
        )
        .unwrap();
        match cmd {
            Command::SetMapping { sound, kind, .. } => {
                assert_eq!(sound, "kick");
                assert_eq!(kind, Some(crate::sounds::SoundKind::Drum));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command_is_a_parse_error() {
        let res = serde_json::from_str::<Command>(r#"{"type":"self_destruct"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_notification_tag_serialization() {
        let n = Notification::Fingers {
            active: vec![Finger::Index],
        };
        let json = serde_json::to_string(&n).unwrap();
        assert_eq!(json, r#"{"type":"fingers","active":["index"]}"#);
    }
}
