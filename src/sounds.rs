use crate::drums::DrumKind;
use crate::types::Finger;
use serde::{Deserialize, Serialize};

/// 12-tone equal-tempered base frequencies at octave 4 (A4 = 440 Hz
/// convention, rounded to whole Hz as the glove firmware's chord tables did).
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];
pub const NOTE_FREQS: [f32; 12] = [
    262.0, 277.0, 294.0, 311.0, 330.0, 349.0, 370.0, 392.0, 415.0, 440.0, 466.0, 494.0,
];

/// Semitone intervals from the chord root.
const MAJOR: [u32; 3] = [0, 4, 7];
const MINOR: [u32; 3] = [0, 3, 7];
const SEVENTH: [u32; 4] = [0, 4, 7, 10];

pub fn note_freq(name: &str) -> Option<f32> {
    NOTE_NAMES
        .iter()
        .position(|&n| n == name)
        .map(|i| NOTE_FREQS[i])
}

// ─── Sound specifications ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundKind {
    Note,
    Chord,
    Drum,
    None,
}

/// What a finger press produces: sustained frequencies (ascending) or a
/// one-shot percussive sample. Unknown tokens resolve to `Silent` — a
/// malformed custom mapping must never break playback.
#[derive(Debug, Clone, PartialEq)]
pub enum SoundSpec {
    Tones(Vec<f32>),
    Drum(DrumKind),
    Silent,
}

/// A finger's sound, parsed once at patch-edit time. The original token is
/// kept verbatim for recordings and the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerSound {
    pub token: String,
    pub kind: SoundKind,
    pub spec: SoundSpec,
}

impl FingerSound {
    pub fn silent() -> Self {
        Self {
            token: "none".to_string(),
            kind: SoundKind::None,
            spec: SoundSpec::Silent,
        }
    }

    /// Parse a sound token: `<base>[_inv<digit>][_oct<digit>]`.
    ///
    /// Base classification: a drum name, a bare note name, `<root>_maj`,
    /// a root ending in `m` (minor), or a root ending in `7` (dominant
    /// seventh). Anything unmatched is silent.
    pub fn parse(token: &str) -> Self {
        let (rest, octave) = strip_digit_suffix(token, "_oct");
        let (base, inversion) = strip_digit_suffix(&rest, "_inv");
        let octave = octave.unwrap_or(4);
        let inversion = inversion.unwrap_or(0);

        let (kind, spec) = classify(&base, octave, inversion);
        Self {
            token: token.to_string(),
            kind,
            spec,
        }
    }
}

/// Split a trailing `<tag><digit>` suffix off a token, if present.
fn strip_digit_suffix(token: &str, tag: &str) -> (String, Option<u32>) {
    if token.len() > tag.len() + 1 {
        let split = token.len() - tag.len() - 1;
        let (head, tail) = token.split_at(split);
        if tail.starts_with(tag) {
            if let Some(d) = tail[tag.len()..].chars().next().and_then(|c| c.to_digit(10)) {
                return (head.to_string(), Some(d));
            }
        }
    }
    (token.to_string(), None)
}

fn classify(base: &str, octave: u32, inversion: u32) -> (SoundKind, SoundSpec) {
    if let Some(drum) = DrumKind::from_name(base) {
        return (SoundKind::Drum, SoundSpec::Drum(drum));
    }
    if let Some(freq) = note_freq(base) {
        let tones = vec![freq * octave_factor(octave)];
        return (SoundKind::Note, SoundSpec::Tones(tones));
    }
    if let Some(root) = base.strip_suffix("_maj") {
        return chord(root, &MAJOR, octave, inversion);
    }
    if let Some(root) = base.strip_suffix('m') {
        if !root.ends_with('_') {
            return chord(root, &MINOR, octave, inversion);
        }
    }
    if let Some(root) = base.strip_suffix('7') {
        return chord(root, &SEVENTH, octave, inversion);
    }
    (SoundKind::None, SoundSpec::Silent)
}

fn chord(root: &str, intervals: &[u32], octave: u32, inversion: u32) -> (SoundKind, SoundSpec) {
    let Some(root_freq) = note_freq(root) else {
        return (SoundKind::None, SoundSpec::Silent);
    };
    let root_freq = root_freq * octave_factor(octave);
    let mut tones: Vec<f32> = intervals
        .iter()
        .enumerate()
        .map(|(i, &semis)| {
            let mut f = root_freq * 2f32.powf(semis as f32 / 12.0);
            // Inversion raises the lowest `k` interval tones one octave
            if (i as u32) < inversion {
                f *= 2.0;
            }
            f
        })
        .collect();
    tones.sort_by(|a, b| a.partial_cmp(b).expect("finite frequencies"));
    (SoundKind::Chord, SoundSpec::Tones(tones))
}

fn octave_factor(octave: u32) -> f32 {
    2f32.powi(octave as i32 - 4)
}

// ─── Instruments ────────────────────────────────────────────────────────────

/// Closed set of synthesis modes. `Drums` never sustains: every hit is a
/// one-shot and the sustained voice set is forced empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    Sine,
    Soft,
    Bell,
    Pad,
    Drums,
}

impl Instrument {
    pub const ALL: [Instrument; 5] = [
        Instrument::Sine,
        Instrument::Soft,
        Instrument::Bell,
        Instrument::Pad,
        Instrument::Drums,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Instrument::Sine => "sine",
            Instrument::Soft => "soft",
            Instrument::Bell => "bell",
            Instrument::Pad => "pad",
            Instrument::Drums => "drums",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Instrument::ALL.into_iter().find(|i| i.name() == name)
    }
}

// ─── Patches ────────────────────────────────────────────────────────────────

/// A named sound configuration: instrument + finger→sound mapping.
/// Built-in patches are immutable at runtime except for `custom`.
#[derive(Debug, Clone)]
pub struct Patch {
    pub name: String,
    pub label: String,
    pub instrument: Instrument,
    sounds: [FingerSound; 5],
}

impl Patch {
    pub fn new(name: &str, label: &str, instrument: Instrument, tokens: [&str; 5]) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            instrument,
            sounds: tokens.map(FingerSound::parse),
        }
    }

    pub fn sound(&self, f: Finger) -> &FingerSound {
        &self.sounds[f.slot()]
    }

    /// Re-map one finger. `kind` overrides the parsed classification when
    /// given (a `none` hint silences the finger regardless of token).
    pub fn set_sound(&mut self, f: Finger, token: &str, kind: Option<SoundKind>) {
        let mut sound = FingerSound::parse(token);
        if let Some(k) = kind {
            if k == SoundKind::None {
                sound.spec = SoundSpec::Silent;
            }
            sound.kind = k;
        }
        self.sounds[f.slot()] = sound;
    }
}

pub fn builtin_patches() -> Vec<Patch> {
    vec![
        Patch::new(
            "therapy",
            "Therapy",
            Instrument::Pad,
            ["C_maj", "F_maj", "G_maj", "Am", "Em"],
        ),
        Patch::new(
            "piano",
            "Piano",
            Instrument::Bell,
            ["C", "D", "E", "F", "G"],
        ),
        Patch::new(
            "chords",
            "Chords",
            Instrument::Soft,
            ["C_maj", "D_maj", "E_maj", "G_maj", "A_maj"],
        ),
        Patch::new(
            "drums",
            "Drums",
            Instrument::Drums,
            ["kick", "snare", "hihat", "tom", "clap"],
        ),
        Patch::new(
            "custom",
            "Custom",
            Instrument::Sine,
            ["C", "D", "E", "F", "G"],
        ),
    ]
}

/// Tokens offered to the UI for custom mappings.
pub fn sound_catalog() -> Vec<String> {
    let mut catalog: Vec<String> = NOTE_NAMES.iter().map(|n| n.to_string()).collect();
    for root in ["C", "D", "E", "F", "G", "A"] {
        catalog.push(format!("{root}_maj"));
    }
    for minor in ["Am", "Dm", "Em"] {
        catalog.push(minor.to_string());
    }
    for seventh in ["C7", "G7"] {
        catalog.push(seventh.to_string());
    }
    for drum in DrumKind::ALL {
        catalog.push(drum.name().to_string());
    }
    catalog.push("none".to_string());
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tones(token: &str) -> Vec<f32> {
        match FingerSound::parse(token).spec {
            SoundSpec::Tones(t) => t,
            other => panic!("{token} did not resolve to tones: {other:?}"),
        }
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() <= 1.0, "{actual:?} vs {expected:?}");
        }
    }

    #[test]
    fn test_bare_note() {
        assert_close(&tones("C"), &[262.0]);
        assert_close(&tones("A"), &[440.0]);
    }

    #[test]
    fn test_note_octave_suffix() {
        assert_close(&tones("C_oct5"), &[524.0]);
        assert_close(&tones("A_oct3"), &[220.0]);
    }

    #[test]
    fn test_major_triad() {
        assert_close(&tones("C_maj"), &[262.0, 330.0, 392.0]);
    }

    #[test]
    fn test_minor_triad() {
        assert_close(&tones("Am"), &[440.0, 523.0, 659.0]);
    }

    #[test]
    fn test_dominant_seventh() {
        assert_close(&tones("G7"), &[392.0, 494.0, 587.0, 698.0]);
    }

    #[test]
    fn test_tones_are_ascending() {
        for token in ["C_maj", "Am", "G7", "C_maj_inv1", "C_maj_inv2_oct5"] {
            let t = tones(token);
            assert!(
                t.windows(2).all(|w| w[0] <= w[1]),
                "{token} not ascending: {t:?}"
            );
        }
    }

    #[test]
    fn test_inversion_raises_lowest_tone() {
        // Root position: {262, 330, 392}. First inversion doubles the root:
        // {330, 392, 524}.
        assert_close(&tones("C_maj_inv1"), &[330.0, 392.0, 524.0]);
        // Second inversion doubles root and third: {392, 524, 660}.
        assert_close(&tones("C_maj_inv2"), &[392.0, 524.0, 660.0]);
    }

    #[test]
    fn test_inversion_and_octave_combined() {
        assert_close(&tones("C_maj_inv1_oct5"), &[660.0, 784.0, 1048.0]);
    }

    #[test]
    fn test_drum_token() {
        let s = FingerSound::parse("kick");
        assert_eq!(s.kind, SoundKind::Drum);
        assert_eq!(s.spec, SoundSpec::Drum(DrumKind::Kick));
    }

    #[test]
    fn test_unknown_token_is_silent() {
        for token in ["", "none", "X_maj", "Hm", "banana", "_m"] {
            let s = FingerSound::parse(token);
            assert_eq!(s.spec, SoundSpec::Silent, "token {token:?}");
        }
    }

    #[test]
    fn test_underscore_m_is_not_minor() {
        // `X_m` must not be treated as a minor chord on root `X_`
        assert_eq!(FingerSound::parse("C_m").spec, SoundSpec::Silent);
    }

    #[test]
    fn test_seventh_on_unknown_root_is_silent() {
        assert_eq!(FingerSound::parse("H7").spec, SoundSpec::Silent);
    }

    #[test]
    fn test_patch_set_sound_none_hint_silences() {
        let mut patch = builtin_patches().remove(1); // piano
        patch.set_sound(Finger::Thumb, "C_maj", Some(SoundKind::None));
        assert_eq!(patch.sound(Finger::Thumb).spec, SoundSpec::Silent);
    }

    #[test]
    fn test_builtin_patch_lookup() {
        let patches = builtin_patches();
        let piano = patches.iter().find(|p| p.name == "piano").unwrap();
        assert_eq!(piano.instrument, Instrument::Bell);
        assert_close(
            match &piano.sound(Finger::Middle).spec {
                SoundSpec::Tones(t) => t,
                other => panic!("{other:?}"),
            },
            &[330.0],
        );
    }
}
