use crate::types::{Finger, FingerSet};

use Finger::{Index as I, Middle as M, Pinky as P, Ring as R, Thumb as T};

/// A guided finger-sequence exercise.
pub struct TutorialDef {
    pub id: &'static str,
    pub name: &'static str,
    pub difficulty: &'static str,
    pub sequence: &'static [Finger],
}

pub const TUTORIALS: [TutorialDef; 5] = [
    TutorialDef {
        id: "scale",
        name: "Simple Scale",
        difficulty: "Beginner",
        sequence: &[T, I, M, R, P, P, R, M, I, T],
    },
    TutorialDef {
        id: "mary",
        name: "Mary Had a Little Lamb",
        difficulty: "Easy",
        sequence: &[
            M, I, T, I, M, M, M, I, I, I, M, P, P, M, I, T, I, M, M, M, M, I, I, M, I, T,
        ],
    },
    TutorialDef {
        id: "twinkle",
        name: "Twinkle Twinkle Little Star",
        difficulty: "Easy",
        sequence: &[
            T, T, P, P, P, P, P, R, R, M, M, I, I, T, P, P, R, R, M, M, I, P, P, R, R, M, M,
            I, T, T, P, P, P, P, P, R, R, M, M, I, I, T,
        ],
    },
    TutorialDef {
        id: "jingle",
        name: "Jingle Bells (Chorus)",
        difficulty: "Medium",
        sequence: &[
            M, M, M, M, M, M, M, P, T, I, M, R, R, R, R, R, M, M, M, M, I, I, M, I, P,
        ],
    },
    TutorialDef {
        id: "ode",
        name: "Ode to Joy",
        difficulty: "Medium",
        sequence: &[
            M, M, R, P, P, R, M, I, T, T, I, M, M, I, I, M, M, R, P, P, R, M, I, T, T, I, M,
            I, T, T,
        ],
    },
];

pub fn find(id: &str) -> Option<&'static TutorialDef> {
    TUTORIALS.iter().find(|t| t.id == id)
}

/// Emitted when a tutorial tick consumes the expected press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TutorialEvent {
    Progress {
        step: usize,
        next: Finger,
        total: usize,
    },
    Complete,
}

/// Progress through one tutorial.
///
/// The armed set implements the debounce rule: a finger satisfies the
/// expected press only if it was observed released (drop below the release
/// threshold) since it last advanced the sequence. All fingers start armed.
pub struct TutorialSession {
    pub id: String,
    sequence: &'static [Finger],
    pub step: usize,
    pub completed: bool,
    armed: FingerSet,
}

impl TutorialSession {
    pub fn new(def: &TutorialDef) -> Self {
        Self {
            id: def.id.to_string(),
            sequence: def.sequence,
            step: 0,
            completed: false,
            armed: FingerSet::all(),
        }
    }

    pub fn total(&self) -> usize {
        self.sequence.len()
    }

    pub fn sequence(&self) -> &[Finger] {
        self.sequence
    }

    pub fn expected(&self) -> Option<Finger> {
        self.sequence.get(self.step).copied()
    }

    /// Back to the first step with every finger re-armed.
    pub fn reset(&mut self) {
        self.step = 0;
        self.completed = false;
        self.armed = FingerSet::all();
    }

    /// Process one activation-detector tick. `drops` holds the normalized
    /// drop per finger slot (None when uncalibrated).
    ///
    /// A press from a non-expected or disarmed finger has no effect here
    /// (it may still produce sound in the play path).
    pub fn tick(
        &mut self,
        drops: &[Option<f32>; 5],
        threshold: f32,
        release_threshold: f32,
    ) -> Option<TutorialEvent> {
        // Re-arm anything observed below the release threshold
        for f in Finger::ALL {
            if let Some(drop) = drops[f.slot()] {
                if drop < release_threshold {
                    self.armed.insert(f);
                }
            }
        }

        let expected = self.expected()?;
        let pressed = matches!(drops[expected.slot()], Some(d) if d > threshold);
        if !pressed || !self.armed.contains(expected) {
            return None;
        }

        self.step += 1;
        self.armed.remove(expected);
        if self.step >= self.sequence.len() {
            self.completed = true;
            Some(TutorialEvent::Complete)
        } else {
            Some(TutorialEvent::Progress {
                step: self.step,
                next: self.sequence[self.step],
                total: self.sequence.len(),
            })
        }
    }
}
