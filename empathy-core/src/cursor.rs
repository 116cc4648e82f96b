//! The `{stage, substep}` cursor and its transition table.
//!
//! Each stage runs six substeps. Odd substeps belong to the automated
//! counterpart, even substeps to the human. `(S3, 6)` is terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dialogue stage. Ordinal; a session only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    S1,
    S2,
    S3,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::S1, Stage::S2, Stage::S3];

    /// Zero-based position of the stage.
    pub fn index(self) -> usize {
        match self {
            Stage::S1 => 0,
            Stage::S2 => 1,
            Stage::S3 => 2,
        }
    }

    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::S1 => Some(Stage::S2),
            Stage::S2 => Some(Stage::S3),
            Stage::S3 => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.index() + 1)
    }
}

/// Position within a stage, always in `1..=6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Substep(u8);

impl Substep {
    pub const FIRST: Substep = Substep(1);
    pub const LAST: Substep = Substep(6);

    pub fn new(value: u8) -> Option<Self> {
        (1..=6).contains(&value).then_some(Self(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Odd substeps are automated-turn slots.
    pub fn is_automated(self) -> bool {
        self.0 % 2 == 1
    }

    fn succ(self) -> Option<Self> {
        Self::new(self.0 + 1)
    }
}

impl TryFrom<u8> for Substep {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("substep {value} is outside 1..=6"))
    }
}

impl From<Substep> for u8 {
    fn from(substep: Substep) -> Self {
        substep.0
    }
}

/// The session's position in the dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub stage: Stage,
    pub substep: Substep,
}

impl Cursor {
    pub const START: Cursor = Cursor {
        stage: Stage::S1,
        substep: Substep::FIRST,
    };

    pub const TERMINAL: Cursor = Cursor {
        stage: Stage::S3,
        substep: Substep::LAST,
    };

    pub fn new(stage: Stage, substep: u8) -> Option<Self> {
        Substep::new(substep).map(|substep| Self { stage, substep })
    }

    pub fn is_terminal(self) -> bool {
        self == Self::TERMINAL
    }

    /// Whether the next action belongs to the automated counterpart.
    pub fn expects_automated(self) -> bool {
        !self.is_terminal() && self.substep.is_automated()
    }

    /// Whether the next action belongs to the human.
    pub fn expects_human(self) -> bool {
        !self.is_terminal() && !self.substep.is_automated()
    }

    /// The single legal successor of this cursor.
    ///
    /// Within a stage the substep increments; after substep 6 the stage
    /// increments and the substep resets to 1. The terminal cursor has no
    /// successor.
    pub fn successor(self) -> Result<Cursor, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError {
                from: self,
                reason: "the terminal cursor is frozen",
            });
        }
        match self.substep.succ() {
            Some(substep) => Ok(Cursor {
                stage: self.stage,
                substep,
            }),
            None => match self.stage.next() {
                Some(stage) => Ok(Cursor {
                    stage,
                    substep: Substep::FIRST,
                }),
                None => Err(TransitionError {
                    from: self,
                    reason: "no stage follows S3",
                }),
            },
        }
    }

    /// Move to `to`, which must be this cursor's successor.
    pub fn transition(&mut self, to: Cursor) -> Result<(), TransitionError> {
        let expected = self.successor()?;
        if to != expected {
            return Err(TransitionError {
                from: *self,
                reason: "target is not the successor in the transition table",
            });
        }
        *self = to;
        Ok(())
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::START
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.stage, self.substep.get())
    }
}

/// A cursor mutation outside the transition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: Cursor,
    pub reason: &'static str,
}

/// What happens at a given cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Emit the scripted opening question verbatim.
    ScriptedOpening,
    /// Empathize with the last human turn and weave in the stage's anchor question.
    RuleIntro,
    /// Empathize and ask one fresh question grounded in the last human turn.
    /// `ordinal` is 1 or 2 within the stage.
    FreeFollowUp { ordinal: u8 },
    /// Closing turn; no question allowed.
    Closing,
    /// Wait for the human.
    AwaitHuman,
    /// Nothing more happens.
    Terminal,
}

const TRANSITIONS: [((Stage, u8), Step); 18] = [
    ((Stage::S1, 1), Step::ScriptedOpening),
    ((Stage::S1, 2), Step::AwaitHuman),
    ((Stage::S1, 3), Step::FreeFollowUp { ordinal: 1 }),
    ((Stage::S1, 4), Step::AwaitHuman),
    ((Stage::S1, 5), Step::FreeFollowUp { ordinal: 2 }),
    ((Stage::S1, 6), Step::AwaitHuman),
    ((Stage::S2, 1), Step::RuleIntro),
    ((Stage::S2, 2), Step::AwaitHuman),
    ((Stage::S2, 3), Step::FreeFollowUp { ordinal: 1 }),
    ((Stage::S2, 4), Step::AwaitHuman),
    ((Stage::S2, 5), Step::FreeFollowUp { ordinal: 2 }),
    ((Stage::S2, 6), Step::AwaitHuman),
    ((Stage::S3, 1), Step::RuleIntro),
    ((Stage::S3, 2), Step::AwaitHuman),
    ((Stage::S3, 3), Step::FreeFollowUp { ordinal: 1 }),
    ((Stage::S3, 4), Step::AwaitHuman),
    ((Stage::S3, 5), Step::Closing),
    ((Stage::S3, 6), Step::Terminal),
];

/// Look up the step for a cursor position.
pub fn step_for(cursor: Cursor) -> Step {
    let key = (cursor.stage, cursor.substep.get());
    TRANSITIONS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, step)| *step)
        // every (stage, 1..=6) pair is in the table
        .unwrap_or(Step::Terminal)
}
