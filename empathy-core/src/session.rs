//! Session - the aggregate root of one dialogue.
//!
//! A session owns the cursor, the turns, the memory mirror and the question
//! ledger. Everything the presentation layer does goes through
//! [`Session::process`]; re-rendering is reading the session's state.

use crate::config::DialogueConfig;
use crate::context::{render_prompt, ContextBuilder, PromptInputs, PromptKind};
use crate::cursor::{step_for, Cursor, Stage, Step, TransitionError};
use crate::export::{to_flat_rows, to_transcript, ExportMeta, FlatRow, TranscriptDocument};
use crate::generation::{GenerationError, Generator};
use crate::ledger::{extract_question, QuestionLedger};
use crate::memory::{DynamicMemory, MemoryStore, StaticMemory};
use crate::persist::{write_exports, ExportPaths, PersistError};
use crate::registry::SessionId;
use crate::script::Script;
use crate::transcript::{TranscriptLog, TranscriptRecord};
use crate::turn::{Speaker, Turn};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistError),

    #[error("Invalid transition from {from}: {reason}")]
    InvalidTransition { from: Cursor, reason: &'static str },

    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Session has not finished (cursor at {0})")]
    NotFinished(Cursor),

    #[error("Transcript log for {session} cannot be resumed: {reason}")]
    InconsistentLog { session: SessionId, reason: String },
}

impl SessionError {
    /// Whether the same call may succeed if made again. Persistence failures
    /// count as retryable since the store or log may come back.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Generation(e) => e.is_transient(),
            SessionError::Persistence(_) => true,
            _ => false,
        }
    }
}

impl From<TransitionError> for SessionError {
    fn from(e: TransitionError) -> Self {
        SessionError::InvalidTransition {
            from: e.from,
            reason: e.reason,
        }
    }
}

/// What a call to [`Session::process`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// One turn was appended and the cursor moved. `duplicate_question` is
    /// set when a free follow-up asked a question already in the ledger.
    Advance {
        from: Cursor,
        to: Cursor,
        duplicate_question: bool,
    },
    /// Human turn expected but no input was given. Nothing changed.
    AwaitingInput,
    /// Input arrived while an automated turn was due. Nothing changed.
    StaleInputDiscarded,
    /// The session is over. Nothing changed.
    Terminal,
}

/// The external services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn Generator>,
    pub store: Arc<dyn MemoryStore>,
    pub log: Arc<dyn TranscriptLog>,
}

/// One staged dialogue between the automated counterpart and a participant.
pub struct Session {
    id: SessionId,
    user_id: String,
    chat_type: String,
    created_at: DateTime<Utc>,
    cursor: Cursor,
    turns: Vec<Turn>,
    static_memory: StaticMemory,
    dynamic: DynamicMemory,
    ledger: QuestionLedger,
    archive_ready: bool,
    script: Script,
    context: ContextBuilder,
    generator: Arc<dyn Generator>,
    store: Arc<dyn MemoryStore>,
    log: Arc<dyn TranscriptLog>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("cursor", &self.cursor)
            .field("turns", &self.turns.len())
            .field("archive_ready", &self.archive_ready)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open a session, reading memory from the store.
    ///
    /// A session id with no records in the transcript log starts at
    /// `(S1, 1)`. Otherwise the turns are replayed from the log, the cursor
    /// and ledger are rebuilt from them, and the dynamic memory is rewritten
    /// if it no longer mirrors the turns.
    pub async fn start(
        id: SessionId,
        config: &DialogueConfig,
        script: Script,
        parts: Collaborators,
    ) -> Result<Self, SessionError> {
        let static_memory = parts.store.read_static().await?;
        let mut dynamic = parts.store.read_dynamic().await?;

        let turns = replay_turns(&id, parts.log.replay(&id).await?)?;
        let (cursor, ledger) = rebuild_progress(&id, &turns)?;

        if turns.is_empty() {
            info!(session = %id, prior_entries = dynamic.len(), "session started");
        } else {
            let mirrored = mirror_of(&turns);
            if mirrored != dynamic {
                warn!(session = %id, stored = dynamic.len(), replayed = turns.len(), "rewriting dynamic memory from the log");
                parts.store.write_dynamic(&mirrored).await?;
                dynamic = mirrored;
            }
            info!(session = %id, cursor = %cursor, turns = turns.len(), "session resumed");
        }

        let created_at = turns.first().map(|turn| turn.created_at).unwrap_or_else(Utc::now);

        Ok(Self {
            id,
            user_id: config.user_id.clone(),
            chat_type: config.chat_type.clone(),
            created_at,
            cursor,
            turns,
            static_memory,
            dynamic,
            ledger,
            archive_ready: false,
            script,
            context: ContextBuilder::new(config.history_window),
            generator: parts.generator,
            store: parts.store,
            log: parts.log,
        })
    }

    /// Run one interaction cycle.
    ///
    /// `None` (or blank input) asks for the automated turn due at the cursor.
    /// Non-blank input is the participant's answer and is only accepted on
    /// a human substep. On any error the session is left as it was and the
    /// same call can be retried.
    pub async fn process(&mut self, input: Option<&str>) -> Result<ProcessOutcome, SessionError> {
        if self.cursor.is_terminal() {
            return Ok(ProcessOutcome::Terminal);
        }

        let input = input.filter(|text| !text.trim().is_empty());
        match (input, self.cursor.expects_automated()) {
            (Some(_), true) => {
                warn!(session = %self.id, cursor = %self.cursor, "stale input discarded");
                Ok(ProcessOutcome::StaleInputDiscarded)
            }
            (None, true) => self.automated_turn().await,
            (Some(text), false) => {
                let (from, to) = self.commit(Speaker::Human, text.to_string()).await?;
                Ok(ProcessOutcome::Advance {
                    from,
                    to,
                    duplicate_question: false,
                })
            }
            (None, false) => Ok(ProcessOutcome::AwaitingInput),
        }
    }

    async fn automated_turn(&mut self) -> Result<ProcessOutcome, SessionError> {
        let stage = self.cursor.stage;
        let step = step_for(self.cursor);
        let last_answer = self.last_human_text().unwrap_or_default().to_string();
        let previous_question = self.last_automated_question();

        let text = match step {
            Step::ScriptedOpening => self.script.opening_question.clone(),
            Step::RuleIntro => {
                let anchor = self.script.anchor_question(stage).to_string();
                self.generate(
                    PromptKind::RuleIntro {
                        prev_answer: &last_answer,
                        anchor: &anchor,
                    },
                    stage,
                )
                .await?
            }
            Step::FreeFollowUp { ordinal } => {
                self.generate(
                    PromptKind::FreeFollowUp {
                        ordinal,
                        user_message: &last_answer,
                        previous_question: previous_question.as_deref(),
                    },
                    stage,
                )
                .await?
            }
            Step::Closing => {
                let text = self
                    .generate(PromptKind::Closing { user_message: &last_answer }, stage)
                    .await?;
                if text.contains('?') || !text.trim_end().ends_with(self.script.sign_off.as_str()) {
                    warn!(session = %self.id, "closing turn breaks the closing rules");
                }
                text
            }
            Step::AwaitHuman | Step::Terminal => {
                return Err(SessionError::InvalidTransition {
                    from: self.cursor,
                    reason: "no automated step at this cursor",
                })
            }
        };

        let (from, to) = self.commit(Speaker::Automated, text).await?;

        let mut duplicate_question = false;
        if let Step::FreeFollowUp { .. } = step {
            let question = self.last_automated_question().unwrap_or_default();
            debug!(session = %self.id, question = %question, "extracted question");
            duplicate_question = self.ledger.record(question.clone());
            if duplicate_question {
                warn!(session = %self.id, question = %question, "generated question repeats an earlier one");
            }
        }

        Ok(ProcessOutcome::Advance {
            from,
            to,
            duplicate_question,
        })
    }

    async fn generate(&self, kind: PromptKind<'_>, stage: Stage) -> Result<String, SessionError> {
        let context = self.context.build_context(self.store.as_ref(), stage).await?;
        let prompt = render_prompt(
            &kind,
            &context,
            PromptInputs {
                script: &self.script,
                ledger: &self.ledger,
                stage,
            },
        );
        debug!(session = %self.id, cursor = %self.cursor, prompt = %prompt.user_prompt, "rendered prompt");

        match self.generator.generate(&prompt.system_role, &prompt.user_prompt).await {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!(session = %self.id, cursor = %self.cursor, error = %e, "generation failed");
                Err(e.into())
            }
        }
    }

    /// Append one turn: log first, then memory, then the in-memory state.
    async fn commit(&mut self, speaker: Speaker, text: String) -> Result<(Cursor, Cursor), SessionError> {
        let from = self.cursor;
        let to = from.successor()?;
        let turn = Turn::at_position(self.turns.len(), speaker, text);

        self.log
            .append(&TranscriptRecord::from_turn(&self.id, &turn))
            .await
            .inspect_err(|e| warn!(session = %self.id, error = %e, "transcript append failed"))?;

        let mut dynamic = self.dynamic.clone();
        dynamic.push(speaker, turn.text.clone());
        self.store
            .write_dynamic(&dynamic)
            .await
            .inspect_err(|e| warn!(session = %self.id, error = %e, "memory write failed"))?;

        self.dynamic = dynamic;
        self.turns.push(turn);
        self.cursor.transition(to)?;

        if to.stage != from.stage {
            info!(session = %self.id, from = %from.stage, to = %to.stage, "stage advanced");
        }
        if to.is_terminal() {
            info!(session = %self.id, turns = self.turns.len(), "dialogue reached its terminal state");
        }

        Ok((from, to))
    }

    /// The question closing the most recent automated turn, if it asked one.
    fn last_automated_question(&self) -> Option<String> {
        self.turns
            .iter()
            .rev()
            .find(|turn| turn.is_automated())
            .map(|turn| extract_question(&turn.text))
            .filter(|question| !question.is_empty())
    }

    fn last_human_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|turn| turn.speaker == Speaker::Human)
            .map(|turn| turn.text.as_str())
    }

    /// Mark a terminal session as ready for archiving.
    pub fn finish(&mut self) -> Result<(), SessionError> {
        if !self.cursor.is_terminal() {
            return Err(SessionError::NotFinished(self.cursor));
        }
        if !self.archive_ready {
            info!(session = %self.id, "session archived");
        }
        self.archive_ready = true;
        Ok(())
    }

    /// Finish the session and write both export files into `dir`.
    pub async fn export_to(&mut self, dir: impl AsRef<Path>) -> Result<ExportPaths, SessionError> {
        self.finish()?;
        let paths = write_exports(dir, &self.export_meta(), &self.turns).await?;
        info!(session = %self.id, json = %paths.json.display(), csv = %paths.csv.display(), "exports written");
        Ok(paths)
    }

    /// Whether the presentation layer should offer an input control.
    pub fn accepts_input(&self) -> bool {
        self.cursor.expects_human()
    }

    pub fn is_terminal(&self) -> bool {
        self.cursor.is_terminal()
    }

    pub fn archive_ready(&self) -> bool {
        self.archive_ready
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn ledger(&self) -> &QuestionLedger {
        &self.ledger
    }

    pub fn static_memory(&self) -> &StaticMemory {
        &self.static_memory
    }

    pub fn dynamic_memory(&self) -> &DynamicMemory {
        &self.dynamic
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn stage_label(&self) -> &str {
        self.script.stage_label(self.cursor.stage)
    }

    pub fn export_meta(&self) -> ExportMeta {
        ExportMeta {
            session_id: self.id.clone(),
            user_id: self.user_id.clone(),
            created_at: self.created_at,
            chat_type: self.chat_type.clone(),
        }
    }

    pub fn transcript(&self) -> TranscriptDocument {
        to_transcript(&self.export_meta(), &self.turns)
    }

    pub fn flat_rows(&self) -> Vec<FlatRow> {
        to_flat_rows(&self.turns)
    }
}

/// Order replayed records into turns. A record for the last position
/// replaces it: that is a commit retried after its memory write failed.
fn replay_turns(id: &SessionId, records: Vec<TranscriptRecord>) -> Result<Vec<Turn>, SessionError> {
    let mut turns: Vec<Turn> = Vec::new();
    for record in records {
        if record.turn_index == 0 {
            return Err(inconsistent(id, "record with turn 0".to_string()));
        }
        let position = (record.turn_index - 1) * 2 + usize::from(record.role == Speaker::Human);
        if position == turns.len() {
            turns.push(record.to_turn());
        } else if position + 1 == turns.len() {
            debug!(session = %id, position, "replayed record supersedes a retried commit");
            turns[position] = record.to_turn();
        } else {
            return Err(inconsistent(
                id,
                format!("record for position {position} after {} turns", turns.len()),
            ));
        }
    }
    Ok(turns)
}

/// Walk the transition table over replayed turns.
fn rebuild_progress(id: &SessionId, turns: &[Turn]) -> Result<(Cursor, QuestionLedger), SessionError> {
    let mut cursor = Cursor::START;
    let mut ledger = QuestionLedger::new();
    for turn in turns {
        if cursor.is_terminal() || turn.is_automated() != cursor.expects_automated() {
            return Err(inconsistent(id, format!("{} turn does not fit cursor {cursor}", turn.speaker)));
        }
        if let Step::FreeFollowUp { .. } = step_for(cursor) {
            ledger.record(extract_question(&turn.text));
        }
        cursor = cursor.successor()?;
    }
    Ok((cursor, ledger))
}

fn mirror_of(turns: &[Turn]) -> DynamicMemory {
    let mut dynamic = DynamicMemory::default();
    for turn in turns {
        dynamic.push(turn.speaker, turn.text.clone());
    }
    dynamic
}

fn inconsistent(id: &SessionId, reason: String) -> SessionError {
    SessionError::InconsistentLog {
        session: id.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::testing::{assert_cursor, MockGenerator, TestHarness};
    use crate::transcript::InMemoryTranscriptLog;

    async fn reopen(log: Arc<InMemoryTranscriptLog>, store: Arc<InMemoryStore>) -> Result<Session, SessionError> {
        let parts = Collaborators {
            generator: Arc::new(MockGenerator::new()),
            store,
            log,
        };
        Session::start(SessionId::from("sess_test"), &DialogueConfig::default(), Script::default(), parts).await
    }

    #[tokio::test]
    async fn test_opening_is_scripted_and_needs_no_generation() {
        let mut harness = TestHarness::new().await;
        let outcome = harness.session.process(None).await.unwrap();

        assert_eq!(
            outcome,
            ProcessOutcome::Advance {
                from: Cursor::START,
                to: Cursor::new(Stage::S1, 2).unwrap(),
                duplicate_question: false,
            }
        );
        assert_eq!(harness.session.turns()[0].text, Script::default().opening_question);
        assert_eq!(harness.generator.call_count(), 0);
        assert!(harness.session.accepts_input());
    }

    #[tokio::test]
    async fn test_answer_moves_to_follow_up() {
        let mut harness = TestHarness::new().await;
        harness.session.process(None).await.unwrap();
        harness.session.process(Some("it was fun")).await.unwrap();

        assert_cursor(&harness.session, Stage::S1, 3);
        assert!(!harness.session.accepts_input());
    }

    #[tokio::test]
    async fn test_stale_input_changes_nothing() {
        let mut harness = TestHarness::new().await;
        let outcome = harness.session.process(Some("hello")).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::StaleInputDiscarded);
        assert_cursor(&harness.session, Stage::S1, 1);
        assert!(harness.session.turns().is_empty());
        assert!(harness.session.ledger().is_empty());
        assert_eq!(harness.log.len().await, 0);
    }

    #[tokio::test]
    async fn test_blank_input_on_human_substep_waits() {
        let mut harness = TestHarness::new().await;
        harness.session.process(None).await.unwrap();

        assert_eq!(harness.session.process(Some("   ")).await.unwrap(), ProcessOutcome::AwaitingInput);
        assert_eq!(harness.session.process(None).await.unwrap(), ProcessOutcome::AwaitingInput);
        assert_eq!(harness.session.turns().len(), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_leaves_session_untouched_and_retries() {
        let mut harness = TestHarness::new().await;
        harness.session.process(None).await.unwrap();
        harness.session.process(Some("we drew")).await.unwrap();

        harness.generator.fail_next("upstream down");
        let err = harness.session.process(None).await.unwrap_err();
        assert!(matches!(err, SessionError::Generation(_)));
        assert_cursor(&harness.session, Stage::S1, 3);
        assert_eq!(harness.session.turns().len(), 2);
        assert_eq!(harness.log.len().await, 2);

        harness.generator.queue("Nice!\nWhat did you draw?");
        harness.session.process(None).await.unwrap();
        assert_cursor(&harness.session, Stage::S1, 4);
        assert_eq!(harness.session.ledger().last(), Some("What did you draw?"));
    }

    #[tokio::test]
    async fn test_finish_requires_terminal() {
        let mut harness = TestHarness::new().await;
        let err = harness.session.finish().unwrap_err();
        assert!(matches!(err, SessionError::NotFinished(c) if c == Cursor::START));
        assert!(!harness.session.archive_ready());
    }

    #[tokio::test]
    async fn test_follow_up_names_the_opening_question() {
        let mut harness = TestHarness::new().await;
        harness.session.process(None).await.unwrap();
        harness.session.process(Some("it was fun")).await.unwrap();
        harness.session.process(None).await.unwrap();

        let opening = Script::default().opening_question;
        let prompt = harness.generator.last_call().unwrap().user_prompt;
        assert!(prompt.contains(&format!("previous question: \"{}\"", extract_question(&opening))));
    }

    #[tokio::test]
    async fn test_duplicate_question_flagged_in_outcome() {
        let mut harness = TestHarness::new().await;
        harness
            .expect_reply("Wow!\nWhat did you draw?")
            .expect_reply("Nice!\nWhat did you draw?");
        harness.bot().await.unwrap();
        harness.say("fun").await.unwrap();

        let first = harness.session.process(None).await.unwrap();
        assert!(matches!(first, ProcessOutcome::Advance { duplicate_question: false, .. }));
        harness.session.process(Some("a dog")).await.unwrap();
        let second = harness.session.process(None).await.unwrap();
        assert!(matches!(second, ProcessOutcome::Advance { duplicate_question: true, .. }));
    }

    #[tokio::test]
    async fn test_start_resumes_from_log() {
        let mut harness = TestHarness::new().await;
        harness.expect_reply("Wow!\nWhat did you draw?");
        harness.run_script(&["fun", "a dog"]).await.unwrap();
        assert_cursor(&harness.session, Stage::S1, 6);

        let resumed = reopen(harness.log.clone(), harness.store.clone()).await.unwrap();
        assert_eq!(resumed.cursor(), harness.session.cursor());
        assert_eq!(resumed.turns(), harness.session.turns());
        assert_eq!(resumed.ledger().len(), 2);
        assert_eq!(resumed.dynamic_memory().len(), 5);
    }

    #[tokio::test]
    async fn test_resume_rewrites_stale_memory() {
        let mut harness = TestHarness::new().await;
        harness.run_script(&["fun"]).await.unwrap();

        let mut stale = mirror_of(harness.session.turns());
        stale.push(Speaker::Human, "left over");
        harness.store.write_dynamic(&stale).await.unwrap();

        let resumed = reopen(harness.log.clone(), harness.store.clone()).await.unwrap();
        assert_eq!(resumed.dynamic_memory().len(), 3);
        assert_eq!(harness.store.read_dynamic().await.unwrap(), mirror_of(resumed.turns()));
    }

    #[test]
    fn test_replay_keeps_last_record_of_a_retried_commit() {
        let id = SessionId::from("sess_test");
        let records: Vec<_> = [
            (0, Speaker::Automated, "How was today?"),
            (1, Speaker::Human, "fun"),
            (2, Speaker::Automated, "first try?"),
            (2, Speaker::Automated, "second try?"),
        ]
        .into_iter()
        .map(|(pos, speaker, text)| TranscriptRecord::from_turn(&id, &Turn::at_position(pos, speaker, text)))
        .collect();

        let turns = replay_turns(&id, records).unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[2].text, "second try?");
    }

    #[test]
    fn test_replay_rejects_gaps_and_misplaced_speakers() {
        let id = SessionId::from("sess_test");
        let gap = vec![TranscriptRecord::from_turn(&id, &Turn::at_position(2, Speaker::Automated, "hi?"))];
        assert!(matches!(replay_turns(&id, gap), Err(SessionError::InconsistentLog { .. })));

        let misplaced = [Turn::at_position(0, Speaker::Human, "hello")];
        assert!(matches!(
            rebuild_progress(&id, &misplaced),
            Err(SessionError::InconsistentLog { .. })
        ));
    }

    #[test]
    fn test_retryable_errors() {
        let rate_limited = claude::Error::Api {
            status: 429,
            message: "slow down".to_string(),
        };
        assert!(SessionError::Generation(rate_limited.into()).is_retryable());
        assert!(!SessionError::Generation(claude::Error::NoApiKey.into()).is_retryable());
        assert!(SessionError::Persistence(PersistError::Unavailable("offline".to_string())).is_retryable());
        assert!(!SessionError::NotFinished(Cursor::START).is_retryable());
    }
}
