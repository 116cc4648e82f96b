//! Memory context assembly and prompt rendering.
//!
//! The context is a plain-text block: the participant's profile followed by
//! the most recent dialogue entries. Prompts wrap that block with the
//! instructions for one kind of automated turn.

use crate::cursor::Stage;
use crate::ledger::QuestionLedger;
use crate::memory::{DynamicMemory, MemoryStore, StaticMemory};
use crate::persist::PersistError;
use crate::script::Script;
use serde_json::Value;
use std::fmt::Write;

/// Number of dynamic entries rendered into the context by default.
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// The three kinds of generated turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptKind<'a> {
    /// Empathize, then ask one fresh question about what was just said.
    /// `previous_question` is the question closing the last automated turn,
    /// whatever kind of turn that was.
    FreeFollowUp {
        ordinal: u8,
        user_message: &'a str,
        previous_question: Option<&'a str>,
    },
    /// Empathize with the last answer of the previous stage, then ask the
    /// stage's anchor question.
    RuleIntro { prev_answer: &'a str, anchor: &'a str },
    /// Wrap up the session without asking anything.
    Closing { user_message: &'a str },
}

/// Everything a prompt needs besides the memory context.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub script: &'a Script,
    pub ledger: &'a QuestionLedger,
    pub stage: Stage,
}

/// A rendered `(system_role, user_prompt)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system_role: String,
    pub user_prompt: String,
}

/// Renders memory into prompt context.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    history_window: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_WINDOW)
    }
}

impl ContextBuilder {
    pub fn new(history_window: usize) -> Self {
        Self { history_window }
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    /// Read the store and render the context for `stage`.
    pub async fn build_context(
        &self,
        store: &dyn MemoryStore,
        stage: Stage,
    ) -> Result<String, PersistError> {
        let static_memory = store.read_static().await?;
        let dynamic = store.read_dynamic().await?;
        Ok(self.render(&static_memory, &dynamic, stage))
    }

    /// Render already loaded memory. Pure: same input, same bytes.
    pub fn render(&self, static_memory: &StaticMemory, dynamic: &DynamicMemory, stage: Stage) -> String {
        let mut context = String::new();
        let drawing = &static_memory.user_drawing_info;
        let hero = &static_memory.user_hero_info;

        let _ = writeln!(context, "[Participant profile, for reference only] (stage {stage})");
        push_field(&mut context, "Self keywords", &static_memory.user_self_keywords);
        push_field(&mut context, "Drawing title", &drawing.title);
        push_field(&mut context, "Age in drawing", &drawing.age_in_picture);
        push_field(&mut context, "Current action", &drawing.current_action);
        push_field(&mut context, "Future prediction", &drawing.future_prediction);
        push_field(&mut context, "Message to self", &drawing.message_to_self);

        context.push_str("\n[Strengths and tendencies]\n");
        push_field(&mut context, "Likes", &hero.likes);
        push_field(&mut context, "Good at", &hero.abilities);
        push_field(&mut context, "Strengths", &hero.strength_points);
        push_field(&mut context, "Weaknesses", &hero.weakness_points);
        push_field(&mut context, "Potential", &hero.potentials);

        context.push_str("\n[Recent conversation]\n");
        for entry in dynamic.recent(self.history_window) {
            let _ = writeln!(context, "- {}: {}", entry.role, entry.text);
        }

        context
    }
}

fn push_field(out: &mut String, label: &str, value: &Option<Value>) {
    let _ = writeln!(out, "- {label}: {}", render_value(value));
}

/// Strings render bare, lists render comma-separated, absent renders empty.
pub fn render_value(value: &Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| render_value(&Some(item.clone())))
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}

/// Render the prompt for one automated turn.
pub fn render_prompt(kind: &PromptKind<'_>, context: &str, inputs: PromptInputs<'_>) -> RenderedPrompt {
    let script = inputs.script;
    let stage_label = script.stage_label(inputs.stage);
    let mut prompt = String::new();

    prompt.push_str(context);
    let _ = writeln!(prompt, "\n[Fixed questions]\n{}", script.fixed_questions_line());
    let _ = writeln!(prompt, "\n[Questions already asked]\n{}", inputs.ledger.render());

    match kind {
        PromptKind::FreeFollowUp {
            ordinal,
            user_message,
            previous_question,
        } => {
            let _ = writeln!(prompt, "\n[Situation]");
            let _ = writeln!(prompt, "- We are in the {stage_label} part of the conversation.");
            let _ = writeln!(prompt, "- This is empathy turn {ordinal} of this part.");
            prompt.push_str("- Do not use a fixed question here. Ask freely, based on what the child just said.\n");
            prompt.push_str("\n[Task]\n");
            prompt.push_str("1) Respond with sincere empathy or encouragement in 2-3 sentences.\n");
            prompt.push_str("2) Then ask exactly one new follow-up question that grows out of what the child just said.\n");
            prompt.push_str("3) Write it as one natural utterance.\n");
            prompt.push_str("\n[Rules]\n");
            prompt.push_str("- Treat playful or meaningless input as an emotional signal and respond gently.\n");
            prompt.push_str("- No analysis, judgment or criticism.\n");
            prompt.push_str("- Never mention stages or system terms.\n");
            if let Some(previous) = previous_question.filter(|q| !q.is_empty()) {
                let _ = writeln!(prompt, "- Do not repeat the previous question: \"{previous}\"");
            }
            let _ = write!(prompt, "\n[What the child said]\n{user_message}\n");

            RenderedPrompt {
                system_role: persona_role(script),
                user_prompt: prompt,
            }
        }
        PromptKind::RuleIntro { prev_answer, anchor } => {
            let _ = writeln!(prompt, "\n[Situation]");
            let _ = writeln!(prompt, "- This is the first turn of the {stage_label} part.");
            let _ = writeln!(prompt, "- At the end of the previous part the child said:\n\"{prev_answer}\"");
            prompt.push_str("\n[Task]\n");
            prompt.push_str("1) Respond to the child's words with sincere empathy or encouragement in 2-3 sentences.\n");
            prompt.push_str("2) Then ask the fixed question below, naturally, exactly once. Do not replace it with a question of your own.\n");
            prompt.push_str("\n[Rules]\n");
            prompt.push_str("- Treat playful or meaningless input as an emotional signal and respond gently.\n");
            prompt.push_str("- No analysis, judgment or criticism.\n");
            prompt.push_str("- Never mention stages or system terms.\n");
            let _ = write!(prompt, "\n[Fixed question]\n\"{anchor}\"\n");

            RenderedPrompt {
                system_role: persona_role(script),
                user_prompt: prompt,
            }
        }
        PromptKind::Closing { user_message } => {
            let sign_off = &script.sign_off;
            prompt.push_str("\n[Situation]\n- This is the final turn that wraps up today's activity.\n");
            prompt.push_str("\n[Task]\n");
            prompt.push_str("1) Based on the child's last words, empathize, summarize and encourage in 2-3 sentences.\n");
            let _ = writeln!(
                prompt,
                "2) The last sentence must not be a question. It thanks the child or recalls today's feeling, and ends with \"{sign_off}\"."
            );
            prompt.push_str("3) Keep it short and do not suggest meeting again or asking anything later.\n");
            prompt.push_str("\n[Rules]\n");
            prompt.push_str("- No analysis, judgment or criticism of the child's answer.\n");
            prompt.push_str("- Never mention stages or system terms.\n");
            let _ = write!(prompt, "\n[The child's last words]\n{user_message}\n");

            RenderedPrompt {
                system_role: format!(
                    "You are {persona}, saying goodbye in the very last turn. Never ask a question and never end a sentence with a question mark. \
                     Do not use phrases that invite a future conversation, such as 'see you later' or 'ask me anytime'. \
                     The final sentence must end with '{sign_off}'.",
                    persona = script.persona,
                ),
                user_prompt: prompt,
            }
        }
    }
}

fn persona_role(script: &Script) -> String {
    format!(
        "You are {persona}, a counselling companion who warmly helps children. \
         Speak in a friendly, casual tone and respond gently even when the child is being silly. \
         Never break these rules:\n\
         - Never mention stage names such as S1/S2/S3\n\
         - No analysis, evaluation, solutions or criticism\n\
         - Never repeat a question, especially the one asked in the previous turn\n\
         - Never invent or repeat the fixed questions on your own\n\
         - Never ask a question in the closing turn\n",
        persona = script.persona,
    )
}
