//! Live tests against the Claude API.
//!
//! Run with: `cargo test -p empathy-core --test api_integration -- --ignored --nocapture`
//!
//! These tests require ANTHROPIC_API_KEY to be set.

use claude::Claude;
use empathy_core::cursor::Stage;
use empathy_core::ledger::extract_question;
use empathy_core::session::Collaborators;
use empathy_core::transcript::InMemoryTranscriptLog;
use empathy_core::{ClaudeGenerator, DialogueConfig, InMemoryStore, Script, Session, SessionId};
use std::sync::Arc;

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

/// Check if API key is available
fn has_api_key() -> bool {
    std::env::var("ANTHROPIC_API_KEY").is_ok()
}

#[tokio::test]
#[ignore]
async fn test_live_dialogue_first_stage() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    println!("\n=== TEST: Live First Stage ===\n");

    let config = DialogueConfig::from_env().with_max_tokens(300);
    let client = Claude::from_env().expect("client from env");
    let generator = ClaudeGenerator::from_config(client, &config);
    println!("Model: {}", generator.model());

    let mut session = Session::start(
        SessionId::from("sess_live"),
        &config,
        Script::default(),
        Collaborators {
            generator: Arc::new(generator),
            store: Arc::new(InMemoryStore::new()),
            log: Arc::new(InMemoryTranscriptLog::new()),
        },
    )
    .await
    .expect("Failed to start session");

    for answer in ["it was fun, I drew myself as an astronaut", "because space is cool"] {
        session.process(None).await.expect("automated turn");
        println!("bot: {}", session.turns().last().unwrap().text);
        session.process(Some(answer)).await.expect("human turn");
        println!("user: {answer}");
    }
    session.process(None).await.expect("second follow-up");
    let reply = &session.turns().last().unwrap().text;
    println!("bot: {reply}");

    assert_eq!(session.cursor().stage, Stage::S1);
    assert_eq!(session.ledger().len(), 2);
    assert!(!extract_question(reply).is_empty(), "follow-up should ask a question");
}
