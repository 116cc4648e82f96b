//! QA tests for file-backed memory, the JSONL transcript log and exports.
//!
//! These tests verify that a dialogue leaves a complete, replayable trail on
//! disk. They use `MockGenerator`, so no API key is needed.
//! Run with: `cargo test -p empathy-core --test qa_persistence -- --nocapture`

use empathy_core::export::{to_csv, CSV_HEADER};
use empathy_core::persist::{DataLayout, FileMemoryStore, JsonlTranscriptLog};
use empathy_core::testing::MockGenerator;
use empathy_core::transcript::TranscriptLog;
use empathy_core::turn::Turn;
use empathy_core::{DialogueConfig, MemoryStore, Script, SessionId, SessionRegistry};
use std::sync::Arc;
use tempfile::TempDir;

const ANSWERS: [&str; 8] = ["fun", "a rocket", "red", "the launch", "proud", "nothing", "thanks", "yes"];

fn registry_in(dir: &TempDir) -> SessionRegistry {
    let config = DialogueConfig::default()
        .with_data_dir(dir.path())
        .with_user_id("kid-7");
    SessionRegistry::file_backed(config, Script::default(), Arc::new(MockGenerator::new()))
}

async fn run_to_end(registry: &SessionRegistry, id: &SessionId) {
    let session = registry.get(id).await.expect("session exists");
    let mut session = session.lock().await;
    let mut answers = ANSWERS.iter();
    while !session.is_terminal() {
        let input = if session.accepts_input() {
            answers.next().copied()
        } else {
            None
        };
        session.process(input).await.expect("turn succeeds");
    }
}

// =============================================================================
// TEST 1: Log and memory files after a full dialogue
// =============================================================================

#[tokio::test]
async fn test_full_dialogue_writes_log_and_memory() {
    println!("\n=== TEST: Log and Memory Files ===\n");

    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let registry = registry_in(&temp_dir);
    let id = registry.create().await.unwrap();
    run_to_end(&registry, &id).await;

    let layout = DataLayout::new(temp_dir.path());
    let log_path = layout.log_path();
    println!("Log written to: {:?}", log_path);

    let raw = std::fs::read_to_string(&log_path).expect("log file exists");
    let lines: Vec<_> = raw.lines().collect();
    assert_eq!(lines.len(), 17);

    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["session_id"], id.as_str());
    assert_eq!(first["role"], "bot");
    assert_eq!(first["turn"], 1);
    let last: serde_json::Value = serde_json::from_str(lines[16]).unwrap();
    assert_eq!(last["turn"], 9);

    let store = FileMemoryStore::new(
        layout.memory_dir().join("static_memory.json"),
        layout.session_memory_dir(&id).join("dynamic_memory.json"),
    );
    let dynamic = store.read_dynamic().await.unwrap();
    assert_eq!(dynamic.len(), 17);
    assert_eq!(dynamic.turns[1].text, "fun");
}

// =============================================================================
// TEST 2: Replaying the log reproduces the exports
// =============================================================================

#[tokio::test]
async fn test_log_replay_matches_session() {
    let temp_dir = TempDir::new().unwrap();
    let registry = registry_in(&temp_dir);
    let id = registry.create().await.unwrap();
    run_to_end(&registry, &id).await;

    let log = JsonlTranscriptLog::new(DataLayout::new(temp_dir.path()).log_path());
    let replayed: Vec<Turn> = log
        .replay(&id)
        .await
        .unwrap()
        .iter()
        .map(|record| record.to_turn())
        .collect();

    let session = registry.get(&id).await.unwrap();
    let session = session.lock().await;
    assert_eq!(replayed, session.turns());
    assert_eq!(
        to_csv(&session.export_meta(), &replayed).unwrap(),
        to_csv(&session.export_meta(), session.turns()).unwrap()
    );
}

// =============================================================================
// TEST 3: Export files
// =============================================================================

#[tokio::test]
async fn test_export_after_terminal() {
    println!("\n=== TEST: Exports ===\n");

    let temp_dir = TempDir::new().unwrap();
    let registry = registry_in(&temp_dir);
    let id = registry.create().await.unwrap();

    // exporting before the end is refused
    {
        let session = registry.get(&id).await.unwrap();
        let mut session = session.lock().await;
        assert!(session.export_to(temp_dir.path().join("exports")).await.is_err());
        assert!(!session.archive_ready());
    }

    run_to_end(&registry, &id).await;

    let session = registry.get(&id).await.unwrap();
    let mut session = session.lock().await;
    let paths = session
        .export_to(DataLayout::new(temp_dir.path()).export_dir())
        .await
        .expect("export succeeds");
    assert!(session.archive_ready());
    println!("Exports: {:?} {:?}", paths.json, paths.csv);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&paths.json).unwrap()).unwrap();
    assert_eq!(json["user_id"], "kid-7");
    assert_eq!(json["chat_type"], "fsm_empathy_2turn");
    let dialogue = json["dialogue"].as_array().unwrap();
    assert_eq!(dialogue.len(), 9);
    assert_eq!(dialogue[0]["user"]["text"], "fun");
    assert!(dialogue[8]["user"].is_null());

    let csv = std::fs::read_to_string(&paths.csv).unwrap();
    assert!(csv.starts_with('\u{feff}'));
    let rows: Vec<_> = csv.trim_start_matches('\u{feff}').trim_end().split("\r\n").collect();
    assert_eq!(rows[0], CSV_HEADER.join(","));
    // header plus eighteen rows, the last an empty human placeholder
    assert_eq!(rows.len(), 19);
    assert!(rows[18].ends_with(",9,user,,"));
}

// =============================================================================
// TEST 4: Provisioned profile reaches the prompt
// =============================================================================

#[tokio::test]
async fn test_static_profile_file_feeds_prompts() {
    let temp_dir = TempDir::new().unwrap();
    let layout = DataLayout::new(temp_dir.path());
    std::fs::create_dir_all(layout.memory_dir()).unwrap();
    std::fs::write(
        layout.memory_dir().join("static_memory.json"),
        r#"{"static_memory": {"user_drawing_info": {"title": "Space captain"}}}"#,
    )
    .unwrap();

    let generator = Arc::new(MockGenerator::new());
    let registry = SessionRegistry::file_backed(
        DialogueConfig::default().with_data_dir(temp_dir.path()),
        Script::default(),
        generator.clone(),
    );
    let id = registry.create().await.unwrap();
    registry.process(&id, None).await.unwrap();
    registry.process(&id, Some("great")).await.unwrap();
    registry.process(&id, None).await.unwrap();

    let call = generator.last_call().expect("follow-up was generated");
    assert!(call.user_prompt.contains("- Drawing title: Space captain"));
    assert!(call.user_prompt.contains("- user: great"));
}

// =============================================================================
// TEST 5: Concurrent sessions share one log
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions_share_log() {
    let temp_dir = TempDir::new().unwrap();
    let registry = Arc::new(registry_in(&temp_dir));

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(registry.create().await.unwrap());
    }

    let mut handles = Vec::new();
    for id in ids.clone() {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            run_to_end(&registry, &id).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let log = JsonlTranscriptLog::new(DataLayout::new(temp_dir.path()).log_path());
    for id in &ids {
        let records = log.replay(id).await.unwrap();
        assert_eq!(records.len(), 17, "session {id}");
        let indices: Vec<_> = records.iter().map(|r| r.turn_index).collect();
        assert!(indices.windows(2).all(|w| w[0] <= w[1]));
    }

    let raw = std::fs::read_to_string(log.path()).unwrap();
    assert_eq!(raw.lines().count(), 17 * ids.len());
}

// =============================================================================
// TEST 6: Reopening a session id in a new process resumes it
// =============================================================================

#[tokio::test]
async fn test_reopened_session_resumes_from_log() {
    println!("\n=== TEST: Resume From Log ===\n");

    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let id = SessionId::from("fixed");
    {
        let registry = registry_in(&temp_dir);
        registry.create_with_id(id.clone()).await.unwrap();
        registry.process(&id, None).await.unwrap();
        registry.process(&id, Some("fun")).await.unwrap();
        registry.process(&id, None).await.unwrap();
    }

    let registry = registry_in(&temp_dir);
    registry.create_with_id(id.clone()).await.unwrap();
    {
        let session = registry.get(&id).await.unwrap();
        let session = session.lock().await;
        println!("Resumed at {} with {} turns", session.cursor(), session.turns().len());
        assert_eq!(session.turns().len(), 3);
        assert!(session.accepts_input());
        assert_eq!(session.dynamic_memory().len(), 3);
        assert_eq!(session.ledger().len(), 1);
    }

    registry.process(&id, Some("a rocket")).await.unwrap();

    let log = JsonlTranscriptLog::new(DataLayout::new(temp_dir.path()).log_path());
    let positions: Vec<_> = log
        .replay(&id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.turn_index, r.role.role()))
        .collect();
    assert_eq!(positions, vec![(1, "bot"), (1, "user"), (2, "bot"), (2, "user")]);
}
