//! Line-oriented dialogue front end.
//!
//! Automated turns are printed as they are produced; every non-command line
//! is the participant's answer. Lines starting with `#` are commands.

use crate::input::truncate_visible;
use empathy_core::{ProcessOutcome, Session, SessionError};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

/// Settings for the console loop.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Non-whitespace characters kept from each answer.
    pub input_char_budget: usize,
    /// Where exports go when the dialogue ends.
    pub export_dir: PathBuf,
}

fn print_help() {
    println!("  #quit          - Leave the session");
    println!("  #status        - Show where the dialogue is");
    println!("  #export [dir]  - Write the transcript (after the dialogue ends)");
    println!("  #help          - Show this help");
    println!("  (an empty line retries a failed turn)");
}

/// Produce automated turns until the participant is due to answer, the
/// dialogue ends, or a turn fails.
async fn drive(session: &mut Session) -> Result<(), SessionError> {
    while !session.is_terminal() && !session.accepts_input() {
        print!("[THINKING]");
        io::stdout().flush().ok();

        let result = session.process(None).await;
        print!("\r          \r");

        if let ProcessOutcome::Advance { .. } = result? {
            if let Some(turn) = session.turns().last() {
                println!("[{}] {}", session.script().persona, turn.text);
                println!();
            }
        }
    }
    Ok(())
}

/// Report a failed turn. Errors a retry cannot fix end the console loop.
fn report(e: SessionError) -> Result<(), SessionError> {
    println!("[ERROR] {e}");
    if e.is_retryable() {
        println!("(press Enter to try again)");
        Ok(())
    } else {
        Err(e)
    }
}

async fn archive(session: &mut Session, dir: &Path) {
    match session.export_to(dir).await {
        Ok(paths) => {
            println!("[EXPORTED] {}", paths.json.display());
            println!("[EXPORTED] {}", paths.csv.display());
        }
        Err(e) => println!("[ERROR] Export failed: {e}"),
    }
}

fn print_status(session: &Session) {
    println!("[STATUS]");
    println!("  Session: {}", session.id());
    println!("  Stage: {}", session.stage_label());
    println!("  Cursor: {}", session.cursor());
    println!("  Turns: {}", session.turns().len());
    println!("  Questions asked: {}", session.ledger().len());
    println!("  Waiting for you: {}", session.accepts_input());
    println!("  Finished: {}", session.is_terminal());
}

/// Run one session on stdin/stdout until it ends or the participant quits.
pub async fn run(session: &Mutex<Session>, config: ConsoleConfig) -> Result<(), SessionError> {
    println!("=== Empathy Dialogue ===");
    {
        let session = session.lock().await;
        println!("Session: {}", session.id());
        println!("Talking with: {}", session.script().persona);
    }
    println!();
    println!("Commands:");
    print_help();
    println!();

    if let Err(e) = drive(&mut *session.lock().await).await {
        report(e)?;
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };
        let line = line.trim();
        let mut session = session.lock().await;

        if let Some(command) = line.strip_prefix('#') {
            let parts: Vec<&str> = command.split_whitespace().collect();
            match parts.first().copied() {
                Some("quit") | Some("exit") => {
                    println!("Goodbye!");
                    break;
                }
                Some("status") => print_status(&session),
                Some("export") => {
                    if session.is_terminal() {
                        let dir = parts.get(1).map(PathBuf::from).unwrap_or_else(|| config.export_dir.clone());
                        archive(&mut session, &dir).await;
                    } else {
                        println!("[ERROR] The transcript can be exported once the dialogue has ended.");
                    }
                }
                Some("help") => {
                    println!("[HELP]");
                    print_help();
                }
                _ => println!("[ERROR] Unknown command. Type #help for help."),
            }
            io::stdout().flush().ok();
            continue;
        }

        if session.is_terminal() {
            println!("[END] The dialogue is over. Use #export or #quit.");
            continue;
        }

        if !line.is_empty() && session.accepts_input() {
            let (answer, cut) = truncate_visible(line, config.input_char_budget);
            if cut {
                warn!(budget = config.input_char_budget, "answer truncated");
                println!("[NOTE] Your answer was shortened to {} characters.", config.input_char_budget);
            }
            if let Err(e) = session.process(Some(&answer)).await {
                report(e)?;
                continue;
            }
        }

        if let Err(e) = drive(&mut session).await {
            report(e)?;
            continue;
        }

        if session.is_terminal() && !session.archive_ready() {
            println!("[END] Thank you for talking today.");
            archive(&mut session, &config.export_dir).await;
        }
    }

    Ok(())
}
