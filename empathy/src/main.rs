//! Terminal front end for the staged empathy dialogue.
//!
//! ```bash
//! cargo run -p empathy -- --user-id kid-7 --data-dir data
//! ```

mod headless;
mod input;

use anyhow::{Context, Result};
use clap::Parser;
use claude::Claude;
use empathy_core::{ClaudeGenerator, DialogueConfig, Script, SessionId, SessionRegistry};
use headless::ConsoleConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "empathy", about = "Staged empathetic dialogue in the terminal")]
struct Cli {
    /// Directory holding memory, logs and exports
    #[arg(long, env = "EMPATHY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Model used for generated turns
    #[arg(long, env = "MODEL_NAME")]
    model: Option<String>,

    /// Participant identifier written into exports
    #[arg(long, env = "EMPATHY_USER_ID")]
    user_id: Option<String>,

    /// Resume or name a session instead of generating an id
    #[arg(long)]
    session_id: Option<String>,

    /// JSON file overriding the built-in script
    #[arg(long)]
    script: Option<PathBuf>,

    /// Where exports are written when the dialogue ends [default: <data-dir>/exports]
    #[arg(long)]
    export_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if std::env::var("ANTHROPIC_API_KEY").is_err() {
        eprintln!("Error: ANTHROPIC_API_KEY environment variable not set.");
        eprintln!("Please set it in .env file or with: export ANTHROPIC_API_KEY=your_key_here");
        std::process::exit(1);
    }

    let mut config = DialogueConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(model) = cli.model {
        config = config.with_model(model);
    }
    if let Some(user_id) = cli.user_id {
        config = config.with_user_id(user_id);
    }

    let script = match &cli.script {
        Some(path) => Script::load_json(path)
            .await
            .with_context(|| format!("loading script from {}", path.display()))?,
        None => Script::default(),
    };

    let client = Claude::from_env().context("creating Claude client")?;
    let generator = ClaudeGenerator::from_config(client, &config);
    info!(model = generator.model(), data_dir = %config.data_dir.display(), "starting");

    let console = ConsoleConfig {
        input_char_budget: config.input_char_budget,
        export_dir: cli.export_dir.unwrap_or_else(|| config.layout().export_dir()),
    };

    let registry = SessionRegistry::file_backed(config, script, Arc::new(generator));
    let id = match cli.session_id {
        Some(id) => registry.create_with_id(SessionId::from(id)).await?,
        None => registry.create().await?,
    };
    let session = registry.get(&id).await?;

    headless::run(&session, console).await?;
    Ok(())
}
