use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use video_highlights_lib::config::Settings;
use video_highlights_lib::database::VideoMetadata;
use video_highlights_lib::App;

#[derive(Parser, Debug)]
#[command(
    name = "video-highlights",
    version,
    about = "Extract, index and search highlight moments of transcribed videos"
)]
struct Cli {
    /// YAML settings file; every field is optional.
    #[arg(long, global = true, env = "HIGHLIGHTS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the SQLite database path.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Judge a transcript's segments and index the highlights of the video.
    Index {
        /// Transcript JSON: `[{start, end, text}]` or `{"segments": [...]}`.
        #[arg(long)]
        transcript: PathBuf,

        /// Video filename; identifies the video across runs.
        #[arg(long)]
        filename: String,

        /// Video duration in seconds.
        #[arg(long)]
        duration: f64,

        #[arg(long, default_value_t = 30.0)]
        fps: f64,

        #[arg(long, default_value_t = 1920)]
        width: i64,

        #[arg(long, default_value_t = 1080)]
        height: i64,
    },

    /// Run the retrieval HTTP API.
    Serve {
        /// Address to bind (host:port); overrides settings.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Ask a question against the index and print the matching highlights.
    Ask {
        text: String,

        #[arg(long)]
        video_id: Option<i64>,

        #[arg(long)]
        top_k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    if let Some(db) = cli.db {
        settings.database_path = db;
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, shutting down");
            on_signal.cancel();
        }
    });

    match cli.command {
        Command::Index {
            transcript,
            filename,
            duration,
            fps,
            width,
            height,
        } => {
            let app = App::open(settings)?;
            app.check_models().await;
            let video = VideoMetadata {
                filename,
                duration,
                fps,
                width,
                height,
            };
            let report = app
                .index_transcript(&transcript, &video, &cancel)
                .await
                .with_context(|| format!("failed to index {}", video.filename))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                settings.bind = bind;
            }
            let app = App::open(settings)?;
            app.check_models().await;
            app.serve(cancel).await?;
        }
        Command::Ask {
            text,
            video_id,
            top_k,
        } => {
            let app = App::open(settings)?;
            let results = app.scorer().search(&text, video_id, top_k).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }

    Ok(())
}
