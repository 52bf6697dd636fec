//! voicewire entry point.

mod convert;
mod local;
mod telephony;

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voicewire_config::Settings;
use voicewire_core::{ChatAgent, Synthesizer, Transcriber};
use voicewire_openai::{OpenAiChatAgent, OpenAiSynthesizer, WhisperTranscriber};

#[derive(Parser)]
#[command(name = "voicewire", version, about = "Real-time voice conversation runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive microphone/speaker session. Enter submits the turn;
    /// Enter again during the reply barges in.
    Local,
    /// Serve the telephony websocket endpoint.
    Telephony,
    /// Offline mu-law/WAV codec smoke test.
    Convert,
}

/// The external collaborators, behind their seams.
pub struct Services {
    pub transcriber: Arc<dyn Transcriber>,
    pub agent: Arc<dyn ChatAgent>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl Services {
    fn from_settings(settings: &Settings) -> Self {
        let http = reqwest::Client::new();
        let key = settings.openai.api_key.clone();
        Self {
            transcriber: Arc::new(WhisperTranscriber::new(http.clone(), key.clone())),
            agent: Arc::new(OpenAiChatAgent::new(http.clone(), key.clone())),
            synthesizer: Arc::new(OpenAiSynthesizer::new(http, key)),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv_loaded = dotenvy::dotenv().is_ok();
    init_tracing();
    if !dotenv_loaded {
        tracing::warn!("cannot load .env file");
    }

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Convert => convert::run(),
        Command::Local => run_with_settings(local::run).await,
        Command::Telephony => run_with_settings(telephony::run).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "fatal");
            ExitCode::FAILURE
        }
    }
}

async fn run_with_settings<F, Fut>(mode: F) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnOnce(Settings, Services) -> Fut,
    Fut: std::future::Future<Output = Result<(), Box<dyn std::error::Error>>>,
{
    let settings = Settings::load()?;
    let services = Services::from_settings(&settings);
    mode(settings, services).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,voicewire=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
