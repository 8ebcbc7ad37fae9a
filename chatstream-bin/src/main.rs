use std::path::PathBuf;

use chatstream_core::config::{Config, ResponseFormat};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod repl;
mod serve;

#[derive(Parser)]
#[command(author, version, about = "streaming chat client and relay", long_about = None)]
struct Cli {
    /// JSON or TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    EventStream,
    PlainText,
}

impl From<Format> for ResponseFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::EventStream => ResponseFormat::EventStream,
            Format::PlainText => ResponseFormat::PlainText,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat; Ctrl-C stops the reply in progress
    Chat {
        #[arg(long, help = "Endpoint path or absolute URL")]
        api: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long, value_enum)]
        format: Option<Format>,
    },
    /// Serve POST /api/chat, relaying to an OpenAI-compatible upstream
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Chat {
            api,
            base_url,
            format,
        } => {
            if let Some(api) = api {
                cfg.endpoint.api = api;
            }
            if let Some(base) = base_url {
                cfg.endpoint.base_url = base;
            }
            if let Some(f) = format {
                cfg.endpoint.format = f.into();
            }
            repl::run(&cfg).await?;
        }
        Commands::Serve { bind, model } => {
            if let Some(bind) = bind {
                cfg.relay.bind = bind;
            }
            if let Some(model) = model {
                cfg.relay.model = model;
            }
            serve::run(&cfg).await?;
        }
    }

    Ok(())
}
