use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod render;
mod repl;

use docchat_core::{load_config, ChatEngine, DocchatConfig, SessionHost};

#[derive(Parser)]
#[command(name = "docchat", version, about = "Chat with a document using retrieval-augmented generation")]
struct Cli {
    #[arg(
        long,
        default_value = "~/.docchat",
        help = "Home directory (holds docchat.yaml and logs/)"
    )]
    home: PathBuf,

    #[arg(long, help = "Config file, defaults to <home>/docchat.yaml")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Load a document and chat about it")]
    Chat {
        #[arg(long, help = "PDF or text file to load first")]
        document: PathBuf,
    },
    #[command(about = "Load a document and answer a single question")]
    Ask {
        #[arg(long, help = "PDF or text file to load")]
        document: PathBuf,
        #[arg(help = "Question to ask")]
        question: String,
    },
    #[command(about = "Validate configuration")]
    Validate {
        #[arg(long, help = "Also contact the language model endpoint")]
        online: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // Expand ~ to home directory
    if cli.home.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            cli.home = PathBuf::from(home).join(cli.home.strip_prefix("~").unwrap_or(&cli.home));
        }
    }

    let log_dir = cli.home.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log dir: {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "docchat.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.home.join("docchat.yaml"));

    match command {
        Commands::Validate { online } => {
            let config = load_config(&config_path)?;
            println!("Config valid ({}).", config_path.display());
            print!("{}", render::config_summary(&config)?);

            let engine = ChatEngine::from_config(&config)?;
            if !engine.embedder().is_semantic() {
                println!(
                    "Note: embedding provider '{}' does not capture meaning; use it for testing only.",
                    engine.embedder().model_id()
                );
            }
            if online {
                engine.check_llm().await?;
                println!("Language model endpoint reachable.");
            }
        }
        Commands::Chat { document } => {
            let config = load_config(&config_path)?;
            let host = build_host(&config)?;
            repl::run(&host, &document).await?;
        }
        Commands::Ask { document, question } => {
            let config = load_config(&config_path)?;
            let host = build_host(&config)?;
            let id = host.create().await;
            load_document(&host, &id, &document).await?;
            let answer = host.ask(&id, &question).await?;
            println!("{}", answer.text);
            println!();
            print!("{}", render::sources(&answer.sources));
        }
    }

    Ok(())
}

fn build_host(config: &DocchatConfig) -> Result<SessionHost> {
    let engine = ChatEngine::from_config(config)?;
    Ok(SessionHost::new(engine))
}

pub(crate) async fn load_document(
    host: &SessionHost,
    id: &docchat_schema::SessionId,
    path: &Path,
) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read document: {}", path.display()))?;
    let source = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    host.ingest(id, &source, bytes).await?;
    let summary = host.snapshot(id).await?;
    println!("Loaded {} ({} chunks).", source, summary.chunks);
    Ok(())
}
