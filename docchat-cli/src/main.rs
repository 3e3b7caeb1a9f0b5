//! Docchat CLI: ask questions about a folder of documents.
//!
//! Loads `.txt`/`.md` files, builds or reuses a persisted vector index and
//! answers questions in a loop or once.

mod loader;
mod repl;

use anyhow::Context;
use clap::Parser;
use dialoguer::Confirm;
use docchat_core::{IndexStore, RagConfig, RagPipeline, create_embedder, create_language_model};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Docchat: chat with your documents
#[derive(Parser, Debug)]
#[command(name = "docchat", version, about, long_about = None)]
struct Cli {
    /// Question to answer (starts interactive mode if omitted)
    question: Option<String>,

    /// Folder with the documents to index (only .txt and .md files are read)
    #[arg(short, long, default_value = "data")]
    data: PathBuf,

    /// Workspace directory (holds .docchat/config.toml and the default index)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Where to persist the index [default: <workspace>/.docchat/index]
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// Rebuild the index even if a saved one exists
    #[arg(long)]
    rebuild: bool,

    /// Use the offline hashed embedder instead of the configured provider
    #[arg(long)]
    local_embeddings: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn,docchat_core=info",
        1 => "debug",
        _ => "trace",
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "docchat", "docchat")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "docchat.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut config = docchat_core::load_config(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    apply_overrides(&mut config, &cli, &workspace);

    if let Some(Commands::Config) = cli.command {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    if ask_rebuild(&config)? {
        config.index.force_rebuild = true;
    }

    let data_dir = if cli.data.is_absolute() {
        cli.data.clone()
    } else {
        workspace.join(&cli.data)
    };
    let documents = loader::load_documents(&data_dir)?;

    let embedder = create_embedder(&config.provider).context("Embedding provider setup failed")?;
    let llm = create_language_model(&config.provider).context("Language model setup failed")?;
    let pipeline = RagPipeline::new(config, embedder, llm)?;

    let (handle, report) = pipeline.ingest(&documents).await?;
    if !cli.quiet {
        println!(
            "  Indexed {} chunks from {} documents ({} empty skipped).",
            report.chunks, report.documents, report.skipped_documents
        );
    }

    match cli.question {
        Some(question) => repl::run_single_question(&pipeline, &handle, &question).await,
        None => repl::run_interactive(&pipeline, &handle, &data_dir).await,
    }
}

fn apply_overrides(config: &mut RagConfig, cli: &Cli, workspace: &Path) {
    if let Some(dir) = &cli.index_dir {
        config.index.dir = Some(dir.clone());
    }
    if config.index.dir.is_none() {
        config.index.dir = Some(workspace.join(".docchat").join("index"));
    }
    if cli.rebuild {
        config.index.force_rebuild = true;
    }
    if cli.local_embeddings {
        config.provider.embedder = docchat_core::config::EmbedderKind::Local;
    }
}

/// Offer to discard a saved index. Only asks on an interactive terminal.
fn ask_rebuild(config: &RagConfig) -> anyhow::Result<bool> {
    if config.index.force_rebuild || !std::io::stdin().is_terminal() {
        return Ok(false);
    }
    let Some(dir) = &config.index.dir else {
        return Ok(false);
    };
    if !IndexStore::new(dir).exists() {
        return Ok(false);
    }
    let rebuild = Confirm::new()
        .with_prompt(format!(
            "A saved index exists at {}. Rebuild it from scratch?",
            dir.display()
        ))
        .default(false)
        .interact()?;
    Ok(rebuild)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_index_dir_is_in_workspace() {
        let cli = Cli::parse_from(["docchat"]);
        let mut config = RagConfig::default();
        apply_overrides(&mut config, &cli, Path::new("/ws"));
        assert_eq!(
            config.index.dir,
            Some(PathBuf::from("/ws").join(".docchat").join("index"))
        );
        assert!(!config.index.force_rebuild);
    }

    #[test]
    fn test_data_help_names_supported_files() {
        use clap::CommandFactory;
        let command = Cli::command();
        let data = command
            .get_arguments()
            .find(|arg| arg.get_id() == "data")
            .unwrap();
        let help = data.get_help().unwrap().to_string();
        assert!(help.contains(".txt") && help.contains(".md"));
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "docchat",
            "--rebuild",
            "--local-embeddings",
            "--index-dir",
            "/tmp/idx",
            "what is this?",
        ]);
        let mut config = RagConfig::default();
        apply_overrides(&mut config, &cli, Path::new("/ws"));
        assert_eq!(config.index.dir, Some(PathBuf::from("/tmp/idx")));
        assert!(config.index.force_rebuild);
        assert_eq!(
            config.provider.embedder,
            docchat_core::config::EmbedderKind::Local
        );
        assert_eq!(cli.question.as_deref(), Some("what is this?"));
    }
}
