use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scanr::config::ConfigLoader;
use scanr::output::{create_formatter, exit_code, OutputFormat};
use scanr::review::{Pipeline, PipelineConfig};
use scanr::reviewer::{create_reviewer, MockReviewer, Reviewer};
use scanr::scanner::{self, walk, FileScanner};
use scanr::types::FileDescriptor;

#[derive(Parser)]
#[command(name = "scanr")]
#[command(version, about = "Concurrent AI code review for staged changes")]
struct Cli {
    /// Languages to review: comma-separated keys (go, python, ...) or
    /// numeric aliases 1-7. Prompts interactively when omitted.
    #[arg(long)]
    lang: Option<String>,

    /// Review only staged changes when inside a git repository.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    staged: bool,

    /// Hard cap on files entering the pipeline.
    #[arg(long, default_value_t = 100)]
    max_files: usize,

    /// Output format: text, json, jsonl.
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    /// Use the offline mock reviewer instead of a model API.
    #[arg(long)]
    mock: bool,

    /// Concurrent reviewers in flight.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    #[arg(long, short)]
    verbose: bool,

    #[arg(long, short)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<u8> {
    let languages = match &cli.lang {
        Some(value) => scanner::parse_language_list(value)?,
        None => scanner::prompt_for_languages()?,
    };

    // File selection shells out to git and walks the tree synchronously,
    // once, before the runtime starts.
    let cwd = std::env::current_dir()?;
    let files = collect_files(&cwd, &languages, cli.staged, cli.max_files)?;

    if files.is_empty() {
        tracing::info!("no files to review");
        println!("No files to review.");
        return Ok(0);
    }
    tracing::info!(count = files.len(), "selected files for review");

    let runtime = Runtime::new()?;
    runtime.block_on(run_review(cli, files))
}

async fn run_review(cli: Cli, files: Vec<Arc<FileDescriptor>>) -> anyhow::Result<u8> {
    let reviewer: Arc<dyn Reviewer> = if cli.mock {
        Arc::new(MockReviewer::new("mock").with_latency(
            Duration::from_millis(50),
            Duration::from_millis(20),
        ))
    } else {
        let config = ConfigLoader::load()?;
        create_reviewer(config)?
    };
    tracing::info!(reviewer = %reviewer.name(), "reviewer ready");

    let pipeline_config = PipelineConfig {
        max_workers: cli.workers,
        max_queue_size: cli.max_files.max(1),
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(pipeline_config, reviewer)?;
    let result = pipeline.run(files).await?;

    let color = matches!(cli.format, OutputFormat::Text) && console::colors_enabled();
    let formatter = create_formatter(cli.format, color);
    let stdout = std::io::stdout();
    formatter.format(&result, &mut stdout.lock())?;

    Ok(exit_code(Some(&result)))
}

/// Select review candidates: staged (or changed) files when inside a git
/// repository, a full gitignore-aware walk otherwise.
fn collect_files(
    cwd: &Path,
    languages: &[String],
    staged: bool,
    max_files: usize,
) -> anyhow::Result<Vec<Arc<FileDescriptor>>> {
    let extensions = scanner::extensions_for(languages);

    if let Some(repo) = scanner::detect_repository(cwd) {
        tracing::info!(root = %repo.root.display(), staged, "found git repository");
        let paths = if staged {
            repo.staged_files()?
        } else {
            repo.changed_files()?
        };

        let mut files = Vec::new();
        for relative in paths {
            let ext = relative
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{}", e.to_lowercase()))
                .unwrap_or_default();
            if !extensions.contains(&ext) {
                continue;
            }

            let absolute = repo.root.join(&relative);
            if let Some(descriptor) = walk::describe_file(
                &absolute,
                &repo.root,
                walk::MAX_FILE_SIZE,
                walk::MAX_FILE_LINES,
            ) {
                files.push(Arc::new(descriptor));
            }
            if max_files > 0 && files.len() >= max_files {
                break;
            }
        }
        return Ok(files);
    }

    tracing::warn!("not a git repository, scanning all files");
    let scanner = FileScanner::new(cwd, languages)?;
    Ok(scanner.scan(max_files)?)
}
