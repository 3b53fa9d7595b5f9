//! sftgen CLI - resumable SFT dataset generation from text segments.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sftgen::checkpoint::list_datasets;
use sftgen::{
    Config, Event, EventSink, GenerationMode, GenerationPipeline, HttpBackend, JsonLinesSink,
    ProgressBarSink, RunOptions,
};
use std::path::{Path, PathBuf};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "sftgen")]
#[command(version)]
#[command(about = "Generate SFT datasets from text segments with a local or hosted model")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct GenerateArgs {
    /// Path to input segments JSONL file
    #[arg(short, long)]
    input: PathBuf,

    /// Directory for train.jsonl / valid.jsonl (defaults to output.dir)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Example shape: qa, style, chat or instruct
    #[arg(short, long, default_value = "qa")]
    mode: GenerationMode,

    /// Model name (overrides backend.model)
    #[arg(long)]
    model: Option<String>,

    /// Continue after the examples already generated
    #[arg(long)]
    resume: bool,

    /// Process only the first N segments
    #[arg(long)]
    max_samples: Option<usize>,

    /// Show a progress bar instead of the JSON event stream
    #[arg(long)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a dataset from a segments JSONL file
    Generate(GenerateArgs),

    /// List datasets found under a directory
    Inspect {
        /// Directory to search
        root: PathBuf,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {path:?}")),
        None => Ok(Config::default()),
    }
}

fn print_example_config() {
    let example = r#"# sftgen configuration file

[backend]
# "ollama" (native /api/chat) or "openai" (any /chat/completions server)
flavor = "ollama"
base_url = "http://localhost:11434"
model = "qwen3:8b"
# api_key = "${MY_API_KEY}"
# api_key_env = "OPENAI_API_KEY"
timeout_secs = 300
think = false

[generation]
segment_char_cap = 2000
similarity_threshold = 0.6
split_ratio = 0.9
probe_max_tokens = 64
max_samples = 0  # 0 = all

[generation.style]
temperature = 0.9
max_tokens = 4096

[prompts]
# qa = { system = "prompts/qa_system.md", user = "prompts/qa_user.md" }

[output]
dir = "dataset"
journal_file = "generated.jsonl"
"#;
    println!("{example}");
}

fn build_backend(config: &Config) -> Result<HttpBackend> {
    config.validate().context("Invalid configuration")?;
    let api_key = config
        .resolve_api_key()
        .context("Failed to resolve API key")?;
    Ok(HttpBackend::new(&config.backend, api_key)?)
}

async fn generate(config_path: Option<&Path>, args: GenerateArgs, verbose: bool) -> Result<()> {
    let mut sink: Box<dyn EventSink> = if args.pretty {
        Box::new(ProgressBarSink::new(verbose))
    } else {
        Box::new(JsonLinesSink::stdout())
    };

    let setup = load_config(config_path).and_then(|mut config| {
        if let Some(model) = args.model {
            config.backend.model = model;
        }
        let backend = build_backend(&config)?;
        Ok((config, backend))
    });
    let (config, backend) = match setup {
        Ok(setup) => setup,
        Err(e) => {
            sink.emit(&Event::error(format!("{e:#}")));
            return Err(e);
        }
    };

    let options = RunOptions {
        input: args.input,
        output_dir: args.output_dir.unwrap_or_else(|| config.output.dir.clone()),
        mode: args.mode,
        resume: args.resume,
        max_samples: args.max_samples,
    };

    let mut pipeline = GenerationPipeline::new(backend, config);
    let stats = pipeline.run(&options, sink.as_mut()).await?;

    if args.pretty {
        println!("\n=== Generation Complete ===");
        println!("Segments:    {}", stats.total_segments);
        println!("Resumed at:  {}", stats.resumed_from);
        println!("Accepted:    {}", stats.total_accepted);
        println!("Failed:      {}", stats.total_failed);
        println!("Too similar: {}", stats.similarity_rejected);
        println!("Train/valid: {}/{}", stats.train_count, stats.valid_count);
        println!("Throughput:  {:.0}/hr", stats.throughput_per_hour);
        println!("Runtime:     {:.1}s", stats.runtime_secs);
        println!("Output:      {:?}", options.output_dir);
    }
    Ok(())
}

fn inspect(root: &Path) -> Result<()> {
    let datasets = list_datasets(root).with_context(|| format!("Failed to scan {root:?}"))?;
    if datasets.is_empty() {
        println!("No datasets under {}", root.display());
        return Ok(());
    }

    for dataset in datasets {
        let label = dataset
            .manifest
            .as_ref()
            .map(|m| format!("{} / {}", m.mode, m.model))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  train {} ({} B)  valid {} ({} B)  {}  {}",
            dataset.dir.display(),
            dataset.train_count,
            dataset.train_bytes,
            dataset.valid_count,
            dataset.valid_bytes,
            dataset.modified.format("%Y-%m-%d %H:%M"),
            label
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => print_example_config(),

        Commands::Validate => {
            let config = load_config(cli.config.as_deref())?;
            config.validate().context("Invalid configuration")?;
            config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            info!("Configuration is valid");
            info!("  Backend: {:?} at {}", config.backend.flavor, config.backend.base_url);
            info!("  Model: {}", config.backend.model);
            info!(
                "  Similarity threshold: {:.0}%",
                config.generation.similarity_threshold * 100.0
            );
            info!("  Split ratio: {}", config.generation.split_ratio);
        }

        Commands::Inspect { root } => inspect(&root)?,

        Commands::Generate(args) => generate(cli.config.as_deref(), args, cli.verbose).await?,
    }

    Ok(())
}
