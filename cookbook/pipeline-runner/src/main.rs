use std::path::PathBuf;
use std::process::ExitCode;

use agent_pipelines::pipelines::{self, PipelineConfig};
use agent_pipelines::{build_model, init_tracing, AppConfig, Result, Runner};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "pipeline-runner", about = "Run one of the bundled agent pipelines")]
struct Cli {
    /// Application config (model, tools, logging)
    #[arg(long, default_value = "config/pipelines.toml")]
    app_config: PathBuf,

    /// Bundled pipeline to run
    #[arg(short, long, default_value = "weather", conflicts_with = "pipeline_file")]
    pipeline: String,

    /// Run a pipeline defined in TOML instead of a bundled one
    #[arg(long)]
    pipeline_file: Option<PathBuf>,

    /// Print state and events as JSON
    #[arg(long)]
    json: bool,

    /// Keep a session open and read further turns from stdin
    #[arg(short, long)]
    interactive: bool,

    /// User input for the first turn
    input: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::from_env_or_file(&cli.app_config)?;
    init_tracing(&config.logging)?;
    let model = build_model(&config.model)?;

    let runner: Runner = match &cli.pipeline_file {
        Some(path) => PipelineConfig::from_file(path)?.build(model, &config.tools)?,
        None => pipelines::by_name(&cli.pipeline, model, &config.tools)?,
    };
    tracing::info!(app = %runner.app_name(), provider = %config.model.provider, "pipeline ready");

    let first = cli.input.join(" ");
    if !cli.interactive {
        let outcome = runner.run(first).await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        } else {
            println!("{}", outcome.reply);
        }
        return Ok(());
    }

    let mut session = runner.session();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending = (!first.is_empty()).then_some(first);
    loop {
        let input = match pending.take() {
            Some(input) => input,
            None => match lines.next_line().await? {
                Some(line) => line.trim().to_string(),
                None => break,
            },
        };
        if input.is_empty() {
            continue;
        }
        match session.send(input).await {
            Ok(outcome) => println!("{}", outcome.reply),
            Err(err) => println!("[{err}]"),
        }
    }
    if cli.json {
        println!("{}", serde_json::to_string_pretty(session.state())?);
    }
    Ok(())
}
