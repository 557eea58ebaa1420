mod collect;
mod replay;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cflow-cli")]
#[command(about = "ContentFlow pipeline command line interface")]
struct Cli {
    /// Pipeline file to use instead of `CFLOW_PIPELINE_PATH`
    #[arg(long, global = true)]
    pipeline: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate the environment and pipeline configuration, then print a summary
    CheckConfig,
    /// Run one fetch against a configured source and normalize the result
    Collect {
        /// Source name from the pipeline file
        #[arg(long)]
        source: String,

        /// Persist the advanced cursor so the server resumes after this fetch
        #[arg(long)]
        commit: bool,
    },
    /// Replay a JSON-lines file of raw payloads through normalization and
    /// trend detection
    Replay {
        /// One raw platform payload per line
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("warn"))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("cflow-cli: run with --help to list commands");
        return Ok(());
    };

    let config = cflow_core::load_app_config()?;
    let pipeline_path = cli.pipeline.unwrap_or_else(|| config.pipeline_path.clone());
    let pipeline = cflow_core::load_pipeline_config(&pipeline_path)?;

    match command {
        Commands::CheckConfig => {
            println!("env: {}", config.env);
            println!("bind_addr: {}", config.bind_addr);
            println!("state_dir: {}", config.state_dir.display());
            println!("sink_dir: {}", config.sink_dir.display());
            println!("pipeline: {}", pipeline_path.display());
            for source in &pipeline.sources {
                println!(
                    "  source {} ({}) enabled={} poll={}s pages<={}",
                    source.name,
                    source.platform,
                    source.enabled,
                    source.poll_interval_secs,
                    source.page_limit
                );
            }
            for window in &pipeline.windows {
                println!(
                    "  window {} retention={}s decayed={}",
                    window.name,
                    window.retention_secs,
                    window.is_decayed()
                );
            }
            println!(
                "  trend window={} cadence={}s",
                pipeline.trend.window, pipeline.trend.cadence_secs
            );
            println!(
                "  recommend window={} flush={}s",
                pipeline.recommend.window, pipeline.recommend.flush_secs
            );
            println!("configuration ok");
        }
        Commands::Collect { source, commit } => {
            collect::run_collect(&config, &pipeline, &source, commit).await?;
        }
        Commands::Replay { file } => {
            replay::run_replay(&pipeline, &file).await?;
        }
    }

    Ok(())
}
