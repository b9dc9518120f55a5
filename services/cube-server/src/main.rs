//! Data cube server command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cube_server::{ContextOptions, ServerConfig, ServiceContext};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "cube-server")]
#[command(about = "Multi-resolution data cube server")]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long, env = "CUBE_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured dataset identifiers
    Datasets,

    /// Describe the tile pyramid of a dataset
    Levels { ds_id: String },

    /// Render one tile to a file
    Tile {
        ds_id: String,
        var_name: String,
        level: i64,
        x: i64,
        y: i64,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let builder = FmtSubscriber::builder().with_env_filter(filter).with_writer(std::io::stderr);
    if args.json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args)?;

    let config = ServerConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?
        .apply_env();
    let ctx = ServiceContext::new(config, ContextOptions::default())?;

    match &args.command {
        Command::Datasets => {
            for ds_id in ctx.dataset_ids().await? {
                println!("{}", ds_id);
            }
        }
        Command::Levels { ds_id } => {
            let ml = ctx.get_ml_dataset(ds_id).await?;
            let mut description = ml.tile_grid().describe();
            description["ds_id"] = serde_json::Value::from(ml.ds_id());
            println!("{}", serde_json::to_string_pretty(&description)?);
        }
        Command::Tile {
            ds_id,
            var_name,
            level,
            x,
            y,
            output,
        } => {
            let bytes = ctx.get_tile(ds_id, var_name, *level, *x, *y).await?;
            tokio::fs::write(output, &bytes)
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            info!(path = %output.display(), size = bytes.len(), "Wrote tile");
        }
    }

    ctx.close().await;
    Ok(())
}
