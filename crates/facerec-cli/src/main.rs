use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod dataset_manager;
mod detector;
mod imaging;
mod prompt;

use commands::Context;
use config::{Folders, Settings};

#[derive(Parser)]
#[command(name = "facerec", about = "Incremental face recognizer — train, update, recognize")]
struct Cli {
    /// Folder with configuration files
    #[arg(short, long, global = true, env = "FACEREC_CONFIG_DIR")]
    config: Option<PathBuf>,
    /// Folder with images for training, one sub-folder per identity
    #[arg(short, long, global = true, env = "FACEREC_DATASET_DIR")]
    dataset: Option<PathBuf>,
    /// Folder with the face detector model
    #[arg(long, global = true, env = "FACEREC_CASCADE_DIR")]
    cascade: Option<PathBuf>,
    /// Disregard stored model and train recognizer again
    #[arg(short = 't', long, global = true)]
    retrain: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the recognizer if needed and list known identities
    Train,
    /// Detect and recognize faces on a single image
    Recognize {
        /// Image to search for faces
        #[arg(short, long)]
        input: PathBuf,
        /// Folder to write recognized face crops to
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Add labeled images (one sub-folder per identity) to the trained recognizer
    Update {
        /// Folder with one sub-folder of images per identity
        #[arg(short, long)]
        input: PathBuf,
        /// Answer yes to every prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Run face detection on the whole dataset and write the crops
    PreprocessDataset {
        /// Folder to write the face crops to, one sub-folder per identity
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Run face detection on a single image
    PreprocessImage {
        /// Image to search for faces
        #[arg(short, long)]
        input: PathBuf,
        /// Folder to write the face crops to
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the stored model and dataset state
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let folders_path = config::folders_file();
    let folders = Folders {
        config: cli.config,
        dataset: cli.dataset,
        cascade: cli.cascade,
    }
    .or(&Folders::load(&folders_path));

    let config_dir = folders.require_config()?.to_path_buf();
    tracing::info!(
        config = %config_dir.display(),
        dataset = %folders.dataset.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| "(empty)".into()),
        cascade = %folders.cascade.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| "(empty)".into()),
        "folders resolved"
    );

    let ctx = Context {
        settings: Settings::load(&config_dir)?,
        config_dir,
        folders,
        retrain: cli.retrain,
    };

    match &cli.command {
        Commands::Train => commands::train(&ctx)?,
        Commands::Recognize { input, output } => commands::recognize(&ctx, input, output.as_deref())?,
        Commands::Update { input, yes } => commands::update(&ctx, input, *yes)?,
        Commands::PreprocessDataset { output } => commands::preprocess_dataset(&ctx, output)?,
        Commands::PreprocessImage { input, output } => {
            commands::preprocess_image(&ctx, input, output.as_deref())?
        }
        Commands::Status => commands::status(&ctx)?,
    }

    ctx.folders.save(&folders_path)?;
    Ok(())
}
