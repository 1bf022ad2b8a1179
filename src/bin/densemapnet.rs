//! # densemapnet
//!
//! Command line driver for the disparity training and benchmarking pipeline. Runs the in-tree
//! mean-disparity baseline behind the network trait, real networks are wired in the same way.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use clap::Parser;
use std::path::PathBuf;
use std::process;
use tracing::info;

use cv_densemapnet::baseline::MeanDisparity;
use cv_densemapnet::images::ImageWriter;
use cv_densemapnet::prelude::*;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(author, version, about = "Training and EPE benchmarking for dense stereo disparity networks")]
struct Args {
    /// Load a weight checkpoint before training or prediction
    #[arg(short, long)]
    weights: Option<PathBuf>,

    /// Name of the staged dataset to load
    #[arg(short, long)]
    dataset: String,

    /// Number of training shards staged for the dataset
    #[arg(short = 'n', long, default_value_t = 1)]
    shards: u32,

    /// No training, predict on the held-out complete test split (requires --weights)
    #[arg(short, long)]
    predict: bool,

    /// Write qualitative images for every evaluated sample
    #[arg(short, long)]
    images: bool,

    /// No training, benchmark the EPE on the test split (requires --weights)
    #[arg(short = 't', long)]
    no_train: bool,

    /// Directory holding the staged dataset archives
    #[arg(long, default_value = "dataset")]
    data_dir: PathBuf,
}

// -----------------------------------------------------------------------------------------------
// MAIN
// -----------------------------------------------------------------------------------------------

fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut settings = Settings::new(&args.dataset, args.shards);
    settings.weights = args.weights;
    settings.predict = args.predict;
    settings.generate_images = args.images;
    settings.skip_training = args.no_train;
    settings.validate()?;

    info!("Dataset: {} ({} shards)", settings.dataset, settings.shard_count);
    if settings.profile.no_padding {
        info!("Padding disabled for this dataset");
    }

    let loader = DatasetLoader::new(&args.data_dir, &settings.dataset);
    let shard_indices: Vec<u32> = (1..=settings.shard_count).collect();
    let range = loader.disparity_range(&shard_indices, settings.predict)?;
    let test = loader.load_test_split(&range, settings.predict)?;
    settings.record_dims(test.dims());

    let mut net = MeanDisparity::new();
    if let Some(path) = &settings.weights {
        info!("Loading weights from {}", path.display());
        net.load_weights(path)?;
    }

    let images = ImageWriter::new("images")?;
    let evaluator = Evaluator::new(settings.profile, range.max, images, settings.generate_images);

    let predict = settings.predict;
    let mut trainer = Trainer::new(settings, loader, range, test, Box::new(net), evaluator);

    if predict {
        trainer.run_prediction()?;
    } else {
        trainer.train_network()?;
    }

    Ok(())
}
