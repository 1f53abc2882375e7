//! info-nas CLI
//!
//! Pretrains candidate networks, extracts their IO dataset and trains the
//! semi-supervised architecture embedding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use info_nas::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use info_nas::dataset::semi::IoShapes;
use info_nas::dataset::{
    dataset_from_pretrained, encode_graphs, load_io_dataset, split_unlabeled, SemiSupervisedDataset,
    ValidationSet,
};
use info_nas::model::config::{IoConfig, LocalDatasetConfig};
use info_nas::model::{ConfigSource, TrainOptions};
use info_nas::nasbench::pretrain::{pretrain_and_save, PretrainOptions};
use info_nas::nasbench::{is_net_pretrained, CellNetworkConfig, NasBenchIndex, NetworkGraph};
use info_nas::training::{train, BatchEvaluator, ValidationEvaluator};
use info_nas::utils::logging::{init_logging, LogConfig};

/// Semi-supervised architecture embeddings
#[derive(Parser, Debug)]
#[command(name = "info-nas")]
#[command(version)]
#[command(about = "Semi-supervised NAS embeddings from graphs and network activations", long_about = None)]
struct Cli {
    /// Verbosity: -v epoch summaries, -vv batch progress
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Data defaults (validation batch size, splits, IO layers) as JSON
    #[arg(long)]
    dataset_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train and store candidate networks
    Pretrain {
        /// Benchmark index `{hash: {ops, adjacency}}`
        #[arg(long)]
        nasbench: PathBuf,

        /// Training images and labels
        #[arg(long)]
        train_data: PathBuf,

        /// Validation images and labels
        #[arg(long)]
        valid_data: PathBuf,

        /// Where trained networks are stored
        #[arg(short, long, default_value = "data/pretrained")]
        out_dir: PathBuf,

        /// Hashes to train; all of the index when absent
        #[arg(long, num_args = 1..)]
        hashes: Vec<String>,

        /// Overrides the configured number of pretraining epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        #[arg(long, default_value = "0.001")]
        learning_rate: f64,

        /// Retrain networks that are already stored
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Extract the IO dataset from every pretrained network
    BuildDataset {
        #[arg(long)]
        nasbench: PathBuf,

        #[arg(long, default_value = "data/pretrained")]
        pretrained_dir: PathBuf,

        /// Images the networks are evaluated on
        #[arg(long)]
        valid_data: PathBuf,

        #[arg(short, long, default_value = "data/io_dataset.json")]
        out: PathBuf,

        /// Layer whose input is recorded
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        nth_input: isize,

        /// Layer whose output is recorded; defaults to the configured layer
        #[arg(long, allow_hyphen_values = true)]
        nth_output: Option<isize>,

        #[arg(long, default_value = "1")]
        seed: u64,
    },

    /// Train the embedding models
    Train {
        #[arg(long)]
        nasbench: PathBuf,

        #[arg(long, default_value = "data/io_dataset.json")]
        io_dataset: PathBuf,

        /// Model configuration (JSON or TOML); built-in defaults when absent
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Runs are written to timestamped directories below this one
        #[arg(long, default_value = "checkpoints")]
        checkpoint_root: PathBuf,

        #[arg(short, long, default_value = "8")]
        epochs: usize,

        #[arg(short, long, default_value = "32")]
        batch_size: usize,

        #[arg(long, default_value = "1")]
        seed: u64,

        /// Fraction of labeled records held out for validation
        #[arg(long, default_value = "0.1")]
        labeled_test_size: f64,

        /// Also train an unsupervised reference autoencoder
        #[arg(long, default_value = "false")]
        use_reference: bool,

        #[arg(long, default_value = "1000")]
        print_frequency: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = init_logging(&LogConfig::from_verbosity(cli.verbose.saturating_add(1)));
    print_banner();

    let local = match &cli.dataset_config {
        Some(path) => LocalDatasetConfig::load(path)?,
        None => LocalDatasetConfig::default(),
    };

    match cli.command {
        Commands::Pretrain {
            nasbench,
            train_data,
            valid_data,
            out_dir,
            hashes,
            epochs,
            learning_rate,
            force,
        } => {
            let options = PretrainOptions {
                epochs: epochs.unwrap_or(local.pretrain.num_epochs),
                batch_size: local.validation.batch_size,
                learning_rate,
            };
            cmd_pretrain(&nasbench, &train_data, &valid_data, &out_dir, hashes, &options, force)?;
        }

        Commands::BuildDataset {
            nasbench,
            pretrained_dir,
            valid_data,
            out,
            nth_input,
            nth_output,
            seed,
        } => {
            let io = IoConfig::new(nth_input, nth_output.unwrap_or(local.io.nth_output));
            cmd_build_dataset(&nasbench, &pretrained_dir, &valid_data, &out, &io, seed, &local)?;
        }

        Commands::Train {
            nasbench,
            io_dataset,
            config,
            checkpoint_root,
            epochs,
            batch_size,
            seed,
            labeled_test_size,
            use_reference,
            print_frequency,
        } => {
            let source = match config {
                Some(path) => ConfigSource::Path(path),
                None => ConfigSource::Default,
            };
            let options = TrainOptions {
                batch_size,
                seed,
                epochs,
                verbose: cli.verbose,
                print_frequency,
                use_reference_model: use_reference,
                checkpoint_dir: run_directory(&checkpoint_root),
                ..TrainOptions::default()
            };
            cmd_train(&nasbench, &io_dataset, &source, options, labeled_test_size, &local)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ==============================================================
   info-nas: semi-supervised architecture embeddings
   Graph reconstruction + activation supervision with Burn
 =============================================================="#
            .cyan()
    );
    println!("  Backend: {}\n", backend_name().bold());
}

fn run_directory(root: &Path) -> PathBuf {
    root.join(chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string())
}

fn index_graphs(index: &NasBenchIndex) -> Vec<(String, NetworkGraph)> {
    index
        .entries()
        .map(|(hash, graph)| (hash.clone(), graph.clone()))
        .collect()
}

fn cmd_pretrain(
    nasbench: &Path,
    train_data: &Path,
    valid_data: &Path,
    out_dir: &Path,
    hashes: Vec<String>,
    options: &PretrainOptions,
    force: bool,
) -> Result<()> {
    let index = NasBenchIndex::load(nasbench)?;
    let train_set = ValidationSet::load(train_data)?;
    let valid_set = ValidationSet::load(valid_data)?;
    let hashes = if hashes.is_empty() {
        index.entries().map(|(hash, _)| hash.clone()).collect()
    } else {
        hashes
    };

    let in_channels = train_set.images.shape[1];
    let num_labels = train_set.labels.iter().copied().max().unwrap_or(0) as usize + 1;
    let config = CellNetworkConfig::new()
        .with_in_channels(in_channels)
        .with_num_labels(num_labels);
    let device = default_device();

    println!("{} Pretraining {} networks", "->".green(), hashes.len());
    for (i, hash) in hashes.iter().enumerate() {
        if !force && is_net_pretrained(out_dir, hash) {
            info!("[{}/{}] {} already pretrained, skipping", i + 1, hashes.len(), hash);
            continue;
        }
        let net_info = pretrain_and_save::<TrainingBackend>(
            out_dir, hash, &index, &config, &train_set, &valid_set, options, &device,
        )
        .with_context(|| format!("pretraining {}", hash))?;
        println!(
            "  [{}/{}] {} val_acc = {:.2}%",
            i + 1,
            hashes.len(),
            hash,
            100.0 * net_info.get("val_accuracy").copied().unwrap_or(0.0)
        );
    }
    println!("{} Networks stored in {:?}", "Done:".green().bold(), out_dir);
    Ok(())
}

fn cmd_build_dataset(
    nasbench: &Path,
    pretrained_dir: &Path,
    valid_data: &Path,
    out: &Path,
    io: &IoConfig,
    seed: u64,
    local: &LocalDatasetConfig,
) -> Result<()> {
    let index = NasBenchIndex::load(nasbench)?;
    let validation = ValidationSet::load(valid_data)?.truncate(local.validation.validation_size)?;
    let device = default_device();

    println!(
        "{} Extracting layers ({}, {}) on {} images",
        "->".green(),
        io.nth_input,
        io.nth_output,
        validation.len()
    );
    let dataset = dataset_from_pretrained::<DefaultBackend>(
        pretrained_dir,
        &index,
        &validation,
        local.validation.batch_size,
        io,
        Some(seed),
        out,
        &device,
    )?;
    println!(
        "{} {} records from {} networks written to {:?}",
        "Done:".green().bold(),
        dataset.len(),
        dataset.n_nets,
        out
    );
    Ok(())
}

fn cmd_train(
    nasbench: &Path,
    io_dataset: &Path,
    source: &ConfigSource,
    options: TrainOptions,
    labeled_test_size: f64,
    local: &LocalDatasetConfig,
) -> Result<()> {
    let config = source.resolve()?;
    let index = NasBenchIndex::load(nasbench)?;
    let device = default_device();

    let graphs = encode_graphs(&index_graphs(&index))?;
    let (train_graphs, valid_graphs) = split_unlabeled(graphs, local.nb_dataset.test_size, options.seed)?;
    let io = load_io_dataset(io_dataset)?;
    let (io_train, io_valid) = io.split(labeled_test_size, options.seed)?;

    let k = config.dataset_config.k;
    let data = SemiSupervisedDataset::new(train_graphs, &io_train, &index, options.batch_size, k)?;
    let shapes: IoShapes = data.io_shapes()?;
    let labeled_valid = if io_valid.is_empty() {
        None
    } else {
        Some(SemiSupervisedDataset::new(Vec::new(), &io_valid, &index, options.batch_size, k)?)
    };
    let mut evaluator = ValidationEvaluator::<TrainingBackend>::new(
        &valid_graphs,
        labeled_valid.as_ref(),
        options.batch_size,
        BatchEvaluator::from_config(&config)?,
        &device,
    )?;

    let run_dir = options.checkpoint_dir.clone();
    fs::create_dir_all(&run_dir)?;
    config.save(&run_dir.join("config.json"))?;
    println!("{} Run directory {:?}", "->".green(), run_dir);

    let outcome = train::<TrainingBackend>(
        &ConfigSource::InMemory(config),
        options,
        shapes,
        &data,
        &mut evaluator,
        &device,
    )?;

    fs::write(
        run_dir.join("metrics.json"),
        serde_json::to_string_pretty(&outcome.metrics)?,
    )?;
    fs::write(
        run_dir.join("losses.json"),
        serde_json::to_string_pretty(&outcome.losses)?,
    )?;
    println!("{} Metrics and losses written to {:?}", "Done:".green().bold(), run_dir);
    Ok(())
}
