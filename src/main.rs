//! CLI for net-surgery: transplant, inspect, init, demo.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use net_surgery::model::{
    inspect_checkpoint, random_network, save_checkpoint, tensor_type_name, vgg16_fc_topology,
    vgg16_reduced_topology, Topology, VggDims,
};
use net_surgery::tensor::ShapeDisplay;
use net_surgery::{surgery, SurgeryConfig, TransplantReport};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "net-surgery")]
#[command(about = "Transplant fully-connected weights into convolutional layers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy source parameters into the target network and save them
    Transplant {
        /// JSON config; flags below override its values
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        source_topology: Option<PathBuf>,
        #[arg(long)]
        source_weights: Option<PathBuf>,
        #[arg(long)]
        target_topology: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Write the per-layer report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// List tensors in a checkpoint
    Inspect {
        #[arg(long)]
        checkpoint: PathBuf,
    },

    /// Write a checkpoint with seeded random weights for a topology
    Init {
        #[arg(long)]
        topology: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Run the whole conversion on a small VGG-16 pair
    Demo {
        /// Working directory (created if missing)
        #[arg(long, default_value = "net-surgery-demo")]
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Transplant {
            config,
            source_topology,
            source_weights,
            target_topology,
            output,
            report,
        } => {
            let mut cfg = match config {
                Some(path) => SurgeryConfig::from_file(&path)
                    .with_context(|| format!("reading config {:?}", path))?,
                None => SurgeryConfig::default(),
            };
            if let Some(p) = source_topology {
                cfg.source_topology = p;
            }
            if source_weights.is_some() {
                cfg.source_weights = source_weights;
            }
            if let Some(p) = target_topology {
                cfg.target_topology = p;
            }
            if let Some(p) = output {
                cfg.output = p;
            }
            if report.is_some() {
                cfg.report = report;
            }
            run_transplant(&cfg)?
        }
        Commands::Inspect { checkpoint } => run_inspect(&checkpoint)?,
        Commands::Init {
            topology,
            output,
            seed,
        } => run_init(&topology, &output, seed)?,
        Commands::Demo { dir } => run_demo(&dir)?,
    }
    Ok(())
}

fn run_transplant(cfg: &SurgeryConfig) -> Result<()> {
    let report = surgery::run(cfg).context("transplant failed")?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &TransplantReport) {
    println!(
        "{} -> {}: {} layers, {} parameters written",
        report.source_network,
        report.target_network,
        report.layers.len(),
        report.parameters_written()
    );
    for l in &report.layers {
        println!(
            "  {:<10} {} -> {}  bias {} -> {}  [{}; bias {}]",
            l.target_layer,
            ShapeDisplay(&l.source_weight_shape),
            ShapeDisplay(&l.target_weight_shape),
            ShapeDisplay(&l.source_bias_shape),
            ShapeDisplay(&l.target_bias_shape),
            l.weight_transform,
            l.bias_transform
        );
    }
}

fn run_inspect(path: &Path) -> Result<()> {
    let info = inspect_checkpoint(path).with_context(|| format!("inspecting {:?}", path))?;
    println!("version: {}", info.version);
    println!("architecture: {}", info.architecture.as_deref().unwrap_or("-"));
    println!("name: {}", info.name.as_deref().unwrap_or("-"));
    println!("metadata: {}", info.metadata_keys.join(", "));
    println!("tensors: {}", info.tensors.len());
    for t in &info.tensors {
        println!(
            "  {:<20} {:<20} {}",
            t.name,
            ShapeDisplay(&t.shape).to_string(),
            tensor_type_name(t.tensor_type)
        );
    }
    Ok(())
}

fn run_init(topology_path: &Path, output: &Path, seed: u64) -> Result<()> {
    let topology = Topology::from_file(topology_path)
        .with_context(|| format!("reading topology {:?}", topology_path))?;
    let network = random_network(&topology, seed);
    info!(
        "Writing {} ({} parameters) to {:?}",
        network.name(),
        network.num_parameters(),
        output
    );
    save_checkpoint(&network, output)?;
    Ok(())
}

fn run_demo(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {:?}", dir))?;
    let dims = VggDims::tiny();
    let source = vgg16_fc_topology(dims);
    let target = vgg16_reduced_topology(dims);

    let cfg = SurgeryConfig {
        source_topology: dir.join("fc_deploy.json"),
        source_weights: Some(dir.join("fc.gguf")),
        target_topology: dir.join("fc_reduced_deploy.json"),
        output: dir.join("fc_reduced.gguf"),
        report: Some(dir.join("report.json")),
        ..SurgeryConfig::default()
    };
    source.to_file(&cfg.source_topology)?;
    target.to_file(&cfg.target_topology)?;
    if let Some(weights) = &cfg.source_weights {
        save_checkpoint(&random_network(&source, 42), weights)?;
    }
    cfg.to_file(dir.join("surgery.json"))?;
    info!("Demo inputs written to {:?}", dir);

    run_transplant(&cfg)
}
