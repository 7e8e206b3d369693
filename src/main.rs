use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use arrow::util::pretty::pretty_format_batches;
use clap::{Parser, Subcommand};
use log::warn;

use wright_core::data::store;
use wright_core::preset::{resolve, Preset};
use wright_core::{apply_chain, apply_chain_atomic, AdapterRegistry, Container, Registry, WrightError};

#[derive(Parser)]
#[command(name = "wright")]
#[command(about = "Ingest instrument files and run processing presets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a raw file, apply a preset and save the container.
    Process {
        input: PathBuf,

        #[arg(long)]
        preset: PathBuf,

        /// Adapter name; defaults to dispatch by extension.
        #[arg(long)]
        adapter: Option<String>,

        /// Defaults to `<input stem>.wright.parquet` next to the input.
        #[arg(short = 'o', long)]
        out: Option<PathBuf>,

        /// Leave nothing applied unless every step succeeds.
        #[arg(long)]
        atomic: bool,
    },
    /// Show the datasets and provenance of a saved container or raw file.
    Inspect {
        file: PathBuf,

        #[arg(long)]
        adapter: Option<String>,

        /// Also print the stored node table.
        #[arg(long)]
        table: bool,
    },
    /// List registered operations and adapters.
    Ops,
}

fn default_out(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "container".to_string());
    input.with_file_name(format!("{stem}.wright.parquet"))
}

/// A saved container if `file` is one, otherwise whatever an adapter makes of it.
fn open(file: &Path, adapters: &AdapterRegistry, adapter: Option<&str>) -> Result<Container> {
    if adapter.is_none() {
        match store::load(file) {
            Ok(container) => return Ok(container),
            Err(WrightError::CorruptStore(_) | WrightError::Parquet(_)) => {}
            Err(e) => return Err(e).with_context(|| format!("loading {}", file.display())),
        }
    }
    adapters
        .ingest(file, adapter)
        .with_context(|| format!("ingesting {}", file.display()))
}

fn print_container(container: &Container) {
    println!("{} ({})", container.name(), container.id);
    for (key, value) in container.attrs() {
        println!("  @{key} = {value}");
    }
    for line in container.describe() {
        println!("  {line}");
    }
    println!("provenance:");
    for (i, record) in container.provenance().iter().enumerate() {
        let params: Vec<String> = record
            .params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        println!(
            "  {i}: {} /{} ({}) {}",
            record.operation,
            record.target,
            params.join(", "),
            record.timestamp.to_rfc3339()
        );
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let adapters = AdapterRegistry::with_builtins();
    let registry = Registry::with_builtins();

    match cli.cmd {
        Commands::Process {
            input,
            preset,
            adapter,
            out,
            atomic,
        } => {
            // 1) Resolve the preset before touching any data.
            let preset = Preset::load(&preset)
                .with_context(|| format!("loading preset {}", preset.display()))?;
            let chain = resolve(&preset, &registry)?;

            // 2) Ingest.
            let mut container = adapters
                .ingest(&input, adapter.as_deref())
                .with_context(|| format!("ingesting {}", input.display()))?;

            // 3) Apply.
            let applied = if atomic {
                apply_chain_atomic(&mut container, &chain.steps, &registry)
            } else {
                apply_chain(&mut container, &chain.steps, &registry)
            };
            if let Err(e) = &applied {
                warn!("preset '{}' stopped: {e}", chain.name);
            }

            // 4) Save whatever was committed.
            let out = out.unwrap_or_else(|| default_out(&input));
            store::save(&container, &out)?;
            let report = applied?;
            println!(
                "Applied {} step(s) of '{}'; wrote {}",
                report.len(),
                chain.name,
                out.display()
            );
        }
        Commands::Inspect {
            file,
            adapter,
            table,
        } => {
            let container = open(&file, &adapters, adapter.as_deref())?;
            print_container(&container);
            if table {
                let batch = store::node_table(&container)?;
                println!("{}", pretty_format_batches(&[batch])?);
            }
        }
        Commands::Ops => {
            for descriptor in registry.descriptors() {
                println!("{:<18} {}", descriptor.name, descriptor.summary);
                for spec in descriptor.schema.specs() {
                    let default = spec
                        .default
                        .as_ref()
                        .map(|d| format!(" = {d}"))
                        .unwrap_or_default();
                    let required = if spec.required { " (required)" } else { "" };
                    println!("    {}: {}{default}{required}", spec.name, spec.kind);
                }
            }
            println!("adapters: {}", adapters.names().join(", "));
        }
    }

    Ok(())
}
