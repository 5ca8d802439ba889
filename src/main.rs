//! compdb command-line interface.
//!
//! Runs the same pipeline an editor integration would, one file at a time:
//! `generate` behaves like opening each file (or like an explicit rebuild
//! with `--force`), `status` only reports what each generator would do.

mod cli;
mod error;
mod terminal;

use crate::cli::{Cli, Command};
use crate::error::{ErrorKind, Result};
use crate::terminal::TerminalNotifier;
use clap::Parser;
use compdb_config::Config;
use compdb_generate::package::MapperHandle;
use compdb_generate::sink::{LoggingReload, TracingOutput};
use compdb_generate::{Document, EbuildGenerator, Family, GeneratorFactory, Orchestrator, PackageIdentity, PackageTable};
use compdb_sandbox::{ChrootSandbox, SandboxHandle};
use exn::ResultExt;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref());

    let level = cli.log_level(config.as_ref().ok().map(|config| config.log_level));
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    let result = match config {
        Ok(config) => run(cli.command, config).await,
        Err(e) => Err(e).or_raise(|| ErrorKind::Config),
    };
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{e:?}");
            ExitCode::FAILURE
        },
    }
}

/// `Ok(false)` when at least one generation failed.
async fn run(command: Command, config: Config) -> Result<bool> {
    let sandbox: SandboxHandle =
        Arc::new(ChrootSandbox::discover(&config.source_root, config.chroot.clone()).or_raise(|| ErrorKind::Sandbox)?);
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(TracingOutput),
        Arc::new(TerminalNotifier),
        Arc::new(LoggingReload),
    ));
    orchestrator.register(factories(&config, sandbox));

    let cancel = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling builds");
            cancel.dispose();
        }
    });

    let mut succeeded = true;
    match command {
        Command::Generate { force, files } => {
            for file in files {
                let document = resolve(&file)?;
                let outcome = match force {
                    true => orchestrator.force_generate(&document).await,
                    false => orchestrator.on_document_activated(&document).await,
                };
                for generator in &outcome.generated {
                    println!("{}: generated ({generator})", document.path.display());
                }
                for (generator, kind) in &outcome.failed {
                    println!("{}: failed ({generator}): {kind}", document.path.display());
                }
                if outcome.generated.is_empty() && outcome.failed.is_empty() {
                    println!("{}: nothing to do", document.path.display());
                }
                succeeded &= outcome.is_success();
            }
        },
        Command::Status { files } => {
            for file in files {
                let document = resolve(&file)?;
                for (generator, decision) in orchestrator.decisions(&document).await {
                    println!("{}\t{generator}\t{decision}", document.path.display());
                }
            }
        },
    }
    orchestrator.dispose();
    Ok(succeeded)
}

fn resolve(file: &Path) -> Result<Document> {
    let path = std::path::absolute(file).or_raise(|| ErrorKind::Path(file.to_path_buf()))?;
    Ok(Document::from_path(path))
}

/// Built-in package table extended with the configured packages.
fn package_table(config: &Config) -> PackageTable {
    let mut table = PackageTable::with_builtin(&config.source_root);
    for entry in &config.packages {
        match PackageIdentity::from_atom(&entry.atom, &entry.source_dir) {
            Some(package) => table.insert(package),
            None => tracing::warn!(atom = %entry.atom, "Skipping malformed package atom"),
        }
    }
    table
}

fn factories(config: &Config, sandbox: SandboxHandle) -> Vec<GeneratorFactory> {
    let mapper: MapperHandle = Arc::new(package_table(config));
    let enabled = [(Family::Platform2, config.generators.platform2), (Family::Kernel, config.generators.kernel)];
    enabled
        .into_iter()
        .filter(|(_, enabled)| *enabled)
        .map(|(family, _)| {
            EbuildGenerator::factory(family, mapper.clone(), sandbox.clone(), &config.source_root, &config.board)
        })
        .collect()
}
