use anyhow::{anyhow, Context, Result};
use assemble::BuildRequestBuilder;
use cli::{BuildArgs, Cli, ConfigArgs};
use config::Configuration;
use indicatif::{ProgressBar, ProgressStyle};
use std::process::ExitCode;
use std::time::Duration;

mod assemble;
mod cli;
mod collaborators;
mod compat;
mod config;
mod css;
mod error;
#[cfg(test)]
mod fixture;
mod href;
mod identifier;
mod logging;
mod navigation;
mod ncx;
mod package;
mod pipeline;
mod raster;
mod svg;
mod workspace;
mod xml;

fn main() -> ExitCode {
    if let Err(e) = try_main() {
        eprintln!("{}: {e:#}", console::style("Error").red());
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn try_main() -> Result<()> {
    use clap::Parser;
    let cli = Cli::parse();

    match &cli.command {
        cli::Commands::Build(args) => build(args),
        cli::Commands::Config(args) => write_config(args),
    }
}

fn build(args: &BuildArgs) -> Result<()> {
    logging::init(args.verbose)?;
    let config = Configuration::load_or_default(&args.config)?;
    let request = BuildRequestBuilder::default()
        .source(&args.source)
        .output_dir(&args.output_dir)
        .check(args.check)
        .vendor(args.vendor)
        .hardware(args.hardware)
        .covers(args.covers)
        .proof(args.proof)
        .build()?;

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .expect("can parse progress style"),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress.set_message("Materializing source...");

    let report = match assemble::build(&request, &config, &progress) {
        Ok(report) => report,
        Err(e) => {
            progress.abandon_with_message("Build failed");
            return Err(e);
        }
    };
    progress.finish_with_message(format!("Ran {} stages", report.stages.len()));

    println!();
    for artifact in &report.artifacts {
        let size = std::fs::metadata(artifact)
            .map(|m| {
                byte_unit::Byte::from_u64(m.len())
                    .get_appropriate_unit(byte_unit::UnitType::Binary)
                    .to_string()
            })
            .unwrap_or_default();
        println!("  {}  {size}", artifact.display());
    }
    if let Some(hardware_id) = &report.hardware_id {
        println!("\n  Hardware identifier: {hardware_id}");
    }
    Ok(())
}

fn write_config(args: &ConfigArgs) -> Result<()> {
    if args.path.exists() && !args.force {
        return Err(anyhow!(
            "{} already exists, pass --force to overwrite it",
            args.path.display()
        ));
    }
    let config = toml::to_string_pretty(&Configuration::default())
        .with_context(|| "Failed to convert configuration to TOML")?;
    std::fs::write(&args.path, config)
        .with_context(|| format!("Failed to write {}", args.path.display()))?;
    println!("{} written!", args.path.display());
    Ok(())
}
