use crate::config::DEFAULT_CONFIG_FILE;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// The ebook source: an EPUB root, or a project whose `src/` is one
    pub source: PathBuf,

    /// Where to write the finished packages; created if it doesn't exist
    #[clap(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Validate the modern and legacy packages
    #[clap(short, long)]
    pub check: bool,

    /// Also build a package for the vendor reader
    #[clap(short = 'b', long)]
    pub vendor: bool,

    /// Also build a package for dedicated hardware readers
    #[clap(short = 'k', long)]
    pub hardware: bool,

    /// Extract the cover and a thumbnail as standalone images
    #[clap(short = 'v', long)]
    pub covers: bool,

    /// Link proofreading styles into every document
    #[clap(short, long)]
    pub proof: bool,

    /// Configuration file; defaults apply if it doesn't exist
    #[clap(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Log every step of the build
    #[clap(long)]
    pub verbose: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Where to write the configuration
    #[clap(default_value = DEFAULT_CONFIG_FILE)]
    pub path: PathBuf,

    /// Overwrite an existing file
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Builds the compatible packages for an ebook source
    Build(BuildArgs),
    /// Writes the default configuration to an ebook-compat.toml file
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
#[clap(author, version, about)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}
