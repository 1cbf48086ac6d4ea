//! Build configuration.
//!
//! Read from `ebook-compat.toml` when present; every section falls back to its
//! defaults so an empty (or missing) file is a valid configuration. The external
//! tools are plain command templates.

use crate::collaborators::ToolCommand;
use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "ebook-compat.toml";

/// Command templates for the external collaborators.
///
/// Arguments may contain the placeholders `{input}`, `{output}`, `{zoom}`,
/// `{width}`, `{height}`, `{cover}` and `{root}`. A command given without `args`
/// keeps the default arguments for that tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ToolsFile")]
pub struct ToolsConfig {
    /// Converts a vector image to a raster image at a zoom factor
    pub raster: ToolCommand,
    /// Resizes a raster image to an exact width and height
    pub resize: ToolCommand,
    /// Strips embedded capture metadata from an image, in place
    pub scrubber: ToolCommand,
    /// Converts a packaged legacy ebook into the dedicated hardware format
    pub converter: ToolCommand,
    /// Checks a packaged ebook; any output counts as a failure
    pub validator: ToolCommand,
    /// Converts text in a vector image to outlines, in place. Optional.
    pub outliner: Option<ToolCommand>,
    /// Collapses redundant markup across the tree. When unset the built-in
    /// simplifier is used.
    pub simplifier: Option<ToolCommand>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            raster: ToolCommand::new(
                "rsvg-convert",
                &["--zoom", "{zoom}", "--output", "{output}", "{input}"],
            ),
            resize: ToolCommand::new(
                "magick",
                &["{input}", "-resize", "{width}x{height}!", "{output}"],
            ),
            scrubber: ToolCommand::new(
                "exiftool",
                &["-quiet", "-overwrite_original", "-all=", "{input}"],
            ),
            converter: ToolCommand::new(
                "ebook-convert",
                &[
                    "{input}",
                    "{output}",
                    "--cover",
                    "{cover}",
                    "--no-inline-toc",
                    "--max-toc-links=0",
                    "--prefer-metadata-cover",
                ],
            ),
            validator: ToolCommand::new("epubcheck", &["--quiet", "{input}"]),
            outliner: None,
            simplifier: None,
        }
    }
}

/// `[tools]` as written in the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ToolsFile {
    raster: Option<ToolEntry>,
    resize: Option<ToolEntry>,
    scrubber: Option<ToolEntry>,
    converter: Option<ToolEntry>,
    validator: Option<ToolEntry>,
    outliner: Option<ToolEntry>,
    simplifier: Option<ToolEntry>,
}

#[derive(Debug, Deserialize)]
struct ToolEntry {
    program: String,
    args: Option<Vec<String>>,
}

impl ToolEntry {
    fn or_default_args(self, default: &ToolCommand) -> ToolCommand {
        ToolCommand {
            program: self.program,
            args: self.args.unwrap_or_else(|| default.args.clone()),
        }
    }

    fn into_command(self) -> ToolCommand {
        ToolCommand {
            program: self.program,
            args: self.args.unwrap_or_default(),
        }
    }
}

impl From<ToolsFile> for ToolsConfig {
    fn from(file: ToolsFile) -> Self {
        let defaults = ToolsConfig::default();
        let merge = |entry: Option<ToolEntry>, default: ToolCommand| match entry {
            Some(entry) => entry.or_default_args(&default),
            None => default,
        };
        ToolsConfig {
            raster: merge(file.raster, defaults.raster),
            resize: merge(file.resize, defaults.resize),
            scrubber: merge(file.scrubber, defaults.scrubber),
            converter: merge(file.converter, defaults.converter),
            validator: merge(file.validator, defaults.validator),
            outliner: file.outliner.map(ToolEntry::into_command),
            simplifier: file.simplifier.map(ToolEntry::into_command),
        }
    }
}

/// A vector image that gets a simulated outside stroke.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrokeTarget {
    /// Glob matched against the image's file name
    pub glob: String,
    /// Stroke width in user units
    pub width: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrokeConfig {
    pub targets: Vec<StrokeTarget>,
}

impl Default for StrokeConfig {
    fn default() -> Self {
        Self {
            targets: vec![
                StrokeTarget {
                    glob: "titlepage.svg".to_string(),
                    width: 5.0,
                },
                StrokeTarget {
                    glob: "logo.svg".to_string(),
                    width: 2.0,
                },
            ],
        }
    }
}

impl StrokeConfig {
    /// Compiled matchers paired with their stroke widths, in configuration order.
    pub fn matchers(&self) -> Result<Vec<(GlobMatcher, f64)>> {
        self.targets
            .iter()
            .map(|target| {
                Glob::new(&target.glob)
                    .with_context(|| format!("Invalid stroke target glob: {}", target.glob))
                    .map(|g| (g.compile_matcher(), target.width))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// Zoom factor applied when converting vector images
    pub zoom: f64,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self { zoom: 2.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoversConfig {
    /// Size of the extracted `cover.jpg`, also used as the hardware cover
    pub cover_size: [u32; 2],
    /// Size of the extracted `cover-thumbnail.jpg`
    pub thumbnail_size: [u32; 2],
    /// Size of the thumbnail shipped next to the hardware package
    pub hardware_thumbnail_size: [u32; 2],
}

impl Default for CoversConfig {
    fn default() -> Self {
        Self {
            cover_size: [1400, 2100],
            thumbnail_size: [350, 525],
            hardware_thumbnail_size: [432, 648],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatibilityConfig {
    /// Vocabulary namespaces that some readers only understand over `http://`
    pub insecure_namespaces: Vec<String>,
    /// Prefix stripped from the canonical identifier before it is hashed or used
    /// to name the output files
    pub identifier_prefix: String,
}

impl Default for CompatibilityConfig {
    fn default() -> Self {
        Self {
            insecure_namespaces: vec!["https://standardebooks.org/vocab/1.0".to_string()],
            identifier_prefix: "url:".to_string(),
        }
    }
}

/// Complete configuration for a build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub tools: ToolsConfig,
    pub stroke: StrokeConfig,
    pub raster: RasterConfig,
    pub covers: CoversConfig,
    pub compatibility: CompatibilityConfig,
}

impl Configuration {
    /// Loads the configuration at `path`, or the defaults if there is no such file.
    pub fn load_or_default(path: &Path) -> Result<Configuration> {
        if !path.exists() {
            log::debug!("No configuration at {}, using defaults", path.display());
            return Ok(Configuration::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }
}
