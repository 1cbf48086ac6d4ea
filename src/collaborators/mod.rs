//! Contracts for the external tools a build leans on.
//!
//! The pipeline only ever talks to these traits. The implementations that ship with
//! the binary mostly shell out to command-line tools configured in
//! [`ToolsConfig`](crate::config::ToolsConfig); tests swap in fakes.

mod archive;
mod process;
mod simplify;

pub use archive::EpubArchiver;
pub use process::*;
pub use simplify::DomSimplifier;

use crate::config::Configuration;
use crate::ncx::NavDocumentNcx;
use crate::workspace::WorkingTree;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Packs a directory into an EPUB container.
pub trait ArchiveWriter {
    fn write(&self, root: &Path, output: &Path) -> Result<()>;
}

pub trait RasterConverter {
    /// Renders the vector image at `svg` to a PNG at `output`, scaled by `zoom`.
    fn convert(&self, svg: &Path, zoom: f64, output: &Path) -> Result<()>;

    /// Writes `image` scaled to exactly `width`×`height` to `output`; the format
    /// follows `output`'s extension.
    fn resize(&self, image: &Path, width: u32, height: u32, output: &Path) -> Result<()>;

    fn ensure_available(&self) -> Result<()> {
        Ok(())
    }

    /// Only builds that extract covers or target hardware resize anything.
    fn ensure_resize_available(&self) -> Result<()> {
        Ok(())
    }
}

/// Removes embedded capture metadata from an image in place.
pub trait MetadataScrubber {
    fn strip(&self, path: &Path) -> Result<()>;
}

/// Turns text in a vector image into outlines and strips editor leftovers, in place.
pub trait VectorOutliner {
    fn outline(&self, svg: &Path) -> Result<()>;

    fn ensure_available(&self) -> Result<()> {
        Ok(())
    }
}

/// Collapses redundant nested markup across a tree in place. Returns the
/// diagnostics it produced; any diagnostic means the tree can't be trusted.
pub trait MarkupSimplifier {
    fn simplify(&self, root: &Path) -> Result<Vec<String>>;

    fn ensure_available(&self) -> Result<()> {
        Ok(())
    }
}

/// Converts a packaged ebook into the dedicated hardware format.
pub trait FormatConverter {
    fn convert(&self, input: &Path, cover: &Path, output: &Path) -> Result<()>;

    fn ensure_available(&self) -> Result<()> {
        Ok(())
    }
}

/// Checks a packaged ebook, returning one line per problem found.
pub trait ArchiveValidator {
    fn validate(&self, artifact: &Path) -> Result<Vec<String>>;

    fn ensure_available(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds the legacy hierarchical navigation file from the navigation document.
pub trait NcxGenerator {
    /// Writes the file next to the package document and returns its path.
    fn generate(&self, tree: &WorkingTree, nav_href: &str) -> Result<PathBuf>;
}

/// Everything a build delegates to.
pub struct Collaborators {
    pub archive: Box<dyn ArchiveWriter>,
    pub raster: Box<dyn RasterConverter>,
    pub scrubber: Box<dyn MetadataScrubber>,
    pub outliner: Box<dyn VectorOutliner>,
    pub simplifier: Box<dyn MarkupSimplifier>,
    pub converter: Box<dyn FormatConverter>,
    pub validator: Box<dyn ArchiveValidator>,
    pub ncx: Box<dyn NcxGenerator>,
}

impl Collaborators {
    /// The real implementations, driven by the configured command templates.
    pub fn from_config(config: &Configuration) -> Collaborators {
        let tools = &config.tools;
        let simplifier: Box<dyn MarkupSimplifier> = match &tools.simplifier {
            Some(command) => Box::new(ProcessSimplifier::new(command.clone())),
            None => Box::new(DomSimplifier),
        };

        Collaborators {
            archive: Box::new(EpubArchiver),
            raster: Box::new(ProcessRasterConverter::new(
                tools.raster.clone(),
                tools.resize.clone(),
            )),
            scrubber: Box::new(ProcessScrubber::new(tools.scrubber.clone())),
            outliner: Box::new(ProcessOutliner::new(tools.outliner.clone())),
            simplifier,
            converter: Box::new(ProcessFormatConverter::new(tools.converter.clone())),
            validator: Box::new(ProcessValidator::new(tools.validator.clone())),
            ncx: Box::new(NavDocumentNcx),
        }
    }
}
