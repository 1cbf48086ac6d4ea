//! Markup and style compatibility passes.
//!
//! Each pass is a set of tree transforms over the XHTML documents and style sheets
//! of a working tree. Passes are applied per target profile; see
//! [`TargetProfile`](crate::assemble::TargetProfile).

pub mod epub2;
pub mod hardware;
pub mod namespaces;
pub mod proofing;
pub mod vendor;

use crate::css::Stylesheet;
use crate::workspace::WorkingTree;
use crate::xml::Document;
use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatPass {
    /// Readers limited to EPUB 2 markup and styling
    Epub2,
    /// The vendor reader's span-per-sentence markup
    Vendor,
    /// Dedicated hardware readers
    Hardware,
}

impl CompatPass {
    pub fn name(&self) -> &'static str {
        match self {
            CompatPass::Epub2 => "epub2",
            CompatPass::Vendor => "vendor",
            CompatPass::Hardware => "hardware",
        }
    }

    /// Applies the pass to every document and style sheet in `tree`, returning how
    /// many edits were made.
    pub fn apply(&self, tree: &WorkingTree) -> Result<usize> {
        let edits = match self {
            CompatPass::Epub2 => epub2::apply(tree)?,
            CompatPass::Vendor => vendor::apply(tree)?,
            CompatPass::Hardware => hardware::apply(tree)?,
        };
        log::debug!("{} pass made {edits} edit(s)", self.name());
        Ok(edits)
    }
}

impl fmt::Display for CompatPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Loads each document, hands it to `edit`, and writes it back if `edit` reports
/// any changes. Returns the total number of changes.
pub(crate) fn edit_documents<F>(paths: &[PathBuf], mut edit: F) -> Result<usize>
where
    F: FnMut(&Path, &mut Document) -> Result<usize>,
{
    let mut total = 0;
    for path in paths {
        let mut doc = Document::load(path)?;
        let changed = edit(path, &mut doc)?;
        if changed > 0 {
            doc.save(path)?;
            total += changed;
        }
    }
    Ok(total)
}

/// [`edit_documents`], for style sheets.
pub(crate) fn edit_stylesheets<F>(paths: &[PathBuf], mut edit: F) -> Result<usize>
where
    F: FnMut(&mut Stylesheet) -> usize,
{
    let mut total = 0;
    for path in paths {
        let mut sheet = Stylesheet::load(path)?;
        let changed = edit(&mut sheet);
        if changed > 0 {
            sheet.save(path)?;
            total += changed;
        }
    }
    Ok(total)
}
