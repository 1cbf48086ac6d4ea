use super::ArchiveWriter;
use anyhow::{Context, Result};
use epub_builder::{Zip, ZipLibrary};
use ignore::WalkBuilder;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Zips an EPUB root with `epub-builder`'s ZIP backend, which writes the stored
/// `mimetype` entry first on its own.
pub struct EpubArchiver;

impl ArchiveWriter for EpubArchiver {
    fn write(&self, root: &Path, output: &Path) -> Result<()> {
        let mut entries = Vec::new();
        for entry in WalkBuilder::new(root).standard_filters(false).build() {
            let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            if !entry.path().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .with_context(|| format!("{} escaped {}", entry.path().display(), root.display()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if relative != "mimetype" {
                entries.push((relative, entry.path().to_path_buf()));
            }
        }
        entries.sort();

        let mut zip = ZipLibrary::new().with_context(|| "Failed to create ZIP library for EPUB")?;
        for (name, path) in &entries {
            let file =
                File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
            zip.write_file(name.as_str(), file)
                .with_context(|| format!("Failed to add {name} to {}", output.display()))?;
        }

        let out = File::create(output)
            .with_context(|| format!("Failed to create {}", output.display()))?;
        zip.generate(BufWriter::new(out))
            .with_context(|| format!("Failed to write {}", output.display()))?;
        log::debug!("Packed {} file(s) into {}", entries.len(), output.display());
        Ok(())
    }
}
