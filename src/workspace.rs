//! Disposable working copies of the source tree.
//!
//! A build never writes to the canonical source: it materializes a copy in a
//! temporary directory and every pass mutates that copy. The directory belongs to the
//! [`Workspace`] value and is removed when it is dropped, which happens on every exit
//! path of a build, successful or not.

use crate::error::BuildError;
use crate::xml::Document;
use anyhow::{anyhow, Context, Result};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Version-control metadata that is never copied into a workspace.
const VCS_DIRECTORIES: &[&str] = &[".git", ".hg", ".svn", ".bzr"];

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// An empty workspace.
    pub fn create(label: &str) -> Result<Workspace> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("ebook-compat-{label}-"))
            .tempdir()
            .with_context(|| "Failed to create a temporary workspace")?;
        Ok(Workspace { dir })
    }

    /// A workspace holding a byte-for-byte copy of `source`, minus any
    /// version-control directories.
    pub fn materialize(source: &Path, label: &str) -> Result<Workspace> {
        let workspace = Workspace::create(label)?;
        let copied = copy_tree(source, workspace.path()).with_context(|| {
            format!(
                "Failed to copy {} into a temporary workspace",
                source.display()
            )
        })?;
        log::debug!(
            "Materialized {} file(s) from {} into {}",
            copied,
            source.display(),
            workspace.path().display()
        );
        Ok(workspace)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Recursively copies `from` into the existing directory `to`, returning how many
/// files were copied. `from` is only ever read.
pub fn copy_tree(from: &Path, to: &Path) -> Result<usize> {
    let mut copied = 0;
    let walker = WalkBuilder::new(from)
        .standard_filters(false)
        .filter_entry(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| !VCS_DIRECTORIES.contains(&name))
                .unwrap_or(true)
        })
        .build();

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", from.display()))?;
        let relative = entry.path().strip_prefix(from).with_context(|| {
            format!(
                "Failed to remove root {} from path {}",
                from.display(),
                entry.path().display()
            )
        })?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let destination = to.join(relative);
        if entry.path().is_dir() {
            std::fs::create_dir_all(&destination)
                .with_context(|| format!("Failed to create {}", destination.display()))?;
        } else {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::copy(entry.path(), &destination).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    entry.path().display(),
                    destination.display()
                )
            })?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Finds the directory holding `META-INF/container.xml`: either `dir` itself or its
/// `src/` subdirectory.
pub fn locate_epub_root(dir: &Path) -> Option<PathBuf> {
    [dir.to_path_buf(), dir.join("src")]
        .into_iter()
        .find(|candidate| candidate.join("META-INF").join("container.xml").is_file())
}

/// A materialized copy of an ebook source, with its package document located.
#[derive(Debug)]
pub struct WorkingTree {
    workspace: Workspace,
    epub_root: PathBuf,
    package_path: PathBuf,
}

impl WorkingTree {
    /// Copies `source` into a fresh workspace and locates its package document.
    pub fn materialize(source: &Path) -> Result<WorkingTree> {
        WorkingTree::open(Workspace::materialize(source, "build")?)
    }

    pub fn open(workspace: Workspace) -> Result<WorkingTree> {
        let epub_root = locate_epub_root(workspace.path()).ok_or_else(|| {
            BuildError::Precondition("Source has no META-INF/container.xml".to_string())
        })?;

        let container_path = epub_root.join("META-INF").join("container.xml");
        let container = Document::load(&container_path)?;
        let full_path = container
            .root
            .find(&|e| e.is("rootfile"))
            .and_then(|e| e.attr("full-path"))
            .ok_or_else(|| {
                BuildError::Precondition(format!(
                    "{} doesn't name a package document",
                    container_path.display()
                ))
            })?
            .to_string();

        let package_path = epub_root.join(&full_path);
        if !package_path.is_file() {
            return Err(BuildError::Precondition(format!(
                "Package document {full_path} doesn't exist"
            ))
            .into());
        }

        Ok(WorkingTree {
            workspace,
            epub_root,
            package_path,
        })
    }

    /// Copies this tree into a new, independent workspace.
    pub fn branch(&self, label: &str) -> Result<WorkingTree> {
        let workspace = Workspace::materialize(self.workspace.path(), label)?;
        let relative_root = self
            .epub_root
            .strip_prefix(self.workspace.path())
            .with_context(|| "EPUB root lies outside of its workspace")?;
        let relative_package = self
            .package_path
            .strip_prefix(self.workspace.path())
            .with_context(|| "Package document lies outside of its workspace")?;
        Ok(WorkingTree {
            epub_root: workspace.path().join(relative_root),
            package_path: workspace.path().join(relative_package),
            workspace,
        })
    }

    pub fn root(&self) -> &Path {
        self.workspace.path()
    }

    /// The directory that gets packaged: it holds `mimetype` and `META-INF/`.
    pub fn epub_root(&self) -> &Path {
        &self.epub_root
    }

    pub fn package_path(&self) -> &Path {
        &self.package_path
    }

    /// The directory that manifest `href`s are relative to.
    pub fn package_dir(&self) -> &Path {
        self.package_path.parent().unwrap_or(&self.epub_root)
    }

    /// Every file under the EPUB root with one of `extensions`, in a stable order.
    pub fn files(&self, extensions: &[&str]) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkBuilder::new(&self.epub_root)
            .standard_filters(false)
            .build()
        {
            let entry = entry
                .with_context(|| format!("Failed to walk {}", self.epub_root.display()))?;
            let path = entry.path();
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
                .unwrap_or(false);
            if matches && path.is_file() {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn xhtml_files(&self) -> Result<Vec<PathBuf>> {
        self.files(&["xhtml", "html"])
    }

    pub fn stylesheets(&self) -> Result<Vec<PathBuf>> {
        self.files(&["css"])
    }

    pub fn vector_images(&self) -> Result<Vec<PathBuf>> {
        self.files(&["svg"])
    }

    pub fn raster_images(&self) -> Result<Vec<PathBuf>> {
        self.files(&["png", "jpg", "jpeg", "gif"])
    }

    /// The package-relative, `/`-separated form of a path in the tree.
    pub fn package_href(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(self.package_dir()).map_err(|_| {
            anyhow!(
                "{} isn't inside the package directory {}",
                path.display(),
                self.package_dir().display()
            )
        })?;
        Ok(relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }

    /// The file a package-relative `href` points at.
    pub fn resolve_href(&self, href: &str) -> PathBuf {
        let (path, _) = crate::href::split_fragment(href);
        let mut resolved = self.package_dir().to_path_buf();
        for segment in crate::href::join("", path).split('/') {
            resolved.push(segment);
        }
        resolved
    }
}
