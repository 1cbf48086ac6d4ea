//! A small but complete ebook source tree, and stand-ins for the external tools.

use crate::collaborators::{
    ArchiveValidator, ArchiveWriter, Collaborators, DomSimplifier, FormatConverter,
    MarkupSimplifier, MetadataScrubber, RasterConverter, VectorOutliner,
};
use crate::error::BuildError;
use crate::ncx::NavDocumentNcx;
use crate::workspace::{copy_tree, WorkingTree};
use anyhow::{Context, Result};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const CONTAINER: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
	<rootfiles>
		<rootfile full-path="epub/content.opf" media-type="application/oebps-package+xml"/>
	</rootfiles>
</container>
"#;

pub const PACKAGE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" dir="ltr" prefix="se: https://standardebooks.org/vocab/1.0" unique-identifier="uid" version="3.0" xml:lang="en-US">
	<metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
		<dc:identifier id="uid">url:https://example.org/ebooks/jane-doe/x</dc:identifier>
		<dc:title id="title">X</dc:title>
		<dc:language>en-US</dc:language>
		<meta property="dcterms:modified">2024-01-01T00:00:00Z</meta>
		<meta property="se:word-count">42</meta>
	</metadata>
	<manifest>
		<item href="css/core.css" id="core.css" media-type="text/css"/>
		<item href="images/cover.svg" id="cover.svg" media-type="image/svg+xml" properties="cover-image"/>
		<item href="images/titlepage.svg" id="titlepage.svg" media-type="image/svg+xml"/>
		<item href="text/chapter-1.xhtml" id="chapter-1.xhtml" media-type="application/xhtml+xml"/>
		<item href="text/colophon.xhtml" id="colophon.xhtml" media-type="application/xhtml+xml"/>
		<item href="text/endnotes.xhtml" id="endnotes.xhtml" media-type="application/xhtml+xml"/>
		<item href="text/titlepage.xhtml" id="titlepage.xhtml" media-type="application/xhtml+xml" properties="svg"/>
		<item href="toc.xhtml" id="toc.xhtml" media-type="application/xhtml+xml" properties="nav"/>
	</manifest>
	<spine>
		<itemref idref="titlepage.xhtml"/>
		<itemref idref="chapter-1.xhtml"/>
		<itemref idref="endnotes.xhtml"/>
		<itemref idref="colophon.xhtml"/>
	</spine>
</package>
"#;

pub const NAV: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" epub:prefix="z3998: http://www.daisy.org/z3998/2012/vocab/structure/, se: https://standardebooks.org/vocab/1.0" xml:lang="en-US">
	<head>
		<title>Table of Contents</title>
		<link href="css/core.css" rel="stylesheet" type="text/css"/>
	</head>
	<body epub:type="frontmatter">
		<nav id="toc" epub:type="toc">
			<h2 epub:type="title">Table of Contents</h2>
			<ol>
				<li><a href="text/titlepage.xhtml">Titlepage</a></li>
				<li><a href="text/chapter-1.xhtml">I</a></li>
				<li><a href="text/endnotes.xhtml">Endnotes</a></li>
				<li><a href="text/colophon.xhtml">Colophon</a></li>
			</ol>
		</nav>
		<nav id="landmarks" epub:type="landmarks">
			<h2 epub:type="title">Landmarks</h2>
			<ol>
				<li><a href="text/titlepage.xhtml" epub:type="frontmatter titlepage">Titlepage</a></li>
				<li><a href="text/colophon.xhtml" epub:type="backmatter colophon">Colophon</a></li>
				<li><a href="images/cover.svg" epub:type="cover">Cover</a></li>
			</ol>
		</nav>
	</body>
</html>
"#;

pub const TITLEPAGE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="en-US">
	<head>
		<title>Titlepage</title>
		<link href="../css/core.css" rel="stylesheet" type="text/css"/>
	</head>
	<body epub:type="frontmatter">
		<section id="titlepage" epub:type="titlepage">
			<h1 epub:type="title">X</h1>
			<p>By <b epub:type="z3998:author-name">Jane Doe</b>.</p>
			<img alt="" src="../images/titlepage.svg" epub:type="z3998:publisher-logo"/>
		</section>
	</body>
</html>
"#;

pub const CHAPTER: &str = concat!(
    r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="en-US">
	<head>
		<title>I</title>
		<link href="../css/core.css" rel="stylesheet" type="text/css"/>
	</head>
	<body epub:type="bodymatter z3998:fiction">
		<section id="chapter-1" epub:type="chapter">
			<h2 epub:type="ordinal z3998:roman">I</h2>
			<p>It was a <span>dark</span> and stormy night."#,
    "\u{200b}",
    r#"</p>
			<p>Book <b epub:type="z3998:roman">II</b> begins later.<a href="endnotes.xhtml#note-1" id="noteref-1" epub:type="noteref">1</a></p>
		</section>
	</body>
</html>
"#
);

pub const ENDNOTES: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="en-US">
	<head>
		<title>Endnotes</title>
		<link href="../css/core.css" rel="stylesheet" type="text/css"/>
	</head>
	<body epub:type="backmatter">
		<section id="endnotes" epub:type="endnotes">
			<h2 epub:type="title">Endnotes</h2>
			<ol>
				<li id="note-1" epub:type="endnote">
					<p>A note. <a href="chapter-1.xhtml#noteref-1" epub:type="backlink">↩</a></p>
				</li>
			</ol>
		</section>
	</body>
</html>
"#;

pub const COLOPHON: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="en-US">
	<head>
		<title>Colophon</title>
		<link href="../css/core.css" rel="stylesheet" type="text/css"/>
	</head>
	<body epub:type="backmatter">
		<section id="colophon" epub:type="colophon">
			<p>This ebook was set in type.</p>
		</section>
	</body>
</html>
"#;

pub const CORE_CSS: &str = r#"@charset "utf-8";
@namespace epub "http://www.idpf.org/2007/ops";

body{
	font-variant-numeric: oldstyle-nums;
	text-rendering: optimizeLegibility;
}

p{
	hyphens: auto;
	margin: 0;
	text-indent: 1em;
}

[epub|type~="z3998:roman"]{
	font-variant-numeric: lining-nums;
}

section[epub|type~="chapter"] h2{
	text-align: center;
}

#titlepage{
	background: url("../images/cover.svg") no-repeat;
}
"#;

pub const COVER_SVG: &str = r##"<?xml version="1.0" encoding="utf-8"?>
<svg xmlns="http://www.w3.org/2000/svg" version="1.1" width="1400" height="2100" viewBox="0 0 1400 2100">
	<title>The cover</title>
	<rect width="1400" height="2100" fill="#123"/>
</svg>
"##;

pub const TITLEPAGE_SVG: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<svg xmlns="http://www.w3.org/2000/svg" version="1.1" width="1400" height="400" viewBox="0 0 1400 400">
	<title>The titlepage</title>
	<g aria-label="X">
		<path id="letter-x" d="M 0,0 L 100,100 M 100,0 L 0,100"/>
	</g>
</svg>
"#;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("can create fixture directory");
    }
    std::fs::write(&path, contents).expect("can write fixture file");
}

/// A fresh copy of the source tree, with a version-control directory alongside.
pub fn source_tree() -> TempDir {
    let dir = TempDir::new().expect("can create temp dir");
    let root = dir.path();
    write(root, ".git/HEAD", "ref: refs/heads/main\n");
    write(root, "src/mimetype", "application/epub+zip");
    write(root, "src/META-INF/container.xml", CONTAINER);
    write(root, "src/epub/content.opf", PACKAGE);
    write(root, "src/epub/toc.xhtml", NAV);
    write(root, "src/epub/css/core.css", CORE_CSS);
    write(root, "src/epub/images/cover.svg", COVER_SVG);
    write(root, "src/epub/images/titlepage.svg", TITLEPAGE_SVG);
    write(root, "src/epub/text/titlepage.xhtml", TITLEPAGE);
    write(root, "src/epub/text/chapter-1.xhtml", CHAPTER);
    write(root, "src/epub/text/endnotes.xhtml", ENDNOTES);
    write(root, "src/epub/text/colophon.xhtml", COLOPHON);
    dir
}

/// Text files below `root` that contain `needle`.
pub fn dir_mentions(root: &Path, needle: &str) -> Vec<PathBuf> {
    const TEXT_EXTENSIONS: &[&str] = &["xhtml", "html", "css", "opf", "ncx", "xml"];
    WalkBuilder::new(root)
        .standard_filters(false)
        .build()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| TEXT_EXTENSIONS.contains(&e))
        })
        .filter(|path| {
            std::fs::read_to_string(path)
                .map(|contents| contents.contains(needle))
                .unwrap_or(false)
        })
        .collect()
}

pub fn tree_mentions(tree: &WorkingTree, needle: &str) -> Vec<PathBuf> {
    dir_mentions(tree.root(), needle)
}

/// Every file below `root` with its contents, in path order.
pub fn snapshot_files(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files: Vec<(PathBuf, Vec<u8>)> = WalkBuilder::new(root)
        .standard_filters(false)
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| {
            let contents = std::fs::read(entry.path()).expect("can read file");
            (entry.into_path(), contents)
        })
        .collect();
    files.sort();
    files
}

/// Copies the packed tree to `snapshots/<artifact file name>/` so tests can look
/// inside, and writes a placeholder archive.
pub struct FakeArchiver {
    pub snapshots: PathBuf,
}

impl ArchiveWriter for FakeArchiver {
    fn write(&self, root: &Path, output: &Path) -> Result<()> {
        let name = output.file_name().context("archive has no file name")?;
        let snapshot = self.snapshots.join(name);
        if snapshot.exists() {
            std::fs::remove_dir_all(&snapshot)?;
        }
        std::fs::create_dir_all(&snapshot)?;
        copy_tree(root, &snapshot)?;
        std::fs::write(output, b"PK\x03\x04")?;
        Ok(())
    }
}

/// "Rasterizes" by copying the vector image verbatim; resizing writes a JPEG header.
#[derive(Default)]
pub struct FakeRaster;

impl RasterConverter for FakeRaster {
    fn convert(&self, svg: &Path, _zoom: f64, output: &Path) -> Result<()> {
        std::fs::copy(svg, output)
            .with_context(|| format!("Failed to copy {}", svg.display()))?;
        Ok(())
    }

    fn resize(&self, _image: &Path, _width: u32, _height: u32, output: &Path) -> Result<()> {
        std::fs::write(output, [0xff, 0xd8, 0xff, 0xe0])?;
        Ok(())
    }
}

pub struct NoopScrubber;

impl MetadataScrubber for NoopScrubber {
    fn strip(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

pub struct NoopOutliner;

impl VectorOutliner for NoopOutliner {
    fn outline(&self, _svg: &Path) -> Result<()> {
        Ok(())
    }
}

pub struct FakeSimplifier {
    pub diagnostics: Vec<String>,
}

impl MarkupSimplifier for FakeSimplifier {
    fn simplify(&self, _root: &Path) -> Result<Vec<String>> {
        Ok(self.diagnostics.clone())
    }
}

/// Copies the input package to the output.
pub struct FakeConverter;

impl FormatConverter for FakeConverter {
    fn convert(&self, input: &Path, _cover: &Path, output: &Path) -> Result<()> {
        std::fs::copy(input, output)?;
        Ok(())
    }
}

pub struct FakeValidator {
    pub diagnostics: Vec<String>,
}

impl ArchiveValidator for FakeValidator {
    fn validate(&self, _artifact: &Path) -> Result<Vec<String>> {
        Ok(self.diagnostics.clone())
    }
}

/// Rasterizes like [`FakeRaster`], but has nothing to resize with.
pub struct NoResizer;

impl RasterConverter for NoResizer {
    fn convert(&self, svg: &Path, zoom: f64, output: &Path) -> Result<()> {
        FakeRaster.convert(svg, zoom, output)
    }

    fn resize(&self, _image: &Path, _width: u32, _height: u32, _output: &Path) -> Result<()> {
        Err(BuildError::collaborator("missing-resizer", "isn't installed").into())
    }

    fn ensure_resize_available(&self) -> Result<()> {
        Err(BuildError::Precondition("missing-resizer isn't installed".to_string()).into())
    }
}

/// A converter whose tool isn't installed.
pub struct MissingTool;

impl FormatConverter for MissingTool {
    fn convert(&self, _input: &Path, _cover: &Path, _output: &Path) -> Result<()> {
        Err(BuildError::collaborator("missing-tool", "isn't installed").into())
    }

    fn ensure_available(&self) -> Result<()> {
        Err(BuildError::Precondition("missing-tool isn't installed".to_string()).into())
    }
}

/// Fakes for every tool, with the real in-process simplifier and NCX generator.
pub fn collaborators(snapshots: &Path) -> Collaborators {
    Collaborators {
        archive: Box::new(FakeArchiver {
            snapshots: snapshots.to_path_buf(),
        }),
        raster: Box::new(FakeRaster),
        scrubber: Box::new(NoopScrubber),
        outliner: Box::new(NoopOutliner),
        simplifier: Box::new(DomSimplifier),
        converter: Box::new(FakeConverter),
        validator: Box::new(FakeValidator {
            diagnostics: Vec::new(),
        }),
        ncx: Box::new(NavDocumentNcx),
    }
}
