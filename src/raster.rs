//! Converting vector images to raster images and repointing references at them.

use crate::collaborators::RasterConverter;
use crate::css::Stylesheet;
use crate::workspace::WorkingTree;
use crate::xml::{Document, Element};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Attributes whose value may be a reference to an image file.
const REFERENCE_ATTRIBUTES: &[&str] = &["href", "src", "xlink:href", "poster", "data"];

/// Renders every vector image in the tree to a PNG next to it and deletes the
/// original. References are left alone; see [`rewrite_vector_references`].
pub fn rasterize_tree(
    tree: &WorkingTree,
    converter: &dyn RasterConverter,
    zoom: f64,
) -> Result<Vec<PathBuf>> {
    let mut rasters = Vec::new();
    for svg in tree.vector_images()? {
        let png = svg.with_extension("png");
        log::debug!("Rasterizing {} at {zoom}x", svg.display());
        converter.convert(&svg, zoom, &png)?;
        std::fs::remove_file(&svg)
            .with_context(|| format!("Failed to remove {}", svg.display()))?;
        rasters.push(png);
    }
    Ok(rasters)
}

/// Points every reference to a vector image, in the package document, every
/// markup document and every style sheet, at its raster replacement. Returns the
/// number of references changed; running it again changes nothing.
pub fn rewrite_vector_references(tree: &WorkingTree) -> Result<usize> {
    let mut total = 0;

    let mut documents = tree.xhtml_files()?;
    documents.extend(tree.files(&["ncx"])?);
    documents.push(tree.package_path().to_path_buf());
    for path in documents {
        let mut doc = Document::load(&path)?;
        let changed = rewrite_document(&mut doc.root);
        if changed > 0 {
            log::debug!("Rewrote {changed} image reference(s) in {}", path.display());
            doc.save(&path)?;
            total += changed;
        }
    }

    for path in tree.stylesheets()? {
        let mut sheet = Stylesheet::load(&path)?;
        let changed = rewrite_stylesheet(&mut sheet);
        if changed > 0 {
            sheet.save(&path)?;
            total += changed;
        }
    }

    Ok(total)
}

/// The raster form of a reference to a local vector image, or `None` if the
/// reference doesn't point at one.
pub fn rewrite_reference(value: &str) -> Option<String> {
    if !crate::href::is_local(value) {
        return None;
    }
    let (path, fragment) = crate::href::split_fragment(value);
    let stem_len = path.len().checked_sub(4)?;
    if !path.is_char_boundary(stem_len) || !path[stem_len..].eq_ignore_ascii_case(".svg") {
        return None;
    }
    let mut rewritten = format!("{}.png", &path[..stem_len]);
    if let Some(fragment) = fragment {
        rewritten.push('#');
        rewritten.push_str(fragment);
    }
    Some(rewritten)
}

/// Rewrites reference attributes and inline `style` `url()`s below `root`.
pub fn rewrite_document(root: &mut Element) -> usize {
    let mut changed = 0;
    root.walk_mut(&mut |el| {
        for attr in el.attributes.iter_mut() {
            let rewritten = if REFERENCE_ATTRIBUTES.contains(&attr.name.as_str()) {
                rewrite_reference(&attr.value)
            } else if attr.name == "style" {
                rewrite_css_value(&attr.value)
            } else {
                None
            };
            if let Some(rewritten) = rewritten {
                attr.value = rewritten;
                changed += 1;
            }
        }
    });
    changed
}

pub fn rewrite_stylesheet(sheet: &mut Stylesheet) -> usize {
    let mut changed = 0;
    sheet.for_each_declarations_mut(&mut |declarations| {
        for decl in declarations.iter_mut() {
            if let Some(rewritten) = rewrite_css_value(&decl.value) {
                decl.value = rewritten;
                changed += 1;
            }
        }
    });
    changed
}

/// Rewrites the `url(...)` arguments inside a CSS value.
fn rewrite_css_value(value: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    let mut changed = false;

    while let Some(start) = rest.find("url(") {
        let arg_start = start + 4;
        let Some(arg_len) = rest[arg_start..].find(')') else {
            break;
        };
        let raw = &rest[arg_start..arg_start + arg_len];
        let trimmed = raw.trim();
        let (quote, inner) = match trimmed.chars().next() {
            Some(q @ ('"' | '\'')) if trimmed.len() >= 2 && trimmed.ends_with(q) => {
                (Some(q), &trimmed[1..trimmed.len() - 1])
            }
            _ => (None, trimmed),
        };

        out.push_str(&rest[..arg_start]);
        match rewrite_reference(inner) {
            Some(rewritten) => {
                changed = true;
                match quote {
                    Some(q) => {
                        out.push(q);
                        out.push_str(&rewritten);
                        out.push(q);
                    }
                    None => out.push_str(&rewritten),
                }
            }
            None => out.push_str(raw),
        }
        rest = &rest[arg_start + arg_len..];
    }
    out.push_str(rest);

    changed.then_some(out)
}
