use super::MarkupSimplifier;
use crate::xml::{Document, Element, Node};
use anyhow::{Context, Result};
use ignore::WalkBuilder;
use std::path::Path;

/// Built-in markup simplifier: unwraps `<span>`s that carry no attributes and merges
/// the text runs left behind. Documents that fail to parse are reported as
/// diagnostics rather than errors so the caller can decide what to do with them.
pub struct DomSimplifier;

impl MarkupSimplifier for DomSimplifier {
    fn simplify(&self, root: &Path) -> Result<Vec<String>> {
        let mut diagnostics = Vec::new();
        for entry in WalkBuilder::new(root).standard_filters(false).build() {
            let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            let path = entry.path();
            let is_xhtml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("xhtml"))
                .unwrap_or(false);
            if !is_xhtml || !path.is_file() {
                continue;
            }

            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let mut doc = match Document::parse(&contents) {
                Ok(doc) => doc,
                Err(e) => {
                    diagnostics.push(format!("{}: {e}", path.display()));
                    continue;
                }
            };
            if unwrap_bare_spans(&mut doc.root) > 0 {
                doc.root.normalize_text();
                doc.save(path)?;
            }
        }
        Ok(diagnostics)
    }
}

/// Replaces every attribute-less `<span>` below `el` with its children. Returns how
/// many were removed.
fn unwrap_bare_spans(el: &mut Element) -> usize {
    let mut removed = 0;
    let mut children = Vec::with_capacity(el.children.len());
    for child in el.children.drain(..) {
        match child {
            Node::Element(mut child) => {
                removed += unwrap_bare_spans(&mut child);
                if child.is("span") && child.attributes.is_empty() {
                    removed += 1;
                    children.extend(child.children);
                } else {
                    children.push(Node::Element(child));
                }
            }
            other => children.push(other),
        }
    }
    el.children = children;
    removed
}
