//! Vector image rewrites: the simulated outside stroke and editor cleanup.
//!
//! Reading systems that can't render `paint-order` or outside-aligned strokes get the
//! effect faked instead. A copy of the artwork is stroked in white and slid
//! underneath the original; the original then covers the inner half of that
//! stroke, leaving only the part outside the shapes visible.

use crate::css::split_top_level;
use crate::error::BuildError;
use crate::xml::{Document, Element, Node};
use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;

/// Root children that never draw anything.
const NON_DRAWABLE: &[&str] = &["title", "desc", "metadata", "defs", "style"];

/// Namespace prefixes left behind by vector editors.
const EDITOR_PREFIXES: &[&str] = &["sodipodi", "inkscape"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrokeOutcome {
    /// Whether a shadow layer was inserted.
    pub stroked: bool,
    /// Whether the canvas was enlarged to fit the stroke.
    pub resized: bool,
}

/// Loads, strokes and saves the vector image at `path`.
pub fn stroke_file(path: &Path, width: f64) -> Result<StrokeOutcome> {
    let mut doc = Document::load(path)?;
    if !doc.root.is("svg") {
        return Err(BuildError::transform(path, "root element isn't <svg>").into());
    }
    let outcome = simulate_outline_stroke(&mut doc, width);
    if outcome.stroked {
        doc.save(path)?;
    }
    Ok(outcome)
}

/// Underlays a white-stroked copy of the artwork and, when the image declares its
/// size, grows the canvas by `width` so the stroke isn't clipped.
pub fn simulate_outline_stroke(doc: &mut Document, width: f64) -> StrokeOutcome {
    let root = &mut doc.root;
    let strokable = root.elements().any(|e| e.is("g") || e.is("path"));
    let first_drawable = root.position(|e| !NON_DRAWABLE.contains(&e.local_name()));
    let Some(first_drawable) = first_drawable.filter(|_| strokable) else {
        log::warn!("Vector image has no groups or paths to stroke");
        return StrokeOutcome {
            stroked: false,
            resized: false,
        };
    };

    let style = format!("fill: #fff; stroke: #fff; stroke-width: {}px;", fmt_num(width));
    let shadow: Vec<Node> = root
        .elements()
        .filter(|e| !NON_DRAWABLE.contains(&e.local_name()))
        .map(|e| {
            let mut copy = e.clone();
            copy.walk_mut(&mut |el| {
                el.remove_attr("id");
                if el.is("path") {
                    el.set_attr("style", style.as_str());
                }
            });
            Node::Element(copy)
        })
        .collect();
    root.children.splice(first_drawable..first_drawable, shadow);

    let resized = match (dimension(root, "width"), dimension(root, "height")) {
        (Some(w), Some(h)) => {
            root.set_attr("width", w.grow(width));
            root.set_attr("height", h.grow(width));
            if let Some(view_box) = root.attr("viewBox").and_then(|v| grow_view_box(v, width)) {
                root.set_attr("viewBox", view_box);
            }
            wrap_in_translation(root, first_drawable, width / 2.0);
            true
        }
        _ => {
            log::debug!("Vector image has no usable width/height, leaving its canvas alone");
            false
        }
    };

    StrokeOutcome {
        stroked: true,
        resized,
    }
}

/// Moves everything from `start` on (save trailing whitespace) into one
/// `<g transform="translate(offset, offset)">`.
fn wrap_in_translation(root: &mut Element, start: usize, offset: f64) {
    let mut content: Vec<Node> = root.children.drain(start..).collect();
    let trailing = match content.last() {
        Some(Node::Text(t)) if t.trim().is_empty() => content.pop(),
        _ => None,
    };
    let offset = fmt_num(offset);
    let mut group =
        Element::new("g").with_attr("transform", format!("translate({offset}, {offset})"));
    group.children = content;
    root.children.push(Node::Element(group));
    root.children.extend(trailing);
}

/// A length attribute we know how to enlarge: a plain number, optionally in `px`.
struct Dimension {
    value: f64,
    unit: &'static str,
}

impl Dimension {
    fn grow(&self, by: f64) -> String {
        format!("{}{}", fmt_num(self.value + by), self.unit)
    }
}

fn dimension(el: &Element, attr: &str) -> Option<Dimension> {
    let raw = el.attr(attr)?.trim();
    let (number, unit) = match raw.strip_suffix("px") {
        Some(number) => (number, "px"),
        None => (raw, ""),
    };
    let value = number.trim().parse::<f64>().ok()?;
    value.is_finite().then_some(Dimension { value, unit })
}

fn grow_view_box(view_box: &str, by: f64) -> Option<String> {
    let parts = view_box
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().ok())
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [x, y, w, h] => Some(format!(
            "{} {} {} {}",
            fmt_num(*x),
            fmt_num(*y),
            fmt_num(w + by),
            fmt_num(h + by)
        )),
        _ => None,
    }
}

/// Formats a number without a trailing `.0`.
pub fn fmt_num(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Removes editor-specific leftovers from a vector image: editor namespaces and
/// elements, `<metadata>`, ids nothing points at, and font/letter-spacing
/// presentation. Returns whether anything changed.
pub fn strip_editor_cruft(doc: &mut Document) -> bool {
    let referenced = referenced_ids(&doc.root);
    let mut changed = remove_cruft_elements(&mut doc.root);

    doc.root.walk_mut(&mut |el| {
        let before = el.attributes.len();
        el.attributes.retain(|a| {
            let prefix = a.name.split_once(':').map(|(p, _)| p);
            let editor = prefix
                .map(|p| EDITOR_PREFIXES.contains(&p))
                .unwrap_or(false)
                || a
                    .name
                    .strip_prefix("xmlns:")
                    .map(|p| EDITOR_PREFIXES.contains(&p))
                    .unwrap_or(false);
            let unreferenced_id = a.name == "id" && !referenced.contains(a.value.as_str());
            !(editor || unreferenced_id || is_font_property(&a.name))
        });
        if el.attributes.len() != before {
            changed = true;
        }

        if let Some(style) = el.attr("style") {
            let kept: Vec<String> = split_top_level(style, ';')
                .into_iter()
                .map(|d| d.trim().to_string())
                .filter(|d| {
                    !d.is_empty()
                        && !d
                            .split_once(':')
                            .map(|(p, _)| is_font_property(p.trim()))
                            .unwrap_or(false)
                })
                .collect();
            let rewritten = kept.join(";");
            if rewritten != style {
                changed = true;
                if rewritten.is_empty() {
                    el.remove_attr("style");
                } else {
                    el.set_attr("style", rewritten);
                }
            }
        }
    });

    changed
}

fn is_font_property(name: &str) -> bool {
    name.starts_with("font-") || name == "font" || name == "letter-spacing"
}

fn remove_cruft_elements(el: &mut Element) -> bool {
    let before = el.children.len();
    el.children.retain(|n| match n {
        Node::Element(child) => {
            let prefix = child.name.split_once(':').map(|(p, _)| p);
            !(child.is("metadata") || prefix.map(|p| EDITOR_PREFIXES.contains(&p)).unwrap_or(false))
        }
        _ => true,
    });
    let mut changed = el.children.len() != before;
    for child in el.elements_mut() {
        changed |= remove_cruft_elements(child);
    }
    changed
}

/// Every id mentioned as `#id` or `url(#id)` anywhere in the document.
fn referenced_ids(root: &Element) -> HashSet<String> {
    fn scan(text: &str, ids: &mut HashSet<String>) {
        let mut rest = text;
        while let Some(i) = rest.find('#') {
            rest = &rest[i + 1..];
            let id: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
                .collect();
            if !id.is_empty() {
                ids.insert(id);
            }
        }
    }

    let mut ids = HashSet::new();
    for el in root.find_all(&|_| true) {
        for attr in &el.attributes {
            scan(&attr.value, &mut ids);
        }
        if el.is("style") {
            scan(&el.text(), &mut ids);
        }
    }
    ids
}
