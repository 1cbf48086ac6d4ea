//! Markup and styles for dedicated hardware readers.

use crate::css::Stylesheet;
use crate::workspace::WorkingTree;
use crate::xml::{Element, Node};
use anyhow::Result;

/// Zero-width space, word joiner and byte-order mark; rendered as boxes.
const INVISIBLE_CHARACTERS: &[char] = &['\u{200b}', '\u{2060}', '\u{feff}'];

/// Declarations the hardware renderer mishandles.
const UNSUPPORTED_PROPERTIES: &[&str] =
    &["font-variant-numeric", "hanging-punctuation", "text-rendering"];

const NOTE_TYPES: &[&str] = &["endnote", "footnote"];

pub fn apply(tree: &WorkingTree) -> Result<usize> {
    let mut edits = super::edit_documents(&tree.xhtml_files()?, |_, doc| {
        Ok(strip_invisible_characters(&mut doc.root) + number_notes(&mut doc.root))
    })?;
    edits += super::edit_stylesheets(&tree.stylesheets()?, remove_unsupported_declarations)?;
    Ok(edits)
}

pub fn strip_invisible_characters(root: &mut Element) -> usize {
    let mut changed = 0;
    root.walk_text_mut(&mut |text| {
        if text.contains(INVISIBLE_CHARACTERS) {
            text.retain(|c| !INVISIBLE_CHARACTERS.contains(&c));
            changed += 1;
        }
    });
    changed
}

/// Writes the number of each endnote or footnote into its first paragraph, since
/// list numbering isn't rendered.
pub fn number_notes(root: &mut Element) -> usize {
    let mut numbered = 0;
    root.walk_mut(&mut |el| {
        if !el.is("ol") {
            return;
        }
        let mut n = el
            .attr("start")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(1);
        for li in el.elements_mut().filter(|e| e.is("li")) {
            let is_note = li
                .tokens("epub:type")
                .iter()
                .any(|t| NOTE_TYPES.contains(t));
            if !is_note {
                continue;
            }
            if let Some(p) = li.child_mut("p") {
                p.children.insert(0, Node::text(format!("{n}. ")));
                numbered += 1;
            }
            n += 1;
        }
    });
    numbered
}

pub fn remove_unsupported_declarations(sheet: &mut Stylesheet) -> usize {
    let mut removed = 0;
    sheet.for_each_declarations_mut(&mut |declarations| {
        let before = declarations.len();
        declarations.retain(|d| {
            !UNSUPPORTED_PROPERTIES
                .iter()
                .any(|p| d.property.eq_ignore_ascii_case(p))
        });
        removed += before - declarations.len();
    });
    removed
}
