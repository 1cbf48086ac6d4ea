//! Markup and styles for readers that only understand EPUB 2.
//!
//! Namespaced attribute selectors (`[epub|type~="z3998:roman"]`) are unknown to
//! those readers, so they become class selectors and the matching elements get the
//! class. Hyphenation also needs the vendor-prefixed properties.

use crate::css::{CssItem, Declaration, Stylesheet};
use crate::workspace::WorkingTree;
use crate::xml::Element;
use anyhow::Result;
use std::collections::BTreeSet;

const HYPHENATION_ALIASES: &[&str] = &["-webkit-hyphens", "-epub-hyphens", "adobe-hyphenate"];

pub fn apply(tree: &WorkingTree) -> Result<usize> {
    let mut tokens = BTreeSet::new();
    let mut edits = super::edit_stylesheets(&tree.stylesheets()?, |sheet| {
        convert_type_selectors(sheet, &mut tokens) + add_hyphenation_aliases(sheet)
    })?;
    if !tokens.is_empty() {
        edits += super::edit_documents(&tree.xhtml_files()?, |_, doc| {
            Ok(add_type_classes(&mut doc.root, &tokens))
        })?;
    }
    Ok(edits)
}

/// The class standing in for an `epub:type` token.
pub fn type_class(token: &str) -> String {
    format!("epub-type-{}", token.replace([':', '.'], "-"))
}

/// Rewrites `[epub|type~="token"]` selectors as `.epub-type-token`, collecting the
/// tokens seen. Drops `@namespace epub` once nothing refers to it.
pub fn convert_type_selectors(sheet: &mut Stylesheet, tokens: &mut BTreeSet<String>) -> usize {
    let mut changed = 0;
    let mut namespace_used = false;
    sheet.for_each_rule_mut(&mut |rule| {
        for selector in rule.selectors.iter_mut() {
            if let Some(converted) = convert_selector(selector, tokens) {
                *selector = converted;
                changed += 1;
            }
            if selector.contains("epub|") {
                namespace_used = true;
            }
        }
    });

    if !namespace_used {
        let before = sheet.items.len();
        sheet.items.retain(|item| {
            !matches!(item, CssItem::AtStatement(s) if is_epub_namespace(s))
        });
        changed += before - sheet.items.len();
    }
    changed
}

fn is_epub_namespace(statement: &str) -> bool {
    let mut words = statement.split_whitespace();
    words.next() == Some("namespace") && words.next() == Some("epub")
}

fn convert_selector(selector: &str, tokens: &mut BTreeSet<String>) -> Option<String> {
    const OPEN: &str = "[epub|type~=";
    if !selector.contains(OPEN) {
        return None;
    }

    let mut out = String::with_capacity(selector.len());
    let mut rest = selector;
    let mut changed = false;
    while let Some(start) = rest.find(OPEN) {
        let value_start = start + OPEN.len();
        let Some(len) = rest[value_start..].find(']') else {
            break;
        };
        let token = rest[value_start..value_start + len]
            .trim()
            .trim_matches(|c| c == '"' || c == '\'');
        out.push_str(&rest[..start]);
        if token.is_empty() || token.contains(char::is_whitespace) {
            out.push_str(&rest[start..value_start + len + 1]);
        } else {
            out.push('.');
            out.push_str(&type_class(token));
            tokens.insert(token.to_string());
            changed = true;
        }
        rest = &rest[value_start + len + 1..];
    }
    out.push_str(rest);
    changed.then_some(out)
}

/// Adds the class for each of `tokens` found in an element's `epub:type`.
pub fn add_type_classes(root: &mut Element, tokens: &BTreeSet<String>) -> usize {
    let mut changed = 0;
    root.walk_mut(&mut |el| {
        let classes: Vec<String> = el
            .tokens("epub:type")
            .into_iter()
            .filter(|t| tokens.contains(*t))
            .map(type_class)
            .collect();
        for class in classes {
            if el.add_token("class", &class) {
                changed += 1;
            }
        }
    });
    changed
}

/// Gives every `hyphens` declaration its prefixed siblings.
pub fn add_hyphenation_aliases(sheet: &mut Stylesheet) -> usize {
    let mut added = 0;
    sheet.for_each_declarations_mut(&mut |declarations| {
        let Some(index) = declarations
            .iter()
            .position(|d| d.property.eq_ignore_ascii_case("hyphens"))
        else {
            return;
        };
        let value = declarations[index].value.clone();
        let mut insert_at = index + 1;
        for alias in HYPHENATION_ALIASES {
            if declarations
                .iter()
                .any(|d| d.property.eq_ignore_ascii_case(alias))
            {
                continue;
            }
            declarations.insert(insert_at, Declaration::new(*alias, value.as_str()));
            insert_at += 1;
            added += 1;
        }
    });
    added
}
