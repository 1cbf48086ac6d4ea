//! Downgrading vocabulary namespaces from `https://` to `http://`.
//!
//! At least one reader fails to recognize the vocabulary when its namespace is
//! declared with the secure scheme, so the package and every document get the
//! insecure form.

use crate::workspace::WorkingTree;
use crate::xml::Element;
use anyhow::Result;

/// The `http://` form of an `https://` URI.
pub fn insecure_form(uri: &str) -> String {
    match uri.strip_prefix("https://") {
        Some(rest) => format!("http://{rest}"),
        None => uri.to_string(),
    }
}

/// Rewrites every attribute value and text node below `root` that mentions one of
/// `namespaces`. Returns the number of values changed.
pub fn downgrade(root: &mut Element, namespaces: &[String]) -> usize {
    let replacements: Vec<(&str, String)> = namespaces
        .iter()
        .filter(|ns| ns.starts_with("https://"))
        .map(|ns| (ns.as_str(), insecure_form(ns)))
        .collect();
    let rewrite = |value: &mut String| -> bool {
        let mut changed = false;
        for (secure, insecure) in &replacements {
            if value.contains(secure) {
                *value = value.replace(secure, insecure);
                changed = true;
            }
        }
        changed
    };

    let mut changed = 0;
    root.walk_mut(&mut |el| {
        for attr in el.attributes.iter_mut() {
            if rewrite(&mut attr.value) {
                changed += 1;
            }
        }
    });
    root.walk_text_mut(&mut |text| {
        if rewrite(text) {
            changed += 1;
        }
    });
    changed
}

/// Applies [`downgrade`] to the package document, every XHTML document and every
/// NCX file in the tree.
pub fn downgrade_tree(tree: &WorkingTree, namespaces: &[String]) -> Result<usize> {
    let mut documents = vec![tree.package_path().to_path_buf()];
    documents.extend(tree.xhtml_files()?);
    documents.extend(tree.files(&["ncx"])?);
    super::edit_documents(&documents, |_, doc| Ok(downgrade(&mut doc.root, namespaces)))
}
