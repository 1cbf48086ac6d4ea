//! Proofreading styles, injected on request into every document.

use crate::href;
use crate::package::{PackageDocument, CSS_MEDIA_TYPE};
use crate::workspace::WorkingTree;
use crate::xml::Element;
use anyhow::{Context, Result};

pub const PROOFING_FILE_NAME: &str = "proofing.css";

const PROOFING_CSS: &str = r#"@namespace epub "http://www.idpf.org/2007/ops";

abbr,
[epub|type~="z3998:roman"]{
	outline: 1px dashed #c00;
}

i[epub|type],
b[epub|type]{
	background-color: rgba(255, 230, 0, 0.35);
}

[lang]{
	text-decoration: underline dotted #06c;
}
"#;

/// Writes the proofing style sheet next to the existing ones, adds it to the
/// manifest and links it from every document. Returns the number of documents
/// linked.
pub fn inject(tree: &WorkingTree, package: &mut PackageDocument) -> Result<usize> {
    let css_dir = match tree.stylesheets()?.first().and_then(|p| p.parent()) {
        Some(dir) => dir.to_path_buf(),
        None => tree.package_dir().join("css"),
    };
    std::fs::create_dir_all(&css_dir)
        .with_context(|| format!("Failed to create {}", css_dir.display()))?;
    let css_path = css_dir.join(PROOFING_FILE_NAME);
    std::fs::write(&css_path, PROOFING_CSS)
        .with_context(|| format!("Failed to write {}", css_path.display()))?;

    let css_href = tree.package_href(&css_path)?;
    package.add_manifest_item(PROOFING_FILE_NAME, &css_href, CSS_MEDIA_TYPE)?;

    let mut linked = 0;
    for path in tree.xhtml_files()? {
        let doc_href = tree.package_href(&path)?;
        let link_href = href::relative(href::parent(&doc_href), &css_href);
        linked += super::edit_documents(std::slice::from_ref(&path), |_, doc| {
            let Some(head) = doc.root.child_mut("head") else {
                log::warn!("{} has no <head>, not linking proofing styles", path.display());
                return Ok(0);
            };
            head.append_indented(
                Element::new("link")
                    .with_attr("href", link_href.as_str())
                    .with_attr("rel", "stylesheet")
                    .with_attr("type", "text/css"),
            );
            Ok(1)
        })?;
    }
    Ok(linked)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fixture;
    use crate::xml::Document;

    #[test]
    fn links_every_document() {
        let source = fixture::source_tree();
        let tree = WorkingTree::materialize(source.path()).expect("can open working tree");
        let mut package = PackageDocument::load(tree.package_path()).expect("can load package");
        let documents = tree.xhtml_files().expect("can list documents").len();

        let linked = inject(&tree, &mut package).expect("can inject proofing styles");
        assert_eq!(linked, documents);
        assert!(tree.package_dir().join("css/proofing.css").is_file());
        assert!(package
            .manifest()
            .iter()
            .any(|i| i.href == "css/proofing.css" && i.media_type == CSS_MEDIA_TYPE));

        let chapter = Document::load(tree.package_dir().join("text/chapter-1.xhtml"))
            .expect("can load chapter");
        let link = chapter
            .root
            .find(&|e| e.is("link") && e.attr("href") == Some("../css/proofing.css"));
        assert!(link.is_some());

        let nav = Document::load(tree.package_dir().join("toc.xhtml")).expect("can load nav");
        assert!(nav
            .root
            .find(&|e| e.is("link") && e.attr("href") == Some("css/proofing.css"))
            .is_some());
    }
}
