//! Span markup for the vendor reader.
//!
//! The vendor's reader tracks reading position and highlights through spans with
//! ids of the form `kobo.{paragraph}.{segment}`. Every run of text inside a
//! paragraph-level element gets one.

use crate::package::PackageDocument;
use crate::workspace::WorkingTree;
use crate::xml::{Element, Node};
use anyhow::Result;

pub const SPAN_CLASS: &str = "koboSpan";

const PARAGRAPH_ELEMENTS: &[&str] = &[
    "p",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "li",
    "dt",
    "dd",
    "td",
    "th",
    "figcaption",
];

pub fn apply(tree: &WorkingTree) -> Result<usize> {
    let package = PackageDocument::load(tree.package_path())?;
    let nav = package.nav_item().map(|item| tree.resolve_href(&item.href));
    let documents: Vec<_> = tree
        .xhtml_files()?
        .into_iter()
        .filter(|path| Some(path) != nav.as_ref())
        .collect();
    super::edit_documents(&documents, |_, doc| Ok(add_spans(&mut doc.root)))
}

/// Wraps text runs below `root` in numbered spans. Returns the number of spans
/// added; already-spanned text is left alone.
pub fn add_spans(root: &mut Element) -> usize {
    let mut counter = SpanCounter::default();
    walk(root, &mut counter, None);
    counter.added
}

#[derive(Default)]
struct SpanCounter {
    paragraphs: usize,
    added: usize,
}

/// `paragraph` holds the current paragraph number and the next segment number.
fn walk(el: &mut Element, counter: &mut SpanCounter, paragraph: Option<(usize, &mut usize)>) {
    if el.is("span") && el.has_token("class", SPAN_CLASS) {
        return;
    }

    let mut own_segment = 1;
    let mut paragraph: Option<(usize, &mut usize)> =
        if PARAGRAPH_ELEMENTS.contains(&el.local_name()) {
            counter.paragraphs += 1;
            Some((counter.paragraphs, &mut own_segment))
        } else {
            paragraph
        };

    for child in el.children.iter_mut() {
        match child {
            Node::Element(child_el) => {
                let reborrowed = paragraph.as_mut().map(|(p, s)| (*p, &mut **s));
                walk(child_el, counter, reborrowed);
            }
            Node::Text(text) if !text.trim().is_empty() => {
                if let Some((p, segment)) = paragraph.as_mut() {
                    let span = Element::new("span")
                        .with_attr("class", SPAN_CLASS)
                        .with_attr("id", format!("kobo.{p}.{}", **segment))
                        .with_text(std::mem::take(text));
                    *child = Node::Element(span);
                    **segment += 1;
                    counter.added += 1;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::xml::Document;

    fn span_ids(root: &Element) -> Vec<String> {
        root.find_all(&|e| e.has_token("class", SPAN_CLASS))
            .into_iter()
            .filter_map(|e| e.attr("id").map(ToString::to_string))
            .collect()
    }

    #[test]
    fn wraps_text_runs_per_paragraph() {
        let mut doc = Document::parse(
            r#"<body>
	<h2>Chapter</h2>
	<p>One <i>two</i> three.</p>
	<blockquote><p>Quoted</p></blockquote>
</body>"#,
        )
        .expect("can parse");
        assert_eq!(add_spans(&mut doc.root), 5);
        assert_eq!(
            span_ids(&doc.root),
            vec!["kobo.1.1", "kobo.2.1", "kobo.2.2", "kobo.2.3", "kobo.3.1"]
        );
        let i = doc.root.find(&|e| e.is("i")).expect("has i");
        assert_eq!(i.text(), "two");
        assert!(i.child("span").is_some());
    }

    #[test]
    fn is_idempotent() {
        let mut doc = Document::parse("<body><p>a<b>b</b></p></body>").expect("can parse");
        assert_eq!(add_spans(&mut doc.root), 2);
        let once = doc.to_xml();
        assert_eq!(add_spans(&mut doc.root), 0);
        assert_eq!(doc.to_xml(), once);
    }

    #[test]
    fn text_outside_paragraphs_is_untouched() {
        let mut doc = Document::parse("<body><div>loose</div></body>").expect("can parse");
        assert_eq!(add_spans(&mut doc.root), 0);
    }
}
