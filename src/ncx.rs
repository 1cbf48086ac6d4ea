//! In-process generator for the legacy `toc.ncx` navigation file.

use crate::collaborators::NcxGenerator;
use crate::error::BuildError;
use crate::href;
use crate::package::PackageDocument;
use crate::workspace::WorkingTree;
use crate::xml::{Document, Element, Node};
use anyhow::Result;
use std::path::PathBuf;

pub const NCX_FILE_NAME: &str = "toc.ncx";
const NCX_NAMESPACE: &str = "http://www.daisy.org/z3986/2005/ncx/";

/// Builds `toc.ncx` from the `toc` nav of the navigation document.
pub struct NavDocumentNcx;

impl NcxGenerator for NavDocumentNcx {
    fn generate(&self, tree: &WorkingTree, nav_href: &str) -> Result<PathBuf> {
        let package = PackageDocument::load(tree.package_path())?;
        let nav_path = tree.resolve_href(nav_href);
        let nav = Document::load(&nav_path)?;

        let map = NavMap::from_nav(&nav, nav_href).ok_or_else(|| {
            BuildError::transform(&nav_path, "navigation document has no toc nav")
        })?;
        let ncx = map.to_document(
            package.unique_identifier().as_deref().unwrap_or_default(),
            package.title().as_deref().unwrap_or_default(),
        );

        let output = tree.package_dir().join(NCX_FILE_NAME);
        ncx.save(&output)?;
        log::debug!(
            "Wrote {} navigation point(s) to {}",
            map.count(),
            output.display()
        );
        Ok(output)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavPoint {
    pub label: String,
    /// Relative to the package directory
    pub src: String,
    pub children: Vec<NavPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NavMap {
    pub points: Vec<NavPoint>,
}

impl NavMap {
    /// Reads the `toc` nav of a navigation document found at package-relative
    /// `nav_href`.
    pub fn from_nav(nav: &Document, nav_href: &str) -> Option<NavMap> {
        let toc = nav
            .root
            .find(&|e| e.is("nav") && e.has_token("epub:type", "toc"))?;
        let base = href::parent(nav_href);
        let points = toc
            .child("ol")
            .map(|ol| read_list(ol, base))
            .unwrap_or_default();
        Some(NavMap { points })
    }

    pub fn count(&self) -> usize {
        fn count(points: &[NavPoint]) -> usize {
            points.iter().map(|p| 1 + count(&p.children)).sum()
        }
        count(&self.points)
    }

    pub fn depth(&self) -> usize {
        fn depth(points: &[NavPoint]) -> usize {
            points
                .iter()
                .map(|p| 1 + depth(&p.children))
                .max()
                .unwrap_or(0)
        }
        depth(&self.points)
    }

    pub fn to_document(&self, uid: &str, title: &str) -> Document {
        let meta = |name: &str, content: String| {
            Element::new("meta")
                .with_attr("content", content)
                .with_attr("name", name)
        };
        let head = indented(
            Element::new("head"),
            vec![
                meta("dtb:uid", uid.to_string()),
                meta("dtb:depth", self.depth().max(1).to_string()),
                meta("dtb:totalPageCount", "0".to_string()),
                meta("dtb:maxPageNumber", "0".to_string()),
            ],
            2,
        );
        let doc_title = indented(
            Element::new("docTitle"),
            vec![Element::new("text").with_text(title)],
            2,
        );

        let mut play_order = 0;
        let nav_points = self
            .points
            .iter()
            .map(|p| write_point(p, 2, &mut play_order))
            .collect();
        let nav_map = indented(Element::new("navMap"), nav_points, 2);

        let ncx = indented(
            Element::new("ncx")
                .with_attr("xmlns", NCX_NAMESPACE)
                .with_attr("version", "2005-1"),
            vec![head, doc_title, nav_map],
            1,
        );
        Document::new(ncx)
    }
}

fn read_list(ol: &Element, base: &str) -> Vec<NavPoint> {
    ol.elements()
        .filter(|e| e.is("li"))
        .filter_map(|li| {
            let children = li
                .child("ol")
                .map(|nested| read_list(nested, base))
                .unwrap_or_default();
            let anchor = li.child("a")?;
            let target = anchor.attr("href")?;
            Some(NavPoint {
                label: anchor.text().split_whitespace().collect::<Vec<_>>().join(" "),
                src: href::join(base, target),
                children,
            })
        })
        .collect()
}

fn write_point(point: &NavPoint, depth: usize, play_order: &mut usize) -> Element {
    *play_order += 1;
    let label = indented(
        Element::new("navLabel"),
        vec![Element::new("text").with_text(point.label.as_str())],
        depth + 1,
    );
    let mut children = vec![
        label,
        Element::new("content").with_attr("src", point.src.as_str()),
    ];
    let order = *play_order;
    for child in &point.children {
        children.push(write_point(child, depth + 1, play_order));
    }
    indented(
        Element::new("navPoint")
            .with_attr("id", format!("navpoint-{order}"))
            .with_attr("playOrder", order.to_string()),
        children,
        depth,
    )
}

/// Puts `children` in `parent`, one per line, indented `depth` tabs.
fn indented(mut parent: Element, children: Vec<Element>, depth: usize) -> Element {
    let inner = format!("\n{}", "\t".repeat(depth));
    let outer = format!("\n{}", "\t".repeat(depth.saturating_sub(1)));
    let has_children = !children.is_empty();
    for child in children {
        parent = parent.with_text(inner.as_str()).with_child(child);
    }
    if has_children {
        parent.children.push(Node::Text(outer));
    }
    parent
}
