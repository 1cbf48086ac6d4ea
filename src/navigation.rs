//! Legacy guide synthesis.
//!
//! Older reading systems find the cover, table of contents and friends through the
//! package's `<guide>` rather than the navigation document's landmarks. The guide
//! vocabulary is smaller, so some landmarks have no equivalent and are dropped.

use crate::href;
use crate::xml::{Document, Element, Node};

/// Structural grouping tokens with no guide equivalent.
const GROUPING_TOKENS: &[&str] = &["frontmatter", "backmatter"];

/// A landmark from the navigation document, with `href` relative to the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationLandmark {
    pub semantic_types: Vec<String>,
    pub href: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuideKind {
    Acknowledgements,
    Bibliography,
    Colophon,
    CopyrightPage,
    Cover,
    Dedication,
    Epigraph,
    Foreword,
    Glossary,
    Index,
    Loi,
    Lot,
    Notes,
    Preface,
    Bodymatter,
    Titlepage,
    Toc,
}

impl GuideKind {
    pub fn from_token(token: &str) -> Option<GuideKind> {
        Some(match token {
            "acknowledgements" => GuideKind::Acknowledgements,
            "bibliography" => GuideKind::Bibliography,
            "colophon" => GuideKind::Colophon,
            "copyright-page" => GuideKind::CopyrightPage,
            "cover" => GuideKind::Cover,
            "dedication" => GuideKind::Dedication,
            "epigraph" => GuideKind::Epigraph,
            "foreword" => GuideKind::Foreword,
            "glossary" => GuideKind::Glossary,
            "index" => GuideKind::Index,
            "loi" => GuideKind::Loi,
            "lot" => GuideKind::Lot,
            "notes" => GuideKind::Notes,
            "preface" => GuideKind::Preface,
            "bodymatter" => GuideKind::Bodymatter,
            "titlepage" => GuideKind::Titlepage,
            "toc" => GuideKind::Toc,
            _ => return None,
        })
    }

    /// The value written to `reference@type`.
    pub fn guide_type(&self) -> &'static str {
        match self {
            GuideKind::Acknowledgements => "acknowledgements",
            GuideKind::Bibliography => "bibliography",
            GuideKind::Colophon => "colophon",
            GuideKind::CopyrightPage => "copyright page",
            GuideKind::Cover => "cover",
            GuideKind::Dedication => "dedication",
            GuideKind::Epigraph => "epigraph",
            GuideKind::Foreword => "foreword",
            GuideKind::Glossary => "glossary",
            GuideKind::Index => "index",
            GuideKind::Loi => "loi",
            GuideKind::Lot => "lot",
            GuideKind::Notes => "notes",
            GuideKind::Preface => "preface",
            GuideKind::Bodymatter => "bodymatter",
            GuideKind::Titlepage => "titlepage text",
            GuideKind::Toc => "toc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyGuideReference {
    pub kind: GuideKind,
    pub title: String,
    pub href: String,
}

/// The landmarks list of the navigation document at package-relative `nav_href`.
pub fn landmarks(nav: &Document, nav_href: &str) -> Vec<NavigationLandmark> {
    let Some(list) = nav
        .root
        .find(&|e| e.is("nav") && e.has_token("epub:type", "landmarks"))
    else {
        return Vec::new();
    };

    let base = href::parent(nav_href);
    list.find_all(&|e| e.is("a"))
        .into_iter()
        .filter_map(|a| {
            let target = a.attr("href")?;
            Some(NavigationLandmark {
                semantic_types: a
                    .tokens("epub:type")
                    .into_iter()
                    .map(ToString::to_string)
                    .collect(),
                href: href::join(base, target),
                title: a.text().split_whitespace().collect::<Vec<_>>().join(" "),
            })
        })
        .collect()
}

/// Maps landmarks onto the guide vocabulary, keeping their order. A landmark is
/// kept only when exactly one recognized token remains once grouping tokens are
/// set aside.
pub fn synthesize_guide(landmarks: &[NavigationLandmark]) -> Vec<LegacyGuideReference> {
    landmarks
        .iter()
        .filter_map(|landmark| {
            let kinds: Vec<GuideKind> = landmark
                .semantic_types
                .iter()
                .filter(|t| !GROUPING_TOKENS.contains(&t.as_str()))
                .filter_map(|t| GuideKind::from_token(t))
                .collect();
            match kinds.as_slice() {
                [kind] => Some(LegacyGuideReference {
                    kind: *kind,
                    title: landmark.title.clone(),
                    href: landmark.href.clone(),
                }),
                _ => {
                    log::debug!(
                        "Landmark {} ({}) has no guide equivalent",
                        landmark.href,
                        landmark.semantic_types.join(" ")
                    );
                    None
                }
            }
        })
        .collect()
}

/// A `<guide>` element holding one `<reference>` per entry.
pub fn guide_element(references: &[LegacyGuideReference]) -> Element {
    let mut guide = Element::new("guide");
    guide.expanded = true;
    for reference in references {
        guide.children.push(Node::text("\n\t\t"));
        guide.children.push(Node::Element(
            Element::new("reference")
                .with_attr("href", reference.href.as_str())
                .with_attr("title", reference.title.as_str())
                .with_attr("type", reference.kind.guide_type()),
        ));
    }
    if !references.is_empty() {
        guide.children.push(Node::text("\n\t"));
    }
    guide
}
