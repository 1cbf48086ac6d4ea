//! The package document: manifest, spine and metadata.
//!
//! The package is loaded once per working tree and edited in place by the build
//! stages. Edits only ever add to the spine or change attributes of existing
//! entries, and [`PackageDocument::save`] refuses to write a package whose manifest
//! ids collide or whose spine points at nothing.

use crate::error::BuildError;
use crate::navigation::{guide_element, LegacyGuideReference};
use crate::xml::{Document, Element, Node};
use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub const SVG_MEDIA_TYPE: &str = "image/svg+xml";
pub const PNG_MEDIA_TYPE: &str = "image/png";
pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";
pub const CSS_MEDIA_TYPE: &str = "text/css";

/// Marks a package as having been through the compatibility rewrite.
pub const PROVENANCE_META: (&str, &str) = ("ebook-compat:transform", "compatibility");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub properties: Vec<String>,
}

impl ManifestItem {
    pub fn has_property(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItemRef {
    pub idref: String,
    pub linear: bool,
}

#[derive(Debug)]
pub struct PackageDocument {
    path: PathBuf,
    doc: Document,
}

impl PackageDocument {
    pub fn load(path: &Path) -> Result<PackageDocument> {
        let doc = Document::load(path)?;
        if !doc.root.is("package") {
            return Err(BuildError::transform(path, "root element isn't <package>").into());
        }
        Ok(PackageDocument {
            path: path.to_path_buf(),
            doc,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    fn section(&self, local: &str) -> Result<&Element> {
        self.doc
            .root
            .child(local)
            .ok_or_else(|| BuildError::transform(&self.path, format!("no <{local}>")).into())
    }

    fn section_mut(&mut self, local: &str) -> Result<&mut Element> {
        let path = self.path.clone();
        self.doc
            .root
            .child_mut(local)
            .ok_or_else(|| BuildError::transform(path, format!("no <{local}>")).into())
    }

    pub fn manifest(&self) -> Vec<ManifestItem> {
        let Some(manifest) = self.doc.root.child("manifest") else {
            return Vec::new();
        };
        manifest
            .elements()
            .filter(|e| e.is("item"))
            .map(|item| ManifestItem {
                id: item.attr("id").unwrap_or_default().to_string(),
                href: item.attr("href").unwrap_or_default().to_string(),
                media_type: item.attr("media-type").unwrap_or_default().to_string(),
                properties: item
                    .tokens("properties")
                    .into_iter()
                    .map(ToString::to_string)
                    .collect(),
            })
            .collect()
    }

    pub fn spine(&self) -> Vec<SpineItemRef> {
        let Some(spine) = self.doc.root.child("spine") else {
            return Vec::new();
        };
        spine
            .elements()
            .filter(|e| e.is("itemref"))
            .map(|itemref| SpineItemRef {
                idref: itemref.attr("idref").unwrap_or_default().to_string(),
                linear: itemref.attr("linear") != Some("no"),
            })
            .collect()
    }

    pub fn item_by_property(&self, property: &str) -> Option<ManifestItem> {
        self.manifest().into_iter().find(|i| i.has_property(property))
    }

    /// The navigation document.
    pub fn nav_item(&self) -> Option<ManifestItem> {
        self.item_by_property("nav")
    }

    pub fn cover_item(&self) -> Option<ManifestItem> {
        self.item_by_property("cover-image")
    }

    /// The `dc:identifier` named by `package@unique-identifier`.
    pub fn unique_identifier(&self) -> Option<String> {
        let id = self.doc.root.attr("unique-identifier")?;
        let metadata = self.doc.root.child("metadata")?;
        metadata
            .elements()
            .find(|e| e.is("identifier") && e.attr("id") == Some(id))
            .map(|e| e.text().trim().to_string())
    }

    pub fn title(&self) -> Option<String> {
        self.doc
            .root
            .child("metadata")?
            .child("title")
            .map(|e| e.text().trim().to_string())
    }

    /// Every way in which the manifest and spine disagree. Empty when the package is
    /// consistent.
    pub fn check_integrity(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut ids = HashSet::new();
        for item in self.manifest() {
            if item.id.is_empty() {
                problems.push(format!("manifest item {} has no id", item.href));
            } else if !ids.insert(item.id.clone()) {
                problems.push(format!("manifest id {} is used more than once", item.id));
            }
        }
        for itemref in self.spine() {
            if !ids.contains(&itemref.idref) {
                problems.push(format!(
                    "spine item {} has no manifest entry",
                    itemref.idref
                ));
            }
        }
        if let Some(toc) = self.doc.root.child("spine").and_then(|s| s.attr("toc")) {
            if !ids.contains(toc) {
                problems.push(format!("spine toc {toc} has no manifest entry"));
            }
        }
        problems
    }

    /// Changes every manifest item of media type `from` to `to`. Returns how many
    /// changed.
    pub fn replace_media_type(&mut self, from: &str, to: &str) -> usize {
        let mut changed = 0;
        if let Some(manifest) = self.doc.root.child_mut("manifest") {
            for item in manifest.elements_mut().filter(|e| e.is("item")) {
                if item.attr("media-type") == Some(from) {
                    item.set_attr("media-type", to);
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Removes `property` from every manifest item, dropping `properties`
    /// attributes left empty.
    pub fn remove_property(&mut self, property: &str) -> usize {
        let mut changed = 0;
        if let Some(manifest) = self.doc.root.child_mut("manifest") {
            for item in manifest.elements_mut().filter(|e| e.is("item")) {
                if item.remove_token("properties", property) {
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Sets `<meta name=… content=…/>`, replacing an existing one with that name.
    pub fn set_meta(&mut self, name: &str, content: &str) -> Result<()> {
        let metadata = self.section_mut("metadata")?;
        if let Some(existing) = metadata
            .elements_mut()
            .find(|e| e.is("meta") && e.attr("name") == Some(name))
        {
            existing.set_attr("content", content);
            return Ok(());
        }
        metadata.append_indented(
            Element::new("meta")
                .with_attr("name", name)
                .with_attr("content", content),
        );
        Ok(())
    }

    /// Adds a `dc:identifier` with the given element id.
    pub fn add_identifier(&mut self, id: &str, value: &str) -> Result<()> {
        let metadata = self.section_mut("metadata")?;
        let name = metadata
            .elements()
            .find(|e| e.is("identifier"))
            .map(|e| e.name.clone())
            .unwrap_or_else(|| "dc:identifier".to_string());
        metadata.elements_mut().for_each(|e| {
            if e.is("identifier") && e.attr("id") == Some(id) {
                e.remove_attr("id");
            }
        });
        metadata.append_indented(Element::new(name).with_attr("id", id).with_text(value));
        Ok(())
    }

    /// Adds a manifest item and returns its id: `preferred_id`, or that with a
    /// numeric suffix if it is already taken.
    pub fn add_manifest_item(
        &mut self,
        preferred_id: &str,
        href: &str,
        media_type: &str,
    ) -> Result<String> {
        let taken: HashSet<String> = self.manifest().into_iter().map(|i| i.id).collect();
        let id = std::iter::once(preferred_id.to_string())
            .chain((2..).map(|n| format!("{preferred_id}-{n}")))
            .find(|candidate| !taken.contains(candidate))
            .ok_or_else(|| anyhow!("Ran out of manifest ids"))?;

        self.section_mut("manifest")?.append_indented(
            Element::new("item")
                .with_attr("href", href)
                .with_attr("id", id.as_str())
                .with_attr("media-type", media_type),
        );
        Ok(id)
    }

    pub fn set_spine_toc(&mut self, id: &str) -> Result<()> {
        self.section_mut("spine")?.set_attr("toc", id);
        Ok(())
    }

    /// Puts a `<guide>` built from `references` at the end of the package,
    /// replacing any guide already there.
    pub fn set_guide(&mut self, references: &[LegacyGuideReference]) {
        let root = &mut self.doc.root;
        if let Some(index) = root.position(|e| e.is("guide")) {
            root.children.remove(index);
            if matches!(root.children.get(index.wrapping_sub(1)), Some(Node::Text(t)) if t.trim().is_empty())
            {
                root.children.remove(index - 1);
            }
        }
        root.append_indented(guide_element(references));
    }

    /// Renames manifest ids that still name a vector image (`cover.svg`) once the
    /// item no longer is one, and repoints every id reference in the package at the
    /// new name. Returns the number of items renamed.
    pub fn rename_vector_ids(&mut self) -> usize {
        let items = self.manifest();
        let mut taken: HashSet<String> = items.iter().map(|i| i.id.clone()).collect();
        let mut renames: HashMap<String, String> = HashMap::new();
        for item in items.iter().filter(|i| i.media_type != SVG_MEDIA_TYPE) {
            let Some(stem) = vector_stem(&item.id) else {
                continue;
            };
            let Some(id) = std::iter::once(format!("{stem}.png"))
                .chain((2..).map(|n| format!("{stem}-{n}.png")))
                .find(|candidate| !taken.contains(candidate))
            else {
                continue;
            };
            taken.insert(id.clone());
            renames.insert(item.id.clone(), id);
        }
        if renames.is_empty() {
            return 0;
        }

        self.doc.root.walk_mut(&mut |el| {
            let is_item = el.is("item");
            let is_cover_meta = el.is("meta") && el.attr("name") == Some("cover");
            for attr in el.attributes.iter_mut() {
                let renamed = match attr.name.as_str() {
                    "id" if is_item => renames.get(&attr.value).cloned(),
                    "content" if is_cover_meta => renames.get(&attr.value).cloned(),
                    "idref" | "toc" | "fallback" | "media-overlay" => {
                        renames.get(&attr.value).cloned()
                    }
                    "refines" => attr
                        .value
                        .strip_prefix('#')
                        .and_then(|id| renames.get(id))
                        .map(|id| format!("#{id}")),
                    _ => None,
                };
                if let Some(renamed) = renamed {
                    attr.value = renamed;
                }
            }
        });
        renames.len()
    }

    /// Rewrites media types, properties and metadata for readers that predate
    /// vector images and modern package metadata.
    pub fn downgrade_for_legacy(&mut self) -> Result<()> {
        let converted = self.replace_media_type(SVG_MEDIA_TYPE, PNG_MEDIA_TYPE);
        let stripped = self.remove_property("svg");
        let renamed = self.rename_vector_ids();
        log::debug!(
            "Converted {converted} vector manifest item(s), stripped {stripped} svg propert(ies), \
             renamed {renamed} id(s)"
        );

        match self.cover_item() {
            Some(cover) => self.set_meta("cover", &cover.id)?,
            None => log::warn!("Package has no cover-image item, skipping the cover meta"),
        }
        self.set_meta(PROVENANCE_META.0, PROVENANCE_META.1)
    }

    /// Writes the package back out, unless its manifest and spine disagree.
    pub fn save(&self) -> Result<()> {
        let problems = self.check_integrity();
        if !problems.is_empty() {
            return Err(BuildError::transform(&self.path, problems.join("; ")).into());
        }
        self.doc.save(&self.path)
    }
}

/// `cover` for an id like `cover.svg`.
fn vector_stem(id: &str) -> Option<&str> {
    let stem_len = id.len().checked_sub(4)?;
    (id.is_char_boundary(stem_len) && id[stem_len..].eq_ignore_ascii_case(".svg"))
        .then(|| &id[..stem_len])
}
