//! Owned XML document tree.
//!
//! Every markup file in the working tree (XHTML, SVG, the package document, NCX) is
//! loaded into this model, mutated node by node by the build passes, and written back
//! out. Parsing is done with `quick-xml`; whitespace is preserved so untouched parts of
//! a document come back out the way they went in. Entity references that XML itself
//! doesn't define (`&nbsp;` in hand-edited XHTML) are kept as [`Node::EntityRef`] rather
//! than being lost.

use anyhow::{anyhow, Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    EntityRef(String),
    ProcessingInstruction(String),
}

impl Node {
    pub fn text<S: Into<String>>(text: S) -> Node {
        Node::Text(text.into())
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    fn is_whitespace(&self) -> bool {
        matches!(self, Node::Text(t) if t.trim().is_empty())
    }
}

impl From<Element> for Node {
    fn from(el: Element) -> Self {
        Node::Element(el)
    }
}

/// Anything that can appear around the root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Misc {
    Declaration(String),
    DocType(String),
    Comment(String),
    ProcessingInstruction(String),
    Whitespace(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
    /// Written as `<x></x>` instead of `<x/>` when it has no children
    pub expanded: bool,
}

impl Element {
    pub fn new<S: Into<String>>(name: S) -> Element {
        Element {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attr<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Element {
        self.set_attr(name, value);
        self
    }

    pub fn with_child<C: Into<Node>>(mut self, child: C) -> Element {
        self.children.push(child.into());
        self
    }

    pub fn with_text<S: Into<String>>(mut self, text: S) -> Element {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// The name without its namespace prefix.
    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    pub fn is(&self, local: &str) -> bool {
        self.local_name() == local
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn set_attr<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.value = value,
            None => self.attributes.push(Attribute { name, value }),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let index = self.attributes.iter().position(|a| a.name == name)?;
        Some(self.attributes.remove(index).value)
    }

    /// Whitespace-separated tokens of an attribute such as `class` or `epub:type`.
    pub fn tokens(&self, attr: &str) -> Vec<&str> {
        self.attr(attr)
            .map(|v| v.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn has_token(&self, attr: &str, token: &str) -> bool {
        self.tokens(attr).contains(&token)
    }

    /// Returns `false` if the token was already present.
    pub fn add_token(&mut self, attr: &str, token: &str) -> bool {
        if self.has_token(attr, token) {
            return false;
        }
        let value = match self.attr(attr) {
            Some(existing) if !existing.trim().is_empty() => {
                format!("{} {}", existing.trim(), token)
            }
            _ => token.to_string(),
        };
        self.set_attr(attr, value);
        true
    }

    /// Removes a token, dropping the attribute entirely once it is empty.
    pub fn remove_token(&mut self, attr: &str, token: &str) -> bool {
        if !self.has_token(attr, token) {
            return false;
        }
        let remaining = self
            .tokens(attr)
            .into_iter()
            .filter(|t| *t != token)
            .collect::<Vec<_>>()
            .join(" ");
        if remaining.is_empty() {
            self.remove_attr(attr);
        } else {
            self.set_attr(attr, remaining);
        }
        true
    }

    /// Direct child elements.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(Node::as_element_mut)
    }

    /// First direct child element with the given local name.
    pub fn child(&self, local: &str) -> Option<&Element> {
        self.elements().find(|e| e.is(local))
    }

    pub fn child_mut(&mut self, local: &str) -> Option<&mut Element> {
        self.elements_mut().find(|e| e.is(local))
    }

    /// Index into `children` of the first direct child element matching `pred`.
    pub fn position<F: Fn(&Element) -> bool>(&self, pred: F) -> Option<usize> {
        self.children
            .iter()
            .position(|n| n.as_element().map(&pred).unwrap_or(false))
    }

    /// Depth-first search, including `self`.
    pub fn find<F: Fn(&Element) -> bool>(&self, pred: &F) -> Option<&Element> {
        if pred(self) {
            return Some(self);
        }
        self.elements().find_map(|el| el.find(pred))
    }

    /// All descendant elements matching `pred` in document order, including `self`.
    pub fn find_all<F: Fn(&Element) -> bool>(&self, pred: &F) -> Vec<&Element> {
        let mut found = Vec::new();
        self.collect_into(pred, &mut found);
        found
    }

    fn collect_into<'a, F: Fn(&Element) -> bool>(&'a self, pred: &F, found: &mut Vec<&'a Element>) {
        if pred(self) {
            found.push(self);
        }
        for el in self.elements() {
            el.collect_into(pred, found);
        }
    }

    /// Visits `self` and every descendant element, parents before children.
    pub fn walk_mut<F: FnMut(&mut Element)>(&mut self, f: &mut F) {
        f(self);
        for child in self.children.iter_mut() {
            if let Node::Element(el) = child {
                el.walk_mut(f);
            }
        }
    }

    /// Visits every text node below `self`.
    pub fn walk_text_mut<F: FnMut(&mut String)>(&mut self, f: &mut F) {
        for child in self.children.iter_mut() {
            match child {
                Node::Text(text) => f(text),
                Node::Element(el) => el.walk_text_mut(f),
                _ => {}
            }
        }
    }

    /// Concatenated character data of the element and its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.text_into(&mut out);
        out
    }

    fn text_into(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) | Node::CData(t) => out.push_str(t),
                Node::EntityRef(name) if name == "nbsp" => out.push('\u{a0}'),
                Node::Element(el) => el.text_into(out),
                _ => {}
            }
        }
    }

    /// Appends a child, copying the indentation used by the existing children so
    /// that the written document stays readable.
    pub fn append_indented<C: Into<Node>>(&mut self, child: C) {
        let indent = self
            .children
            .iter()
            .position(|n| n.as_element().is_some())
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| match &self.children[i] {
                Node::Text(t) if t.trim().is_empty() => Some(t.clone()),
                _ => None,
            });
        let closing = match self.children.last() {
            Some(last) if last.is_whitespace() => self.children.pop(),
            _ => None,
        };
        if let Some(indent) = indent {
            self.children.push(Node::Text(indent));
        }
        self.children.push(child.into());
        if let Some(closing) = closing {
            self.children.push(closing);
        }
    }

    /// Merges runs of adjacent text nodes into one.
    pub fn normalize_text(&mut self) {
        let mut merged: Vec<Node> = Vec::with_capacity(self.children.len());
        for child in self.children.drain(..) {
            match (merged.last_mut(), child) {
                (Some(Node::Text(prev)), Node::Text(next)) => prev.push_str(&next),
                (_, child) => merged.push(child),
            }
        }
        self.children = merged;
        for el in self.elements_mut() {
            el.normalize_text();
        }
    }

    fn write_into(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for attr in &self.attributes {
            out.push(' ');
            out.push_str(&attr.name);
            out.push_str("=\"");
            out.push_str(&html_escape::encode_double_quoted_attribute(&attr.value));
            out.push('"');
        }
        if self.children.is_empty() && !self.expanded {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            write_node(child, out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Element(el) => el.write_into(out),
        Node::Text(text) => out.push_str(&html_escape::encode_text(text)),
        Node::CData(text) => {
            out.push_str("<![CDATA[");
            out.push_str(text);
            out.push_str("]]>");
        }
        Node::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        Node::EntityRef(name) => {
            out.push('&');
            out.push_str(name);
            out.push(';');
        }
        Node::ProcessingInstruction(body) => {
            out.push_str("<?");
            out.push_str(body);
            out.push_str("?>");
        }
    }
}

fn write_misc(misc: &Misc, out: &mut String) {
    match misc {
        Misc::Declaration(body) | Misc::ProcessingInstruction(body) => {
            out.push_str("<?");
            out.push_str(body);
            out.push_str("?>");
        }
        Misc::DocType(body) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(body);
            out.push('>');
        }
        Misc::Comment(body) => {
            out.push_str("<!--");
            out.push_str(body);
            out.push_str("-->");
        }
        Misc::Whitespace(ws) => out.push_str(ws),
    }
}

pub fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub prolog: Vec<Misc>,
    pub root: Element,
    pub trailing: Vec<Misc>,
}

impl Document {
    /// A new document with an XML declaration and the given root.
    pub fn new(root: Element) -> Document {
        Document {
            prolog: vec![
                Misc::Declaration(r#"xml version="1.0" encoding="utf-8""#.to_string()),
                Misc::Whitespace("\n".to_string()),
            ],
            root,
            trailing: vec![Misc::Whitespace("\n".to_string())],
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Document> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Document::parse(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_xml())
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Document> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);

        let mut prolog: Vec<Misc> = Vec::new();
        let mut trailing: Vec<Misc> = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let position = reader.buffer_position();
            let event = reader
                .read_event()
                .map_err(|e| anyhow!("Malformed XML near byte {position}: {e}"))?;

            match event {
                Event::Start(e) => {
                    let mut el = start_element(&reader, &e)?;
                    el.expanded = true;
                    stack.push(el);
                }
                Event::Empty(e) => {
                    let el = start_element(&reader, &e)?;
                    attach(&mut stack, &mut root, el)?;
                }
                Event::End(_) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| anyhow!("Closing tag without an open element"))?;
                    attach(&mut stack, &mut root, el)?;
                }
                Event::Text(e) => {
                    let text = e
                        .decode()
                        .map_err(|e| anyhow!("Failed to decode text: {e}"))?;
                    match stack.last_mut() {
                        Some(parent) => push_text(parent, &text),
                        None if text.trim().is_empty() => {
                            let misc = Misc::Whitespace(text.into_owned());
                            if root.is_some() {
                                trailing.push(misc);
                            } else {
                                prolog.push(misc);
                            }
                        }
                        None => return Err(anyhow!("Text outside of the root element")),
                    }
                }
                Event::GeneralRef(e) => {
                    let name = e
                        .decode()
                        .map_err(|e| anyhow!("Failed to decode entity: {e}"))?;
                    let parent = stack
                        .last_mut()
                        .ok_or_else(|| anyhow!("Entity reference outside of the root element"))?;
                    let entity = format!("&{name};");
                    match quick_xml::escape::unescape(&entity) {
                        Ok(resolved) => push_text(parent, &resolved),
                        Err(_) => parent.children.push(Node::EntityRef(name.into_owned())),
                    }
                }
                Event::CData(e) => {
                    let text = reader
                        .decoder()
                        .decode(&e)
                        .map_err(|e| anyhow!("Failed to decode CDATA: {e}"))?;
                    let parent = stack
                        .last_mut()
                        .ok_or_else(|| anyhow!("CDATA outside of the root element"))?;
                    parent.children.push(Node::CData(text.into_owned()));
                }
                Event::Comment(e) => {
                    let text = reader
                        .decoder()
                        .decode(&e)
                        .map_err(|e| anyhow!("Failed to decode comment: {e}"))?
                        .into_owned();
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::Comment(text)),
                        None if root.is_some() => trailing.push(Misc::Comment(text)),
                        None => prolog.push(Misc::Comment(text)),
                    }
                }
                Event::Decl(e) => {
                    let body = reader
                        .decoder()
                        .decode(&e)
                        .map_err(|e| anyhow!("Failed to decode declaration: {e}"))?;
                    prolog.push(Misc::Declaration(body.into_owned()));
                }
                Event::PI(e) => {
                    let body = reader
                        .decoder()
                        .decode(&e)
                        .map_err(|e| anyhow!("Failed to decode processing instruction: {e}"))?
                        .into_owned();
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::ProcessingInstruction(body)),
                        None => prolog.push(Misc::ProcessingInstruction(body)),
                    }
                }
                Event::DocType(e) => {
                    let body = reader
                        .decoder()
                        .decode(&e)
                        .map_err(|e| anyhow!("Failed to decode doctype: {e}"))?;
                    prolog.push(Misc::DocType(body.trim().to_string()));
                }
                Event::Eof => break,
            }
        }

        if let Some(open) = stack.last() {
            return Err(anyhow!("Element <{}> is never closed", open.name));
        }
        let root = root.ok_or_else(|| anyhow!("Document has no root element"))?;

        Ok(Document {
            prolog,
            root,
            trailing,
        })
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        for misc in &self.prolog {
            write_misc(misc, &mut out);
        }
        self.root.write_into(&mut out);
        for misc in &self.trailing {
            write_misc(misc, &mut out);
        }
        out
    }
}

fn start_element(reader: &Reader<&[u8]>, start: &BytesStart<'_>) -> Result<Element> {
    let name = reader
        .decoder()
        .decode(start.name().as_ref())
        .map_err(|e| anyhow!("Failed to decode element name: {e}"))?
        .into_owned();
    let mut el = Element::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| anyhow!("Malformed attribute on <{}>: {e}", el.name))?;
        let key = reader
            .decoder()
            .decode(attr.key.as_ref())
            .map_err(|e| anyhow!("Failed to decode attribute name: {e}"))?
            .into_owned();
        let raw = reader
            .decoder()
            .decode(&attr.value)
            .map_err(|e| anyhow!("Failed to decode attribute value: {e}"))?;
        let value = match quick_xml::escape::unescape(&raw) {
            Ok(value) => value.into_owned(),
            Err(_) => raw.into_owned(),
        };
        el.attributes.push(Attribute { name: key, value });
    }
    Ok(el)
}

fn push_text(parent: &mut Element, text: &str) {
    if let Some(Node::Text(existing)) = parent.children.last_mut() {
        existing.push_str(text);
    } else {
        parent.children.push(Node::Text(text.to_string()));
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(el));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(el);
            Ok(())
        }
        None => Err(anyhow!("Document has more than one root element")),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const XHTML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
	<head>
		<title>Test</title>
	</head>
	<body epub:type="bodymatter">
		<p>One &amp; two&nbsp;three <em>four</em>.</p>
		<p></p>
		<br/>
	</body>
</html>
"#;

    #[test]
    fn can_roundtrip_untouched_document() {
        let doc = Document::parse(XHTML).expect("can parse xhtml");
        assert_eq!(doc.to_xml(), XHTML);
    }

    #[test]
    fn keeps_unknown_entities() {
        let doc = Document::parse(XHTML).expect("can parse xhtml");
        let p = doc.root.find(&|e| e.is("p")).expect("has a paragraph");
        assert!(p.children.contains(&Node::EntityRef("nbsp".to_string())));
        assert_eq!(p.text(), "One & two\u{a0}three four.");
    }

    #[test]
    fn can_edit_tokens() {
        let mut el = Element::new("span").with_attr("class", "a b");
        assert!(el.add_token("class", "c"));
        assert!(!el.add_token("class", "a"));
        assert_eq!(el.attr("class"), Some("a b c"));
        assert!(el.remove_token("class", "a"));
        assert!(el.remove_token("class", "b"));
        assert!(el.remove_token("class", "c"));
        assert_eq!(el.attr("class"), None);
    }

    #[test]
    fn append_indented_matches_siblings() {
        let mut doc = Document::parse("<a>\n\t<b/>\n</a>").expect("can parse");
        doc.root.append_indented(Element::new("c"));
        assert_eq!(doc.to_xml(), "<a>\n\t<b/>\n\t<c/>\n</a>");
    }

    #[test]
    fn rejects_unbalanced_markup() {
        assert!(Document::parse("<a><b></a>").is_err());
        assert!(Document::parse("<a>").is_err());
        assert!(Document::parse("<a/><b/>").is_err());
    }

    #[test]
    fn escapes_on_write() {
        let doc = Document {
            prolog: Vec::new(),
            root: Element::new("a")
                .with_attr("title", "\"quoted\" & <more>")
                .with_text("1 < 2 & 3"),
            trailing: Vec::new(),
        };
        assert_eq!(
            doc.to_xml(),
            r#"<a title="&quot;quoted&quot; &amp; &lt;more&gt;">1 &lt; 2 &amp; 3</a>"#
        );
    }

    #[test]
    fn normalize_text_merges_runs() {
        let mut el = Element::new("p")
            .with_text("a")
            .with_text("b")
            .with_child(Element::new("em"))
            .with_text("c");
        el.normalize_text();
        assert_eq!(el.children.len(), 3);
        assert_eq!(el.children[0], Node::text("ab"));
    }
}
