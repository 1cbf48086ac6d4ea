//! Structured stylesheet model.
//!
//! Style sheets are parsed into rules and at-rules so that compatibility passes can
//! rewrite selectors and declarations instead of pattern-matching text. Output is
//! normalized: one rule per block, declarations tab-indented, a blank line between
//! items.

use anyhow::{anyhow, Context, Result};
use std::path::Path;

/// At-rules whose block holds nested rules rather than declarations.
const NESTING_AT_RULES: &[&str] = &["media", "supports", "document", "layer", "container"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
}

impl Declaration {
    pub fn new<P: Into<String>, V: Into<String>>(property: P, value: V) -> Declaration {
        Declaration {
            property: property.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rule {
    pub selectors: Vec<String>,
    pub declarations: Vec<Declaration>,
}

impl Rule {
    pub fn declaration(&self, property: &str) -> Option<&Declaration> {
        self.declarations
            .iter()
            .find(|d| d.property.eq_ignore_ascii_case(property))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CssItem {
    Comment(String),
    /// `@charset`, `@namespace`, `@import`: everything between `@` and `;`
    AtStatement(String),
    AtBlock {
        prelude: String,
        items: Vec<CssItem>,
    },
    AtDeclarations {
        prelude: String,
        declarations: Vec<Declaration>,
    },
    Rule(Rule),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stylesheet {
    pub items: Vec<CssItem>,
}

impl Stylesheet {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Stylesheet> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Stylesheet::parse(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_css())
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn parse(source: &str) -> Result<Stylesheet> {
        let chars: Vec<char> = source.chars().collect();
        Ok(Stylesheet {
            items: parse_items(&chars)?,
        })
    }

    /// Visits every style rule, including those nested in `@media` and friends.
    pub fn for_each_rule_mut<F: FnMut(&mut Rule)>(&mut self, f: &mut F) {
        visit_rules_mut(&mut self.items, f);
    }

    pub fn rules(&self) -> Vec<&Rule> {
        let mut rules = Vec::new();
        collect_rules(&self.items, &mut rules);
        rules
    }

    /// Visits every declaration list: style rules and `@font-face`-style blocks.
    pub fn for_each_declarations_mut<F: FnMut(&mut Vec<Declaration>)>(&mut self, f: &mut F) {
        visit_declarations_mut(&mut self.items, f);
    }

    pub fn to_css(&self) -> String {
        let mut out = String::new();
        write_items(&self.items, 0, &mut out);
        out
    }
}

fn visit_rules_mut<F: FnMut(&mut Rule)>(items: &mut [CssItem], f: &mut F) {
    for item in items.iter_mut() {
        match item {
            CssItem::Rule(rule) => f(rule),
            CssItem::AtBlock { items, .. } => visit_rules_mut(items, f),
            _ => {}
        }
    }
}

fn visit_declarations_mut<F: FnMut(&mut Vec<Declaration>)>(items: &mut [CssItem], f: &mut F) {
    for item in items.iter_mut() {
        match item {
            CssItem::Rule(rule) => f(&mut rule.declarations),
            CssItem::AtDeclarations { declarations, .. } => f(declarations),
            CssItem::AtBlock { items, .. } => visit_declarations_mut(items, f),
            _ => {}
        }
    }
}

fn collect_rules<'a>(items: &'a [CssItem], rules: &mut Vec<&'a Rule>) {
    for item in items {
        match item {
            CssItem::Rule(rule) => rules.push(rule),
            CssItem::AtBlock { items, .. } => collect_rules(items, rules),
            _ => {}
        }
    }
}

fn parse_items(chars: &[char]) -> Result<Vec<CssItem>> {
    let mut items = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }

        if starts_comment(chars, i) {
            let end = comment_end(chars, i)?;
            items.push(CssItem::Comment(chars[i + 2..end - 2].iter().collect()));
            i = end;
            continue;
        }

        let (head_end, terminator) = scan_head(chars, i)?;
        let head: String = strip_comments(&chars[i..head_end]).trim().to_string();

        if terminator == ';' {
            let statement = head
                .strip_prefix('@')
                .ok_or_else(|| anyhow!("Unexpected `;` after `{head}`"))?;
            items.push(CssItem::AtStatement(statement.trim().to_string()));
            i = head_end + 1;
            continue;
        }

        let body_end = block_end(chars, head_end)?;
        let body = &chars[head_end + 1..body_end];
        i = body_end + 1;

        if let Some(prelude) = head.strip_prefix('@') {
            let name = prelude
                .split(|c: char| c.is_whitespace() || c == '(')
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            if NESTING_AT_RULES.contains(&name.as_str()) {
                items.push(CssItem::AtBlock {
                    prelude: prelude.trim().to_string(),
                    items: parse_items(body)?,
                });
            } else {
                items.push(CssItem::AtDeclarations {
                    prelude: prelude.trim().to_string(),
                    declarations: parse_declarations(body),
                });
            }
        } else {
            if head.is_empty() {
                return Err(anyhow!("Declaration block without a selector"));
            }
            items.push(CssItem::Rule(Rule {
                selectors: split_top_level(&head, ',')
                    .into_iter()
                    .map(|s| collapse_whitespace(&s))
                    .filter(|s| !s.is_empty())
                    .collect(),
                declarations: parse_declarations(body),
            }));
        }
    }

    Ok(items)
}

fn parse_declarations(body: &[char]) -> Vec<Declaration> {
    let body = strip_comments(body);
    split_top_level(&body, ';')
        .into_iter()
        .filter_map(|decl| {
            let (property, value) = decl.split_once(':')?;
            let property = property.trim();
            let value = value.trim();
            if property.is_empty() {
                return None;
            }
            Some(Declaration::new(property, value))
        })
        .collect()
}

fn starts_comment(chars: &[char], i: usize) -> bool {
    chars.get(i) == Some(&'/') && chars.get(i + 1) == Some(&'*')
}

/// Index just past the `*/` closing the comment that starts at `i`.
fn comment_end(chars: &[char], i: usize) -> Result<usize> {
    let mut j = i + 2;
    while j + 1 < chars.len() {
        if chars[j] == '*' && chars[j + 1] == '/' {
            return Ok(j + 2);
        }
        j += 1;
    }
    Err(anyhow!("Unterminated comment"))
}

/// Index just past the string literal that opens at `i`.
fn string_end(chars: &[char], i: usize) -> Result<usize> {
    let quote = chars[i];
    let mut j = i + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 2,
            c if c == quote => return Ok(j + 1),
            _ => j += 1,
        }
    }
    Err(anyhow!("Unterminated string"))
}

/// Finds the `{` or `;` ending a selector or at-rule prelude.
fn scan_head(chars: &[char], start: usize) -> Result<(usize, char)> {
    let mut i = start;
    let mut parens = 0usize;
    while i < chars.len() {
        match chars[i] {
            '"' | '\'' => {
                i = string_end(chars, i)?;
                continue;
            }
            '/' if starts_comment(chars, i) => {
                i = comment_end(chars, i)?;
                continue;
            }
            '(' => parens += 1,
            ')' => parens = parens.saturating_sub(1),
            '{' if parens == 0 => return Ok((i, '{')),
            ';' if parens == 0 => return Ok((i, ';')),
            '}' => return Err(anyhow!("Unexpected `}}`")),
            _ => {}
        }
        i += 1;
    }
    Err(anyhow!("Unexpected end of style sheet"))
}

/// Index of the `}` matching the `{` at `open`.
fn block_end(chars: &[char], open: usize) -> Result<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '"' | '\'' => {
                i = string_end(chars, i)?;
                continue;
            }
            '/' if starts_comment(chars, i) => {
                i = comment_end(chars, i)?;
                continue;
            }
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(anyhow!("Unterminated block"))
}

fn strip_comments(chars: &[char]) -> String {
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        if starts_comment(chars, i) {
            i = comment_end(chars, i).unwrap_or(chars.len());
            continue;
        }
        if chars[i] == '"' || chars[i] == '\'' {
            let end = string_end(chars, i).unwrap_or(chars.len());
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Splits on `separator` wherever it isn't inside a string, brackets or parentheses.
pub fn split_top_level(text: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in text.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c == separator && depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn write_items(items: &[CssItem], depth: usize, out: &mut String) {
    let indent = "\t".repeat(depth);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        match item {
            CssItem::Comment(text) => {
                out.push_str(&format!("{indent}/*{text}*/\n"));
            }
            CssItem::AtStatement(statement) => {
                out.push_str(&format!("{indent}@{statement};\n"));
            }
            CssItem::AtBlock { prelude, items } => {
                out.push_str(&format!("{indent}@{prelude}{{\n"));
                write_items(items, depth + 1, out);
                out.push_str(&format!("{indent}}}\n"));
            }
            CssItem::AtDeclarations {
                prelude,
                declarations,
            } => {
                out.push_str(&format!("{indent}@{prelude}{{\n"));
                write_declarations(declarations, depth + 1, out);
                out.push_str(&format!("{indent}}}\n"));
            }
            CssItem::Rule(rule) => {
                out.push_str(&indent);
                out.push_str(&rule.selectors.join(&format!(",\n{indent}")));
                out.push_str("{\n");
                write_declarations(&rule.declarations, depth + 1, out);
                out.push_str(&format!("{indent}}}\n"));
            }
        }
    }
}

fn write_declarations(declarations: &[Declaration], depth: usize, out: &mut String) {
    let indent = "\t".repeat(depth);
    for decl in declarations {
        out.push_str(&format!("{indent}{}: {};\n", decl.property, decl.value));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const CSS: &str = r#"@charset "utf-8";
@namespace epub "http://www.idpf.org/2007/ops";

/* Headings */
h1,
h2 { font-variant: small-caps; margin: 1em 0 }

[epub|type~="z3998:roman"]{
	font-variant-numeric: normal;
	content: "a;b{c}";
}

@media (prefers-color-scheme: dark){
	img[epub|type~="se:image.color-depth.black-on-transparent"]{
		filter: invert(100%);
	}
}

@font-face{
	font-family: "League Spartan";
	src: url("../fonts/league-spartan.woff2") format("woff2");
}
"#;

    #[test]
    fn can_parse_structure() {
        let sheet = Stylesheet::parse(CSS).expect("can parse css");
        assert_eq!(sheet.items.len(), 7);
        assert_eq!(
            sheet.items[0],
            CssItem::AtStatement(r#"charset "utf-8""#.to_string())
        );
        assert_eq!(sheet.items[2], CssItem::Comment(" Headings ".to_string()));

        let rules = sheet.rules();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].selectors, vec!["h1", "h2"]);
        assert_eq!(rules[0].declarations.len(), 2);
        assert_eq!(
            rules[1].declaration("content").map(|d| d.value.as_str()),
            Some(r#""a;b{c}""#)
        );
        assert_eq!(
            rules[2].selectors,
            vec![r#"img[epub|type~="se:image.color-depth.black-on-transparent"]"#]
        );
    }

    #[test]
    fn output_reparses_identically() {
        let sheet = Stylesheet::parse(CSS).expect("can parse css");
        let reparsed = Stylesheet::parse(&sheet.to_css()).expect("can reparse css");
        assert_eq!(sheet, reparsed);
    }

    #[test]
    fn can_edit_nested_rules() {
        let mut sheet = Stylesheet::parse(CSS).expect("can parse css");
        let mut seen = 0;
        sheet.for_each_rule_mut(&mut |rule| {
            rule.declarations.push(Declaration::new("color", "red"));
            seen += 1;
        });
        assert_eq!(seen, 3);
        assert!(sheet.to_css().contains("\t\tcolor: red;\n"));
    }

    #[test]
    fn splits_selector_lists_outside_brackets() {
        let parts = split_top_level(r#"a[title="x,y"], b:not(.c, .d)"#, ',');
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn rejects_unterminated_blocks() {
        assert!(Stylesheet::parse("p{ color: red;").is_err());
        assert!(Stylesheet::parse("/* open").is_err());
    }
}
