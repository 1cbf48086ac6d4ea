//! Relative reference arithmetic for `href`/`src` values inside a package.
//!
//! All paths here are `/`-separated and relative to a common root (normally the
//! directory holding the package document).

/// Splits `a/b.xhtml#frag` into `("a/b.xhtml", Some("frag"))`.
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (href, None),
    }
}

/// Directory part of a root-relative path (`text/ch1.xhtml` -> `text`).
pub fn parent(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => "",
    }
}

/// Resolves `href` against the directory `base`, collapsing `.` and `..`.
pub fn join(base: &str, href: &str) -> String {
    let (path, fragment) = split_fragment(href);
    let mut parts: Vec<&str> = base
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    with_fragment(parts.join("/"), fragment)
}

/// Expresses the root-relative `target` relative to the root-relative directory `from`.
pub fn relative(from: &str, target: &str) -> String {
    let (path, fragment) = split_fragment(target);
    let from_parts: Vec<&str> = from.split('/').filter(|s| !s.is_empty()).collect();
    let target_parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let dir_len = target_parts.len().saturating_sub(1);

    let common = from_parts
        .iter()
        .zip(target_parts[..dir_len].iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut segments: Vec<&str> = vec![".."; from_parts.len() - common];
    segments.extend(&target_parts[common..]);
    with_fragment(segments.join("/"), fragment)
}

/// Whether an attribute value points at a file inside the package rather than a URL,
/// an in-document fragment or inline data.
pub fn is_local(href: &str) -> bool {
    !(href.is_empty()
        || href.starts_with('#')
        || href.starts_with("data:")
        || href.starts_with("mailto:")
        || href.contains("://"))
}

fn with_fragment(mut path: String, fragment: Option<&str>) -> String {
    if let Some(fragment) = fragment {
        path.push('#');
        path.push_str(fragment);
    }
    path
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn can_join() {
        assert_eq!(join("", "text/ch1.xhtml"), "text/ch1.xhtml");
        assert_eq!(join("text", "../images/a.svg"), "images/a.svg");
        assert_eq!(join("text", "./ch2.xhtml#s1"), "text/ch2.xhtml#s1");
    }

    #[test]
    fn can_relativize() {
        assert_eq!(relative("", "text/ch1.xhtml"), "text/ch1.xhtml");
        assert_eq!(relative("text", "css/core.css"), "../css/core.css");
        assert_eq!(relative("text", "text/ch1.xhtml#n-1"), "ch1.xhtml#n-1");
        assert_eq!(relative("a/b", "a/c/d.xhtml"), "../c/d.xhtml");
    }

    #[test]
    fn can_detect_local_references() {
        assert!(is_local("../images/cover.svg"));
        assert!(!is_local("https://example.org/a.svg"));
        assert!(!is_local("#note-1"));
        assert!(!is_local("data:image/svg+xml;base64,AAAA"));
    }
}
