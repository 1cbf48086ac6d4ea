use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn ebook_compat() -> Command {
    Command::cargo_bin("ebook-compat").expect("binary is built")
}

#[test]
fn missing_source_fails() {
    let dir = TempDir::new().expect("can create temp dir");
    ebook_compat()
        .current_dir(dir.path())
        .args(["build", "does-not-exist", "-o", "dist"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("isn't a directory"));
    assert!(!dir.path().join("dist").exists());
}

#[test]
fn config_writes_parseable_toml() {
    let dir = TempDir::new().expect("can create temp dir");
    ebook_compat()
        .current_dir(dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("ebook-compat.toml written"));

    let contents =
        std::fs::read_to_string(dir.path().join("ebook-compat.toml")).expect("config exists");
    let table: toml::Table = toml::from_str(&contents).expect("config is valid TOML");
    for section in ["tools", "stroke", "raster", "covers", "compatibility"] {
        assert!(table.contains_key(section), "missing [{section}]");
    }
}

#[test]
fn config_refuses_to_overwrite() {
    let dir = TempDir::new().expect("can create temp dir");
    let path = dir.path().join("ebook-compat.toml");
    std::fs::write(&path, "# mine\n").expect("can write config");
    ebook_compat()
        .current_dir(dir.path())
        .arg("config")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--force"));
    assert_eq!(
        std::fs::read_to_string(&path).expect("can read config"),
        "# mine\n"
    );
}

#[cfg(unix)]
mod unix {
    use super::*;

    const PACKAGE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="uid" version="3.0">
	<metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
		<dc:identifier id="uid">url:https://example.org/ebooks/jane-doe/x</dc:identifier>
		<dc:title>X</dc:title>
	</metadata>
	<manifest>
		<item href="images/cover.svg" id="cover.svg" media-type="image/svg+xml" properties="cover-image"/>
		<item href="text/chapter-1.xhtml" id="chapter-1.xhtml" media-type="application/xhtml+xml"/>
		<item href="toc.xhtml" id="toc.xhtml" media-type="application/xhtml+xml" properties="nav"/>
	</manifest>
	<spine>
		<itemref idref="chapter-1.xhtml"/>
	</spine>
</package>
"#;

    const NAV: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
	<head><title>Contents</title></head>
	<body>
		<nav epub:type="toc"><ol><li><a href="text/chapter-1.xhtml">I</a></li></ol></nav>
		<nav epub:type="landmarks"><ol><li><a href="images/cover.svg" epub:type="cover">Cover</a></li></ol></nav>
	</body>
</html>
"#;

    const CHAPTER: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
	<head><title>I</title></head>
	<body><p>It was a <span>dark</span> night.</p><img alt="" src="../images/cover.svg"/></body>
</html>
"#;

    const COVER: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="15"><rect width="10" height="15"/></svg>"#;

    /// Stand-ins for the image tools that only need coreutils.
    const CONFIG: &str = r#"
[tools.raster]
program = "cp"
args = ["{input}", "{output}"]

[tools.resize]
program = "cp"
args = ["{input}", "{output}"]

[tools.scrubber]
program = "true"
"#;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().expect("has parent")).expect("can create dir");
        std::fs::write(path, contents).expect("can write file");
    }

    fn project(extra_config: &str) -> TempDir {
        let dir = TempDir::new().expect("can create temp dir");
        let root = dir.path();
        write(root, "book/src/mimetype", "application/epub+zip");
        write(
            root,
            "book/src/META-INF/container.xml",
            r#"<?xml version="1.0" encoding="utf-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
	<rootfiles><rootfile full-path="epub/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>
"#,
        );
        write(root, "book/src/epub/content.opf", PACKAGE);
        write(root, "book/src/epub/toc.xhtml", NAV);
        write(root, "book/src/epub/text/chapter-1.xhtml", CHAPTER);
        write(root, "book/src/epub/images/cover.svg", COVER);
        write(root, "ebook-compat.toml", &format!("{CONFIG}{extra_config}"));
        dir
    }

    fn published(dir: &Path) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn can_build_modern_and_legacy_packages() {
        let dir = project("");
        ebook_compat()
            .current_dir(dir.path())
            .args(["build", "book", "-o", "dist"])
            .assert()
            .success()
            .stdout(predicate::str::contains("jane-doe_x.epub"));

        assert_eq!(
            published(&dir.path().join("dist")),
            vec!["jane-doe_x.epub", "jane-doe_x_advanced.epub"]
        );
        let legacy = std::fs::read(dir.path().join("dist/jane-doe_x.epub")).expect("can read");
        assert_eq!(&legacy[..2], b"PK");
        // the source is never touched
        assert!(dir.path().join("book/src/epub/images/cover.svg").is_file());
        assert!(!dir.path().join("book/src/epub/toc.ncx").exists());
    }

    #[test]
    fn simplifier_complaints_leave_no_output() {
        let dir = project(
            r#"
[tools.simplifier]
program = "sh"
args = ["-c", "echo bad markup"]
"#,
        );
        ebook_compat()
            .current_dir(dir.path())
            .args(["build", "book", "-o", "dist", "--covers"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("bad markup"));
        assert!(published(&dir.path().join("dist")).is_empty());
    }

    #[test]
    fn missing_tool_fails_before_building() {
        let dir = project(
            r#"
[tools.converter]
program = "definitely-not-an-installed-converter"
"#,
        );
        ebook_compat()
            .current_dir(dir.path())
            .args(["build", "book", "-o", "dist", "--hardware"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains(
                "definitely-not-an-installed-converter",
            ));
        assert!(!dir.path().join("dist").exists());
    }
}
