//! Turning a source tree into the requested set of packages.

use crate::collaborators::Collaborators;
use crate::compat::CompatPass;
use crate::config::Configuration;
use crate::error::BuildError;
use crate::identifier::{output_base_name, HardwareIdentifier};
use crate::package::PackageDocument;
use crate::pipeline::{BuildContext, Pipeline};
use crate::workspace::{WorkingTree, Workspace};
use anyhow::{anyhow, Context, Result};
use derive_builder::Builder;
use indicatif::ProgressBar;
use std::fmt;
use std::path::{Path, PathBuf};

/// A kind of package a build can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The modern package, straight from the source
    Modern,
    /// The package for legacy reading systems
    Compatible,
    Vendor,
    Hardware,
}

impl Target {
    /// The artifact file name for this target, given the shared stem.
    pub fn file_name(&self, base: &str) -> String {
        match self {
            Target::Modern => format!("{base}_advanced.epub"),
            Target::Compatible => format!("{base}.epub"),
            Target::Vendor => format!("{base}.kepub.epub"),
            Target::Hardware => format!("{base}.azw3"),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Target::Modern => "modern",
            Target::Compatible => "compatible",
            Target::Vendor => "vendor",
            Target::Hardware => "hardware",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetProfile {
    pub target: Target,
    /// Whether proofreading styles are linked into the documents
    pub proofing: bool,
}

impl TargetProfile {
    pub fn new(target: Target, proofing: bool) -> TargetProfile {
        TargetProfile { target, proofing }
    }

    /// Compatibility passes for the target, in application order. Each builds on the
    /// passes of the targets before it.
    pub fn passes(&self) -> &'static [CompatPass] {
        match self.target {
            Target::Modern => &[],
            Target::Compatible => &[CompatPass::Epub2],
            Target::Vendor => &[CompatPass::Vendor],
            Target::Hardware => &[CompatPass::Epub2, CompatPass::Hardware],
        }
    }

    pub fn artifact_name(&self, base: &str) -> String {
        self.target.file_name(base)
    }
}

/// What to build, and from where.
#[derive(Builder, Debug, Clone)]
#[builder(setter(into), build_fn(skip, error = "anyhow::Error"))]
pub struct BuildRequest {
    /// Root of the canonical source tree; only ever read
    pub source: PathBuf,
    /// Where finished artifacts are written
    pub output_dir: PathBuf,
    /// Validate the modern and legacy packages
    pub check: bool,
    pub vendor: bool,
    pub hardware: bool,
    /// Extract the cover and its thumbnail as standalone images
    pub covers: bool,
    /// Link proofreading styles into every document
    pub proof: bool,
}

impl BuildRequestBuilder {
    pub fn build(&mut self) -> Result<BuildRequest> {
        let source = self
            .source
            .take()
            .ok_or_else(|| anyhow!("Source directory not provided!"))?;
        if !source.is_dir() {
            return Err(BuildError::Precondition(format!(
                "Source {} isn't a directory",
                source.display()
            ))
            .into());
        }
        let output_dir = self
            .output_dir
            .take()
            .ok_or_else(|| anyhow!("Output directory not provided!"))?;

        Ok(BuildRequest {
            source,
            output_dir,
            check: self.check.unwrap_or_default(),
            vendor: self.vendor.unwrap_or_default(),
            hardware: self.hardware.unwrap_or_default(),
            covers: self.covers.unwrap_or_default(),
            proof: self.proof.unwrap_or_default(),
        })
    }
}

impl BuildRequest {
    /// The targets this request produces, always starting with the modern and
    /// legacy packages.
    pub fn profiles(&self) -> Vec<TargetProfile> {
        let mut targets = vec![Target::Modern, Target::Compatible];
        if self.vendor {
            targets.push(Target::Vendor);
        }
        if self.hardware {
            targets.push(Target::Hardware);
        }
        targets
            .into_iter()
            .map(|t| TargetProfile::new(t, self.proof))
            .collect()
    }
}

#[derive(Debug)]
pub struct BuildReport {
    /// Final locations of the artifacts, in the order they were produced
    pub artifacts: Vec<PathBuf>,
    pub hardware_id: Option<HardwareIdentifier>,
    /// Names of the stages that ran
    pub stages: Vec<&'static str>,
}

/// Builds everything `request` asks for with the configured external tools.
pub fn build(
    request: &BuildRequest,
    config: &Configuration,
    progress: &ProgressBar,
) -> Result<BuildReport> {
    let collaborators = Collaborators::from_config(config);
    build_with(request, config, &collaborators, progress)
}

/// Builds everything `request` asks for. Nothing is written to the output
/// directory unless every stage succeeds.
pub fn build_with(
    request: &BuildRequest,
    config: &Configuration,
    collaborators: &Collaborators,
    progress: &ProgressBar,
) -> Result<BuildReport> {
    let targets = request
        .profiles()
        .iter()
        .map(|p| p.target.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    log::info!("Building {targets} from {}", request.source.display());

    ensure_collaborators(request, collaborators)?;

    let tree = WorkingTree::materialize(&request.source)?;
    let package = PackageDocument::load(tree.package_path())?;
    let problems = package.check_integrity();
    if !problems.is_empty() {
        return Err(BuildError::Precondition(format!(
            "Package document is inconsistent:\n{}",
            problems.join("\n")
        ))
        .into());
    }
    let identifier = package
        .unique_identifier()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| {
            BuildError::Precondition("Package document has no unique identifier".to_string())
        })?;
    let base_name = output_base_name(&identifier, &config.compatibility.identifier_prefix)
        .or_else(|| source_dir_name(&request.source))
        .ok_or_else(|| anyhow!("Can't derive a name for the artifacts"))?;
    log::debug!("Artifacts will be named after {base_name}");

    let mut ctx = BuildContext {
        request,
        config,
        collaborators,
        tree,
        staging: Workspace::create("staging")?,
        identifier,
        base_name,
        hardware_id: None,
        staged: Vec::new(),
    };
    let stages = Pipeline::standard().run(&mut ctx, progress)?;
    let artifacts = publish(&ctx.staged, &request.output_dir)?;

    Ok(BuildReport {
        artifacts,
        hardware_id: ctx.hardware_id,
        stages,
    })
}

/// Fails before anything is touched if a tool the request needs is missing.
fn ensure_collaborators(request: &BuildRequest, collaborators: &Collaborators) -> Result<()> {
    collaborators.raster.ensure_available()?;
    collaborators.outliner.ensure_available()?;
    collaborators.simplifier.ensure_available()?;
    if request.covers || request.hardware {
        collaborators.raster.ensure_resize_available()?;
    }
    if request.check {
        collaborators.validator.ensure_available()?;
    }
    if request.hardware {
        collaborators.converter.ensure_available()?;
    }
    Ok(())
}

fn source_dir_name(source: &Path) -> Option<String> {
    let source = std::fs::canonicalize(source).ok()?;
    source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

/// Copies the staged artifacts into `output_dir`, creating it if needed. Every
/// artifact is copied to a temporary file next to its destination first; they are
/// only renamed into place once all of them have been copied.
fn publish(staged: &[PathBuf], output_dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let mut pending = Vec::with_capacity(staged.len());
    for artifact in staged {
        let Some(file_name) = artifact.file_name() else {
            continue;
        };
        let mut temp = tempfile::Builder::new()
            .prefix(".ebook-compat-")
            .tempfile_in(output_dir)
            .with_context(|| format!("Failed to create a file in {}", output_dir.display()))?;
        let mut source = std::fs::File::open(artifact)
            .with_context(|| format!("Failed to open {}", artifact.display()))?;
        std::io::copy(&mut source, temp.as_file_mut()).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                artifact.display(),
                output_dir.display()
            )
        })?;
        pending.push((temp, output_dir.join(file_name)));
    }

    pending
        .into_iter()
        .map(|(temp, destination)| {
            temp.persist(&destination)
                .with_context(|| format!("Failed to write {}", destination.display()))?;
            Ok(destination)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fixture::{self, FakeSimplifier, FakeValidator, MissingTool, NoResizer};
    use crate::xml::Document;
    use tempfile::TempDir;

    struct Scenario {
        source: TempDir,
        output: TempDir,
        snapshots: TempDir,
    }

    impl Scenario {
        fn new() -> Scenario {
            Scenario {
                source: fixture::source_tree(),
                output: TempDir::new().expect("can create output dir"),
                snapshots: TempDir::new().expect("can create snapshot dir"),
            }
        }

        fn request(&self) -> BuildRequestBuilder {
            let mut builder = BuildRequestBuilder::default();
            builder
                .source(self.source.path())
                .output_dir(self.output.path().join("dist"));
            builder
        }

        fn collaborators(&self) -> Collaborators {
            fixture::collaborators(self.snapshots.path())
        }

        fn run(&self, request: &BuildRequest, collaborators: &Collaborators) -> Result<BuildReport> {
            build_with(
                request,
                &Configuration::default(),
                collaborators,
                &ProgressBar::hidden(),
            )
        }

        /// The tree as it was packed into `artifact`.
        fn snapshot(&self, artifact: &str) -> PathBuf {
            self.snapshots.path().join(artifact)
        }

        fn published(&self) -> Vec<String> {
            let dist = self.output.path().join("dist");
            let Ok(entries) = std::fs::read_dir(dist) else {
                return Vec::new();
            };
            let mut names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
    }

    fn everything(scenario: &Scenario) -> BuildRequest {
        scenario
            .request()
            .vendor(true)
            .hardware(true)
            .covers(true)
            .build()
            .expect("can build request")
    }

    #[test]
    fn can_build_every_target() {
        let scenario = Scenario::new();
        let report = scenario
            .run(&everything(&scenario), &scenario.collaborators())
            .expect("can build");

        let hardware_id = report.hardware_id.expect("has hardware id");
        let mut expected = vec![
            "jane-doe_x.azw3".to_string(),
            "jane-doe_x.epub".to_string(),
            "jane-doe_x.kepub.epub".to_string(),
            "jane-doe_x_advanced.epub".to_string(),
            "cover.jpg".to_string(),
            "cover-thumbnail.jpg".to_string(),
            hardware_id.thumbnail_file_name(),
        ];
        expected.sort();
        assert_eq!(scenario.published(), expected);
        assert_eq!(report.artifacts.len(), 7);
        assert_eq!(report.stages.len(), 17);
    }

    #[test]
    fn legacy_package_is_fully_rasterized() {
        let scenario = Scenario::new();
        scenario
            .run(&everything(&scenario), &scenario.collaborators())
            .expect("can build");

        let legacy = scenario.snapshot("jane-doe_x.epub");
        assert!(fixture::dir_mentions(&legacy, ".svg").is_empty());
        assert!(legacy.join("epub/images/cover.png").is_file());
        assert!(!legacy.join("epub/images/cover.svg").exists());
        assert!(legacy.join("epub/toc.ncx").is_file());

        let opf = std::fs::read_to_string(legacy.join("epub/content.opf")).expect("can read");
        assert!(opf.contains(r#"<meta name="cover" content="cover.png"/>"#));
        assert!(opf.contains(r#"toc="ncx""#));
        assert!(!opf.contains("https://standardebooks.org/vocab/1.0"));
        assert!(opf.contains("http://standardebooks.org/vocab/1.0"));
    }

    #[test]
    fn guide_follows_landmark_order() {
        let scenario = Scenario::new();
        let request = scenario.request().build().expect("can build request");
        scenario
            .run(&request, &scenario.collaborators())
            .expect("can build");

        let opf = Document::load(scenario.snapshot("jane-doe_x.epub").join("epub/content.opf"))
            .expect("can load package");
        let guide = opf.root.child("guide").expect("has guide");
        let references: Vec<(&str, &str)> = guide
            .elements()
            .filter_map(|r| Some((r.attr("type")?, r.attr("href")?)))
            .collect();
        assert_eq!(
            references,
            vec![
                ("titlepage text", "text/titlepage.xhtml"),
                ("colophon", "text/colophon.xhtml"),
                ("cover", "images/cover.png"),
            ]
        );
    }

    #[test]
    fn hardware_package_carries_its_identifier() {
        let scenario = Scenario::new();
        let report = scenario
            .run(&everything(&scenario), &scenario.collaborators())
            .expect("can build");
        let hardware_id = report.hardware_id.expect("has hardware id");
        assert_eq!(
            hardware_id,
            HardwareIdentifier::compute("https://example.org/ebooks/jane-doe/x", "")
        );

        let hardware = scenario.snapshot("jane-doe_x_hardware.epub");
        let opf = std::fs::read_to_string(hardware.join("epub/content.opf")).expect("can read");
        assert!(opf.contains(hardware_id.as_str()));

        let endnotes = std::fs::read_to_string(hardware.join("epub/text/endnotes.xhtml"))
            .expect("can read endnotes");
        assert!(endnotes.contains("1. "));
        let chapter = std::fs::read_to_string(hardware.join("epub/text/chapter-1.xhtml"))
            .expect("can read chapter");
        assert!(!chapter.contains('\u{200b}'));
    }

    #[test]
    fn legacy_package_lacks_hardware_markup_without_hardware_target() {
        let scenario = Scenario::new();
        let request = scenario.request().build().expect("can build request");
        let report = scenario
            .run(&request, &scenario.collaborators())
            .expect("can build");
        assert!(report.hardware_id.is_some());

        let legacy = scenario.snapshot("jane-doe_x.epub");
        let opf = std::fs::read_to_string(legacy.join("epub/content.opf")).expect("can read");
        assert!(!opf.contains("hardware-identifier"));
        assert_eq!(
            scenario.published(),
            vec!["jane-doe_x.epub", "jane-doe_x_advanced.epub"]
        );
    }

    #[test]
    fn titlepage_is_stroked_before_rasterizing() {
        let scenario = Scenario::new();
        let request = scenario.request().build().expect("can build request");
        scenario
            .run(&request, &scenario.collaborators())
            .expect("can build");

        // the fake rasterizer copies the vector image verbatim
        let titlepage = Document::load(
            scenario
                .snapshot("jane-doe_x.epub")
                .join("epub/images/titlepage.png"),
        )
        .expect("can load rasterized titlepage");
        assert_eq!(titlepage.root.attr("width"), Some("1405"));
        assert!(titlepage
            .root
            .find(&|e| e.attr("style").is_some_and(|s| s.contains("stroke-width: 5px")))
            .is_some());
    }

    #[test]
    fn modern_package_keeps_vector_images() {
        let scenario = Scenario::new();
        let request = scenario.request().build().expect("can build request");
        scenario
            .run(&request, &scenario.collaborators())
            .expect("can build");

        let modern = scenario.snapshot("jane-doe_x_advanced.epub");
        assert!(modern.join("epub/images/cover.svg").is_file());
        assert!(!modern.join("epub/toc.ncx").exists());
        let css = std::fs::read_to_string(modern.join("epub/css/core.css")).expect("can read");
        assert!(css.contains("epub|type"));
    }

    #[test]
    fn vendor_package_gets_spans_but_keeps_vectors() {
        let scenario = Scenario::new();
        scenario
            .run(&everything(&scenario), &scenario.collaborators())
            .expect("can build");

        let vendor = scenario.snapshot("jane-doe_x.kepub.epub");
        let chapter = std::fs::read_to_string(vendor.join("epub/text/chapter-1.xhtml"))
            .expect("can read chapter");
        assert!(chapter.contains(r#"id="kobo.1.1""#));
        assert!(vendor.join("epub/images/cover.svg").is_file());

        let legacy = scenario.snapshot("jane-doe_x.epub");
        let chapter = std::fs::read_to_string(legacy.join("epub/text/chapter-1.xhtml"))
            .expect("can read chapter");
        assert!(!chapter.contains("koboSpan"));
    }

    #[test]
    fn source_is_never_modified() {
        let scenario = Scenario::new();
        let before = fixture::snapshot_files(scenario.source.path());
        scenario
            .run(&everything(&scenario), &scenario.collaborators())
            .expect("can build");
        assert_eq!(fixture::snapshot_files(scenario.source.path()), before);
    }

    #[test]
    fn simplifier_diagnostics_leave_no_output() {
        let scenario = Scenario::new();
        let mut collaborators = scenario.collaborators();
        collaborators.simplifier = Box::new(FakeSimplifier {
            diagnostics: vec!["text/chapter-1.xhtml: unbalanced markup".to_string()],
        });

        let err = scenario
            .run(&everything(&scenario), &collaborators)
            .expect_err("simplifier complained");
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::Collaborator { .. })
        ));
        assert!(scenario.published().is_empty());
    }

    #[test]
    fn validation_problems_fail_the_build() {
        let scenario = Scenario::new();
        let mut collaborators = scenario.collaborators();
        collaborators.validator = Box::new(FakeValidator {
            diagnostics: vec!["ERROR(RSC-005): bad".to_string()],
        });
        let request = scenario
            .request()
            .check(true)
            .build()
            .expect("can build request");

        let err = scenario
            .run(&request, &collaborators)
            .expect_err("validator complained");
        match err.downcast_ref::<BuildError>() {
            Some(BuildError::Validation {
                artifact,
                diagnostics,
            }) => {
                assert_eq!(artifact, "jane-doe_x_advanced.epub");
                assert_eq!(diagnostics.len(), 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(scenario.published().is_empty());
    }

    #[test]
    fn missing_tool_is_a_precondition_error() {
        let scenario = Scenario::new();
        let mut collaborators = scenario.collaborators();
        collaborators.converter = Box::new(MissingTool);

        let err = scenario
            .run(&everything(&scenario), &collaborators)
            .expect_err("converter is missing");
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::Precondition(_))
        ));
        assert!(scenario.published().is_empty());

        // not needed without the hardware target
        let request = scenario.request().build().expect("can build request");
        scenario
            .run(&request, &collaborators)
            .expect("can build without hardware");
    }

    #[test]
    fn resizer_is_only_needed_for_covers_and_hardware() {
        let scenario = Scenario::new();
        let mut collaborators = scenario.collaborators();
        collaborators.raster = Box::new(NoResizer);

        let request = scenario
            .request()
            .check(true)
            .vendor(true)
            .build()
            .expect("can build request");
        scenario
            .run(&request, &collaborators)
            .expect("can build without resizing");

        for request in [
            scenario.request().covers(true).build(),
            scenario.request().hardware(true).build(),
        ] {
            let request = request.expect("can build request");
            let err = scenario
                .run(&request, &collaborators)
                .expect_err("resizer is missing");
            assert!(matches!(
                err.downcast_ref::<BuildError>(),
                Some(BuildError::Precondition(_))
            ));
        }
    }

    #[test]
    fn publishing_is_all_or_nothing() {
        let staging = TempDir::new().expect("can create staging dir");
        let output = TempDir::new().expect("can create output dir");
        let dist = output.path().join("dist");
        let present = staging.path().join("x.epub");
        std::fs::write(&present, b"PK").expect("can write artifact");

        let err = publish(&[present.clone(), staging.path().join("x.azw3")], &dist)
            .expect_err("second artifact is missing");
        assert!(format!("{err:#}").contains("x.azw3"));
        let leftovers: Vec<_> = std::fs::read_dir(&dist)
            .expect("output dir exists")
            .filter_map(|e| e.ok())
            .collect();
        assert!(leftovers.is_empty());

        let published = publish(&[present], &dist).expect("can publish");
        assert_eq!(published, vec![dist.join("x.epub")]);
        assert_eq!(std::fs::read(dist.join("x.epub")).expect("can read"), b"PK");
    }

    #[test]
    fn missing_source_is_a_precondition_error() {
        let err = BuildRequestBuilder::default()
            .source("/does/not/exist")
            .output_dir("dist")
            .build()
            .expect_err("source is missing");
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::Precondition(_))
        ));
    }

    #[test]
    fn hardware_profile_builds_on_the_legacy_passes() {
        let compatible = TargetProfile::new(Target::Compatible, false);
        let hardware = TargetProfile::new(Target::Hardware, false);
        assert!(compatible
            .passes()
            .iter()
            .all(|p| hardware.passes().contains(p)));
        assert!(TargetProfile::new(Target::Modern, true).passes().is_empty());
        assert_eq!(hardware.artifact_name("a_b"), "a_b.azw3");
    }
}
