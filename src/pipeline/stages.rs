use super::{BuildContext, Milestone, Pipeline, Stage};
use crate::assemble::Target;
use crate::compat::{namespaces, proofing};
use crate::error::BuildError;
use crate::identifier::HardwareIdentifier;
use crate::navigation;
use crate::package::{PackageDocument, NCX_MEDIA_TYPE};
use crate::raster;
use crate::svg;
use crate::workspace::{WorkingTree, Workspace};
use crate::xml::Document;
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

/// Manifest id of the hardware reader's identifier.
const HARDWARE_IDENTIFIER_ID: &str = "hardware-identifier";

macro_rules! stage {
    ($ty:ident, $name:literal, requires: [$($req:ident),*], provides: [$($prov:ident),*], $run:ident) => {
        pub struct $ty;

        impl Stage for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn requires(&self) -> &'static [Milestone] {
                &[$(Milestone::$req),*]
            }

            fn provides(&self) -> &'static [Milestone] {
                &[$(Milestone::$prov),*]
            }

            fn run(&self, ctx: &mut BuildContext<'_>) -> Result<()> {
                $run(ctx)
            }
        }
    };
}

stage!(PrepareSource, "prepare-source",
    requires: [Materialized], provides: [SourcePrepared], prepare_source);
stage!(EmitModern, "emit-modern",
    requires: [SourcePrepared], provides: [ModernEmitted], emit_modern);
stage!(BranchVendor, "branch-vendor",
    requires: [SourcePrepared], provides: [VendorBranched], branch_vendor);
stage!(CleanVectors, "clean-vectors",
    requires: [ModernEmitted, VendorBranched], provides: [VectorsCleaned], clean_vectors);
stage!(SimulateStroke, "simulate-stroke",
    requires: [VectorsCleaned], provides: [StrokeSimulated], simulate_stroke);
stage!(Rasterize, "rasterize",
    requires: [StrokeSimulated], provides: [Rasterized], rasterize);
stage!(ScrubRasters, "scrub-rasters",
    requires: [Rasterized], provides: [RastersScrubbed], scrub_rasters);
stage!(DowngradeNamespaces, "downgrade-namespaces",
    requires: [ModernEmitted, VendorBranched], provides: [NamespacesDowngraded], downgrade_namespaces);
stage!(RewritePackage, "rewrite-package",
    requires: [Rasterized, NamespacesDowngraded], provides: [PackageRewritten], rewrite_package);
stage!(MarkupCompat, "markup-compat",
    requires: [PackageRewritten], provides: [MarkupCompatible], markup_compat);
stage!(SimplifyMarkup, "simplify-markup",
    requires: [MarkupCompatible], provides: [MarkupSimplified], simplify_markup);
stage!(SynthesizeNavigation, "synthesize-navigation",
    requires: [MarkupSimplified], provides: [NavigationSynthesized], synthesize_navigation);
stage!(EmitLegacy, "emit-legacy",
    requires: [NavigationSynthesized, RastersScrubbed], provides: [LegacyEmitted], emit_legacy);
stage!(ExtractCovers, "extract-covers",
    requires: [RastersScrubbed], provides: [CoversExtracted], extract_covers);
stage!(HardwareMarkup, "hardware-markup",
    requires: [LegacyEmitted], provides: [HardwareMarkupApplied], hardware_markup);
stage!(AssignHardwareIdentifier, "assign-hardware-identifier",
    requires: [LegacyEmitted], provides: [HardwareIdentified], assign_hardware_identifier);
stage!(EmitHardware, "emit-hardware",
    requires: [HardwareMarkupApplied, HardwareIdentified, CoversExtracted],
    provides: [HardwareEmitted], emit_hardware);

impl Pipeline {
    /// Every stage of a full build. Stages whose target wasn't requested do nothing.
    pub fn standard() -> Pipeline {
        Pipeline::new()
            .with_stage(PrepareSource)
            .with_stage(EmitModern)
            .with_stage(BranchVendor)
            .with_stage(CleanVectors)
            .with_stage(SimulateStroke)
            .with_stage(Rasterize)
            .with_stage(ScrubRasters)
            .with_stage(DowngradeNamespaces)
            .with_stage(RewritePackage)
            .with_stage(MarkupCompat)
            .with_stage(SimplifyMarkup)
            .with_stage(SynthesizeNavigation)
            .with_stage(EmitLegacy)
            .with_stage(ExtractCovers)
            .with_stage(HardwareMarkup)
            .with_stage(AssignHardwareIdentifier)
            .with_stage(EmitHardware)
    }
}

fn load_package(tree: &WorkingTree) -> Result<PackageDocument> {
    PackageDocument::load(tree.package_path())
}

/// Packs `tree` into the staging area as `file_name`, validating it when asked to.
fn archive(
    ctx: &BuildContext<'_>,
    tree: &WorkingTree,
    file_name: &str,
    validate: bool,
) -> Result<PathBuf> {
    let output = ctx.staging_path(file_name);
    ctx.collaborators
        .archive
        .write(tree.epub_root(), &output)
        .with_context(|| format!("Failed to pack {file_name}"))?;

    if validate && ctx.request.check {
        let diagnostics = ctx.collaborators.validator.validate(&output)?;
        if !diagnostics.is_empty() {
            return Err(BuildError::Validation {
                artifact: file_name.to_string(),
                diagnostics,
            }
            .into());
        }
        log::info!("{file_name} passed validation");
    }
    Ok(output)
}

/// The on-disk cover image named by the package, if it has one.
fn cover_image(tree: &WorkingTree) -> Result<Option<PathBuf>> {
    let package = load_package(tree)?;
    Ok(package.cover_item().map(|item| tree.resolve_href(&item.href)))
}

fn prepare_source(ctx: &mut BuildContext<'_>) -> Result<()> {
    if !ctx.profile(Target::Modern).proofing {
        return Ok(());
    }
    let mut package = load_package(&ctx.tree)?;
    let linked = proofing::inject(&ctx.tree, &mut package)?;
    package.save()?;
    log::info!("Linked proofing styles into {linked} document(s)");
    Ok(())
}

fn emit_modern(ctx: &mut BuildContext<'_>) -> Result<()> {
    let file_name = ctx.profile(Target::Modern).artifact_name(&ctx.base_name);
    let output = archive(ctx, &ctx.tree, &file_name, true)?;
    ctx.staged.push(output);
    Ok(())
}

fn branch_vendor(ctx: &mut BuildContext<'_>) -> Result<()> {
    if !ctx.request.vendor {
        return Ok(());
    }
    let profile = ctx.profile(Target::Vendor);
    let branch = ctx.tree.branch("vendor")?;
    for pass in profile.passes() {
        pass.apply(&branch)?;
    }
    let file_name = profile.artifact_name(&ctx.base_name);
    let output = archive(ctx, &branch, &file_name, false)?;
    ctx.staged.push(output);
    Ok(())
}

fn clean_vectors(ctx: &mut BuildContext<'_>) -> Result<()> {
    for svg in ctx.tree.vector_images()? {
        ctx.collaborators.outliner.outline(&svg)?;
    }
    Ok(())
}

fn simulate_stroke(ctx: &mut BuildContext<'_>) -> Result<()> {
    let matchers = ctx.config.stroke.matchers()?;
    for path in ctx.tree.vector_images()? {
        let Some(name) = path.file_name() else {
            continue;
        };
        let Some((_, width)) = matchers.iter().find(|(m, _)| m.is_match(name)) else {
            continue;
        };
        let outcome = svg::stroke_file(&path, *width)?;
        if !outcome.stroked {
            log::warn!("{} has nothing to stroke", path.display());
        } else if !outcome.resized {
            log::debug!("Stroked {} without resizing its canvas", path.display());
        }
    }
    Ok(())
}

fn rasterize(ctx: &mut BuildContext<'_>) -> Result<()> {
    let rasters = raster::rasterize_tree(
        &ctx.tree,
        ctx.collaborators.raster.as_ref(),
        ctx.config.raster.zoom,
    )?;
    let rewritten = raster::rewrite_vector_references(&ctx.tree)?;
    log::info!(
        "Rasterized {} image(s), rewrote {rewritten} reference(s)",
        rasters.len()
    );
    Ok(())
}

fn scrub_rasters(ctx: &mut BuildContext<'_>) -> Result<()> {
    for image in ctx.tree.raster_images()? {
        if let Err(e) = ctx.collaborators.scrubber.strip(&image) {
            log::warn!("Couldn't strip metadata from {}: {e:#}", image.display());
        }
    }
    Ok(())
}

fn downgrade_namespaces(ctx: &mut BuildContext<'_>) -> Result<()> {
    let changed =
        namespaces::downgrade_tree(&ctx.tree, &ctx.config.compatibility.insecure_namespaces)?;
    log::debug!("Downgraded {changed} namespace reference(s)");
    Ok(())
}

fn rewrite_package(ctx: &mut BuildContext<'_>) -> Result<()> {
    let mut package = load_package(&ctx.tree)?;
    package.downgrade_for_legacy()?;
    package.save()
}

fn markup_compat(ctx: &mut BuildContext<'_>) -> Result<()> {
    for pass in ctx.profile(Target::Compatible).passes() {
        pass.apply(&ctx.tree)?;
    }
    Ok(())
}

fn simplify_markup(ctx: &mut BuildContext<'_>) -> Result<()> {
    let diagnostics = ctx.collaborators.simplifier.simplify(ctx.tree.epub_root())?;
    if !diagnostics.is_empty() {
        return Err(BuildError::collaborator("Markup simplifier", diagnostics.join("\n")).into());
    }
    Ok(())
}

fn synthesize_navigation(ctx: &mut BuildContext<'_>) -> Result<()> {
    let mut package = load_package(&ctx.tree)?;
    let nav = package.nav_item().ok_or_else(|| {
        BuildError::transform(package.path(), "manifest has no navigation document")
    })?;

    let ncx_path = ctx.collaborators.ncx.generate(&ctx.tree, &nav.href)?;
    let ncx_href = ctx.tree.package_href(&ncx_path)?;
    let existing = package.manifest().into_iter().find(|i| i.href == ncx_href);
    let ncx_id = match existing {
        Some(item) => item.id,
        None => package.add_manifest_item("ncx", &ncx_href, NCX_MEDIA_TYPE)?,
    };
    package.set_spine_toc(&ncx_id)?;

    let nav_doc = Document::load(ctx.tree.resolve_href(&nav.href))?;
    let guide = navigation::synthesize_guide(&navigation::landmarks(&nav_doc, &nav.href));
    log::debug!("Guide has {} reference(s)", guide.len());
    package.set_guide(&guide);
    package.save()
}

fn emit_legacy(ctx: &mut BuildContext<'_>) -> Result<()> {
    let file_name = ctx.profile(Target::Compatible).artifact_name(&ctx.base_name);
    let output = archive(ctx, &ctx.tree, &file_name, true)?;
    ctx.staged.push(output);
    Ok(())
}

fn extract_covers(ctx: &mut BuildContext<'_>) -> Result<()> {
    if !ctx.request.covers {
        return Ok(());
    }
    let Some(cover) = cover_image(&ctx.tree)? else {
        log::warn!("Package has no cover image, not extracting covers");
        return Ok(());
    };

    let sizes = [
        ("cover.jpg", ctx.config.covers.cover_size),
        ("cover-thumbnail.jpg", ctx.config.covers.thumbnail_size),
    ];
    for (file_name, [width, height]) in sizes {
        let output = ctx.staging_path(file_name);
        ctx.collaborators
            .raster
            .resize(&cover, width, height, &output)?;
        ctx.staged.push(output);
    }
    Ok(())
}

fn hardware_markup(ctx: &mut BuildContext<'_>) -> Result<()> {
    if !ctx.request.hardware {
        return Ok(());
    }
    let applied = ctx.profile(Target::Compatible).passes();
    for pass in ctx
        .profile(Target::Hardware)
        .passes()
        .iter()
        .filter(|p| !applied.contains(*p))
    {
        pass.apply(&ctx.tree)?;
    }
    Ok(())
}

fn assign_hardware_identifier(ctx: &mut BuildContext<'_>) -> Result<()> {
    let hardware_id = HardwareIdentifier::compute(
        &ctx.identifier,
        &ctx.config.compatibility.identifier_prefix,
    );
    if ctx.request.hardware {
        let mut package = load_package(&ctx.tree)?;
        package.add_identifier(HARDWARE_IDENTIFIER_ID, hardware_id.as_str())?;
        package.save()?;
    }
    log::info!("Hardware identifier is {hardware_id}");
    ctx.hardware_id = Some(hardware_id);
    Ok(())
}

fn emit_hardware(ctx: &mut BuildContext<'_>) -> Result<()> {
    if !ctx.request.hardware {
        return Ok(());
    }
    let hardware_id = ctx
        .hardware_id
        .clone()
        .ok_or_else(|| anyhow!("Hardware identifier hasn't been assigned"))?;
    let cover = cover_image(&ctx.tree)?.ok_or_else(|| {
        BuildError::transform(
            ctx.tree.package_path(),
            "the hardware package needs a cover image",
        )
    })?;

    let scratch = Workspace::create("hardware")?;
    let epub = scratch.path().join(format!("{}_hardware.epub", ctx.base_name));
    ctx.collaborators
        .archive
        .write(ctx.tree.epub_root(), &epub)
        .with_context(|| "Failed to pack the hardware source")?;

    let [width, height] = ctx.config.covers.cover_size;
    let cover_jpeg = scratch.path().join("cover.jpg");
    ctx.collaborators
        .raster
        .resize(&cover, width, height, &cover_jpeg)?;

    let output = ctx.staging_path(&ctx.profile(Target::Hardware).artifact_name(&ctx.base_name));
    ctx.collaborators
        .converter
        .convert(&epub, &cover_jpeg, &output)?;
    if !output.is_file() {
        return Err(BuildError::collaborator(
            "Format converter",
            format!("produced no {}", output.display()),
        )
        .into());
    }
    ctx.staged.push(output);

    let [width, height] = ctx.config.covers.hardware_thumbnail_size;
    let thumbnail = ctx.staging_path(&hardware_id.thumbnail_file_name());
    ctx.collaborators
        .raster
        .resize(&cover, width, height, &thumbnail)?;
    ctx.staged.push(thumbnail);
    Ok(())
}
