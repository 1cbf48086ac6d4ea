//! Collaborators backed by external command-line tools.

use super::{
    ArchiveValidator, FormatConverter, MarkupSimplifier, MetadataScrubber, RasterConverter,
    VectorOutliner,
};
use crate::error::BuildError;
use crate::xml::Document;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// A program plus an argument template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new<S: ToString>(program: S, args: &[&str]) -> ToolCommand {
        ToolCommand {
            program: program.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
        }
    }

    /// Where the program lives, if it can be found.
    pub fn locate(&self) -> Option<PathBuf> {
        let program = Path::new(&self.program);
        if program.components().count() > 1 {
            return program.is_file().then(|| program.to_path_buf());
        }
        let paths = std::env::var_os("PATH")?;
        std::env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    }

    /// Fails with a precondition error if the program can't be found.
    pub fn ensure_available(&self, purpose: &str) -> Result<()> {
        match self.locate() {
            Some(path) => {
                log::debug!("Using {} for {purpose}", path.display());
                Ok(())
            }
            None => Err(BuildError::Precondition(format!(
                "Couldn't find `{}`, which is needed for {purpose}. Install it or point \
                 the configuration at it.",
                self.program
            ))
            .into()),
        }
    }

    /// The arguments with every `{name}` placeholder replaced.
    pub fn expand(&self, vars: &[(&str, String)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |arg, (name, value)| {
                    arg.replace(&format!("{{{name}}}"), value)
                })
            })
            .collect()
    }

    /// Runs the command to completion, failing unless it exits successfully.
    pub fn run(&self, vars: &[(&str, String)]) -> Result<Output> {
        let output = self.output(vars)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildError::collaborator(
                &self.program,
                format!(
                    "exited with status {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            )
            .into());
        }
        Ok(output)
    }

    /// Runs the command to completion without judging its exit status.
    pub fn output(&self, vars: &[(&str, String)]) -> Result<Output> {
        let args = self.expand(vars);
        log::debug!("Running {} {}", self.program, args.join(" "));
        Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| BuildError::collaborator(&self.program, format!("couldn't start: {e}")))
            .with_context(|| format!("Failed to run {}", self.program))
    }
}

fn path_var(name: &'static str, path: &Path) -> (&'static str, String) {
    (name, path.display().to_string())
}

/// Every non-blank line a tool wrote to stdout or stderr.
fn output_lines(output: &Output) -> Vec<String> {
    [&output.stdout, &output.stderr]
        .into_iter()
        .flat_map(|stream| {
            String::from_utf8_lossy(stream)
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

pub struct ProcessRasterConverter {
    svg: ToolCommand,
    resize: ToolCommand,
}

impl ProcessRasterConverter {
    pub fn new(svg: ToolCommand, resize: ToolCommand) -> Self {
        Self { svg, resize }
    }
}

impl RasterConverter for ProcessRasterConverter {
    fn convert(&self, svg: &Path, zoom: f64, output: &Path) -> Result<()> {
        self.svg
            .run(&[
                path_var("input", svg),
                path_var("output", output),
                ("zoom", zoom.to_string()),
            ])
            .with_context(|| format!("Failed to rasterize {}", svg.display()))?;
        if !output.is_file() {
            return Err(BuildError::collaborator(
                &self.svg.program,
                format!("produced no output for {}", svg.display()),
            )
            .into());
        }
        Ok(())
    }

    fn resize(&self, image: &Path, width: u32, height: u32, output: &Path) -> Result<()> {
        self.resize
            .run(&[
                path_var("input", image),
                path_var("output", output),
                ("width", width.to_string()),
                ("height", height.to_string()),
            ])
            .with_context(|| format!("Failed to resize {}", image.display()))?;
        Ok(())
    }

    fn ensure_available(&self) -> Result<()> {
        self.svg.ensure_available("converting vector images")
    }

    fn ensure_resize_available(&self) -> Result<()> {
        self.resize.ensure_available("resizing cover images")
    }
}

pub struct ProcessScrubber {
    command: ToolCommand,
}

impl ProcessScrubber {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }
}

impl MetadataScrubber for ProcessScrubber {
    fn strip(&self, path: &Path) -> Result<()> {
        self.command.run(&[path_var("input", path)])?;
        Ok(())
    }
}

/// Runs the optional text-to-outline tool, then strips editor cruft in-process.
pub struct ProcessOutliner {
    command: Option<ToolCommand>,
}

impl ProcessOutliner {
    pub fn new(command: Option<ToolCommand>) -> Self {
        Self { command }
    }
}

impl VectorOutliner for ProcessOutliner {
    fn outline(&self, svg: &Path) -> Result<()> {
        if let Some(command) = &self.command {
            command
                .run(&[path_var("input", svg), path_var("output", svg)])
                .with_context(|| format!("Failed to outline text in {}", svg.display()))?;
        }

        let mut doc = Document::load(svg)?;
        if crate::svg::strip_editor_cruft(&mut doc) {
            doc.save(svg)?;
        }
        Ok(())
    }

    fn ensure_available(&self) -> Result<()> {
        match &self.command {
            Some(command) => command.ensure_available("converting vector text to outlines"),
            None => Ok(()),
        }
    }
}

pub struct ProcessSimplifier {
    command: ToolCommand,
}

impl ProcessSimplifier {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }
}

impl MarkupSimplifier for ProcessSimplifier {
    fn simplify(&self, root: &Path) -> Result<Vec<String>> {
        let output = self.command.output(&[path_var("root", root)])?;
        let mut diagnostics = output_lines(&output);
        if !output.status.success() && diagnostics.is_empty() {
            diagnostics.push(format!(
                "{} exited with status {}",
                self.command.program,
                output.status.code().unwrap_or(-1)
            ));
        }
        Ok(diagnostics)
    }

    fn ensure_available(&self) -> Result<()> {
        self.command.ensure_available("simplifying markup")
    }
}

pub struct ProcessFormatConverter {
    command: ToolCommand,
}

impl ProcessFormatConverter {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }
}

impl FormatConverter for ProcessFormatConverter {
    fn convert(&self, input: &Path, cover: &Path, output: &Path) -> Result<()> {
        self.command
            .run(&[
                path_var("input", input),
                path_var("output", output),
                path_var("cover", cover),
            ])
            .with_context(|| format!("Failed to convert {}", input.display()))?;
        Ok(())
    }

    fn ensure_available(&self) -> Result<()> {
        self.command.ensure_available("building the hardware package")
    }
}

pub struct ProcessValidator {
    command: ToolCommand,
}

impl ProcessValidator {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }
}

impl ArchiveValidator for ProcessValidator {
    fn validate(&self, artifact: &Path) -> Result<Vec<String>> {
        let output = self.command.output(&[path_var("input", artifact)])?;
        let mut diagnostics = output_lines(&output);
        if !output.status.success() && diagnostics.is_empty() {
            diagnostics.push(format!(
                "{} exited with status {}",
                self.command.program,
                output.status.code().unwrap_or(-1)
            ));
        }
        Ok(diagnostics)
    }

    fn ensure_available(&self) -> Result<()> {
        self.command.ensure_available("validating packages")
    }
}
