//! The build as an explicit graph of named stages.
//!
//! Every stage declares the [`Milestone`]s it needs and the ones it establishes.
//! [`Pipeline::plan`] orders the stages so that every requirement is met before the
//! stage that needs it runs, and rejects graphs where that is impossible before
//! anything has been touched. [`Pipeline::run`] then checks each stage's
//! requirements again as it goes.

mod stages;

pub use stages::*;

use crate::assemble::{BuildRequest, Target, TargetProfile};
use crate::collaborators::Collaborators;
use crate::config::Configuration;
use crate::identifier::HardwareIdentifier;
use crate::workspace::{WorkingTree, Workspace};
use anyhow::{anyhow, Context, Result};
use indicatif::ProgressBar;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

/// A fact about the working tree that later stages can rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Milestone {
    /// The source has been copied into a workspace. Holds before any stage runs.
    Materialized,
    SourcePrepared,
    ModernEmitted,
    /// The vendor package, if requested, has been built from the untouched tree.
    VendorBranched,
    VectorsCleaned,
    StrokeSimulated,
    /// No vector images remain and nothing refers to one.
    Rasterized,
    RastersScrubbed,
    NamespacesDowngraded,
    PackageRewritten,
    MarkupCompatible,
    MarkupSimplified,
    NavigationSynthesized,
    LegacyEmitted,
    CoversExtracted,
    HardwareMarkupApplied,
    HardwareIdentified,
    HardwareEmitted,
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Milestones that hold before the first stage runs.
pub const INITIAL_MILESTONES: &[Milestone] = &[Milestone::Materialized];

pub trait Stage {
    fn name(&self) -> &'static str;
    fn requires(&self) -> &'static [Milestone];
    fn provides(&self) -> &'static [Milestone];
    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<()>;
}

/// Everything a stage can see and touch during a build.
pub struct BuildContext<'a> {
    pub request: &'a BuildRequest,
    pub config: &'a Configuration,
    pub collaborators: &'a Collaborators,
    /// The tree every compatibility stage mutates
    pub tree: WorkingTree,
    /// Finished artifacts wait here until the whole build has succeeded
    pub staging: Workspace,
    /// The canonical identifier from the package document
    pub identifier: String,
    /// Stem of the artifact file names
    pub base_name: String,
    pub hardware_id: Option<HardwareIdentifier>,
    /// Paths in `staging` of the artifacts produced so far
    pub staged: Vec<PathBuf>,
}

impl BuildContext<'_> {
    /// Where an artifact named `file_name` is staged.
    pub fn staging_path(&self, file_name: &str) -> PathBuf {
        self.staging.path().join(file_name)
    }

    pub fn profile(&self, target: Target) -> TargetProfile {
        TargetProfile::new(target, self.request.proof)
    }
}

#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Pipeline {
        Pipeline::default()
    }

    pub fn with_stage<S: Stage + 'static>(mut self, stage: S) -> Pipeline {
        self.stages.push(Box::new(stage));
        self
    }

    /// The stages in the order they will run: dependencies first, otherwise in the
    /// order they were added.
    pub fn plan(&self) -> Result<Vec<&dyn Stage>> {
        let mut providers: HashMap<Milestone, Vec<usize>> = HashMap::new();
        for (i, stage) in self.stages.iter().enumerate() {
            for milestone in stage.provides() {
                providers.entry(*milestone).or_default().push(i);
            }
        }

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.stages.len()];
        let mut waiting_on: Vec<usize> = vec![0; self.stages.len()];
        for (i, stage) in self.stages.iter().enumerate() {
            let mut upstream = BTreeSet::new();
            for milestone in stage.requires() {
                match providers.get(milestone) {
                    Some(indices) => upstream.extend(indices.iter().copied()),
                    None if INITIAL_MILESTONES.contains(milestone) => {}
                    None => {
                        return Err(anyhow!(
                            "Stage {} requires {milestone}, which no stage provides",
                            stage.name()
                        ))
                    }
                }
            }
            upstream.remove(&i);
            waiting_on[i] = upstream.len();
            for j in upstream {
                dependents[j].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = (0..self.stages.len())
            .filter(|i| waiting_on[*i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.stages.len());
        while let Some(i) = ready.pop_first() {
            order.push(self.stages[i].as_ref());
            for &j in &dependents[i] {
                waiting_on[j] -= 1;
                if waiting_on[j] == 0 {
                    ready.insert(j);
                }
            }
        }

        if order.len() != self.stages.len() {
            let stuck = (0..self.stages.len())
                .filter(|i| waiting_on[*i] > 0)
                .map(|i| self.stages[i].name())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(anyhow!("Stages depend on each other in a cycle: {stuck}"));
        }
        Ok(order)
    }

    /// Plans and runs every stage, returning the names of the stages run.
    pub fn run(
        &self,
        ctx: &mut BuildContext<'_>,
        progress: &ProgressBar,
    ) -> Result<Vec<&'static str>> {
        let plan = self.plan()?;
        let mut reached: HashSet<Milestone> = INITIAL_MILESTONES.iter().copied().collect();
        let mut ran = Vec::with_capacity(plan.len());

        for stage in plan {
            if let Some(missing) = stage.requires().iter().find(|m| !reached.contains(*m)) {
                return Err(anyhow!(
                    "Stage {} can't run before {missing} has been reached",
                    stage.name()
                ));
            }

            progress.set_message(stage.name());
            log::info!("Running stage {}", stage.name());
            stage
                .run(ctx)
                .with_context(|| format!("Stage {} failed", stage.name()))?;
            progress.inc(1);

            reached.extend(stage.provides().iter().copied());
            ran.push(stage.name());
        }
        Ok(ran)
    }
}
