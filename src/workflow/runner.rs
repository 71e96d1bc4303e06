//! Workflow assembly and execution.
//!
//! The runner walks the phase tree depth-first in declaration order, one
//! phase at a time. Every phase ends up in one of the states below; phases
//! never reached because an earlier phase failed stay `Pending`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::error::KunError;

use super::flags::{FlagSet, local_values, resolve_flags};
use super::phase::{Phase, PhaseAction, PhaseContext, PhaseError, PhaseOutcome};
use super::selection::Selection;

/// Execution state of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    Pending,
    Skipped,
    Running,
    Succeeded,
    Failed,
}

impl PhaseState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Skipped | Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for PhaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Skipped => write!(f, "Skipped"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Per-phase entry of a run report.
#[derive(Debug, Clone)]
pub struct PhaseRecord {
    pub path: String,
    pub depth: usize,
    pub hidden: bool,
    pub has_action: bool,
    pub state: PhaseState,
    pub note: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PhaseRecord {
    /// Wall-clock time spent in the phase's action.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.started_at?)
    }
}

/// The phase that stopped the run.
#[derive(Debug)]
pub struct PhaseFailure {
    pub phase: String,
    pub error: PhaseError,
}

/// Outcome of one workflow invocation, in traversal order.
#[derive(Debug)]
pub struct RunReport {
    pub workflow: String,
    pub records: Vec<PhaseRecord>,
    pub failure: Option<PhaseFailure>,
}

impl RunReport {
    pub const fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn state(&self, path: &str) -> Option<PhaseState> {
        self.records.iter().find(|r| r.path == path).map(|r| r.state)
    }

    /// Phases whose action ran to completion.
    pub fn completed_phases(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.has_action && r.state == PhaseState::Succeeded)
            .map(|r| r.path.clone())
            .collect()
    }

    /// Turn a failed run into [`KunError::PhaseActionFailed`].
    pub fn into_result(mut self) -> Result<Self, KunError> {
        match self.failure.take() {
            None => Ok(self),
            Some(failure) => Err(KunError::PhaseActionFailed {
                phase: failure.phase,
                completed: self.completed_phases(),
                source: failure.error,
            }),
        }
    }
}

/// Listing entry for a visible phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseInfo {
    pub path: String,
    pub depth: usize,
    pub short: String,
    pub inherited_flags: Vec<String>,
}

/// A validated phase tree rooted at a command.
pub struct Workflow<D: ?Sized> {
    name: String,
    global_flags: Vec<String>,
    phases: Vec<Phase<D>>,
}

impl<D: ?Sized> std::fmt::Debug for Workflow<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("global_flags", &self.global_flags)
            .field("phases", &self.phases)
            .finish()
    }
}

impl<D: ?Sized> Workflow<D> {
    /// Assemble and validate a workflow.
    ///
    /// `global_flags` are the flags the command itself declares; a phase may
    /// inherit one of them or a local flag of one of its ancestors.
    pub fn new<I, S>(
        name: impl Into<String>,
        global_flags: I,
        phases: Vec<Phase<D>>,
    ) -> Result<Self, KunError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let workflow = Self {
            name: name.into(),
            global_flags: global_flags.into_iter().map(Into::into).collect(),
            phases,
        };
        {
            let available: HashSet<&str> =
                workflow.global_flags.iter().map(String::as_str).collect();
            validate_level(&workflow.phases, "", &workflow.name, &available)?;
        }
        Ok(workflow)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn global_flags(&self) -> &[String] {
        &self.global_flags
    }

    pub fn phases(&self) -> &[Phase<D>] {
        &self.phases
    }

    /// Every phase path in traversal order, hidden phases included.
    pub fn paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        walk(&self.phases, "", 0, false, &mut |_, path, _, _| {
            paths.push(path.to_string());
        });
        paths
    }

    /// Visible phases in traversal order. Children of hidden phases are
    /// hidden too.
    pub fn list(&self) -> Vec<PhaseInfo> {
        let mut infos = Vec::new();
        walk(&self.phases, "", 0, false, &mut |phase, path, depth, hidden| {
            if !hidden {
                infos.push(PhaseInfo {
                    path: path.to_string(),
                    depth,
                    short: phase.short.clone(),
                    inherited_flags: phase.inherit_flags.clone(),
                });
            }
        });
        infos
    }

    /// Run the selected phases against `data`.
    ///
    /// Selection errors are returned before any action runs. A failing
    /// action does not produce an `Err` here: the report carries the
    /// failure, see [`RunReport::into_result`].
    pub fn run(
        &self,
        selection: &Selection,
        data: &D,
        flag_values: &FlagSet,
    ) -> Result<RunReport, KunError> {
        selection.validate(&self.paths())?;

        let mut records = Vec::new();
        walk(&self.phases, "", 0, false, &mut |phase, path, depth, hidden| {
            records.push(PhaseRecord {
                path: path.to_string(),
                depth,
                hidden,
                has_action: phase.action.is_some(),
                state: PhaseState::Pending,
                note: None,
                started_at: None,
                completed_at: None,
            });
        });

        info!(
            "Running workflow {} ({} phases, include: {:?}, exclude: {:?})",
            self.name,
            records.len(),
            selection.included(),
            selection.excluded()
        );

        let mut run = RunState {
            data,
            selection,
            flag_values,
            records,
            cursor: 0,
            failure: None,
        };
        let provided = flag_values.restrict(&self.global_flags);
        let scope = Scope {
            included: false,
            excluded: false,
        };
        for phase in &self.phases {
            if run.visit(phase, "", &provided, scope) == Flow::Abort {
                break;
            }
        }

        let report = RunReport {
            workflow: self.name.clone(),
            records: run.records,
            failure: run.failure,
        };
        if let Some(failure) = &report.failure {
            error!(
                "Workflow {} aborted at phase {}: {}",
                self.name, failure.phase, failure.error
            );
        } else {
            info!("Workflow {} completed", self.name);
        }
        Ok(report)
    }
}

/// Selection inherited from ancestors.
#[derive(Debug, Clone, Copy)]
struct Scope {
    included: bool,
    excluded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Abort,
}

struct RunState<'a, D: ?Sized> {
    data: &'a D,
    selection: &'a Selection,
    flag_values: &'a FlagSet,
    records: Vec<PhaseRecord>,
    cursor: usize,
    failure: Option<PhaseFailure>,
}

impl<D: ?Sized> RunState<'_, D> {
    fn visit(
        &mut self,
        phase: &Phase<D>,
        parent: &str,
        provided: &FlagSet,
        scope: Scope,
    ) -> Flow {
        let idx = self.cursor;
        self.cursor += 1;
        let path = join(parent, &phase.name);

        let excluded = scope.excluded || self.selection.excludes(&path);
        let included = scope.included || self.selection.includes(&path);
        let selected = included && !excluded;

        let locals = local_values(&phase.local_flags, self.flag_values);
        let child_provided = provided.clone().overlay(&locals);
        let child_scope = Scope { included, excluded };

        if excluded {
            debug!("Skipping phase {} (excluded)", path);
            self.finish(idx, PhaseState::Skipped, Some("excluded".to_string()));
            // Descend only to mark the subtree.
            for child in &phase.children {
                self.visit(child, &path, &child_provided, child_scope);
            }
            return Flow::Continue;
        }

        if let Some(action) = &phase.action {
            if selected {
                let flags = resolve_flags(provided, &phase.inherit_flags, &locals);
                if self.execute(idx, &path, action.as_ref(), &flags) == Flow::Abort {
                    return Flow::Abort;
                }
            } else {
                debug!("Skipping phase {} (not selected)", path);
                self.finish(idx, PhaseState::Skipped, Some("not selected".to_string()));
            }
        }

        let mut flow = Flow::Continue;
        for child in &phase.children {
            if self.visit(child, &path, &child_provided, child_scope) == Flow::Abort {
                flow = Flow::Abort;
                break;
            }
        }

        if phase.action.is_none() {
            let state = match (flow, selected) {
                (Flow::Abort, _) => PhaseState::Failed,
                (Flow::Continue, true) => PhaseState::Succeeded,
                (Flow::Continue, false) => PhaseState::Skipped,
            };
            self.finish(idx, state, None);
        }

        flow
    }

    fn execute(
        &mut self,
        idx: usize,
        path: &str,
        action: &dyn PhaseAction<D>,
        flags: &FlagSet,
    ) -> Flow {
        info!("Running phase {}", path);
        self.records[idx].state = PhaseState::Running;
        self.records[idx].started_at = Some(Utc::now());

        let ctx = PhaseContext {
            phase: path,
            data: self.data,
            flags,
        };
        match action.execute(&ctx) {
            Ok(PhaseOutcome::Completed) => {
                info!("Phase {} succeeded", path);
                self.finish(idx, PhaseState::Succeeded, None);
                Flow::Continue
            }
            Ok(PhaseOutcome::NotApplicable(reason)) => {
                info!("Phase {} not applicable: {}", path, reason);
                self.finish(idx, PhaseState::Succeeded, Some(reason));
                Flow::Continue
            }
            Err(e) => {
                error!("Phase {} failed: {}", path, e);
                self.finish(idx, PhaseState::Failed, Some(e.to_string()));
                self.failure = Some(PhaseFailure {
                    phase: path.to_string(),
                    error: e,
                });
                Flow::Abort
            }
        }
    }

    fn finish(&mut self, idx: usize, state: PhaseState, note: Option<String>) {
        let record = &mut self.records[idx];
        record.state = state;
        record.note = note;
        if record.started_at.is_some() {
            record.completed_at = Some(Utc::now());
        }
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Pre-order walk calling `f(phase, path, depth, hidden)`.
fn walk<D: ?Sized>(
    phases: &[Phase<D>],
    parent: &str,
    depth: usize,
    hidden: bool,
    f: &mut dyn FnMut(&Phase<D>, &str, usize, bool),
) {
    for phase in phases {
        let path = join(parent, &phase.name);
        let hidden = hidden || phase.hidden;
        f(phase, &path, depth, hidden);
        walk(&phase.children, &path, depth + 1, hidden, f);
    }
}

fn validate_level<D: ?Sized>(
    phases: &[Phase<D>],
    parent_path: &str,
    parent_name: &str,
    available: &HashSet<&str>,
) -> Result<(), KunError> {
    let mut seen = HashSet::new();
    for phase in phases {
        let name = phase.name.as_str();
        if name.is_empty() || name.contains('/') || name.chars().any(char::is_whitespace) {
            return Err(KunError::InvalidPhaseName(name.to_string()));
        }
        if !seen.insert(name) {
            return Err(KunError::DuplicatePhase {
                parent: parent_name.to_string(),
                name: name.to_string(),
            });
        }

        let path = join(parent_path, name);
        if let Some(flag) = phase
            .inherit_flags
            .iter()
            .find(|f| !available.contains(f.as_str()))
        {
            return Err(KunError::UnknownFlag {
                phase: path,
                flag: flag.clone(),
            });
        }

        let mut child_available = available.clone();
        child_available.extend(phase.local_flags.iter().map(|f| f.name.as_str()));
        validate_level(&phase.children, &path, &path, &child_available)?;
    }
    Ok(())
}
