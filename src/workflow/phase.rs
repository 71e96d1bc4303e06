//! Phase tree nodes and the action contract.

use thiserror::Error;

use super::flags::{FlagSet, LocalFlag};

/// Successful result of a phase action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The action did its work.
    Completed,
    /// The action decided there was nothing to do here (for example the
    /// wrong node role). Counts as success.
    NotApplicable(String),
}

impl PhaseOutcome {
    pub fn not_applicable(reason: impl Into<String>) -> Self {
        Self::NotApplicable(reason.into())
    }
}

/// Failure reported by a phase action.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct PhaseError {
    message: String,
    retryable: bool,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl PhaseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            source: None,
        }
    }

    /// Wrap an underlying error with a message describing what failed.
    ///
    /// Accepts any `std::error::Error` as well as `anyhow::Error`; the
    /// source chain stays walkable through `source()`.
    pub fn wrap<E>(message: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self {
            message: message.into(),
            retryable: false,
            source: Some(source.into()),
        }
    }

    /// Mark the failure as safe to retry. Informational only; the runner
    /// never retries.
    #[must_use]
    pub const fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub const fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// What an action sees while it runs.
pub struct PhaseContext<'a, D: ?Sized> {
    /// Path of the running phase, e.g. `addon/coredns`.
    pub phase: &'a str,
    /// Shared run data for the whole invocation.
    pub data: &'a D,
    /// Flags this phase inherited or owns locally.
    pub flags: &'a FlagSet,
}

/// Executable body of a phase.
pub trait PhaseAction<D: ?Sized> {
    fn execute(&self, ctx: &PhaseContext<'_, D>) -> Result<PhaseOutcome, PhaseError>;
}

impl<D, F> PhaseAction<D> for F
where
    D: ?Sized,
    F: Fn(&PhaseContext<'_, D>) -> Result<PhaseOutcome, PhaseError>,
{
    fn execute(&self, ctx: &PhaseContext<'_, D>) -> Result<PhaseOutcome, PhaseError> {
        self(ctx)
    }
}

/// A node in the phase tree.
pub struct Phase<D: ?Sized> {
    pub(crate) name: String,
    pub(crate) short: String,
    pub(crate) hidden: bool,
    pub(crate) inherit_flags: Vec<String>,
    pub(crate) local_flags: Vec<LocalFlag>,
    pub(crate) action: Option<Box<dyn PhaseAction<D>>>,
    pub(crate) children: Vec<Phase<D>>,
}

impl<D: ?Sized> Phase<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            short: String::new(),
            hidden: false,
            inherit_flags: Vec::new(),
            local_flags: Vec::new(),
            action: None,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn short(mut self, short: impl Into<String>) -> Self {
        self.short = short.into();
        self
    }

    /// Hide the phase (and its subtree) from listings. It still runs.
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Declare flags taken from the nearest ancestor that provides them.
    /// Duplicates are ignored; declaration order is kept.
    #[must_use]
    pub fn inherit_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for flag in flags {
            let flag = flag.into();
            if !self.inherit_flags.contains(&flag) {
                self.inherit_flags.push(flag);
            }
        }
        self
    }

    /// Declare a flag owned by this phase.
    #[must_use]
    pub fn local_flag(mut self, name: impl Into<String>, default: impl Into<String>) -> Self {
        let name = name.into();
        self.local_flags.retain(|f| f.name != name);
        self.local_flags.push(LocalFlag {
            name,
            default: default.into(),
        });
        self
    }

    #[must_use]
    pub fn run<A>(mut self, action: A) -> Self
    where
        A: PhaseAction<D> + 'static,
    {
        self.action = Some(Box::new(action));
        self
    }

    /// Like [`Phase::run`], with the closure signature spelled out so
    /// closures infer their argument type.
    #[must_use]
    pub fn run_fn<F>(self, action: F) -> Self
    where
        F: Fn(&PhaseContext<'_, D>) -> Result<PhaseOutcome, PhaseError> + 'static,
    {
        self.run(action)
    }

    #[must_use]
    pub fn child(mut self, phase: Self) -> Self {
        self.children.push(phase);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn short_description(&self) -> &str {
        &self.short
    }

    pub const fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub const fn has_action(&self) -> bool {
        self.action.is_some()
    }

    pub fn inherited_flags(&self) -> &[String] {
        &self.inherit_flags
    }

    pub fn local_flags(&self) -> &[LocalFlag] {
        &self.local_flags
    }

    pub fn children(&self) -> &[Self] {
        &self.children
    }
}

impl<D: ?Sized> std::fmt::Debug for Phase<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("hidden", &self.hidden)
            .field("inherit_flags", &self.inherit_flags)
            .field("local_flags", &self.local_flags)
            .field("has_action", &self.action.is_some())
            .field("children", &self.children)
            .finish()
    }
}
