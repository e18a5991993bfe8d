//! # Systems
//!
//! A system is a named unit of per-frame work. Its [`SystemDescriptor`]
//! carries the phase and ordering hints; the work itself is anything
//! implementing [`System`], closures included.

use std::error::Error;

use parking_lot::RwLock;
use tessera_core::Store;

/// Error type systems report failures with.
pub type SystemError = Box<dyn Error + Send + Sync>;

/// Result returned by a system run.
pub type SystemResult = Result<(), SystemError>;

/// Frame counter and fixed time step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameInfo {
    /// Frame number. The first frame is 1.
    pub count: u64,
    /// Fixed time step in seconds.
    pub delta_time: f64,
}

/// What a system sees while it runs.
pub struct SystemContext<'a> {
    /// Shared store. Systems of one phase must not write the same data.
    pub store: &'a RwLock<Store>,
    /// Current frame.
    pub frame: FrameInfo,
}

/// Per-frame work.
pub trait System: Send + Sync {
    /// Runs the system once for the current frame.
    ///
    /// # Errors
    ///
    /// Any error stops the frame after the current phase completes.
    fn run(&self, ctx: &SystemContext<'_>) -> SystemResult;
}

impl<F> System for F
where
    F: Fn(&SystemContext<'_>) -> SystemResult + Send + Sync,
{
    fn run(&self, ctx: &SystemContext<'_>) -> SystemResult {
        self(ctx)
    }
}

/// Name, phase and ordering hints of a system.
///
/// ```rust,ignore
/// let integrate = SystemDescriptor::new("integrate").in_phase(phase::PHYSICS);
/// let upload = SystemDescriptor::new("upload").after(["integrate"]).requires(["device"]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemDescriptor {
    /// Unique system name.
    pub name: String,
    /// Explicit phase, if any.
    pub phase: Option<String>,
    /// Systems that must finish first.
    pub after: Vec<String>,
    /// Systems that must start later.
    pub before: Vec<String>,
    /// Systems whose phase this one shares.
    pub during: Vec<String>,
    /// Resources that must be assigned for the system to run.
    pub requires: Vec<String>,
}

impl SystemDescriptor {
    /// Creates a descriptor with no phase and no hints.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the phase explicitly.
    #[must_use]
    pub fn in_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    /// Adds systems this one runs after.
    #[must_use]
    pub fn after<I, S>(mut self, systems: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after.extend(systems.into_iter().map(Into::into));
        self
    }

    /// Adds systems this one runs before.
    #[must_use]
    pub fn before<I, S>(mut self, systems: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.before.extend(systems.into_iter().map(Into::into));
        self
    }

    /// Adds systems this one shares a phase with.
    #[must_use]
    pub fn during<I, S>(mut self, systems: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.during.extend(systems.into_iter().map(Into::into));
        self
    }

    /// Adds resources the system needs.
    #[must_use]
    pub fn requires<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(resources.into_iter().map(Into::into));
        self
    }

    /// Every system named by an ordering hint.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.after
            .iter()
            .chain(&self.before)
            .chain(&self.during)
            .map(String::as_str)
    }
}
