//! # Phases
//!
//! A frame runs its phases strictly in order. The default order:
//!
//! ```text
//! input → pre_update → update → post_update → physics
//!       → pre_render → render → post_render → cleanup
//! ```

/// Input sampling.
pub const INPUT: &str = "input";
/// Work that must see input before the main update.
pub const PRE_UPDATE: &str = "pre_update";
/// Main simulation update.
pub const UPDATE: &str = "update";
/// Work depending on the main update.
pub const POST_UPDATE: &str = "post_update";
/// Physics integration.
pub const PHYSICS: &str = "physics";
/// Render preparation (uploads, culling).
pub const PRE_RENDER: &str = "pre_render";
/// Draw submission.
pub const RENDER: &str = "render";
/// Work after draw submission.
pub const POST_RENDER: &str = "post_render";
/// End-of-frame cleanup.
pub const CLEANUP: &str = "cleanup";

/// Default phase order.
pub const DEFAULT_PHASES: [&str; 9] = [
    INPUT,
    PRE_UPDATE,
    UPDATE,
    POST_UPDATE,
    PHYSICS,
    PRE_RENDER,
    RENDER,
    POST_RENDER,
    CLEANUP,
];

/// Default phase order as owned names.
#[must_use]
pub fn default_phases() -> Vec<String> {
    DEFAULT_PHASES.iter().map(|p| (*p).to_owned()).collect()
}
