//! # Tessera
//!
//! Phased frame scheduler over a shared [`tessera_core::Store`].
//!
//! - Systems declare a phase, or derive one from `after`/`before`/`during` hints
//! - The plan is resolved once; ordering mistakes are build errors
//! - Each frame runs the phases in order. Independent systems of one phase
//!   run concurrently and are joined before the next phase starts
//! - Systems needing an unassigned resource are skipped for that frame
//! - [`SchedulerService`] drives frames from a [`FrameTrigger`] on its own thread
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use parking_lot::RwLock;
//! use tessera::{phase, FrameClock, ScheduleBuilder, SchedulerService, SystemDescriptor};
//!
//! let mut builder = ScheduleBuilder::new(Arc::new(RwLock::new(store)));
//! builder
//!     .add_system(SystemDescriptor::new("integrate").in_phase(phase::PHYSICS), integrate)
//!     .add_system(SystemDescriptor::new("upload").after(["integrate"]), upload);
//! let scheduler = builder.build()?;
//!
//! let service = SchedulerService::start(scheduler, FrameClock::new(60))?;
//! // ...
//! let scheduler = service.stop()?.into_result()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod error;
pub mod phase;
pub mod plan;
pub mod schedule;
pub mod service;
pub mod system;

pub use clock::{ChannelTrigger, FrameClock, FrameStats, FrameTrigger};
pub use config::SchedulerConfig;
pub use error::{ScheduleError, ScheduleResult};
pub use phase::DEFAULT_PHASES;
pub use plan::PhasePlan;
pub use schedule::{ScheduleBuilder, Scheduler};
pub use service::{SchedulerService, StoppedService};
pub use system::{FrameInfo, System, SystemContext, SystemDescriptor, SystemError, SystemResult};
