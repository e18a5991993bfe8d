//! # Schedule
//!
//! Systems are registered on a [`ScheduleBuilder`], resolved once into a
//! plan, and then driven frame by frame by the [`Scheduler`].
//!
//! ## Frame
//!
//! 1. Advance the frame counter
//! 2. Run every phase in order. A phase is finished only when all of its
//!    systems have returned
//! 3. Inside a phase, waves run in order and the members of a wave run on
//!    scoped threads
//!
//! A failing system does not interrupt its phase, but systems ordered after
//! it (through `after` or its `before` list, transitively) are skipped for
//! the rest of the frame. The same holds for a system skipped because a
//! required resource is unassigned. The frame stops after a failing phase
//! and the first failure (registration order) is returned.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::RwLock;
use tessera_core::{SchemaViolation, Store, StoreError};

use crate::config::SchedulerConfig;
use crate::error::{ScheduleError, ScheduleResult};
use crate::plan::{self, PhasePlan};
use crate::system::{FrameInfo, System, SystemContext, SystemDescriptor, SystemResult};

struct Entry {
    descriptor: SystemDescriptor,
    system: Box<dyn System>,
}

// =============================================================================
// Builder
// =============================================================================

/// Collects systems before the plan is resolved.
pub struct ScheduleBuilder {
    store: Arc<RwLock<Store>>,
    config: SchedulerConfig,
    entries: Vec<Entry>,
}

impl ScheduleBuilder {
    /// Creates a builder over a shared store with the default configuration.
    #[must_use]
    pub fn new(store: Arc<RwLock<Store>>) -> Self {
        Self {
            store,
            config: SchedulerConfig::default(),
            entries: Vec::new(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a system. Registration order breaks ordering ties.
    pub fn add_system(
        &mut self,
        descriptor: SystemDescriptor,
        system: impl System + 'static,
    ) -> &mut Self {
        self.entries.push(Entry {
            descriptor,
            system: Box::new(system),
        });
        self
    }

    /// Number of registered systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no system is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validates the configuration and resolves the plan.
    ///
    /// # Errors
    ///
    /// Invalid configuration, any ordering error from plan resolution, or a
    /// required resource the store never declared.
    pub fn build(self) -> ScheduleResult<Scheduler> {
        self.config.validate()?;

        {
            let store = self.store.read();
            for entry in &self.entries {
                if let Some(missing) = entry
                    .descriptor
                    .requires
                    .iter()
                    .find(|r| !store.resources().contains(r))
                {
                    return Err(StoreError::from(SchemaViolation::UnknownResource(
                        missing.clone(),
                    ))
                    .into());
                }
            }
        }

        let descriptors: Vec<SystemDescriptor> =
            self.entries.iter().map(|e| e.descriptor.clone()).collect();
        let plan = plan::resolve(&self.config.phases, &descriptors)?;

        tracing::debug!(
            "Schedule built: {} systems in {} phases",
            self.entries.len(),
            plan.iter().filter(|p| !p.is_empty()).count()
        );

        Ok(Scheduler {
            store: self.store,
            config: self.config,
            systems: self.entries,
            plan,
            frame: 0,
        })
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// A resolved schedule over a shared store.
pub struct Scheduler {
    store: Arc<RwLock<Store>>,
    config: SchedulerConfig,
    systems: Vec<Entry>,
    plan: Vec<PhasePlan>,
    frame: u64,
}

impl Scheduler {
    /// Runs one full frame.
    ///
    /// # Returns
    ///
    /// The frame that ran.
    ///
    /// # Errors
    ///
    /// The first system failure of the earliest failing phase. Later phases
    /// of the frame do not run.
    pub fn run_frame(&mut self) -> ScheduleResult<FrameInfo> {
        let frame = self.advance();
        let start = Instant::now();
        let mut blocked = vec![false; self.systems.len()];

        for phase in &self.plan {
            self.run_phase(phase, frame, &mut blocked)?;
        }

        if self.config.log_frame_timing {
            tracing::debug!(
                "Frame {} completed in {}us",
                frame.count,
                start.elapsed().as_micros()
            );
        }
        Ok(frame)
    }

    /// Runs one frame restricted to the named phases, still in plan order.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::InvalidConfig`] for an unknown phase name, otherwise
    /// as [`Scheduler::run_frame`].
    pub fn run_phases(&mut self, phases: &[&str]) -> ScheduleResult<FrameInfo> {
        if let Some(unknown) = phases
            .iter()
            .find(|name| !self.plan.iter().any(|p| p.name() == **name))
        {
            return Err(ScheduleError::InvalidConfig(format!("unknown phase {unknown}")));
        }

        let frame = self.advance();
        let mut blocked = vec![false; self.systems.len()];
        for phase in self.plan.iter().filter(|p| phases.contains(&p.name())) {
            self.run_phase(phase, frame, &mut blocked)?;
        }
        Ok(frame)
    }

    /// Frames started so far.
    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Resolved plan, one entry per configured phase.
    #[must_use]
    pub fn plan(&self) -> &[PhasePlan] {
        &self.plan
    }

    /// System names in the order one frame starts them.
    #[must_use]
    pub fn execution_order(&self) -> Vec<&str> {
        self.plan
            .iter()
            .flat_map(PhasePlan::systems)
            .map(|i| self.systems[i].descriptor.name.as_str())
            .collect()
    }

    /// Name of the phase a system was placed in.
    #[must_use]
    pub fn phase_of(&self, system: &str) -> Option<&str> {
        let index = self
            .systems
            .iter()
            .position(|e| e.descriptor.name == system)?;
        self.plan
            .iter()
            .find(|p| p.systems().any(|i| i == index))
            .map(PhasePlan::name)
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Shared store.
    #[must_use]
    pub const fn store(&self) -> &Arc<RwLock<Store>> {
        &self.store
    }

    fn advance(&mut self) -> FrameInfo {
        self.frame += 1;
        FrameInfo {
            count: self.frame,
            delta_time: self.config.delta_time(),
        }
    }

    /// Runs one phase. `blocked` marks systems that failed or were skipped
    /// earlier in the frame; it is extended with this phase's.
    fn run_phase(&self, phase: &PhasePlan, frame: FrameInfo, blocked: &mut [bool]) -> ScheduleResult<()> {
        let ctx = SystemContext {
            store: &self.store,
            frame,
        };
        let mut first_failure: Option<(usize, ScheduleError)> = None;

        for wave in phase.waves() {
            let ready = self.ready(wave, frame, blocked);
            let outcomes = if self.config.parallel && ready.len() > 1 {
                self.run_concurrent(&ready, &ctx)
            } else {
                self.run_sequential(&ready, &ctx)
            };

            for (index, outcome) in outcomes {
                if let Err(err) = outcome {
                    blocked[index] = true;
                    tracing::warn!(
                        "Frame {} phase {}: {}",
                        frame.count,
                        phase.name(),
                        err
                    );
                    if first_failure.as_ref().map_or(true, |(i, _)| index < *i) {
                        first_failure = Some((index, err));
                    }
                }
            }
        }

        match first_failure {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }

    /// Systems of a wave whose required resources are assigned and whose
    /// predecessors all ran. Systems left out are marked in `blocked`.
    fn ready(&self, wave: &[usize], frame: FrameInfo, blocked: &mut [bool]) -> Vec<usize> {
        let store = self.store.read();
        let mut ready = Vec::with_capacity(wave.len());
        for &i in wave {
            let descriptor = &self.systems[i].descriptor;
            if let Some(predecessor) = self.blocked_predecessor(i, blocked) {
                tracing::trace!(
                    "Skipping system {} in frame {}: {} did not run",
                    descriptor.name,
                    frame.count,
                    predecessor
                );
                blocked[i] = true;
                continue;
            }
            let missing = descriptor
                .requires
                .iter()
                .find(|r| !store.resources().is_assigned(r));
            if let Some(resource) = missing {
                tracing::trace!(
                    "Skipping system {} in frame {}: resource {} not assigned",
                    descriptor.name,
                    frame.count,
                    resource
                );
                blocked[i] = true;
                continue;
            }
            ready.push(i);
        }
        ready
    }

    /// Name of a blocked system that `index` is ordered after, if any.
    fn blocked_predecessor(&self, index: usize, blocked: &[bool]) -> Option<&str> {
        let name = &self.systems[index].descriptor.name;
        let after = &self.systems[index].descriptor.after;
        self.systems
            .iter()
            .zip(blocked)
            .filter(|(_, is_blocked)| **is_blocked)
            .map(|(entry, _)| &entry.descriptor)
            .find(|d| after.contains(&d.name) || d.before.contains(name))
            .map(|d| d.name.as_str())
    }

    fn run_sequential(
        &self,
        ready: &[usize],
        ctx: &SystemContext<'_>,
    ) -> Vec<(usize, ScheduleResult<()>)> {
        ready
            .iter()
            .map(|&i| {
                let system = &self.systems[i].system;
                let result = catch_unwind(AssertUnwindSafe(|| system.run(ctx)));
                (i, self.outcome(i, result.map_err(|_| ())))
            })
            .collect()
    }

    fn run_concurrent(
        &self,
        ready: &[usize],
        ctx: &SystemContext<'_>,
    ) -> Vec<(usize, ScheduleResult<()>)> {
        thread::scope(|scope| {
            let handles: Vec<_> = ready
                .iter()
                .map(|&i| {
                    let system = &self.systems[i].system;
                    (i, scope.spawn(move || system.run(ctx)))
                })
                .collect();

            handles
                .into_iter()
                .map(|(i, handle)| (i, self.outcome(i, handle.join().map_err(|_| ()))))
                .collect()
        })
    }

    fn outcome(&self, index: usize, joined: Result<SystemResult, ()>) -> ScheduleResult<()> {
        let name = &self.systems[index].descriptor.name;
        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(ScheduleError::SystemFailed {
                system: name.clone(),
                message: err.to_string(),
            }),
            Err(()) => Err(ScheduleError::SystemPanicked(name.clone())),
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("frame", &self.frame)
            .field("config", &self.config)
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase;
    use parking_lot::Mutex;
    use tessera_core::{SchemaFragment, Value};

    fn shared_store() -> Arc<RwLock<Store>> {
        let schema = SchemaFragment::new()
            .with_resource("device", Value::Undefined)
            .with_resource("ticks", Value::U32(0));
        Arc::new(RwLock::new(Store::new(schema).unwrap()))
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> impl System + 'static {
        let log = Arc::clone(log);
        move |_: &SystemContext<'_>| -> SystemResult {
            log.lock().push(name.to_owned());
            Ok(())
        }
    }

    #[test]
    fn test_frame_runs_phases_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = ScheduleBuilder::new(shared_store());
        builder
            .add_system(SystemDescriptor::new("draw").in_phase(phase::RENDER), recorder(&log, "draw"))
            .add_system(SystemDescriptor::new("poll").in_phase(phase::INPUT), recorder(&log, "poll"))
            .add_system(SystemDescriptor::new("step").after(["poll"]).in_phase(phase::UPDATE), recorder(&log, "step"));
        let mut scheduler = builder.build().unwrap();

        let frame = scheduler.run_frame().unwrap();
        assert_eq!(frame.count, 1);
        assert_eq!(*log.lock(), ["poll", "step", "draw"]);
        assert_eq!(scheduler.execution_order(), ["poll", "step", "draw"]);
        assert_eq!(scheduler.phase_of("step"), Some(phase::UPDATE));

        scheduler.run_frame().unwrap();
        assert_eq!(scheduler.frame_count(), 2);
        assert_eq!(log.lock().len(), 6);
    }

    #[test]
    fn test_systems_write_through_store() {
        let mut builder = ScheduleBuilder::new(shared_store());
        builder.add_system(
            SystemDescriptor::new("count").in_phase(phase::UPDATE),
            |ctx: &SystemContext<'_>| -> SystemResult {
                let mut store = ctx.store.write();
                let ticks = store.resource("ticks")?.as_u32().unwrap_or(0);
                store.set_resource("ticks", Value::U32(ticks + 1))?;
                Ok(())
            },
        );
        let mut scheduler = builder.build().unwrap();
        for _ in 0..3 {
            scheduler.run_frame().unwrap();
        }
        assert_eq!(scheduler.store().read().resource("ticks"), Ok(&Value::U32(3)));
    }

    #[test]
    fn test_unassigned_resource_skips_system() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = ScheduleBuilder::new(shared_store());
        builder
            .add_system(
                SystemDescriptor::new("upload").in_phase(phase::PRE_RENDER).requires(["device"]),
                recorder(&log, "upload"),
            )
            .add_system(SystemDescriptor::new("draw").in_phase(phase::RENDER), recorder(&log, "draw"));
        let mut scheduler = builder.build().unwrap();

        scheduler.run_frame().unwrap();
        assert_eq!(*log.lock(), ["draw"]);

        scheduler
            .store()
            .write()
            .set_resource("device", Value::Handle(7))
            .unwrap();
        scheduler.run_frame().unwrap();
        assert_eq!(*log.lock(), ["draw", "upload", "draw"]);
    }

    #[test]
    fn test_undeclared_requirement_fails_build() {
        let mut builder = ScheduleBuilder::new(shared_store());
        builder.add_system(
            SystemDescriptor::new("upload").in_phase(phase::RENDER).requires(["gpu"]),
            |_: &SystemContext<'_>| -> SystemResult { Ok(()) },
        );
        assert!(matches!(
            builder.build(),
            Err(ScheduleError::Store(StoreError::Schema(SchemaViolation::UnknownResource(r)))) if r == "gpu"
        ));
    }

    #[test]
    fn test_failure_finishes_phase_and_stops_frame() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = ScheduleBuilder::new(shared_store());
        builder
            .add_system(
                SystemDescriptor::new("broken").in_phase(phase::UPDATE),
                |_: &SystemContext<'_>| -> SystemResult { Err("out of fuel".into()) },
            )
            .add_system(SystemDescriptor::new("sibling").in_phase(phase::UPDATE), recorder(&log, "sibling"))
            .add_system(SystemDescriptor::new("draw").in_phase(phase::RENDER), recorder(&log, "draw"));
        let mut scheduler = builder.build().unwrap();

        let err = scheduler.run_frame().unwrap_err();
        assert_eq!(
            err,
            ScheduleError::SystemFailed {
                system: "broken".into(),
                message: "out of fuel".into()
            }
        );
        assert_eq!(*log.lock(), ["sibling"]);
    }

    #[test]
    fn test_dependents_of_failed_system_are_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = ScheduleBuilder::new(shared_store());
        builder
            .add_system(
                SystemDescriptor::new("broken").in_phase(phase::UPDATE),
                |_: &SystemContext<'_>| -> SystemResult { Err("out of fuel".into()) },
            )
            .add_system(
                SystemDescriptor::new("consume").in_phase(phase::UPDATE).after(["broken"]),
                recorder(&log, "consume"),
            )
            .add_system(
                SystemDescriptor::new("report").in_phase(phase::UPDATE).after(["consume"]),
                recorder(&log, "report"),
            )
            .add_system(
                SystemDescriptor::new("prepare").in_phase(phase::UPDATE).before(["report"]),
                recorder(&log, "prepare"),
            )
            .add_system(SystemDescriptor::new("sibling").in_phase(phase::UPDATE), recorder(&log, "sibling"));
        let mut scheduler = builder.build().unwrap();

        assert!(matches!(
            scheduler.run_frame(),
            Err(ScheduleError::SystemFailed { system, .. }) if system == "broken"
        ));
        let mut ran = log.lock().clone();
        ran.sort();
        assert_eq!(ran, ["prepare", "sibling"]);
    }

    #[test]
    fn test_dependents_of_skipped_system_are_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = ScheduleBuilder::new(shared_store());
        builder
            .add_system(
                SystemDescriptor::new("upload").in_phase(phase::PRE_RENDER).requires(["device"]),
                recorder(&log, "upload"),
            )
            .add_system(
                SystemDescriptor::new("present").in_phase(phase::RENDER).after(["upload"]),
                recorder(&log, "present"),
            )
            .add_system(
                SystemDescriptor::new("cull").in_phase(phase::PRE_RENDER).before(["upload"]),
                recorder(&log, "cull"),
            );
        let mut scheduler = builder.build().unwrap();

        scheduler.run_frame().unwrap();
        assert_eq!(*log.lock(), ["cull"]);

        scheduler
            .store()
            .write()
            .set_resource("device", Value::Handle(1))
            .unwrap();
        scheduler.run_frame().unwrap();
        assert_eq!(*log.lock(), ["cull", "cull", "upload", "present"]);
    }

    #[test]
    fn test_panicking_system_is_reported() {
        for parallel in [true, false] {
            let config = SchedulerConfig {
                parallel,
                ..SchedulerConfig::default()
            };
            let mut builder = ScheduleBuilder::new(shared_store()).with_config(config);
            builder
                .add_system(
                    SystemDescriptor::new("explode").in_phase(phase::UPDATE),
                    |_: &SystemContext<'_>| -> SystemResult { panic!("boom") },
                )
                .add_system(
                    SystemDescriptor::new("calm").in_phase(phase::UPDATE),
                    |_: &SystemContext<'_>| -> SystemResult { Ok(()) },
                );
            let mut scheduler = builder.build().unwrap();
            assert_eq!(
                scheduler.run_frame(),
                Err(ScheduleError::SystemPanicked("explode".into()))
            );
        }
    }

    #[test]
    fn test_run_selected_phases() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = ScheduleBuilder::new(shared_store());
        builder
            .add_system(SystemDescriptor::new("poll").in_phase(phase::INPUT), recorder(&log, "poll"))
            .add_system(SystemDescriptor::new("draw").in_phase(phase::RENDER), recorder(&log, "draw"));
        let mut scheduler = builder.build().unwrap();

        scheduler.run_phases(&[phase::RENDER]).unwrap();
        assert_eq!(*log.lock(), ["draw"]);
        assert!(matches!(
            scheduler.run_phases(&["teardown"]),
            Err(ScheduleError::InvalidConfig(_))
        ));
    }
}
