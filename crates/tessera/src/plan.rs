//! # Execution Plan
//!
//! Turns registered descriptors into a fixed plan, once, when the schedule
//! is built:
//!
//! 1. Every system gets a phase: its own, else the common phase of its
//!    `during` targets, else the latest phase among its `after` targets,
//!    else the earliest among its `before` targets.
//! 2. Hints may not point backwards across phases.
//! 3. Inside a phase, `after`/`before` edges are sorted into waves (Kahn
//!    levels). A wave only depends on earlier waves, so its members may run
//!    concurrently. Ties keep registration order.

use std::collections::HashMap;

use crate::error::{ScheduleError, ScheduleResult};
use crate::system::SystemDescriptor;

/// Systems of one phase, grouped into waves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhasePlan {
    name: String,
    waves: Vec<Vec<usize>>,
}

impl PhasePlan {
    /// Phase name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waves of system indices (registration order).
    #[must_use]
    pub fn waves(&self) -> &[Vec<usize>] {
        &self.waves
    }

    /// All systems of the phase in execution order.
    pub fn systems(&self) -> impl Iterator<Item = usize> + '_ {
        self.waves.iter().flatten().copied()
    }

    /// Returns true if no system landed in this phase.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }
}

#[derive(Clone, Copy)]
enum Mark {
    Unvisited,
    Visiting,
    Placed(usize),
}

struct Resolver<'a> {
    phases: &'a [String],
    systems: &'a [SystemDescriptor],
    index: HashMap<&'a str, usize>,
    marks: Vec<Mark>,
    path: Vec<usize>,
}

impl<'a> Resolver<'a> {
    fn new(phases: &'a [String], systems: &'a [SystemDescriptor]) -> ScheduleResult<Self> {
        let mut index = HashMap::with_capacity(systems.len());
        for (i, desc) in systems.iter().enumerate() {
            if index.insert(desc.name.as_str(), i).is_some() {
                return Err(ScheduleError::DuplicateSystem(desc.name.clone()));
            }
        }

        for desc in systems {
            if let Some(phase) = &desc.phase {
                if !phases.contains(phase) {
                    return Err(ScheduleError::UnknownPhase {
                        system: desc.name.clone(),
                        phase: phase.clone(),
                    });
                }
            }
            for reference in desc.references() {
                if !index.contains_key(reference) {
                    return Err(ScheduleError::UnknownSystem {
                        system: desc.name.clone(),
                        reference: reference.to_owned(),
                    });
                }
                if reference == desc.name {
                    return Err(ScheduleError::Cycle(vec![desc.name.clone()]));
                }
            }
        }

        Ok(Self {
            phases,
            systems,
            index,
            marks: vec![Mark::Unvisited; systems.len()],
            path: Vec::new(),
        })
    }

    fn target(&self, name: &str) -> usize {
        // references were checked in `new`
        self.index.get(name).copied().unwrap_or_default()
    }

    fn phase_of(&mut self, i: usize) -> ScheduleResult<usize> {
        match self.marks[i] {
            Mark::Placed(phase) => return Ok(phase),
            Mark::Visiting => {
                let start = self.path.iter().position(|&p| p == i).unwrap_or(0);
                return Err(ScheduleError::Cycle(
                    self.path[start..]
                        .iter()
                        .map(|&p| self.systems[p].name.clone())
                        .collect(),
                ));
            }
            Mark::Unvisited => {}
        }

        self.marks[i] = Mark::Visiting;
        self.path.push(i);
        let phase = self.derive_phase(i)?;
        self.path.pop();
        self.marks[i] = Mark::Placed(phase);
        Ok(phase)
    }

    fn derive_phase(&mut self, i: usize) -> ScheduleResult<usize> {
        let systems = self.systems;
        let desc = &systems[i];

        if let Some(phase) = &desc.phase {
            return Ok(self.phases.iter().position(|p| p == phase).unwrap_or(0));
        }

        if !desc.during.is_empty() {
            let mut shared = None;
            for name in &desc.during {
                let phase = self.phase_of(self.target(name))?;
                match shared {
                    None => shared = Some(phase),
                    Some(existing) if existing != phase => {
                        return Err(ScheduleError::Unsatisfiable {
                            system: desc.name.clone(),
                            reason: "during targets are in different phases".into(),
                        });
                    }
                    Some(_) => {}
                }
            }
            return shared.ok_or_else(|| ScheduleError::NoPhase(desc.name.clone()));
        }

        if !desc.after.is_empty() {
            let mut latest = 0;
            for name in &desc.after {
                latest = latest.max(self.phase_of(self.target(name))?);
            }
            return Ok(latest);
        }

        if !desc.before.is_empty() {
            let mut earliest = usize::MAX;
            for name in &desc.before {
                earliest = earliest.min(self.phase_of(self.target(name))?);
            }
            return Ok(earliest);
        }

        Err(ScheduleError::NoPhase(desc.name.clone()))
    }

    fn check_hints(&self, placed: &[usize]) -> ScheduleResult<()> {
        for (i, desc) in self.systems.iter().enumerate() {
            let own = placed[i];
            let fail = |reason: String| ScheduleError::Unsatisfiable {
                system: desc.name.clone(),
                reason,
            };
            for name in &desc.after {
                if placed[self.target(name)] > own {
                    return Err(fail(format!("runs after {name}, which is in a later phase")));
                }
            }
            for name in &desc.before {
                if placed[self.target(name)] < own {
                    return Err(fail(format!("runs before {name}, which is in an earlier phase")));
                }
            }
            for name in &desc.during {
                if placed[self.target(name)] != own {
                    return Err(fail(format!("runs during {name}, which is in another phase")));
                }
            }
        }
        Ok(())
    }

    /// Kahn levels over the members of one phase.
    fn waves(&self, members: &[usize], placed: &[usize]) -> ScheduleResult<Vec<Vec<usize>>> {
        let position: HashMap<usize, usize> =
            members.iter().enumerate().map(|(k, &i)| (i, k)).collect();
        let mut indegree = vec![0usize; members.len()];
        let mut successors = vec![Vec::new(); members.len()];

        for (k, &i) in members.iter().enumerate() {
            let desc = &self.systems[i];
            for name in &desc.after {
                if let Some(&from) = position.get(&self.target(name)) {
                    successors[from].push(k);
                    indegree[k] += 1;
                }
            }
            for name in &desc.before {
                if let Some(&to) = position.get(&self.target(name)) {
                    successors[k].push(to);
                    indegree[to] += 1;
                }
            }
        }

        let mut done = vec![false; members.len()];
        let mut remaining = members.len();
        let mut waves = Vec::new();
        while remaining > 0 {
            let wave: Vec<usize> = (0..members.len())
                .filter(|&k| !done[k] && indegree[k] == 0)
                .collect();
            if wave.is_empty() {
                let stuck = (0..members.len())
                    .filter(|&k| !done[k])
                    .map(|k| self.systems[members[k]].name.clone())
                    .collect();
                return Err(ScheduleError::Cycle(stuck));
            }
            for &k in &wave {
                done[k] = true;
                for &next in &successors[k] {
                    indegree[next] -= 1;
                }
            }
            remaining -= wave.len();
            waves.push(wave.into_iter().map(|k| members[k]).collect());
        }

        debug_assert!(members.iter().all(|&i| placed[i] == placed[members[0]]));
        Ok(waves)
    }
}

/// Resolves descriptors into one [`PhasePlan`] per phase, in phase order.
///
/// # Arguments
///
/// * `phases` - Phase names in execution order
/// * `systems` - Descriptors in registration order
///
/// # Errors
///
/// Duplicate or unknown names, unknown phases, systems with no derivable
/// phase, hints pointing backwards across phases, and cycles.
pub fn resolve(phases: &[String], systems: &[SystemDescriptor]) -> ScheduleResult<Vec<PhasePlan>> {
    let mut resolver = Resolver::new(phases, systems)?;

    let mut placed = Vec::with_capacity(systems.len());
    for i in 0..systems.len() {
        placed.push(resolver.phase_of(i)?);
    }
    resolver.check_hints(&placed)?;

    phases
        .iter()
        .enumerate()
        .map(|(p, name)| {
            let members: Vec<usize> = (0..systems.len()).filter(|&i| placed[i] == p).collect();
            let waves = if members.is_empty() {
                Vec::new()
            } else {
                resolver.waves(&members, &placed)?
            };
            Ok(PhasePlan {
                name: name.clone(),
                waves,
            })
        })
        .collect()
}
