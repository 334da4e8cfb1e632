//! Dependency resolution: load order from declared dependencies.
//!
//! Depth-first topological sort with visiting/visited marks. Roots and
//! dependencies are walked in ascending identifier order, so the same input
//! always produces the same order.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, warn};

use super::descriptor::UnitDescriptor;
use super::error::DependencyError;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Visited,
}

/// Load order plus the units that cannot be loaded.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadPlan {
    /// Loadable units, every dependency before its dependents.
    pub order: Vec<String>,
    /// Excluded units with the reason, ascending by identifier.
    #[serde(serialize_with = "serialize_rejected")]
    pub rejected: Vec<(String, DependencyError)>,
}

fn serialize_rejected<S: serde::Serializer>(
    rejected: &[(String, DependencyError)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(rejected.iter().map(|(id, err)| (id, err.to_string())))
}

impl LoadPlan {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    pub fn rejection(&self, id: &str) -> Option<&DependencyError> {
        self.rejected.iter().find(|(rejected, _)| rejected == id).map(|(_, err)| err)
    }
}

pub struct DependencyResolver;

impl DependencyResolver {
    /// Order every unit so dependencies come first.
    ///
    /// Fails with `Missing` when a dependency is not among `descriptors`, and
    /// with `Cycle` (carrying the closed path) when dependencies loop.
    pub fn resolve(descriptors: &[UnitDescriptor]) -> Result<Vec<String>, DependencyError> {
        let graph: BTreeMap<&str, &UnitDescriptor> = descriptors.iter().map(|d| (d.id(), d)).collect();

        for (id, descriptor) in &graph {
            if let Some(missing) = descriptor.dependencies().iter().find(|dep| !graph.contains_key(dep.as_str())) {
                return Err(DependencyError::Missing {
                    unit: id.to_string(),
                    dependency: missing.clone(),
                });
            }
        }

        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
        let mut stack: Vec<&str> = Vec::new();
        let mut order = Vec::with_capacity(graph.len());
        for &id in graph.keys() {
            if !marks.contains_key(id) {
                visit(id, &graph, &mut marks, &mut stack, &mut order)?;
            }
        }
        debug!(units = order.len(), "dependencies resolved");
        Ok(order)
    }

    /// Like [`resolve`](Self::resolve), but excludes bad units instead of
    /// failing. Units with a missing dependency or on a cycle are rejected,
    /// then everything depending on a rejected unit, transitively.
    pub fn plan(descriptors: &[UnitDescriptor]) -> LoadPlan {
        let known: BTreeSet<&str> = descriptors.iter().map(UnitDescriptor::id).collect();
        let mut rejected: BTreeMap<String, DependencyError> = BTreeMap::new();

        loop {
            // Propagate exclusions until nothing new is rejected.
            let mut changed = true;
            while changed {
                changed = false;
                for descriptor in descriptors {
                    if rejected.contains_key(descriptor.id()) {
                        continue;
                    }
                    let blocked = descriptor.dependencies().iter().find_map(|dep| {
                        if !known.contains(dep.as_str()) {
                            Some(DependencyError::Missing {
                                unit: descriptor.id().to_string(),
                                dependency: dep.clone(),
                            })
                        } else if rejected.contains_key(dep) {
                            Some(DependencyError::Blocked {
                                unit: descriptor.id().to_string(),
                                blocked_by: dep.clone(),
                            })
                        } else {
                            None
                        }
                    });
                    if let Some(err) = blocked {
                        rejected.insert(descriptor.id().to_string(), err);
                        changed = true;
                    }
                }
            }

            let remaining: Vec<UnitDescriptor> = descriptors
                .iter()
                .filter(|d| !rejected.contains_key(d.id()))
                .cloned()
                .collect();

            match Self::resolve(&remaining) {
                Ok(order) => {
                    for (id, err) in &rejected {
                        warn!(unit = %id, reason = %err, "unit excluded from load plan");
                    }
                    return LoadPlan {
                        order,
                        rejected: rejected.into_iter().collect(),
                    };
                }
                Err(DependencyError::Cycle { path }) => {
                    for id in &path {
                        rejected
                            .entry(id.clone())
                            .or_insert_with(|| DependencyError::Cycle { path: path.clone() });
                    }
                }
                Err(other) => {
                    // Unreachable after propagation, but never loop forever.
                    let Some(unit) = other.unit().map(str::to_string) else {
                        return LoadPlan {
                            order: Vec::new(),
                            rejected: rejected.into_iter().collect(),
                        };
                    };
                    rejected.insert(unit, other);
                }
            }
        }
    }

    /// Identifiers that depend on `id`, directly or transitively, ascending.
    pub fn dependents_of(descriptors: &[UnitDescriptor], id: &str) -> Vec<String> {
        let mut found: BTreeSet<String> = BTreeSet::new();
        let mut frontier = vec![id.to_string()];
        while let Some(current) = frontier.pop() {
            for descriptor in descriptors {
                if descriptor.depends_on(&current) && found.insert(descriptor.id().to_string()) {
                    frontier.push(descriptor.id().to_string());
                }
            }
        }
        found.remove(id);
        found.into_iter().collect()
    }
}

fn visit<'a>(
    id: &'a str,
    graph: &BTreeMap<&'a str, &'a UnitDescriptor>,
    marks: &mut BTreeMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
    order: &mut Vec<String>,
) -> Result<(), DependencyError> {
    marks.insert(id, Mark::Visiting);
    stack.push(id);

    if let Some(descriptor) = graph.get(id) {
        for dep in descriptor.dependencies() {
            let dep = dep.as_str();
            let Some((&dep, _)) = graph.get_key_value(dep) else {
                continue;
            };
            match marks.get(dep) {
                Some(Mark::Visited) => {}
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|s| *s == dep).unwrap_or(0);
                    let mut path: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                    path.push(dep.to_string());
                    return Err(DependencyError::Cycle { path });
                }
                None => visit(dep, graph, marks, stack, order)?,
            }
        }
    }

    stack.pop();
    marks.insert(id, Mark::Visited);
    order.push(id.to_string());
    Ok(())
}
