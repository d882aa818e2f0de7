//! Module dependency resolution
//!
//! Computes the order modules are enabled in: dependencies before dependents,
//! higher priority first where the graph leaves a choice.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::module::registry::descriptor::Descriptor;

/// Dependency resolution result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyResolution {
    /// Module ids in enable order (dependencies first)
    pub load_order: Vec<String>,
    /// `(dependent, dependency)` pairs whose dependency was not in the input set
    pub missing: Vec<(String, String)>,
    /// Ids at which a dependency cycle was broken
    pub cycles: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Dependency resolver
pub struct DependencyResolver;

impl DependencyResolver {
    /// Resolve enable order for a set of descriptors
    ///
    /// Candidates are stably sorted by descending priority, then visited depth-first;
    /// each module is emitted after all of its in-set dependencies. A back-edge into a
    /// module still being visited is a cycle: it is logged and dropped, and resolution
    /// continues. Never fails.
    pub fn resolve(descriptors: &[Descriptor]) -> DependencyResolution {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(descriptors.len());
        let mut candidates: Vec<usize> = Vec::with_capacity(descriptors.len());
        for (i, descriptor) in descriptors.iter().enumerate() {
            if index.contains_key(descriptor.id.as_str()) {
                warn!(
                    "Duplicate module id {} in dependency resolution, ignoring later entry",
                    descriptor.id
                );
                continue;
            }
            index.insert(descriptor.id.as_str(), i);
            candidates.push(i);
        }

        // Stable: equal priorities keep input order
        candidates.sort_by(|a, b| descriptors[*b].priority.cmp(&descriptors[*a].priority));

        let mut missing = Vec::new();
        let mut edges: HashMap<usize, Vec<usize>> = HashMap::with_capacity(candidates.len());
        for &i in &candidates {
            let descriptor = &descriptors[i];
            let mut deps = Vec::new();
            for dep in descriptor.declared_dependencies() {
                match index.get(dep) {
                    Some(&j) => deps.push(j),
                    None => missing.push((descriptor.id.clone(), dep.to_string())),
                }
            }
            edges.insert(i, deps);
        }

        let mut marks = vec![Mark::Unvisited; descriptors.len()];
        let mut load_order = Vec::with_capacity(candidates.len());
        let mut cycles = Vec::new();

        for &start in &candidates {
            if marks[start] != Mark::Unvisited {
                continue;
            }

            marks[start] = Mark::Visiting;
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

            while let Some((node, next)) = stack.last_mut() {
                let node = *node;
                let deps = &edges[&node];

                if *next < deps.len() {
                    let dep = deps[*next];
                    *next += 1;
                    match marks[dep] {
                        Mark::Unvisited => {
                            marks[dep] = Mark::Visiting;
                            stack.push((dep, 0));
                        }
                        Mark::Visiting => {
                            warn!(
                                "Dependency cycle detected at module {} (via {}), dropping edge",
                                descriptors[dep].id, descriptors[node].id
                            );
                            cycles.push(descriptors[dep].id.clone());
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    load_order.push(descriptors[node].id.clone());
                    stack.pop();
                }
            }
        }

        debug!("Dependency resolution complete: {:?}", load_order);

        DependencyResolution {
            load_order,
            missing,
            cycles,
        }
    }
}
