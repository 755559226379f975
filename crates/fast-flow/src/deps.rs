//! Dependency inference from template tags.

use crate::error::ConfigError;
use crate::template::{is_reserved, tag_names};
use fast_protocol::Step;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Step ids `step` must wait for.
///
/// Collects every tag from the step's templatable fields and keeps the ones
/// naming a known step. Ambient tags and unknown names never block.
pub fn blocking_deps(step: &Step, known: &HashSet<String>) -> BTreeSet<String> {
    step.templatable_fields()
        .into_iter()
        .flat_map(tag_names)
        .filter(|name| !is_reserved(name) && known.contains(*name))
        .map(str::to_string)
        .collect()
}

/// Reject self-references and cycles in a dependency graph.
pub fn check_acyclic(graph: &BTreeMap<String, BTreeSet<String>>) -> Result<(), ConfigError> {
    for (id, deps) in graph {
        if deps.contains(id) {
            return Err(ConfigError::SelfReference(id.clone()));
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        id: &str,
        graph: &BTreeMap<String, BTreeSet<String>>,
        marks: &mut BTreeMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Result<(), ConfigError> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|p| p == id).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(id.to_string());
                return Err(ConfigError::Cycle(cycle));
            }
            None => {}
        }

        marks.insert(id.to_string(), Mark::Visiting);
        path.push(id.to_string());
        if let Some(deps) = graph.get(id) {
            for dep in deps {
                visit(dep, graph, marks, path)?;
            }
        }
        path.pop();
        marks.insert(id.to_string(), Mark::Done);
        Ok(())
    }

    let mut marks = BTreeMap::new();
    let mut path = Vec::new();
    for id in graph.keys() {
        visit(id, graph, &mut marks, &mut path)?;
    }
    Ok(())
}
