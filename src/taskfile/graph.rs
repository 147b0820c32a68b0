//! Static dependency graph checks
//!
//! Cycle detection runs once, before any command executes, so a cyclic
//! configuration fails fast with zero side effects.

use crate::taskfile::Tasks;
use std::collections::HashSet;

/// Find a dependency cycle, if one exists
///
/// Returns the participating task names in traversal order, ending with the
/// task that closed the cycle. The visiting set is scoped to the current
/// path and cleared on backtrack, so diamond-shaped graphs are not flagged.
pub fn find_cycle(tasks: &Tasks) -> Option<Vec<String>> {
    let mut names: Vec<&String> = tasks.keys().collect();
    names.sort();

    for name in names {
        let mut path = Vec::new();
        let mut on_stack = HashSet::new();
        if let Some(cycle) = visit(tasks, name, &mut path, &mut on_stack) {
            return Some(cycle);
        }
    }
    None
}

/// Check whether the task set contains a dependency cycle
pub fn has_cycle(tasks: &Tasks) -> bool {
    find_cycle(tasks).is_some()
}

fn visit(
    tasks: &Tasks,
    name: &str,
    path: &mut Vec<String>,
    on_stack: &mut HashSet<String>,
) -> Option<Vec<String>> {
    if on_stack.contains(name) {
        let start = path.iter().position(|n| n == name).unwrap_or(0);
        let mut cycle = path[start..].to_vec();
        cycle.push(name.to_string());
        return Some(cycle);
    }

    // Unknown dependency names are resolved (and reported) at run time.
    let task = tasks.get(name)?;

    on_stack.insert(name.to_string());
    path.push(name.to_string());

    for dep in &task.deps {
        if let Some(cycle) = visit(tasks, dep.name(), path, on_stack) {
            return Some(cycle);
        }
    }

    path.pop();
    on_stack.remove(name);
    None
}
