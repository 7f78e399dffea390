//! Standalone re-verification of the invariants in §8, run against a
//! checkpoint file rather than a live kernel (the `check` subcommand).
//! A live kernel enforces these at write time; this module re-derives
//! them from the serialized snapshot so a checkpoint can be audited
//! without replaying the run that produced it.

use std::collections::{HashMap, HashSet};

use agency_kernel::artifact::Artifact;
use agency_kernel::{Checkpoint, KernelConfig};
use agency_shared::ContentDigest;

pub fn check(checkpoint: &Checkpoint) -> Vec<String> {
    let mut violations = Vec::new();
    let config = KernelConfig::default();
    let by_id: HashMap<&str, &Artifact> =
        checkpoint.artifacts.iter().map(|a| (a.id.as_str(), a)).collect();

    for artifact in &checkpoint.artifacts {
        if artifact.deleted {
            continue;
        }

        let expected = ContentDigest::compute(&[
            artifact.content.to_string().as_bytes(),
            artifact.code.as_bytes(),
        ]);
        if expected != artifact.content_digest {
            violations.push(format!("{}: content digest does not match content/code", artifact.id.as_str()));
        }

        for dep in &artifact.depends_on {
            if !by_id.contains_key(dep.as_str()) {
                violations.push(format!(
                    "{}: depends on missing artifact {}",
                    artifact.id.as_str(),
                    dep.as_str()
                ));
            }
        }

        if artifact.id.as_str().starts_with("right:") && artifact.kind != "right" {
            violations.push(format!(
                "{}: reserved right: id namespace used for type {}",
                artifact.id.as_str(),
                artifact.kind
            ));
        }
    }

    for artifact in &checkpoint.artifacts {
        if artifact.deleted {
            continue;
        }
        if let Some(cycle) = find_cycle(artifact.id.as_str(), &by_id) {
            violations.push(format!("dependency cycle involving {cycle}"));
        }
        let depth = dependency_depth(artifact.id.as_str(), &by_id, &mut HashSet::new());
        if depth > config.max_dependency_depth {
            violations.push(format!(
                "{}: dependency depth {} exceeds limit {}",
                artifact.id.as_str(),
                depth,
                config.max_dependency_depth
            ));
        }
    }

    violations
}

fn find_cycle(start: &str, by_id: &HashMap<&str, &Artifact>) -> Option<String> {
    let mut visited = HashSet::new();
    let mut stack = vec![start.to_string()];
    let mut path = Vec::new();
    fn visit(
        id: &str,
        by_id: &HashMap<&str, &Artifact>,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<String> {
        if path.contains(&id.to_string()) {
            return Some(id.to_string());
        }
        if visited.contains(id) {
            return None;
        }
        visited.insert(id.to_string());
        path.push(id.to_string());
        if let Some(artifact) = by_id.get(id) {
            for dep in &artifact.depends_on {
                if let Some(found) = visit(dep.as_str(), by_id, visited, path) {
                    return Some(found);
                }
            }
        }
        path.pop();
        None
    }
    let _ = &mut stack;
    visit(start, by_id, &mut visited, &mut path)
}

fn dependency_depth(id: &str, by_id: &HashMap<&str, &Artifact>, seen: &mut HashSet<String>) -> u32 {
    if !seen.insert(id.to_string()) {
        return 0;
    }
    match by_id.get(id) {
        Some(artifact) if !artifact.depends_on.is_empty() => artifact
            .depends_on
            .iter()
            .map(|dep| 1 + dependency_depth(dep.as_str(), by_id, seen))
            .max()
            .unwrap_or(0),
        _ => 0,
    }
}
