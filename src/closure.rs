//! Dependency-closure propagation
//!
//! Grows the seed exclusion set to every package that mandatorily
//! requires an excluded package, and collects the version constraints
//! that surviving packages place on their dependencies. A package whose
//! mandatory dependency cannot be mirrored is itself unmirrorable, so
//! exclusion propagates upward through the dependency graph until a
//! fixpoint; constraints flow downward so "keep version X of Y" survives
//! recency pruning.
//!
//! Propagation runs as a work-list over a dependents adjacency map built
//! once per run, so each edge is visited O(1) times regardless of graph
//! depth.

use anyhow::Result;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, info};

use crate::blacklist;
use crate::config::RuleConfig;
use crate::store::Store;

/// A parsed mandatory dependency edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// The depending package.
    pub name: String,
    /// The required package.
    pub dependency: String,
    /// Raw version constraint, e.g. `>=1.0,<2.0`, when present.
    pub constraint: Option<String>,
}

/// The fixed output of propagation.
#[derive(Debug, Clone, Default)]
pub struct Closure {
    pub blacklist: HashSet<String>,
    /// dependency name -> raw constraints placed on it by kept packages
    pub conditions: HashMap<String, BTreeSet<String>>,
}

/// Parse one raw requirement spec into a mandatory edge.
///
/// Returns `None` for extras-only requirements (environment marker
/// naming an extra feature, or a bracketed extra-qualified dependency
/// name) and for strings that do not match the `name (constraint)`
/// shape. Malformed entries are a per-entry no-op, never an error.
pub fn parse_requirement(name: &str, spec: &str, pattern: &Regex) -> Option<Edge> {
    let mut parts = spec.splitn(2, ';');
    let clause = parts.next()?.trim();

    if let Some(marker) = parts.next() {
        let marker: String = marker.chars().filter(|c| !c.is_whitespace()).collect();
        if marker.contains("extra==") {
            return None;
        }
    }

    let captures = pattern.captures(clause)?;
    let dependency = captures.get(1)?.as_str().trim().to_string();
    if dependency.is_empty() || dependency.contains('[') {
        return None;
    }

    Some(Edge {
        name: name.to_string(),
        dependency,
        constraint: captures.get(2).map(|m| m.as_str().to_string()),
    })
}

/// Parse every recorded requirement spec into mandatory edges.
pub fn mandatory_edges(store: &Store) -> Result<Vec<Edge>> {
    // `name (constraint)` with the parenthesized constraint optional
    let pattern = Regex::new(r"^(.+?)(?:\s\((.+)\))?$").expect("static requirement pattern");

    let mut edges = Vec::new();
    for (name, spec) in store.requirement_edges()? {
        if let Some(edge) = parse_requirement(&name, &spec, &pattern) {
            edges.push(edge);
        }
    }
    Ok(edges)
}

/// Propagate the seed exclusion set through the edge list to a fixpoint,
/// then collect the version conditions that the surviving packages place
/// on surviving dependencies.
pub fn propagate(seed: &HashSet<String>, edges: &[Edge]) -> Closure {
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        dependents
            .entry(edge.dependency.as_str())
            .or_default()
            .push(edge.name.as_str());
    }

    let mut blacklist: HashSet<String> = seed.clone();
    let mut queue: VecDeque<String> = seed.iter().cloned().collect();

    while let Some(excluded) = queue.pop_front() {
        if let Some(names) = dependents.get(excluded.as_str()) {
            for &name in names {
                if blacklist.insert(name.to_string()) {
                    debug!("{} blacklisted because of {}", name, excluded);
                    queue.push_back(name.to_string());
                }
            }
        }
    }

    // Conditions only matter between packages that both survive; a
    // blacklisted depender places no demands, a blacklisted dependency
    // keeps nothing.
    let mut conditions: HashMap<String, BTreeSet<String>> = HashMap::new();
    for edge in edges {
        if blacklist.contains(&edge.name) || blacklist.contains(&edge.dependency) {
            continue;
        }
        if let Some(constraint) = &edge.constraint {
            conditions
                .entry(edge.dependency.clone())
                .or_default()
                .insert(constraint.clone());
        }
    }

    if blacklist.len() > seed.len() {
        info!(
            "dependency closure added {} packages to the blacklist",
            blacklist.len() - seed.len()
        );
    }
    info!("packages with requirement conditions: {}", conditions.len());

    Closure {
        blacklist,
        conditions,
    }
}

/// Memoized exclusion policy for a run.
///
/// The blacklist and conditions are a pure function of the rule
/// configuration and the catalog snapshot, so the result is keyed by the
/// highest catalog serial and recomputed whenever the snapshot moves.
pub struct ExclusionPolicy {
    rules: RuleConfig,
    cached: Option<(i64, Closure)>,
}

impl ExclusionPolicy {
    pub fn new(rules: RuleConfig) -> Self {
        Self {
            rules,
            cached: None,
        }
    }

    /// The current closure, computing it at most once per catalog snapshot.
    pub fn closure(&mut self, store: &Store) -> Result<&Closure> {
        let key = store.max_catalog_serial()?;
        let stale = match &self.cached {
            Some((cached_key, _)) => *cached_key != key,
            None => true,
        };

        if stale {
            let seed = blacklist::resolve(store, &self.rules)?;
            let edges = mandatory_edges(store)?;
            let closure = propagate(&seed.names, &edges);
            info!(
                "exclusion set: {} seed, {} after closure",
                seed.names.len(),
                closure.blacklist.len()
            );
            self.cached = Some((key, closure));
        }

        // unwrap is fine: the branch above always fills the cache
        Ok(&self.cached.as_ref().unwrap().1)
    }
}
