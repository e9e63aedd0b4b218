//! Blacklist resolver - the seed exclusion set
//!
//! Evaluates the configured rule lists against the store, in a fixed
//! order, unioning each rule's matches into the running exclusion set.
//! Every rule reports its own cardinality and the cumulative total so an
//! operator can see which rule is doing the work. Rules and the ignore
//! flag are independent axes: a rule never sets `ignored`, and an ignored
//! package is excluded here without touching its flag.

use anyhow::Result;
use std::collections::HashSet;
use tracing::info;

use crate::config::RuleConfig;
use crate::store::Store;

/// Per-rule diagnostics.
#[derive(Debug, Clone)]
pub struct RuleReport {
    pub rule: String,
    pub matched: usize,
    pub total: usize,
}

/// The computed exclusion seed plus its per-rule reports.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSeed {
    pub names: HashSet<String>,
    pub reports: Vec<RuleReport>,
}

impl ExclusionSeed {
    fn apply(&mut self, rule: &str, matched: HashSet<String>) {
        let count = matched.len();
        self.names.extend(matched);
        info!(
            "{:>20}: {:6}   blacklist: {:6}",
            rule,
            count,
            self.names.len()
        );
        self.reports.push(RuleReport {
            rule: rule.to_string(),
            matched: count,
            total: self.names.len(),
        });
    }
}

/// Evaluate all exclusion rules. An empty rule list is a disabled rule
/// and contributes nothing.
pub fn resolve(store: &Store, rules: &RuleConfig) -> Result<ExclusionSeed> {
    let mut seed = ExclusionSeed::default();

    // 1. packages flagged ignored (fetch failures)
    seed.apply("ignored", store.ignored_names()?);

    // 2. too large / too frequently updated
    if !rules.oversized.is_empty() {
        seed.apply("oversized", store.catalog_names_like(&rules.oversized)?);
    }

    // 3. known threats, exact names
    if !rules.threats.is_empty() {
        seed.apply("threats", store.catalog_names_in(&rules.threats)?);
    }

    // 4. low value offline / malformed requirements
    if !rules.low_value.is_empty() {
        seed.apply("low value", store.catalog_names_like(&rules.low_value)?);
    }

    // 5. excluded framework ecosystems: classifier match or name prefix
    for framework in &rules.frameworks {
        let mut matched = store.classifier_names_like(&framework.classifier)?;
        if !framework.name_prefixes.is_empty() {
            let patterns: Vec<String> = framework
                .name_prefixes
                .iter()
                .map(|p| format!("{}%", p))
                .collect();
            matched.extend(store.catalog_names_like(&patterns)?);
        }
        seed.apply(&framework.label, matched);
    }

    // 6. packages with zero associated files
    seed.apply("without file", store.names_without_files()?);

    Ok(seed)
}
