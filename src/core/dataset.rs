// src/core/dataset.rs — Labeled pool and carry-forward bookkeeping
//
// Tracks which samples have labels and which were selected in an earlier
// round but never labeled. Unlabeled leftovers are carried forward: they stay
// in the unlabeled pool and are listed as pending in the next workflow input.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::types::LabeledSample;

#[derive(Debug, Clone, Default)]
pub struct LabelPool {
    labeled: BTreeMap<String, LabeledSample>,
    /// Insertion order of `labeled`, so workflow inputs are stable.
    order: Vec<String>,
    pending: BTreeSet<String>,
}

/// Counts produced by one aggregation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub accepted: usize,
    pub carried_forward: usize,
}

impl LabelPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted labels plus every selection of completed rounds.
    pub fn restore<'a>(
        labels: Vec<LabeledSample>,
        completed_selections: impl IntoIterator<Item = &'a String>,
    ) -> Self {
        let mut pool = Self::new();
        for label in labels {
            pool.insert(label);
        }
        for id in completed_selections {
            if !pool.labeled.contains_key(id) {
                pool.pending.insert(id.clone());
            }
        }
        pool
    }

    /// Fold a round's labels into the pool. Selected samples left without a
    /// label are carried forward as pending.
    pub fn merge(&mut self, selected: &[String], labels: &[LabeledSample]) -> MergeSummary {
        for label in labels {
            self.insert(label.clone());
        }

        let mut carried_forward = 0;
        for id in selected {
            if !self.labeled.contains_key(id) {
                self.pending.insert(id.clone());
                carried_forward += 1;
            }
        }

        MergeSummary {
            accepted: labels.len(),
            carried_forward,
        }
    }

    fn insert(&mut self, label: LabeledSample) {
        self.pending.remove(&label.sample_id);
        if !self.labeled.contains_key(&label.sample_id) {
            self.order.push(label.sample_id.clone());
        }
        self.labeled.insert(label.sample_id.clone(), label);
    }

    /// Labeled samples in first-labeled order.
    pub fn labeled(&self) -> Vec<LabeledSample> {
        self.order
            .iter()
            .filter_map(|id| self.labeled.get(id).cloned())
            .collect()
    }

    pub fn pending(&self) -> Vec<String> {
        self.pending.iter().cloned().collect()
    }

    pub fn labeled_count(&self) -> usize {
        self.labeled.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Check a submission against the round's selection and the label space.
/// An empty submission is valid; every selected sample is carried forward.
/// Returns a human-readable reason on rejection.
pub fn check_submission(
    selected: &[String],
    labels: &[LabeledSample],
    label_space: &[String],
) -> Result<(), String> {
    let selected: HashSet<&str> = selected.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();

    for entry in labels {
        if !selected.contains(entry.sample_id.as_str()) {
            return Err(format!(
                "sample '{}' was not selected in this round",
                entry.sample_id
            ));
        }
        if !seen.insert(entry.sample_id.as_str()) {
            return Err(format!("sample '{}' labeled more than once", entry.sample_id));
        }
        if entry.label.is_null() {
            return Err(format!("sample '{}' has a null label", entry.sample_id));
        }
        if !label_space.is_empty() {
            let allowed = entry
                .label
                .as_str()
                .is_some_and(|l| label_space.iter().any(|s| s == l));
            if !allowed {
                return Err(format!(
                    "label {} for sample '{}' is outside the label space",
                    entry.label, entry.sample_id
                ));
            }
        }
    }

    Ok(())
}
