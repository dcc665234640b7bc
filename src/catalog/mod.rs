//! Task catalog: the set of task types the suite can run.
//!
//! Task IDs are assigned 1..N by sorted task name, so the same suite version
//! always yields the same IDs.

pub mod instance;

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BenchError;

pub use instance::{expand_instances, TaskInstance};

/// A task type as reported by the task suite, before IDs are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteTask {
    pub name: String,
    pub family: String,
    pub complexity: u32,
}

impl SuiteTask {
    pub fn new(name: impl Into<String>, family: impl Into<String>, complexity: u32) -> Self {
        Self {
            name: name.into(),
            family: family.into(),
            complexity,
        }
    }
}

/// Identifies one task type in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Stable numeric ID (1-based).
    pub id: u64,
    /// Unique task name.
    pub name: String,
    /// Category the task belongs to.
    pub family: String,
    /// Positive complexity used to scale the step budget and timeout.
    pub complexity: u32,
}

/// Task selection as given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSelection {
    pub ids: Vec<u64>,
    pub names: Vec<String>,
    pub family: Option<String>,
}

impl TaskSelection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_ids(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.ids.extend(ids);
        self
    }

    pub fn with_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }
}

/// Ordered, immutable catalog of task specs.
#[derive(Debug, Clone)]
pub struct TaskCatalog {
    specs: Vec<TaskSpec>,
    by_name: HashMap<String, usize>,
}

impl TaskCatalog {
    /// Builds a catalog from suite tasks, assigning IDs by sorted name.
    ///
    /// Duplicate names are collapsed to the first occurrence.
    pub fn from_suite_tasks(tasks: impl IntoIterator<Item = SuiteTask>) -> Self {
        let mut tasks: Vec<SuiteTask> = tasks.into_iter().collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        tasks.dedup_by(|a, b| a.name == b.name);

        let specs: Vec<TaskSpec> = tasks
            .into_iter()
            .enumerate()
            .map(|(i, t)| TaskSpec {
                id: i as u64 + 1,
                name: t.name,
                family: t.family,
                complexity: t.complexity.max(1),
            })
            .collect();

        let by_name = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();

        debug!(count = specs.len(), "Built task catalog");
        Self { specs, by_name }
    }

    /// All specs in catalog order.
    pub fn list(&self) -> &[TaskSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get_by_id(&self, id: u64) -> Option<&TaskSpec> {
        if id == 0 {
            return None;
        }
        self.specs.get((id - 1) as usize)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&TaskSpec> {
        self.by_name.get(name).map(|&i| &self.specs[i])
    }

    pub fn by_family<'a>(&'a self, family: &'a str) -> impl Iterator<Item = &'a TaskSpec> + 'a {
        self.specs.iter().filter(move |s| s.family == family)
    }

    /// Distinct families in sorted order.
    pub fn families(&self) -> Vec<&str> {
        let set: BTreeSet<&str> = self.specs.iter().map(|s| s.family.as_str()).collect();
        set.into_iter().collect()
    }

    /// Resolves a selection into specs, in catalog order.
    ///
    /// Explicit IDs and names are unioned. With neither, a family selects all
    /// of its specs; with nothing at all, every spec is selected. Any unknown
    /// ID or name fails the whole resolution.
    pub fn resolve(&self, selection: &TaskSelection) -> Result<Vec<TaskSpec>, BenchError> {
        let mut unknown = Vec::new();
        let mut picked = BTreeSet::new();

        for &id in &selection.ids {
            match self.get_by_id(id) {
                Some(spec) => {
                    picked.insert(spec.id);
                }
                None => unknown.push(format!("id {}", id)),
            }
        }
        for name in &selection.names {
            match self.get_by_name(name) {
                Some(spec) => {
                    picked.insert(spec.id);
                }
                None => unknown.push(format!("name {}", name)),
            }
        }

        if !unknown.is_empty() {
            return Err(BenchError::UnknownTask(unknown));
        }

        let explicit = !selection.ids.is_empty() || !selection.names.is_empty();
        let specs = if explicit {
            self.specs
                .iter()
                .filter(|s| picked.contains(&s.id))
                .cloned()
                .collect()
        } else if let Some(family) = &selection.family {
            self.by_family(family).cloned().collect()
        } else {
            self.specs.clone()
        };

        Ok(specs)
    }
}
