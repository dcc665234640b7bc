//! Expansion of task specs into seeded task instances.

use serde::{Deserialize, Serialize};

use super::TaskSpec;

/// One seeded parameterization of a task spec; the unit of execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub spec: TaskSpec,
    /// Combination index in `0..n_combinations`.
    pub combination: u32,
    /// Seed derived from the run seed, spec ID and combination index.
    pub seed: u64,
}

impl TaskInstance {
    pub fn new(spec: TaskSpec, combination: u32, run_seed: u64) -> Self {
        let seed = derive_seed(run_seed, spec.id, combination);
        Self {
            spec,
            combination,
            seed,
        }
    }

    /// Label used in logs, e.g. `ContactsAddContact#1`.
    pub fn label(&self) -> String {
        format!("{}#{}", self.spec.name, self.combination)
    }
}

/// `run_seed + spec_id + combination`, wrapping on overflow.
pub fn derive_seed(run_seed: u64, spec_id: u64, combination: u32) -> u64 {
    run_seed
        .wrapping_add(spec_id)
        .wrapping_add(u64::from(combination))
}

/// Expands specs into instances: spec order first, combination ascending.
pub fn expand_instances(
    specs: &[TaskSpec],
    n_combinations: u32,
    run_seed: u64,
) -> Vec<TaskInstance> {
    specs
        .iter()
        .flat_map(|spec| {
            (0..n_combinations).map(move |c| TaskInstance::new(spec.clone(), c, run_seed))
        })
        .collect()
}
