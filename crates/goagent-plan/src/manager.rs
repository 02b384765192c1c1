// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::RwLock;

use crate::observation::StepObservation;
use crate::types::{PlanStep, StepStatus};

#[derive(Debug, Default)]
struct PlanState {
    order: Vec<String>,
    steps: HashMap<String, PlanStep>,
}

impl PlanState {
    /// A step is executable when it is pending, not already running, and
    /// every dependency **present in the plan** is completed.  Unknown
    /// dependency ids never block.
    fn is_executable(&self, step: &PlanStep) -> bool {
        if step.status != StepStatus::Pending || step.executing {
            return false;
        }
        step.dependencies().iter().all(|dep| {
            self.steps
                .get(dep)
                .map(|d| d.status == StepStatus::Completed)
                .unwrap_or(true)
        })
    }
}

/// Exclusive owner of the current plan.
///
/// Every operation takes the internal lock; reads hand out deep copies so
/// callers never observe in-place mutation.
#[derive(Debug, Default)]
pub struct PlanManager {
    inner: RwLock<PlanState>,
}

impl PlanManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically swap the plan.  Input order is preserved; duplicate ids
    /// keep their first position and the later definition wins.
    pub fn replace(&self, steps: Vec<PlanStep>) {
        let mut state = self.inner.write().expect("plan lock poisoned");
        state.order.clear();
        state.steps.clear();
        for mut step in steps {
            step.executing = false;
            if !state.steps.contains_key(&step.id) {
                state.order.push(step.id.clone());
            }
            state.steps.insert(step.id.clone(), step);
        }
    }

    /// Deep copy of all steps in plan order.
    pub fn snapshot(&self) -> Vec<PlanStep> {
        let state = self.inner.read().expect("plan lock poisoned");
        state
            .order
            .iter()
            .filter_map(|id| state.steps.get(id).cloned())
            .collect()
    }

    /// Take the first executable step, marking it as executing.  Ties are
    /// broken by plan order.
    pub fn ready(&self) -> Option<PlanStep> {
        let mut state = self.inner.write().expect("plan lock poisoned");
        let id = state
            .order
            .iter()
            .find(|id| {
                state
                    .steps
                    .get(*id)
                    .map(|s| state.is_executable(s))
                    .unwrap_or(false)
            })?
            .clone();
        let step = state.steps.get_mut(&id).expect("ordered id must exist");
        step.executing = true;
        Some(step.clone())
    }

    /// Count of steps the `ready` predicate would currently accept.
    /// Read-only: does not mark anything as executing.
    pub fn executable_count(&self) -> usize {
        let state = self.inner.read().expect("plan lock poisoned");
        state
            .order
            .iter()
            .filter_map(|id| state.steps.get(id))
            .filter(|s| state.is_executable(s))
            .count()
    }

    /// Set a step's status, clear its executing flag, and overwrite its
    /// observation when one is provided.
    pub fn update_status(
        &self,
        id: &str,
        status: StepStatus,
        observation: Option<StepObservation>,
    ) -> anyhow::Result<()> {
        let mut state = self.inner.write().expect("plan lock poisoned");
        let step = state
            .steps
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("unknown plan step: {id}"))?;
        step.status = status;
        step.executing = false;
        if let Some(obs) = observation {
            step.observation = Some(obs);
        }
        Ok(())
    }

    /// Any step still `Pending`.
    pub fn has_pending(&self) -> bool {
        let state = self.inner.read().expect("plan lock poisoned");
        state
            .steps
            .values()
            .any(|s| s.status == StepStatus::Pending)
    }

    /// Non-empty plan with every step `Completed`.
    pub fn completed(&self) -> bool {
        let state = self.inner.read().expect("plan lock poisoned");
        !state.steps.is_empty()
            && state
                .steps
                .values()
                .all(|s| s.status == StepStatus::Completed)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
