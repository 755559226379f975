use crate::condition::Guard;
use crate::deps::{blocking_deps, check_acyclic};
use crate::error::ConfigError;
use crate::template::is_reserved;
use fast_protocol::{FlowDefinition, Step};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// A step with everything the scheduler needs precomputed
#[derive(Debug, Clone)]
pub struct PlannedStep {
    /// The typed step
    pub step: Step,
    /// Steps whose results must be published first
    pub deps: BTreeSet<String>,
    /// Parsed guard, `None` when the step always runs
    pub guard: Option<Guard>,
}

/// A validated flow, ready to schedule
#[derive(Debug, Clone)]
pub struct FlowPlan {
    /// Default model
    pub model: String,
    /// System prompt
    pub system_prompt: String,
    /// Steps in definition order
    pub steps: Vec<PlannedStep>,
}

impl FlowPlan {
    /// Validate a definition.
    ///
    /// Every configuration problem surfaces here, before any task starts.
    pub fn build(flow: &FlowDefinition) -> Result<Self, ConfigError> {
        if flow.steps.is_empty() {
            return Err(ConfigError::EmptyFlow);
        }

        let mut steps = Vec::with_capacity(flow.steps.len());
        let mut known = HashSet::new();
        for (index, definition) in flow.steps.iter().enumerate() {
            if definition.id.trim().is_empty() {
                return Err(fast_protocol::StepDefinitionError::MissingId(index).into());
            }
            if is_reserved(&definition.id) {
                return Err(ConfigError::ReservedId(definition.id.clone()));
            }
            if !known.insert(definition.id.clone()) {
                return Err(ConfigError::DuplicateStep(definition.id.clone()));
            }
            steps.push(definition.to_step()?);
        }

        let mut planned = Vec::with_capacity(steps.len());
        let mut graph = BTreeMap::new();
        for step in steps {
            let guard = match &step.guard {
                Some(raw) => Guard::parse(raw).map_err(|_| ConfigError::UnsupportedGuard {
                    step_id: step.id.clone(),
                    guard: raw.clone(),
                })?,
                None => None,
            };
            let deps = blocking_deps(&step, &known);
            debug!(step = %step.id, ?deps, "Planned step");
            graph.insert(step.id.clone(), deps.clone());
            planned.push(PlannedStep { step, deps, guard });
        }
        check_acyclic(&graph)?;

        Ok(Self {
            model: flow.model.clone(),
            system_prompt: flow.system_prompt.clone(),
            steps: planned,
        })
    }

    /// Id of the last step in definition order
    pub fn last_step_id(&self) -> Option<&str> {
        self.steps.last().map(|s| s.step.id.as_str())
    }
}
