//! Plan: linear step plans and subtask DAGs.
//!
//! Solo and direct modes build a linear [`StepPlan`]; delegation modes ask
//! the inference provider to partition the instruction into a [`SubTask`]
//! DAG with explicit dependencies. DAG validation mirrors graph
//! compilation: unknown dependency targets and cycles are structural errors
//! caught before any child is spawned.

use miette::Diagnostic;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CellCtx;
use crate::collaborators::{ChatMessage, GenerateParams};
use crate::types::{Complexity, TaskId};

/// One step of a linear plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_tool: Option<String>,
    #[serde(default)]
    pub success_criterion: String,
}

/// Ordered steps for the execute loop.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct StepPlan {
    pub steps: Vec<Step>,
    /// Index of the next step to run.
    pub cursor: usize,
}

impl StepPlan {
    #[must_use]
    pub fn next_step(&self) -> Option<&Step> {
        self.steps.get(self.cursor)
    }

    pub fn advance(&mut self) {
        self.cursor += 1;
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.steps.len().saturating_sub(self.cursor)
    }
}

/// One node in the decomposition DAG.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub id: TaskId,
    pub description: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub required_tools: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    #[serde(default = "default_complexity")]
    pub estimated_complexity: Complexity,
    #[serde(default)]
    pub expected_output: String,
    #[serde(default)]
    pub assigned_role: String,
}

fn default_complexity() -> Complexity {
    Complexity::Simple
}

/// Structural defects in a decomposition.
#[derive(Debug, Error, Diagnostic)]
pub enum PlanError {
    #[error("subtask {task} depends on unknown task {missing}")]
    #[diagnostic(code(hivecell::plan::unknown_dependency))]
    UnknownDependency { task: TaskId, missing: TaskId },

    #[error("decomposition contains a dependency cycle")]
    #[diagnostic(
        code(hivecell::plan::cycle),
        help("Every depends_on chain must reach a task with no dependencies.")
    )]
    Cycle,

    #[error("decomposition has {count} subtasks, over the cap of {cap}")]
    #[diagnostic(code(hivecell::plan::too_many_children))]
    TooManyChildren { count: usize, cap: usize },

    #[error("decomposition is empty")]
    #[diagnostic(code(hivecell::plan::empty))]
    Empty,
}

/// Validate a decomposition and slice it into dependency-ordered phases.
///
/// Phases are the topological layers of the DAG: every subtask appears in
/// the first phase after all of its dependencies. A cycle leaves tasks
/// unplaced, which is reported as [`PlanError::Cycle`].
pub fn phases(subtasks: &[SubTask], max_children: usize) -> Result<Vec<Vec<SubTask>>, PlanError> {
    if subtasks.is_empty() {
        return Err(PlanError::Empty);
    }
    if subtasks.len() > max_children {
        return Err(PlanError::TooManyChildren {
            count: subtasks.len(),
            cap: max_children,
        });
    }
    let known: FxHashSet<&TaskId> = subtasks.iter().map(|t| &t.id).collect();
    for task in subtasks {
        for dep in &task.depends_on {
            if !known.contains(dep) {
                return Err(PlanError::UnknownDependency {
                    task: task.id.clone(),
                    missing: dep.clone(),
                });
            }
        }
    }

    let mut placed: FxHashSet<TaskId> = FxHashSet::default();
    let mut remaining: Vec<&SubTask> = subtasks.iter().collect();
    let mut layers: Vec<Vec<SubTask>> = Vec::new();
    while !remaining.is_empty() {
        let (ready, blocked): (Vec<&SubTask>, Vec<&SubTask>) = remaining
            .into_iter()
            .partition(|t| t.depends_on.iter().all(|d| placed.contains(d)));
        if ready.is_empty() {
            return Err(PlanError::Cycle);
        }
        for task in &ready {
            placed.insert(task.id.clone());
        }
        layers.push(ready.into_iter().cloned().collect());
        remaining = blocked;
    }
    Ok(layers)
}

/// Build a linear step plan for the solo path.
///
/// Asks the inference provider for a JSON array of steps; an unparsable
/// answer degrades to a single step covering the whole instruction, so
/// planning never hard-fails the cycle.
pub async fn build_step_plan(ctx: &mut CellCtx) -> StepPlan {
    let tool_names: Vec<&str> = ctx.catalogue.iter().map(|t| t.name.as_str()).collect();
    let prompt = format!(
        "Break this task into at most {} sequential steps.\n\
         Task: {}\n\
         Available tools: [{}]\n\
         Respond with a JSON array of objects with keys \
         \"goal\", \"preferred_tool\" (optional), \"success_criterion\".",
        ctx.config.execution.max_steps,
        ctx.envelope.instruction.text,
        tool_names.join(", "),
    );
    let system = ctx.system_prompt();
    let generation = ctx
        .collaborators
        .inference
        .generate(
            &system,
            &[ChatMessage::user(prompt)],
            GenerateParams::default(),
        )
        .await;

    let steps = match generation {
        Ok(generation) => {
            ctx.governor.charge(generation.tokens_used);
            parse_steps(&generation.text)
        }
        Err(error) => {
            tracing::debug!(%error, "planner generation failed; using fallback step");
            Vec::new()
        }
    };

    let steps = if steps.is_empty() {
        vec![Step {
            goal: ctx.envelope.instruction.text.clone(),
            preferred_tool: None,
            success_criterion: String::new(),
        }]
    } else {
        steps
    };
    StepPlan { steps, cursor: 0 }
}

/// Ask the inference provider to partition the instruction into subtasks.
///
/// Returns the parsed list; structural validation happens in [`phases`].
/// An unparsable answer returns an empty list, which callers treat as
/// "fall back to solo".
pub async fn decompose(ctx: &mut CellCtx) -> Vec<SubTask> {
    let roles = ctx.roles.names().join(", ");
    let prompt = format!(
        "Partition this task into at most {} subtasks forming a dependency DAG.\n\
         Task: {}\n\
         Domain hints: [{}]\n\
         Known roles: [{roles}]\n\
         Respond with a JSON array of objects with keys \"id\", \"description\", \
         \"domain\", \"required_tools\", \"depends_on\", \"estimated_complexity\" \
         (trivial|simple|moderate|complex), \"expected_output\", \"assigned_role\".",
        ctx.config.delegation.max_parallel_children,
        ctx.envelope.instruction.text,
        ctx.envelope.context.domain_hints.join(", "),
    );
    let system = ctx.system_prompt();
    match ctx
        .collaborators
        .inference
        .generate(
            &system,
            &[ChatMessage::user(prompt)],
            GenerateParams::default(),
        )
        .await
    {
        Ok(generation) => {
            ctx.governor.charge(generation.tokens_used);
            parse_subtasks(&generation.text)
        }
        Err(error) => {
            tracing::debug!(%error, "decomposition generation failed");
            Vec::new()
        }
    }
}

fn parse_steps(text: &str) -> Vec<Step> {
    serde_json::from_str(extract_json(text)).unwrap_or_default()
}

fn parse_subtasks(text: &str) -> Vec<SubTask> {
    serde_json::from_str(extract_json(text)).unwrap_or_default()
}

/// Tolerate prose around a JSON array by slicing to the outermost brackets.
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    match (trimmed.find('['), trimmed.rfind(']')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subtask(id: &str, deps: &[&str]) -> SubTask {
        SubTask {
            id: TaskId::from(id),
            description: id.to_string(),
            domain: String::new(),
            required_tools: vec![],
            depends_on: deps.iter().map(|d| TaskId::from(*d)).collect(),
            estimated_complexity: Complexity::Simple,
            expected_output: String::new(),
            assigned_role: String::new(),
        }
    }

    #[test]
    fn phases_follow_dependencies() {
        let tasks = vec![
            subtask("fetch-2023", &[]),
            subtask("fetch-2024", &[]),
            subtask("project-2025", &["fetch-2023", "fetch-2024"]),
        ];
        let layers = phases(&tasks, 8).unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].len(), 2);
        assert_eq!(layers[1][0].id.as_str(), "project-2025");
    }

    #[test]
    fn cycles_are_rejected() {
        let tasks = vec![subtask("a", &["b"]), subtask("b", &["a"])];
        assert!(matches!(phases(&tasks, 8), Err(PlanError::Cycle)));
    }

    #[test]
    fn unknown_dependencies_are_rejected() {
        let tasks = vec![subtask("a", &["ghost"])];
        assert!(matches!(
            phases(&tasks, 8),
            Err(PlanError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn child_cap_is_enforced() {
        let tasks: Vec<SubTask> = (0..9)
            .map(|i| subtask(&format!("t{i}"), &[]))
            .collect();
        assert!(matches!(
            phases(&tasks, 8),
            Err(PlanError::TooManyChildren { count: 9, cap: 8 })
        ));
    }

    #[test]
    fn step_parsing_tolerates_prose() {
        let text = "Here is the plan:\n[{\"goal\": \"look up numbers\", \
                    \"success_criterion\": \"numbers found\"}]\nGood luck!";
        let steps = parse_steps(text);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].goal, "look up numbers");
    }

    #[test]
    fn unparsable_plan_is_empty() {
        assert!(parse_steps("no json here").is_empty());
    }
}
