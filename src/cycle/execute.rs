//! Execute: the tool-running step loop.
//!
//! One step at a time: ask the inference provider for either a tool call or
//! a natural-language intermediate, dispatch tools through the Tool Host
//! with schema pre-checks and a single LLM-mediated parameter repair, fold
//! results into working memory as facts, then hand control to the monitor.

use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::plan::Step;
use super::{CellAbort, CellCtx, ExecuteOutcome, MonitorVerdict, monitor, plan};
use crate::collaborators::{ChatMessage, CollaboratorError, GenerateParams, ToolSpec};
use crate::heal::patterns;
use crate::journal::{ErrorEntry, ErrorSource, ErrorStatus, FixAttempt, FixResult};
use crate::memory::Fact;
use crate::trace::TraceEvent;
use crate::types::{ErrorId, Severity};

/// A tool invocation proposed by the inference provider.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ToolCallRequest {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// Parse a generation as a tool call if it looks like one.
#[must_use]
pub fn parse_tool_call(text: &str) -> Option<ToolCallRequest> {
    let trimmed = text.trim();
    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => return None,
    };
    serde_json::from_str::<ToolCallRequest>(candidate)
        .ok()
        .filter(|call| !call.tool.is_empty())
}

/// Check `args` against the `required` list and property types of a
/// JSON-schema-shaped tool spec. Returns a human-readable defect on
/// failure, suitable for feeding back to the model.
pub fn validate_args(spec: &ToolSpec, args: &Value) -> Result<(), String> {
    let Some(object) = args.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };
    if let Some(required) = spec.schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(format!("missing required field '{key}'"));
            }
        }
    }
    if let Some(properties) = spec.schema.get("properties").and_then(Value::as_object) {
        for (key, value) in object {
            let Some(expected) = properties.get(key).and_then(|p| p.get("type")) else {
                continue;
            };
            let Some(expected) = expected.as_str() else {
                continue;
            };
            let matches = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                return Err(format!("field '{key}' should be of type {expected}"));
            }
        }
    }
    Ok(())
}

/// Run the execute loop to completion, replanning when the monitor asks.
pub async fn run(ctx: &mut CellCtx) -> Result<ExecuteOutcome, CellAbort> {
    let mut steps_run = 0usize;
    let mut unreachable_streak = 0u32;

    loop {
        if ctx.cancelled() {
            return Err(CellAbort::Cancelled);
        }
        if ctx.plan.is_complete() {
            return Ok(ExecuteOutcome::Completed);
        }
        if steps_run >= ctx.config.execution.max_steps {
            return Ok(ExecuteOutcome::Partial {
                why: "step ceiling reached".to_string(),
            });
        }
        let est = step_estimate(ctx);
        if !ctx.governor.can_afford_step(est) {
            return Ok(ExecuteOutcome::Partial {
                why: "budget floor reached".to_string(),
            });
        }

        let step = match ctx.plan.next_step() {
            Some(step) => step.clone(),
            None => return Ok(ExecuteOutcome::Completed),
        };
        let outcome_note = match run_step(ctx, &step).await {
            Ok(note) => {
                unreachable_streak = 0;
                note
            }
            Err(StepFault::Unreachable(message)) => {
                unreachable_streak += 1;
                if unreachable_streak >= 2 {
                    return Err(CellAbort::ToolHostUnreachable(message));
                }
                format!("tool host unreachable: {message}")
            }
            Err(StepFault::Faulted(note)) => note,
        };
        ctx.plan.advance();
        steps_run += 1;
        ctx.memory.note_step(&step.goal, &outcome_note);
        ctx.trace.emit(TraceEvent::StepCompleted {
            trace_id: ctx.endpoint.trace_id().clone(),
            cell_id: ctx.identity.cell_id.clone(),
            step: ctx.memory.step(),
            outcome: outcome_note.clone(),
        });
        let _ = ctx
            .endpoint
            .progress("executing", outcome_note.clone())
            .await;

        match monitor::check(ctx) {
            MonitorVerdict::Continue => {}
            MonitorVerdict::Replan { why } => {
                ctx.replans += 1;
                ctx.memory
                    .add_decision(format!("replan #{}", ctx.replans), why);
                ctx.plan = plan::build_step_plan(ctx).await;
            }
            MonitorVerdict::CutToPackage => {
                return Ok(ExecuteOutcome::Partial {
                    why: "budget exhaustion imminent".to_string(),
                });
            }
            MonitorVerdict::TerminateSuccess => return Ok(ExecuteOutcome::Completed),
            MonitorVerdict::TerminateFailure { reason } => {
                return Ok(ExecuteOutcome::Failed { reason });
            }
        }
    }
}

fn step_estimate(ctx: &CellCtx) -> u64 {
    let base = ctx.config.execution.step_cost_estimate;
    ctx.plan
        .next_step()
        .and_then(|step| step.preferred_tool.as_ref())
        .and_then(|name| ctx.catalogue.iter().find(|spec| &spec.name == name))
        .and_then(|spec| spec.cost_hint)
        .map(|hint| hint.max(base))
        .unwrap_or(base)
}

enum StepFault {
    /// Tool host unreachable; fatal if persistent.
    Unreachable(String),
    /// The step failed but the loop continues; note describes it.
    Faulted(String),
}

/// Run one step: generate, maybe dispatch a tool, fold results into memory.
/// Returns a short outcome note for the stagnation signature.
async fn run_step(ctx: &mut CellCtx, step: &Step) -> Result<String, StepFault> {
    let generation = generate_for_step(ctx, step, None).await?;

    let Some(call) = parse_tool_call(&generation) else {
        // Natural-language intermediate.
        ctx.memory
            .add_fact(Fact::new(generation.clone(), 0.7, "inference"));
        return Ok(truncate(&generation, 80));
    };

    if !ctx.envelope.authority.allows_tool(&call.tool) {
        ctx.memory.add_fact(Fact::new(
            format!("tool '{}' denied by authority", call.tool),
            0.4,
            "governor",
        ));
        return Ok(format!("denied tool {}", call.tool));
    }
    let Some(spec) = ctx
        .catalogue
        .iter()
        .find(|spec| spec.name == call.tool)
        .cloned()
    else {
        ctx.memory.add_fact(Fact::new(
            format!("tool '{}' not in catalogue", call.tool),
            0.4,
            "governor",
        ));
        return Ok(format!("unknown tool {}", call.tool));
    };

    // Schema pre-check with one LLM-mediated repair.
    let call = match validate_args(&spec, &call.args) {
        Ok(()) => call,
        Err(defect) => {
            let repaired = repair_call(ctx, step, &spec, &defect).await?;
            match repaired {
                Some(repaired) => repaired,
                None => {
                    journal_schema_failure(ctx, &call.tool, &defect);
                    return Ok(format!("schema failure on {}", call.tool));
                }
            }
        }
    };

    dispatch(ctx, step, &spec, call).await
}

/// Ask the model to fix invalid arguments, feeding the validator's error
/// back in. One attempt only.
async fn repair_call(
    ctx: &mut CellCtx,
    step: &Step,
    spec: &ToolSpec,
    defect: &str,
) -> Result<Option<ToolCallRequest>, StepFault> {
    let hint = format!(
        "The previous call to '{}' was rejected: {defect}. \
         Reply with a corrected JSON tool call matching this schema: {}",
        spec.name, spec.schema
    );
    let generation = generate_for_step(ctx, step, Some(&hint)).await?;
    let repaired = parse_tool_call(&generation)
        .filter(|call| call.tool == spec.name && validate_args(spec, &call.args).is_ok());
    Ok(repaired)
}

async fn generate_for_step(
    ctx: &mut CellCtx,
    step: &Step,
    repair_hint: Option<&str>,
) -> Result<String, StepFault> {
    let catalogue_lines: Vec<String> = ctx
        .catalogue
        .iter()
        .map(|spec| format!("- {}: {} (schema: {})", spec.name, spec.description, spec.schema))
        .collect();
    let mut prompt = format!(
        "Step goal: {}\nSuccess criterion: {}\n",
        step.goal, step.success_criterion
    );
    if catalogue_lines.is_empty() {
        prompt.push_str("No tools are available; answer directly.\n");
    } else {
        prompt.push_str(&format!(
            "Available tools:\n{}\nTo call a tool reply with JSON: \
             {{\"tool\": \"name\", \"args\": {{...}}}}. Otherwise answer directly.\n",
            catalogue_lines.join("\n")
        ));
    }
    if let Some(hint) = repair_hint {
        prompt.push_str(hint);
    }

    let system = ctx.system_prompt();
    let mut attempts = 0;
    loop {
        let generated = ctx
            .collaborators
            .inference
            .generate(
                &system,
                &[ChatMessage::user(prompt.clone())],
                GenerateParams::default(),
            )
            .await;
        match generated {
            Ok(generation) => {
                ctx.governor.charge(generation.tokens_used);
                return Ok(generation.text);
            }
            Err(CollaboratorError::Timeout { .. })
                if attempts < ctx.config.execution.inference_retries =>
            {
                attempts += 1;
                let jitter = rand::rng().random_range(0..25u64);
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempts) + jitter))
                    .await;
            }
            Err(error) => {
                journal_runtime_fault(ctx, &error);
                return Err(StepFault::Faulted(format!("inference failed: {error}")));
            }
        }
    }
}

/// Dispatch a validated tool call, retrying once on a retryable fault.
async fn dispatch(
    ctx: &mut CellCtx,
    step: &Step,
    spec: &ToolSpec,
    call: ToolCallRequest,
) -> Result<String, StepFault> {
    let timeout = Duration::from_millis(ctx.config.execution.tool_timeout_ms);
    let mut retried = false;
    loop {
        let attempt = tokio::time::timeout(
            timeout,
            ctx.collaborators.tools.execute(&call.tool, call.args.clone()),
        )
        .await;

        let result = match attempt {
            Err(_) => {
                journal_tool_failure(
                    ctx,
                    &call.tool,
                    "timeout",
                    format!("tool '{}' timed out", call.tool),
                    Severity::Medium,
                );
                return Ok(format!("timeout on {}", call.tool));
            }
            Ok(Err(error)) => {
                if let CollaboratorError::Unavailable { message, .. } = &error {
                    return Err(StepFault::Unreachable(message.clone()));
                }
                journal_runtime_fault(ctx, &error);
                return Err(StepFault::Faulted(format!("tool transport failed: {error}")));
            }
            Ok(Ok(result)) => result,
        };

        if let Some(tokens) = result.tokens_consumed {
            ctx.governor.charge(tokens);
        }

        if result.success {
            let mut content = match &result.output {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if !result.citations.is_empty() {
                content.push_str(&format!(" [sources: {}]", result.citations.join(", ")));
            }
            ctx.memory.add_fact(Fact::new(content, 0.85, &spec.name));
            return Ok(format!("tool {} ok", call.tool));
        }

        let fault = result.error.unwrap_or_else(|| crate::collaborators::ToolFault {
            code: "unknown".to_string(),
            message: "tool failed without detail".to_string(),
            retryable: false,
        });

        if is_schema_fault(&fault.code) {
            // The host rejected the arguments: journal, repair once,
            // resubmit. Success flips the entry to fixed.
            let error_id = journal_schema_failure(ctx, &call.tool, &fault.message);
            if let Some(repaired) = repair_call(ctx, step, spec, &fault.message).await? {
                let retry = tokio::time::timeout(
                    timeout,
                    ctx.collaborators
                        .tools
                        .execute(&repaired.tool, repaired.args.clone()),
                )
                .await;
                if let Ok(Ok(result)) = retry
                    && result.success
                {
                    settle_schema_fix(ctx, &error_id, &spec.name);
                    let content = match &result.output {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    ctx.memory.add_fact(Fact::new(content, 0.85, &spec.name));
                    return Ok(format!("tool {} ok after repair", call.tool));
                }
            }
            return Ok(format!("schema failure on {}", call.tool));
        }

        if fault.retryable && !retried {
            retried = true;
            tokio::time::sleep(Duration::from_millis(50)).await;
            continue;
        }

        journal_tool_failure(
            ctx,
            &call.tool,
            &fault.code,
            fault.message.clone(),
            Severity::Medium,
        );
        return Ok(format!("tool {} failed: {}", call.tool, fault.code));
    }
}

fn is_schema_fault(code: &str) -> bool {
    let code = code.to_lowercase();
    code.contains("schema") || code.contains("validation") || code.contains("invalid_arg")
}

fn journal_schema_failure(ctx: &mut CellCtx, tool: &str, defect: &str) -> ErrorId {
    let id = ErrorId::new(ctx.ids.next_id("err"));
    let entry = ErrorEntry::new(
        id.clone(),
        ErrorSource::ToolFailure,
        "schema_mismatch",
        format!("tool '{tool}' rejected arguments: {defect}"),
        Severity::Medium,
    )
    .with_context(serde_json::json!({ "tool": tool }));
    ctx.memory.journal_mut().record(entry);
    id
}

/// Mark a schema-repair success: attempt recorded, entry fixed, pattern
/// learned.
fn settle_schema_fix(ctx: &mut CellCtx, error_id: &ErrorId, tool: &str) {
    let strategy = "llm parameter repair with validator feedback";
    let attempt = FixAttempt {
        n: 1,
        strategy: strategy.to_string(),
        result: FixResult::Success,
        discovered_error_ids: vec![],
        tokens_consumed: 0,
        at: chrono::Utc::now(),
    };
    let _ = ctx.memory.journal_mut().record_attempt(error_id, attempt);
    let _ = ctx
        .memory
        .journal_mut()
        .transition(error_id, ErrorStatus::Fixed);
    if let Some(entry) = ctx.memory.journal().get(error_id).cloned() {
        let domain = ctx.domain().to_string();
        let pattern = patterns::learned_from(&entry, strategy, &domain);
        ctx.memory.record_fix_pattern(pattern);
    }
    tracing::debug!(tool, "schema failure repaired");
}

fn journal_tool_failure(
    ctx: &mut CellCtx,
    tool: &str,
    code: &str,
    message: String,
    severity: Severity,
) {
    let entry = ErrorEntry::new(
        ErrorId::new(ctx.ids.next_id("err")),
        ErrorSource::ToolFailure,
        code,
        message,
        severity,
    )
    .with_context(serde_json::json!({ "tool": tool }));
    ctx.memory.journal_mut().record(entry);
}

fn journal_runtime_fault(ctx: &mut CellCtx, error: &CollaboratorError) {
    let entry = ErrorEntry::new(
        ErrorId::new(ctx.ids.next_id("err")),
        ErrorSource::Runtime,
        "collaborator_fault",
        error.to_string(),
        Severity::High,
    );
    ctx.memory.journal_mut().record(entry);
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> ToolSpec {
        ToolSpec {
            name: "search".to_string(),
            schema: json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer"}
                }
            }),
            description: "search the corpus".to_string(),
            cost_hint: Some(300),
        }
    }

    #[test]
    fn parses_tool_calls_with_surrounding_prose() {
        let text = "I'll search.\n{\"tool\": \"search\", \"args\": {\"query\": \"revenue\"}}";
        let call = parse_tool_call(text).unwrap();
        assert_eq!(call.tool, "search");
        assert_eq!(call.args["query"], "revenue");
    }

    #[test]
    fn plain_text_is_not_a_tool_call() {
        assert!(parse_tool_call("the revenue grew by 12%").is_none());
        assert!(parse_tool_call("{\"not_a_tool\": true}").is_none());
    }

    #[test]
    fn validation_checks_required_and_types() {
        let spec = spec();
        assert!(validate_args(&spec, &json!({"query": "x"})).is_ok());
        assert!(validate_args(&spec, &json!({"limit": 3})).is_err());
        assert!(validate_args(&spec, &json!({"query": 42})).is_err());
        assert!(validate_args(&spec, &json!("not an object")).is_err());
    }

    #[test]
    fn schema_fault_codes_are_recognised() {
        assert!(is_schema_fault("SCHEMA_ERROR"));
        assert!(is_schema_fault("validation_failed"));
        assert!(!is_schema_fault("rate_limited"));
    }
}
