use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use hook_bridge::{Argument, BridgeError, DomainHandle, FunctionKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A list of calls every worker issues in order.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallPlan {
    pub calls: Vec<PlanStep>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PlanStep {
    Call(PlannedCall),
    LongText { long_text: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlannedCall {
    pub key: FunctionKey,
    #[serde(default)]
    pub args: Vec<Argument>,
    #[serde(default)]
    pub read: ReadAs,
}

/// How to decode the result of a planned call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadAs {
    #[default]
    Nothing,
    Word,
    Int,
    Bool,
    Float,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub worker: usize,
    pub step: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<FunctionKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallPlan {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading call plan {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing call plan {}", path.display()))
    }
}

/// Issues every step of `plan` through `handle`.
///
/// A failing step is recorded and the worker moves on; each step is an
/// independent request.
pub fn run_worker(handle: &DomainHandle, worker: usize, plan: &CallPlan) -> Vec<StepOutcome> {
    plan.calls
        .iter()
        .enumerate()
        .map(|(step, planned)| {
            let (key, outcome) = match planned {
                PlanStep::Call(call) => (Some(call.key), run_call(handle, call)),
                PlanStep::LongText { long_text } => {
                    (None, handle.push_long_string(long_text).map(|()| None))
                }
            };
            let (value, error) = match outcome {
                Ok(value) => (value, None),
                Err(err) => (None, Some(err.to_string())),
            };
            StepOutcome {
                worker,
                step,
                key,
                value,
                error,
            }
        })
        .collect()
}

fn run_call(handle: &DomainHandle, call: &PlannedCall) -> Result<Option<Value>, BridgeError> {
    let value = match call.read {
        ReadAs::Nothing => {
            handle.invoke_args(call.key, &call.args)?;
            return Ok(None);
        }
        ReadAs::Word => Value::from(handle.invoke_value::<u64>(call.key, &call.args)?),
        ReadAs::Int => Value::from(handle.invoke_value::<i32>(call.key, &call.args)?),
        ReadAs::Bool => Value::from(handle.invoke_value::<bool>(call.key, &call.args)?),
        ReadAs::Float => Value::from(handle.invoke_value::<f32>(call.key, &call.args)?),
        ReadAs::Text => match handle.invoke_text(call.key, &call.args)? {
            Some(text) => Value::from(text),
            None => Value::Null,
        },
    };
    Ok(Some(value))
}
