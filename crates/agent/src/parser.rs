//! Interpretation of a model response into the next action.
//!
//! Three response shapes are understood, tried in order:
//!
//! 1. Native tool calls attached to the assistant message
//! 2. A JSON directive: `{"action": "call_tool", "tool": ..., "input": {...}}`
//!    or `{"action": "final", "response": ...}`
//! 3. ReAct text: `Thought:` / `Action:` / `Action Input:` / `Final Answer:`
//!
//! Text with none of these markers is taken as the final answer.

use crewforge_core::message::{Message, MessageToolCall};
use crewforge_core::provider::ToolDefinition;
use serde_json::Value;
use thiserror::Error;

/// Name of the built-in delegation action.
pub const DELEGATE_WORK: &str = "delegate_work";

/// Stop sequence that keeps the model from inventing observations.
pub const OBSERVATION_STOP: &str = "\nObservation:";

const THOUGHT: &str = "Thought:";
const ACTION: &str = "Action:";
const ACTION_INPUT: &str = "Action Input:";
const FINAL_ANSWER: &str = "Final Answer:";

/// What the model decided to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedAction {
    FinalAnswer(String),
    ToolCall {
        tool: String,
        arguments: Value,
    },
    Delegation {
        coworker: String,
        task: String,
        context: Option<String>,
    },
}

/// A parsed response: the reasoning text plus the action.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub thought: Option<String>,
    pub action: ParsedAction,
}

/// The response could not be turned into an action.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}")]
pub struct ParseError {
    pub thought: Option<String>,
    pub raw: String,
    pub reason: String,
}

impl ParseError {
    fn new(raw: &str, thought: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            thought,
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

/// Tool definition describing the delegation action to the model.
pub fn delegate_definition(coworkers: &[&str]) -> ToolDefinition {
    ToolDefinition {
        name: DELEGATE_WORK.to_string(),
        description: format!(
            "Delegate a specific task to one of the following coworkers: {}. \
             Provide all the context the coworker needs; they know nothing about your task.",
            coworkers.join(", ")
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "coworker": { "type": "string", "description": "Role of the coworker" },
                "task": { "type": "string", "description": "The task to delegate" },
                "context": { "type": "string", "description": "Everything the coworker needs to know" }
            },
            "required": ["coworker", "task"]
        }),
    }
}

/// Parse an assistant message.
pub fn parse_response(message: &Message) -> Result<ParsedResponse, ParseError> {
    let content = message.content.trim();
    let thought = non_empty(strip_prefix_ci(content, THOUGHT).unwrap_or(content));

    if let Some(call) = message.tool_calls.first() {
        if message.tool_calls.len() > 1 {
            tracing::debug!(
                count = message.tool_calls.len(),
                "Model requested several tool calls, acting on the first"
            );
        }
        return parse_native_call(call, content, thought);
    }

    if content.is_empty() {
        return Err(ParseError::new(content, None, "The response was empty"));
    }

    let has_markers = find_ci(content, ACTION).is_some() || find_ci(content, FINAL_ANSWER).is_some();
    if !has_markers
        && let Some(value) = extract_json(content)
        && let Some(directive) = value.as_object().filter(|m| m.contains_key("action"))
    {
        return parse_directive(directive, content);
    }

    if has_markers {
        return parse_react(content);
    }

    Ok(ParsedResponse {
        thought: None,
        action: ParsedAction::FinalAnswer(content.to_string()),
    })
}

fn parse_native_call(
    call: &MessageToolCall,
    content: &str,
    thought: Option<String>,
) -> Result<ParsedResponse, ParseError> {
    let raw_args = call.arguments.trim();
    let arguments = if raw_args.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str::<Value>(raw_args).map_err(|e| {
            ParseError::new(
                content,
                thought.clone(),
                format!("Arguments for '{}' are not valid JSON: {e}", call.name),
            )
        })?
    };
    let action = action_for(&call.name, arguments).map_err(|reason| {
        ParseError::new(content, thought.clone(), reason)
    })?;
    Ok(ParsedResponse { thought, action })
}

fn parse_directive(
    map: &serde_json::Map<String, Value>,
    raw: &str,
) -> Result<ParsedResponse, ParseError> {
    let thought = map
        .get("thought")
        .and_then(Value::as_str)
        .and_then(non_empty);
    let action = map.get("action").and_then(Value::as_str).unwrap_or_default();
    match action {
        "final" | "final_answer" => {
            let answer = map
                .get("response")
                .or_else(|| map.get("answer"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    ParseError::new(raw, thought.clone(), "final action missing response field")
                })?;
            Ok(ParsedResponse {
                thought,
                action: ParsedAction::FinalAnswer(answer.to_string()),
            })
        }
        "call_tool" | "tool" => {
            let tool = map.get("tool").and_then(Value::as_str).ok_or_else(|| {
                ParseError::new(raw, thought.clone(), "call_tool action missing tool field")
            })?;
            let input = map
                .get("input")
                .or_else(|| map.get("arguments"))
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));
            let action = action_for(tool, input)
                .map_err(|reason| ParseError::new(raw, thought.clone(), reason))?;
            Ok(ParsedResponse { thought, action })
        }
        "delegate" | DELEGATE_WORK => {
            let input = map
                .get("input")
                .cloned()
                .unwrap_or_else(|| Value::Object(map.clone()));
            let action = action_for(DELEGATE_WORK, input)
                .map_err(|reason| ParseError::new(raw, thought.clone(), reason))?;
            Ok(ParsedResponse { thought, action })
        }
        other => Err(ParseError::new(
            raw,
            thought,
            format!("Unknown action value: {other}"),
        )),
    }
}

fn parse_react(content: &str) -> Result<ParsedResponse, ParseError> {
    let action_at = find_ci(content, ACTION);
    let final_at = find_ci(content, FINAL_ANSWER);

    let head_end = [action_at, final_at].into_iter().flatten().min().unwrap_or(content.len());
    let head = content[..head_end].trim();
    let thought = non_empty(strip_prefix_ci(head, THOUGHT).unwrap_or(head));

    match (action_at, final_at) {
        (Some(_), Some(_)) => Err(ParseError::new(
            content,
            thought,
            "The response contains both an Action and a Final Answer; give exactly one",
        )),
        (None, Some(at)) => {
            let answer = content[at + FINAL_ANSWER.len()..].trim();
            if answer.is_empty() {
                return Err(ParseError::new(content, thought, "The Final Answer is empty"));
            }
            Ok(ParsedResponse {
                thought,
                action: ParsedAction::FinalAnswer(answer.to_string()),
            })
        }
        (Some(at), None) => {
            let rest = &content[at + ACTION.len()..];
            let tool = rest.lines().next().unwrap_or_default().trim().trim_matches('`');
            if tool.is_empty() {
                return Err(ParseError::new(content, thought, "The Action names no tool"));
            }

            let input_text = match find_ci(rest, ACTION_INPUT) {
                Some(i) => {
                    let after = &rest[i + ACTION_INPUT.len()..];
                    let end = find_ci(after, "Observation:").unwrap_or(after.len());
                    after[..end].trim()
                }
                None => "",
            };
            let arguments = if input_text.is_empty() {
                Value::Object(Default::default())
            } else {
                extract_json(input_text).ok_or_else(|| {
                    ParseError::new(
                        content,
                        thought.clone(),
                        format!("Action Input for '{tool}' is not a JSON object"),
                    )
                })?
            };

            let action = action_for(tool, arguments)
                .map_err(|reason| ParseError::new(content, thought.clone(), reason))?;
            Ok(ParsedResponse { thought, action })
        }
        (None, None) => Ok(ParsedResponse {
            thought: None,
            action: ParsedAction::FinalAnswer(content.to_string()),
        }),
    }
}

/// Map a tool name and arguments to an action, recognizing delegation.
fn action_for(tool: &str, arguments: Value) -> Result<ParsedAction, String> {
    if tool != DELEGATE_WORK {
        return Ok(ParsedAction::ToolCall {
            tool: tool.to_string(),
            arguments,
        });
    }
    let field = |name: &str| {
        arguments
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let coworker = field("coworker").ok_or("delegate_work requires a 'coworker'")?;
    let task = field("task").ok_or("delegate_work requires a 'task'")?;
    Ok(ParsedAction::Delegation {
        coworker,
        task,
        context: field("context"),
    })
}

/// Find a JSON value in free text: the whole text, a fenced block, or the
/// outermost `{...}` slice.
pub fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if trimmed.starts_with("```") {
        let stripped = trimmed.trim_start_matches("```json");
        let stripped = stripped.trim_start_matches("```JSON");
        let stripped = stripped.trim_start_matches("```");
        if let Some(end) = stripped.rfind("```") {
            let slice = &stripped[..end];
            if let Ok(value) = serde_json::from_str::<Value>(slice.trim()) {
                return Some(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
        && let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end])
    {
        return Some(value);
    }

    None
}

/// Byte offset of `marker` in `text`, ignoring ASCII case.
fn find_ci(text: &str, marker: &str) -> Option<usize> {
    let hay = text.as_bytes();
    let needle = marker.as_bytes();
    if needle.len() > hay.len() {
        return None;
    }
    (0..=hay.len() - needle.len()).find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &text[prefix.len()..])
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
