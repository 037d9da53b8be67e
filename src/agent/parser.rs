//! Parsing of ReAct-style model responses.
//!
//! A response is either an action:
//!
//! ```text
//! Thought: I need to search
//! Action: search
//! Action Input: {"query": "rust"}
//! ```
//!
//! or a final answer:
//!
//! ```text
//! Thought: I know the answer
//! Final Answer: 42
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

const FINAL_ANSWER_ACTION: &str = "Final Answer:";

static ACTION_INPUT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)Action\s*\d*\s*:\s*(.+?)\s*(?:\n|\r\n?)Action\s*\d*\s*Input\s*\d*\s*:\s*(.*)")
        .unwrap()
});
static ACTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Action\s*\d*\s*:").unwrap());
static ACTION_INPUT_ONLY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Action\s*\d*\s*Input\s*\d*\s*:").unwrap());

/// The model wants to call a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentAction {
    pub thought: String,
    pub tool: String,
    pub tool_input: String,
}

/// The model produced its answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentFinish {
    pub thought: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStep {
    Action(AgentAction),
    Finish(AgentFinish),
}

/// A response that follows neither format. The message is fed back to the
/// model as corrective feedback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct OutputParserError(pub String);

/// Parse one model response.
pub fn parse(text: &str) -> Result<AgentStep, OutputParserError> {
    let thought = extract_thought(text);

    if text.contains(FINAL_ANSWER_ACTION) {
        let answer = text
            .rsplit(FINAL_ANSWER_ACTION)
            .next()
            .unwrap_or_default()
            .trim();
        return Ok(AgentStep::Finish(AgentFinish {
            thought,
            output: clean_trailing_backticks(answer),
        }));
    }

    if let Some(caps) = ACTION_INPUT_RE.captures(text) {
        let tool = caps
            .get(1)
            .map_or("", |m| m.as_str())
            .trim()
            .trim_matches('*')
            .trim()
            .to_string();
        let input = caps.get(2).map_or("", |m| m.as_str()).trim();
        return Ok(AgentStep::Action(AgentAction {
            thought,
            tool,
            tool_input: repair_json(input.trim_matches('"')),
        }));
    }

    if !ACTION_RE.is_match(text) {
        return Err(OutputParserError(
            "I couldn't find an Action after the Thought.\nYou MUST use the following format:\n\
             Thought: [your thought]\nFinal Answer: [your final answer]"
                .to_string(),
        ));
    }
    if !ACTION_INPUT_ONLY_RE.is_match(text) {
        return Err(OutputParserError(
            "I found an Action but couldn't find a valid Action Input right after it.".to_string(),
        ));
    }
    Err(OutputParserError(
        "Could not parse the output. Please use the correct format.".to_string(),
    ))
}

fn extract_thought(text: &str) -> String {
    match text
        .find("\nAction")
        .or_else(|| text.find("\nFinal Answer"))
    {
        Some(idx) => text[..idx].replace("```", "").trim().to_string(),
        None => String::new(),
    }
}

/// Drop an unmatched trailing code fence.
fn clean_trailing_backticks(text: &str) -> String {
    if text.ends_with("```") && text.matches("```").count() % 2 != 0 {
        text[..text.len() - 3].trim_end().to_string()
    } else {
        text.to_string()
    }
}

/// Replace triple quotes when that yields valid JSON. Arrays pass through.
fn repair_json(input: &str) -> String {
    if input.starts_with('[') && input.ends_with(']') {
        return input.to_string();
    }
    let cleaned = input.replace("\"\"\"", "\"");
    if serde_json::from_str::<serde_json::Value>(&cleaned).is_ok() {
        cleaned
    } else {
        input.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_final_answer() {
        let step = parse("Thought: I know\nFinal Answer: 72 degrees.```").unwrap();
        assert_eq!(
            step,
            AgentStep::Finish(AgentFinish {
                thought: "Thought: I know".into(),
                output: "72 degrees.".into(),
            })
        );
    }

    #[test]
    fn test_parse_action() {
        let step =
            parse("Thought: search\nAction: **search**\nAction Input: {\"q\": \"rust\"}").unwrap();
        match step {
            AgentStep::Action(action) => {
                assert_eq!(action.tool, "search");
                assert_eq!(action.tool_input, "{\"q\": \"rust\"}");
            }
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_action_input() {
        let err = parse("Thought: hmm\nAction: search").unwrap_err();
        assert!(err.0.contains("Action Input"));
        assert!(parse("just text").is_err());
    }
}
