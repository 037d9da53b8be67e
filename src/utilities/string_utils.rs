//! String helpers for prompt interpolation.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

static VARIABLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_\-]*)\}").unwrap());

/// Placeholder that receives the caller's free-form input.
pub const USER_INPUT_KEY: &str = "user_input";

/// Replace `{key}` placeholders with values from `inputs`.
///
/// Only identifiers are treated as placeholders, so JSON fragments such as
/// `{"a": 1}` pass through untouched. Placeholders with no matching input are
/// left verbatim.
pub fn interpolate(template: &str, inputs: &HashMap<String, String>) -> String {
    if inputs.is_empty() || !template.contains('{') {
        return template.to_string();
    }
    VARIABLE_PATTERN
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match inputs.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Placeholder names in `template`, in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in VARIABLE_PATTERN.captures_iter(template) {
        let name = caps[1].to_string();
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

/// First `words` words of `text`, with an ellipsis when shortened.
pub fn summarize(text: &str, words: usize) -> String {
    let mut parts = text.split_whitespace();
    let excerpt: Vec<&str> = parts.by_ref().take(words).collect();
    if parts.next().is_some() {
        format!("{}...", excerpt.join(" "))
    } else {
        excerpt.join(" ")
    }
}
