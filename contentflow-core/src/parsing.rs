//! Parsers for raw completion output.
//!
//! Model responses arrive as free text that may wrap JSON in code fences,
//! prefix list items with arbitrary ordinal markers, or pad structured
//! output with prose. These helpers normalize that text; policy decisions
//! (fallback vs. hard failure) stay with the agent stages.

use regex::Regex;
use std::sync::LazyLock;

/// Extract content from markdown code fences, if present.
pub fn strip_code_fences(input: &str) -> String {
    static CODE_FENCE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"```(?:json|JSON)?\s*\n?([\s\S]*?)\n?```").unwrap());

    if let Some(caps) = CODE_FENCE_RE.captures(input) {
        if let Some(content) = caps.get(1) {
            return content.as_str().to_string();
        }
    }

    input.to_string()
}

/// Extract the first balanced JSON object or array from surrounding text.
pub fn extract_json(input: &str) -> Option<String> {
    let start_obj = input.find('{');
    let start_arr = input.find('[');

    let (start, end_char) = match (start_obj, start_arr) {
        (Some(o), Some(a)) if o < a => (o, '}'),
        (Some(_), Some(a)) => (a, ']'),
        (Some(o), None) => (o, '}'),
        (None, Some(a)) => (a, ']'),
        (None, None) => return None,
    };

    let substring = &input[start..];
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in substring.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth -= 1;
                if depth == 0 && c == end_char {
                    return Some(substring[..=i].to_string());
                }
            }
            _ => {}
        }
    }

    None
}

/// Parse completion text as a JSON value, tolerating code fences and
/// surrounding prose.
pub fn parse_json_value(input: &str) -> Result<serde_json::Value, serde_json::Error> {
    let stripped = strip_code_fences(input);
    let trimmed = stripped.trim();

    match serde_json::from_str(trimmed) {
        Ok(value) => Ok(value),
        Err(first_err) => match extract_json(trimmed) {
            Some(candidate) => serde_json::from_str(&candidate),
            None => Err(first_err),
        },
    }
}

/// Split completion text into enumerated items, stripping ordinal markers
/// (`1.`, `2)`, `-`, `*`, `•`).
///
/// When no line carries a marker, every non-empty line is treated as an
/// item. Callers that expected N items must accept fewer; undercount is a
/// documented property of model output, not a parse error.
pub fn parse_numbered_list(input: &str) -> Vec<String> {
    static ORDINAL_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*(?:\d+\s*[.):]|[-*•])\s+").unwrap());

    let marked: Vec<String> = input
        .lines()
        .filter_map(|line| {
            ORDINAL_RE.find(line).map(|m| line[m.end()..].trim().to_string())
        })
        .filter(|item| !item.is_empty())
        .collect();

    if !marked.is_empty() {
        return marked;
    }

    input
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        let input = "Here you go:\n```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(input), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_code_fences_passthrough() {
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_from_prose() {
        let input = "The result is {\"copy\": \"hi\", \"tags\": [\"a\"]} as requested.";
        let extracted = extract_json(input).unwrap();
        let value: serde_json::Value = serde_json::from_str(&extracted).unwrap();
        assert_eq!(value["copy"], "hi");
    }

    #[test]
    fn test_extract_json_nested_braces_in_strings() {
        let input = "{\"text\": \"curly } inside\"}";
        let extracted = extract_json(input).unwrap();
        assert_eq!(extracted, input);
    }

    #[test]
    fn test_parse_json_value_fenced() {
        let value = parse_json_value("```json\n{\"n\": 2}\n```").unwrap();
        assert_eq!(value["n"], 2);
    }

    #[test]
    fn test_parse_json_value_invalid() {
        assert!(parse_json_value("not json at all").is_err());
    }

    #[test]
    fn test_numbered_list() {
        let input = "1. First idea\n2) Second idea\n3: Third idea";
        let items = parse_numbered_list(input);
        assert_eq!(items, vec!["First idea", "Second idea", "Third idea"]);
    }

    #[test]
    fn test_numbered_list_bullets() {
        let input = "- alpha\n* beta\n• gamma";
        assert_eq!(parse_numbered_list(input), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_numbered_list_undercount() {
        // Three items requested, model produced two: keep what was found.
        let input = "Here are the ideas:\n1. Only one\n2. And another";
        let items = parse_numbered_list(input);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_unmarked_lines_fallback() {
        let input = "alpha\n\nbeta\n";
        assert_eq!(parse_numbered_list(input), vec!["alpha", "beta"]);
    }
}
