//! `<tool_call>{...}</tool_call>` blocks in model output.

use std::sync::LazyLock;

use {regex::Regex, serde_json::Value, tracing::debug};

#[allow(clippy::unwrap_used)]
static TOOL_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<tool_call>\s*(\{[\s\S]*?\})\s*</tool_call>").unwrap());

#[allow(clippy::unwrap_used)]
static TOOL_CALL_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<tool_call>[\s\S]*?</tool_call>").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: Value,
}

/// Extract every well-formed tool call, in order.
///
/// A block is skipped when its body is not JSON, has no non-empty `name`, or
/// has no `arguments` key.
pub fn parse_tool_calls(text: &str) -> Vec<ParsedToolCall> {
    TOOL_CALL
        .captures_iter(text)
        .filter_map(|caps| {
            let body = caps.get(1)?.as_str();
            let parsed: Value = match serde_json::from_str(body) {
                Ok(v) => v,
                Err(e) => {
                    debug!(error = %e, "skipping malformed tool call");
                    return None;
                },
            };
            let name = parsed.get("name")?.as_str().filter(|n| !n.is_empty())?;
            let arguments = parsed.get("arguments")?.clone();
            Some(ParsedToolCall {
                name: name.to_string(),
                arguments,
            })
        })
        .collect()
}

/// The text with all tool-call blocks removed, trimmed.
pub fn remove_tool_calls(text: &str) -> String {
    TOOL_CALL_BLOCK.replace_all(text, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    #[test]
    fn parses_multiple_calls_in_order() {
        let text = concat!(
            "Sure.\n",
            "<tool_call>\n{\"name\": \"whoami\", \"arguments\": {}}\n</tool_call>\n",
            "<tool_call>{\"name\": \"echo\", \"arguments\": {\"message\": \"hi\"}}</tool_call>",
        );
        let calls = parse_tool_calls(text);
        assert_eq!(calls, vec![
            ParsedToolCall {
                name: "whoami".into(),
                arguments: json!({}),
            },
            ParsedToolCall {
                name: "echo".into(),
                arguments: json!({"message": "hi"}),
            },
        ]);
        assert_eq!(remove_tool_calls(text), "Sure.");
    }

    #[rstest]
    #[case::not_json("<tool_call>{name: echo}</tool_call>")]
    #[case::missing_arguments(r#"<tool_call>{"name": "echo"}</tool_call>"#)]
    #[case::empty_name(r#"<tool_call>{"name": "", "arguments": {}}</tool_call>"#)]
    #[case::unterminated(r#"<tool_call>{"name": "echo", "arguments": {}}"#)]
    fn invalid_blocks_are_skipped(#[case] text: &str) {
        assert!(parse_tool_calls(text).is_empty());
    }

    #[test]
    fn null_arguments_still_count() {
        let calls = parse_tool_calls(r#"<tool_call>{"name": "whoami", "arguments": null}</tool_call>"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, Value::Null);
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(remove_tool_calls("  Hello there!  "), "Hello there!");
        assert!(parse_tool_calls("Hello there!").is_empty());
    }
}
