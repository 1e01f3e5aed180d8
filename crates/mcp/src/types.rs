//! Wire types for the line-delimited JSON-RPC protocol spoken with the sandboxed server.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

pub const JSONRPC_VERSION: &str = "2.0";

/// A single JSON-RPC envelope, in either direction.
///
/// Requests carry `method`/`params`, responses carry `result` or `error`.
/// Every outbound message carries an id; inbound lines without one are still
/// parsed so they can reach the generic message observer. Inbound parsing is
/// lenient: `jsonrpc` may be missing and `error` may be any JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_error"
    )]
    pub error: Option<JsonRpcError>,
}

/// Accept `"error": "boom"` and other non-object errors. Anything without a
/// string `message` keeps the raw value in `data` and an empty message.
fn lenient_error<'de, D>(deserializer: D) -> Result<Option<JsonRpcError>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    let error = serde_json::from_value(value.clone()).unwrap_or(JsonRpcError {
        code: 0,
        message: String::new(),
        data: Some(value),
    });
    Ok(Some(error))
}

impl JsonRpcMessage {
    pub fn request(id: u64, method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id),
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn response(id: u64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn error_response(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Tool list carried by a `tools/list` response, if this is one.
    pub fn tools(&self) -> Option<Vec<Tool>> {
        let tools = self.result.as_ref()?.get("tools")?;
        serde_json::from_value(tools.clone()).ok()
    }

    /// Tool-call result carried by a `tools/call` response, if this is one.
    pub fn call_result(&self) -> Option<CallToolResult> {
        let result = self.result.as_ref()?;
        result.get("content")?;
        serde_json::from_value(result.clone()).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A tool exposed by the sandboxed server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallParams {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    /// Concatenated text of all `text` items.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text.as_str()),
                ContentItem::Other(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One item of tool output. Non-text kinds (images, resources) are kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentItem {
    Text { text: String },
    Other(serde_json::Value),
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

impl Serialize for ContentItem {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text { text } => {
                serde_json::json!({ "type": "text", "text": text }).serialize(serializer)
            },
            Self::Other(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ContentItem {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let is_text = value.get("type").and_then(|t| t.as_str()) == Some("text");
        match value.get("text").and_then(|t| t.as_str()) {
            Some(text) if is_text => Ok(Self::text(text)),
            _ => Ok(Self::Other(value)),
        }
    }
}

/// How to launch the target program directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Files to materialize in the sandbox, keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileSet(BTreeMap<String, String>);

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, contents: impl Into<String>) {
        self.0.insert(path.into(), contents.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FileSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_as_single_envelope() {
        let req = JsonRpcMessage::request(7, "tools/list", serde_json::json!({}));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list", "params": {}})
        );
    }

    #[test]
    fn classifies_tools_list_response() {
        let msg: JsonRpcMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[{"name":"echo","inputSchema":{"type":"object"}}]}}"#,
        )
        .unwrap();
        let tools = msg.tools().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        assert!(tools[0].description.is_none());
        assert!(msg.call_result().is_none());
    }

    #[test]
    fn classifies_call_result_and_keeps_unknown_content() {
        let msg: JsonRpcMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"hi"},{"type":"image","data":"AA=="}]}}"#,
        )
        .unwrap();
        let result = msg.call_result().unwrap();
        assert_eq!(result.content[0], ContentItem::text("hi"));
        assert!(matches!(result.content[1], ContentItem::Other(_)));
        assert_eq!(result.text(), "hi");
        assert!(msg.tools().is_none());

        let back = serde_json::to_value(&result.content[0]).unwrap();
        assert_eq!(back, serde_json::json!({"type": "text", "text": "hi"}));
    }

    #[test]
    fn error_response_without_code_parses() {
        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"error":{"message":"nope"}}"#).unwrap();
        let err = msg.error.unwrap();
        assert_eq!(err.code, 0);
        assert_eq!(err.message, "nope");
    }

    #[test]
    fn loose_envelopes_still_parse() {
        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"id":1,"result":{"content":[]}}"#).unwrap();
        assert_eq!(msg.jsonrpc, "");
        assert!(msg.call_result().is_some());

        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":2,"error":"boom"}"#).unwrap();
        let err = msg.error.unwrap();
        assert!(err.message.is_empty());
        assert_eq!(err.data, Some(serde_json::json!("boom")));

        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"error":{"message":7}}"#).unwrap();
        assert!(msg.error.unwrap().message.is_empty());

        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":4,"result":{},"error":null}"#).unwrap();
        assert!(msg.error.is_none());
    }

    #[test]
    fn file_set_collects_sorted() {
        let files: FileSet = [("index.js", "x"), ("package.json", "{}")]
            .into_iter()
            .collect();
        let paths: Vec<&str> = files.iter().map(|(p, _)| p).collect();
        assert_eq!(paths, ["index.js", "package.json"]);
        assert_eq!(files.get("package.json"), Some("{}"));
    }
}
