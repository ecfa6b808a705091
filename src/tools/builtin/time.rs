//! `builtin-time` provider
//!
//! Current wall-clock time, optionally shifted to a fixed UTC offset and
//! rendered with a strftime pattern.

use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use chrono::{FixedOffset, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, ToolmeshError};
use crate::mcp::types::{CallToolResponse, McpTool};
use crate::tools::builtin::{parse_params, BuiltinProvider};

pub const TIME_PROVIDER_ID: &str = "builtin-time";
pub const TOOL_GET_CURRENT_TIME: &str = "get_current_time";
pub const TOOL_GET_UNIX_TIMESTAMP: &str = "get_unix_timestamp";

/// Clock tools.
#[derive(Debug, Default)]
pub struct TimeProvider;

impl TimeProvider {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Default, Deserialize)]
struct CurrentTimeParams {
    #[serde(default)]
    utc_offset: Option<String>,
    #[serde(default)]
    format: Option<String>,
}

/// Parse `+HH:MM`, `-HH:MM`, `+HHMM`, `Z` or `UTC`.
fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn current_time(params: CurrentTimeParams) -> CallToolResponse {
    let offset = match params.utc_offset.as_deref() {
        None => FixedOffset::east_opt(0),
        Some(raw) => match parse_offset(raw) {
            Some(offset) => Some(offset),
            None => {
                return CallToolResponse::error(format!(
                    "Invalid utc_offset '{}': expected +HH:MM or -HH:MM",
                    raw
                ))
            }
        },
    };
    let Some(offset) = offset else {
        return CallToolResponse::error("Invalid utc_offset");
    };
    let now = Utc::now().with_timezone(&offset);

    match params.format.as_deref() {
        None => CallToolResponse::text(now.to_rfc3339()),
        Some(pattern) => {
            let items: Vec<Item<'_>> = StrftimeItems::new(pattern).collect();
            if items.iter().any(|item| matches!(item, Item::Error)) {
                return CallToolResponse::error(format!("Invalid format string '{}'", pattern));
            }
            CallToolResponse::text(now.format_with_items(items.into_iter()).to_string())
        }
    }
}

#[async_trait]
impl BuiltinProvider for TimeProvider {
    fn id(&self) -> &str {
        TIME_PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Time"
    }

    fn list_tools(&self) -> Vec<McpTool> {
        vec![
            McpTool::new(
                TOOL_GET_CURRENT_TIME,
                "Returns the current date and time. Defaults to RFC 3339 in UTC.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "utc_offset": {
                            "type": "string",
                            "description": "Fixed offset from UTC such as +05:30 or -08:00"
                        },
                        "format": {
                            "type": "string",
                            "description": "strftime pattern, e.g. %Y-%m-%d %H:%M"
                        }
                    }
                }),
            ),
            McpTool::new(
                TOOL_GET_UNIX_TIMESTAMP,
                "Returns the number of seconds since the Unix epoch.",
                serde_json::json!({ "type": "object", "properties": {} }),
            ),
        ]
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResponse> {
        match name {
            TOOL_GET_CURRENT_TIME => Ok(current_time(parse_params(arguments)?)),
            TOOL_GET_UNIX_TIMESTAMP => Ok(CallToolResponse::text(Utc::now().timestamp().to_string())),
            other => Err(ToolmeshError::Tool(format!("Unknown tool: {}", other)).into()),
        }
    }
}
