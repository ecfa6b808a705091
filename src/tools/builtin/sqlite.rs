//! `builtin-sqlite` provider
//!
//! Runs SQL against a real embedded SQLite database. Statements execute on
//! the blocking pool so a slow query never stalls the async runtime.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Result, ToolmeshError};
use crate::mcp::types::{
    CallToolResponse, McpTool, Resource, ResourceContents, TextResourceContents,
};
use crate::tools::builtin::{parse_params, BuiltinProvider};

pub const SQLITE_PROVIDER_ID: &str = "builtin-sqlite";
pub const TOOL_EXECUTE: &str = "execute";
pub const TOOL_QUERY: &str = "query";
pub const SCHEMA_RESOURCE_URI: &str = "schema://tables";

/// SQL tools over one database connection.
#[derive(Debug, Clone)]
pub struct SqliteProvider {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Deserialize)]
struct SqlParams {
    sql: String,
    #[serde(default)]
    params: Vec<Value>,
}

impl SqliteProvider {
    /// Open (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::Storage`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(ToolmeshError::from)?;
        Ok(Self::from_connection(conn))
    }

    /// Private in-memory database, discarded with the provider.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::Storage`] if SQLite cannot allocate it.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(ToolmeshError::from)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| ToolmeshError::Storage("sqlite connection lock poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| ToolmeshError::Tool(format!("sqlite task failed: {}", e)))?
    }

    async fn execute(&self, params: SqlParams) -> Result<CallToolResponse> {
        let bound = bind_params(&params.params)?;
        self.with_connection(move |conn| {
            Ok(match conn.execute(&params.sql, params_from_iter(bound)) {
                Ok(changed) => CallToolResponse::text(format!("{} row(s) affected", changed)),
                Err(e) => CallToolResponse::error(format!("SQL error: {}", e)),
            })
        })
        .await
    }

    async fn query(&self, params: SqlParams) -> Result<CallToolResponse> {
        let bound = bind_params(&params.params)?;
        self.with_connection(move |conn| {
            Ok(match query_rows(conn, &params.sql, bound) {
                Ok(rows) => CallToolResponse::text(serde_json::to_string_pretty(&rows)?),
                Err(e) => CallToolResponse::error(format!("SQL error: {}", e)),
            })
        })
        .await
    }

    async fn schema(&self) -> Result<String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )
                .map_err(ToolmeshError::from)?;
            let tables = stmt
                .query_map([], |row| {
                    Ok(serde_json::json!({
                        "name": row.get::<_, String>(0)?,
                        "sql": row.get::<_, Option<String>>(1)?,
                    }))
                })
                .map_err(ToolmeshError::from)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(ToolmeshError::from)?;
            Ok(serde_json::to_string_pretty(&tables)?)
        })
        .await
    }
}

fn bind_params(values: &[Value]) -> Result<Vec<SqlValue>> {
    values
        .iter()
        .map(|value| match value {
            Value::Null => Ok(SqlValue::Null),
            Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Ok(SqlValue::Integer(i)),
                (None, Some(f)) => Ok(SqlValue::Real(f)),
                _ => Err(ToolmeshError::Tool(format!("unsupported number parameter: {}", n)).into()),
            },
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            other => Ok(SqlValue::Text(other.to_string())),
        })
        .collect()
}

fn column_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

fn query_rows(
    conn: &Connection,
    sql: &str,
    bound: Vec<SqlValue>,
) -> std::result::Result<Vec<Value>, rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(bound))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut object = Map::new();
        for (index, column) in columns.iter().enumerate() {
            object.insert(column.clone(), column_to_json(row.get_ref(index)?));
        }
        out.push(Value::Object(object));
    }
    Ok(out)
}

fn sql_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "sql": { "type": "string", "description": "One SQL statement" },
            "params": {
                "type": "array",
                "description": "Positional values bound to ? placeholders"
            }
        },
        "required": ["sql"]
    })
}

#[async_trait]
impl BuiltinProvider for SqliteProvider {
    fn id(&self) -> &str {
        SQLITE_PROVIDER_ID
    }

    fn name(&self) -> &str {
        "SQLite"
    }

    fn list_tools(&self) -> Vec<McpTool> {
        vec![
            McpTool::new(
                TOOL_EXECUTE,
                "Executes a SQL statement that does not return rows and reports the number of rows changed.",
                sql_schema(),
            ),
            McpTool::new(
                TOOL_QUERY,
                "Runs a SQL query and returns the rows as a JSON array of objects.",
                sql_schema(),
            ),
        ]
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResponse> {
        match name {
            TOOL_EXECUTE => self.execute(parse_params(arguments)?).await,
            TOOL_QUERY => self.query(parse_params(arguments)?).await,
            other => Err(ToolmeshError::Tool(format!("Unknown tool: {}", other)).into()),
        }
    }

    fn list_resources(&self) -> Vec<Resource> {
        vec![Resource {
            uri: SCHEMA_RESOURCE_URI.to_string(),
            name: "tables".to_string(),
            description: Some("Tables in the database with their CREATE statements".to_string()),
            mime_type: Some("application/json".to_string()),
        }]
    }

    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        if uri != SCHEMA_RESOURCE_URI {
            return Err(ToolmeshError::Tool(format!("resource not found: {}", uri)).into());
        }
        Ok(vec![ResourceContents::Text(TextResourceContents {
            uri: uri.to_string(),
            mime_type: Some("application/json".to_string()),
            text: self.schema().await?,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> SqliteProvider {
        let provider = SqliteProvider::in_memory().unwrap();
        provider
            .call_tool(
                TOOL_EXECUTE,
                json!({"sql": "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT, score REAL)"}),
            )
            .await
            .unwrap();
        provider
    }

    #[tokio::test]
    async fn test_execute_reports_rows_affected() {
        let provider = seeded().await;
        let result = provider
            .call_tool(
                TOOL_EXECUTE,
                json!({"sql": "INSERT INTO notes (body, score) VALUES (?, ?), (?, ?)", "params": ["a", 1.5, "b", 2]}),
            )
            .await
            .unwrap();
        assert!(!result.is_error, "{}", result.text_content());
        assert_eq!(result.text_content(), "2 row(s) affected");
    }

    #[tokio::test]
    async fn test_query_returns_rows_as_objects() {
        let provider = seeded().await;
        provider
            .call_tool(
                TOOL_EXECUTE,
                json!({"sql": "INSERT INTO notes (body, score) VALUES ('hello', NULL)"}),
            )
            .await
            .unwrap();

        let result = provider
            .call_tool(TOOL_QUERY, json!({"sql": "SELECT id, body, score FROM notes WHERE body = ?", "params": ["hello"]}))
            .await
            .unwrap();
        let rows: Vec<Value> = serde_json::from_str(&result.text_content()).unwrap();
        assert_eq!(rows, vec![json!({"id": 1, "body": "hello", "score": null})]);
    }

    #[tokio::test]
    async fn test_sql_errors_are_error_results() {
        let provider = seeded().await;
        let result = provider
            .call_tool(TOOL_QUERY, json!({"sql": "SELECT * FROM missing"}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.text_content().starts_with("SQL error"));
    }

    #[tokio::test]
    async fn test_missing_sql_is_invalid_parameters() {
        let provider = seeded().await;
        let err = provider.call_tool(TOOL_QUERY, json!({})).await.unwrap_err();
        assert!(err.to_string().contains("Invalid parameters"));
    }

    #[tokio::test]
    async fn test_schema_resource_lists_tables() {
        let provider = seeded().await;
        let contents = provider.read_resource(SCHEMA_RESOURCE_URI).await.unwrap();
        let ResourceContents::Text(text) = &contents[0] else {
            panic!("expected text contents");
        };
        assert!(text.text.contains("notes"));
        assert!(provider.read_resource("schema://other").await.is_err());
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/builtin.db");
        SqliteProvider::open(&path)
            .unwrap()
            .call_tool(TOOL_EXECUTE, json!({"sql": "CREATE TABLE t (x INTEGER)"}))
            .await
            .unwrap();

        let reopened = SqliteProvider::open(&path).unwrap();
        let result = reopened
            .call_tool(TOOL_QUERY, json!({"sql": "SELECT count(*) AS n FROM t"}))
            .await
            .unwrap();
        assert!(result.text_content().contains("\"n\": 0"));
    }
}
