//! Asana tools exposed to the model.
//!
//! Each tool validates its input, calls the shared client, and returns the
//! result list as JSON. Failures come back as `ToolError`s, which the
//! registry turns into error results the model can read.

use crate::asana::{AsanaClient, AsanaError};
use async_trait::async_trait;
use huddle_core::error::ToolError;
use huddle_core::tool::{Tool, ToolResult};
use serde::Serialize;
use std::sync::Arc;

const WORKSPACE_HINT: &str =
    "The workspace GID (optional - will use default workspace if only one exists)";

fn optional_str<'a>(arguments: &'a serde_json::Value, key: &str) -> Result<Option<&'a str>, ToolError> {
    match &arguments[key] {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) if s.is_empty() => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s.as_str())),
        other => Err(ToolError::InvalidArguments(format!("'{key}' must be a string, got {other}"))),
    }
}

fn required_str<'a>(arguments: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    optional_str(arguments, key)?
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

fn to_result<T: Serialize>(tool: &str, action: &str, outcome: Result<Vec<T>, AsanaError>) -> Result<ToolResult, ToolError> {
    let items = outcome.map_err(|e| ToolError::ExecutionFailed {
        tool_name: tool.to_string(),
        reason: format!("{action}: {e}"),
    })?;
    let data = serde_json::to_value(&items).map_err(|e| ToolError::ExecutionFailed {
        tool_name: tool.to_string(),
        reason: e.to_string(),
    })?;
    Ok(ToolResult::json(data))
}

pub struct ListProjectsTool {
    client: Arc<AsanaClient>,
}

impl ListProjectsTool {
    pub fn new(client: Arc<AsanaClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for ListProjectsTool {
    fn name(&self) -> &str {
        "list_asana_projects"
    }

    fn description(&self) -> &str {
        "List projects in an Asana workspace"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "workspace_gid": { "type": "string", "description": WORKSPACE_HINT }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let workspace = optional_str(&arguments, "workspace_gid")?;
        to_result(self.name(), "listing projects", self.client.list_projects(workspace).await)
    }
}

pub struct ListProjectTasksTool {
    client: Arc<AsanaClient>,
}

impl ListProjectTasksTool {
    pub fn new(client: Arc<AsanaClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for ListProjectTasksTool {
    fn name(&self) -> &str {
        "list_asana_project_tasks"
    }

    fn description(&self) -> &str {
        "List incomplete tasks in an Asana project"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "project_gid": { "type": "string", "description": "The project GID to list tasks from" }
            },
            "required": ["project_gid"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let project = required_str(&arguments, "project_gid")?;
        to_result(self.name(), "listing project tasks", self.client.list_project_tasks(project).await)
    }
}

pub struct ListUserTasksTool {
    client: Arc<AsanaClient>,
}

impl ListUserTasksTool {
    pub fn new(client: Arc<AsanaClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for ListUserTasksTool {
    fn name(&self) -> &str {
        "list_asana_user_tasks"
    }

    fn description(&self) -> &str {
        "List incomplete tasks assigned to a user in Asana"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "assignee_gid": { "type": "string", "description": "The user GID to get assigned tasks for" },
                "workspace_gid": { "type": "string", "description": WORKSPACE_HINT }
            },
            "required": ["assignee_gid"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let assignee = required_str(&arguments, "assignee_gid")?;
        let workspace = optional_str(&arguments, "workspace_gid")?;
        to_result(
            self.name(),
            "listing user tasks",
            self.client.list_user_tasks(assignee, workspace).await,
        )
    }
}

pub struct ListUsersTool {
    client: Arc<AsanaClient>,
}

impl ListUsersTool {
    pub fn new(client: Arc<AsanaClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for ListUsersTool {
    fn name(&self) -> &str {
        "list_asana_users"
    }

    fn description(&self) -> &str {
        "List users in an Asana workspace to get their GIDs for other operations"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "workspace_gid": { "type": "string", "description": WORKSPACE_HINT }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let workspace = optional_str(&arguments, "workspace_gid")?;
        to_result(self.name(), "listing users", self.client.list_users(workspace).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_client() -> Arc<AsanaClient> {
        // Port 9 (discard) on localhost; nothing answers.
        Arc::new(AsanaClient::new("key").with_base_url("http://127.0.0.1:9"))
    }

    #[tokio::test]
    async fn missing_required_argument_is_invalid() {
        let tool = ListProjectTasksTool::new(unreachable_client());
        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn wrong_argument_type_is_invalid() {
        let tool = ListUserTasksTool::new(unreachable_client());
        let err = tool
            .execute(serde_json::json!({"assignee_gid": 12}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("assignee_gid"));
    }

    #[tokio::test]
    async fn transport_failure_is_execution_error() {
        let tool = ListProjectsTool::new(unreachable_client());
        let err = tool
            .execute(serde_json::json!({"workspace_gid": "w1"}))
            .await
            .unwrap_err();
        match err {
            ToolError::ExecutionFailed { tool_name, reason } => {
                assert_eq!(tool_name, "list_asana_projects");
                assert!(reason.starts_with("listing projects"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn schemas_mark_required_fields() {
        let client = unreachable_client();
        let tasks = ListUserTasksTool::new(client.clone()).parameters_schema();
        assert_eq!(tasks["required"][0], "assignee_gid");
        let users = ListUsersTool::new(client).parameters_schema();
        assert!(users.get("required").is_none());
    }

    #[test]
    fn empty_optional_is_absent() {
        let args = serde_json::json!({"workspace_gid": ""});
        assert_eq!(optional_str(&args, "workspace_gid").unwrap(), None);
    }
}
