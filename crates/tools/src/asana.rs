//! Asana REST client (API v1.0, bearer token).
//!
//! Only the read endpoints the tools need. List responses wrap entries in
//! `data`; entries that fail to parse are skipped rather than failing the
//! whole call.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://app.asana.com/api/1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub gid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub gid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub gid: String,
    pub name: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub gid: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AsanaError {
    #[error("failed to make request: {0}")]
    Request(String),

    #[error("API request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("no workspaces found")]
    NoWorkspaces,

    #[error("multiple workspaces found ({0}), workspace_gid must be specified")]
    AmbiguousWorkspace(usize),
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// Parse a `{ "data": [...] }` body, keeping only well-formed entries.
fn parse_list<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, AsanaError> {
    let response: ListResponse =
        serde_json::from_str(body).map_err(|e| AsanaError::Parse(e.to_string()))?;
    Ok(response
        .data
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

pub struct AsanaClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AsanaClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<T>, AsanaError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%path, "Asana request");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| AsanaError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AsanaError::Request(e.to_string()))?;
        if status != reqwest::StatusCode::OK {
            return Err(AsanaError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_list(&body)
    }

    pub async fn workspaces(&self) -> Result<Vec<Workspace>, AsanaError> {
        self.get_list("/workspaces", &[]).await
    }

    /// `workspace_gid` if given, else the only workspace the key can see.
    pub async fn resolve_workspace(&self, workspace_gid: Option<&str>) -> Result<String, AsanaError> {
        if let Some(gid) = workspace_gid.filter(|g| !g.is_empty()) {
            return Ok(gid.to_string());
        }
        let mut workspaces = self.workspaces().await?;
        match workspaces.len() {
            0 => Err(AsanaError::NoWorkspaces),
            1 => Ok(workspaces.remove(0).gid),
            n => Err(AsanaError::AmbiguousWorkspace(n)),
        }
    }

    pub async fn list_projects(&self, workspace_gid: Option<&str>) -> Result<Vec<Project>, AsanaError> {
        let workspace = self.resolve_workspace(workspace_gid).await?;
        self.get_list(&format!("/workspaces/{workspace}/projects"), &[]).await
    }

    /// Incomplete tasks in a project.
    pub async fn list_project_tasks(&self, project_gid: &str) -> Result<Vec<Task>, AsanaError> {
        self.get_list(
            &format!("/projects/{project_gid}/tasks"),
            &[("completed_since", "now")],
        )
        .await
    }

    /// Incomplete tasks assigned to a user.
    pub async fn list_user_tasks(
        &self,
        assignee_gid: &str,
        workspace_gid: Option<&str>,
    ) -> Result<Vec<Task>, AsanaError> {
        let workspace = self.resolve_workspace(workspace_gid).await?;
        self.get_list(
            "/tasks",
            &[
                ("assignee", assignee_gid),
                ("workspace", workspace.as_str()),
                ("completed_since", "now"),
            ],
        )
        .await
    }

    pub async fn list_users(&self, workspace_gid: Option<&str>) -> Result<Vec<User>, AsanaError> {
        let workspace = self.resolve_workspace(workspace_gid).await?;
        self.get_list("/users", &[("workspace", workspace.as_str())]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    #[test]
    fn malformed_entries_are_skipped() {
        let projects: Vec<Project> = parse_list(
            r#"{"data": [{"gid": "1", "name": "Roadmap"}, {"gid": 7}, {"gid": "2", "name": "Ops"}]}"#,
        )
        .unwrap();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[1].name, "Ops");
    }

    #[test]
    fn non_json_body_is_parse_error() {
        assert!(matches!(parse_list::<Task>("<html>"), Err(AsanaError::Parse(_))));
    }

    #[test]
    fn error_messages() {
        assert_eq!(AsanaError::NoWorkspaces.to_string(), "no workspaces found");
        assert_eq!(
            AsanaError::AmbiguousWorkspace(3).to_string(),
            "multiple workspaces found (3), workspace_gid must be specified"
        );
    }

    async fn serve(workspaces: serde_json::Value) -> AsanaClient {
        let app = Router::new()
            .route("/workspaces", get(move || {
                let body = workspaces.clone();
                async move { Json(body) }
            }))
            .route(
                "/workspaces/{gid}/projects",
                get(|Path(gid): Path<String>| async move {
                    Json(serde_json::json!({"data": [{"gid": format!("{gid}-p1"), "name": "Launch"}]}))
                }),
            )
            .route(
                "/tasks",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let name = format!("{}@{}:{}", q["assignee"], q["workspace"], q["completed_since"]);
                    Json(serde_json::json!({"data": [{"gid": "t1", "name": name, "completed": false, "notes": ""}]}))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        AsanaClient::new("key").with_base_url(format!("http://{addr}"))
    }

    #[tokio::test]
    async fn single_workspace_is_default() {
        let client = serve(serde_json::json!({"data": [{"gid": "w1", "name": "Acme"}]})).await;
        let projects = client.list_projects(None).await.unwrap();
        assert_eq!(projects[0].gid, "w1-p1");

        let tasks = client.list_user_tasks("u9", None).await.unwrap();
        assert_eq!(tasks[0].name, "u9@w1:now");
    }

    #[tokio::test]
    async fn several_workspaces_need_explicit_gid() {
        let client = serve(serde_json::json!({"data": [
            {"gid": "w1", "name": "Acme"},
            {"gid": "w2", "name": "Side"}
        ]}))
        .await;
        let err = client.list_projects(None).await.unwrap_err();
        assert!(matches!(err, AsanaError::AmbiguousWorkspace(2)));

        let projects = client.list_projects(Some("w2")).await.unwrap();
        assert_eq!(projects[0].gid, "w2-p1");
    }

    #[tokio::test]
    async fn no_workspaces_is_error() {
        let client = serve(serde_json::json!({"data": []})).await;
        assert!(matches!(
            client.resolve_workspace(None).await,
            Err(AsanaError::NoWorkspaces)
        ));
    }
}
