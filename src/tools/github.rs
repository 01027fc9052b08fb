//! GitHub REST API tools.

use super::{required_str, Tool};
use crate::error::{Result, TroupeError};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::instrument;

const API_BASE: &str = "https://api.github.com";

/// Authenticated GitHub API client shared by the GitHub tools.
pub struct GithubClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

impl GithubClient {
    pub fn new(http: reqwest::Client, token: &str) -> Self {
        Self {
            http,
            token: token.to_string(),
            base_url: API_BASE.to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header(reqwest::header::USER_AGENT, concat!("troupe/", env!("CARGO_PKG_VERSION")))
    }

    #[instrument(skip(self, request))]
    async fn send(&self, path: &str, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request.send().await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let message = body.get("message").and_then(|m| m.as_str()).unwrap_or("request failed");
            return Err(TroupeError::Tool(format!("GitHub {} ({}): {}", path, status, message)));
        }
        Ok(body)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let request = self.request(reqwest::Method::GET, path).query(query);
        self.send(path, request).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let request = self.request(reqwest::Method::POST, path).json(&body);
        self.send(path, request).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GithubOperation {
    SearchRepositories,
    ListRepositories,
    GetRepository,
    ListIssues,
    CreateIssue,
}

impl GithubOperation {
    pub const ALL: [GithubOperation; 5] = [
        GithubOperation::SearchRepositories,
        GithubOperation::ListRepositories,
        GithubOperation::GetRepository,
        GithubOperation::ListIssues,
        GithubOperation::CreateIssue,
    ];
}

pub struct GithubTool {
    operation: GithubOperation,
    client: std::sync::Arc<GithubClient>,
}

impl GithubTool {
    pub fn new(operation: GithubOperation, client: std::sync::Arc<GithubClient>) -> Self {
        Self { operation, client }
    }
}

fn per_page(args: &Value) -> String {
    args.get("limit")
        .and_then(|v| v.as_u64())
        .map(|n| n.clamp(1, 100))
        .unwrap_or(10)
        .to_string()
}

fn summarize_repo(repo: &Value) -> Value {
    json!({
        "full_name": repo["full_name"],
        "description": repo["description"],
        "url": repo["html_url"],
        "stars": repo["stargazers_count"],
        "forks": repo["forks_count"],
        "language": repo["language"],
        "open_issues": repo["open_issues_count"],
        "updated_at": repo["updated_at"],
    })
}

fn summarize_issue(issue: &Value) -> Value {
    json!({
        "number": issue["number"],
        "title": issue["title"],
        "state": issue["state"],
        "user": issue["user"]["login"],
        "url": issue["html_url"],
        "created_at": issue["created_at"],
    })
}

fn summarize_list(items: &Value, summarize: fn(&Value) -> Value) -> String {
    let items = items.as_array().map(|a| a.iter().map(summarize).collect()).unwrap_or_default();
    Value::Array(items).to_string()
}

/// Validate an `owner/name` repository argument.
fn repo_arg(args: &Value) -> Result<&str> {
    let repo = required_str(args, "repo")?;
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => Ok(repo),
        _ => Err(TroupeError::InvalidArgument(format!(
            "Repository must look like owner/name, got '{}'",
            repo
        ))),
    }
}

#[async_trait]
impl Tool for GithubTool {
    fn name(&self) -> &str {
        match self.operation {
            GithubOperation::SearchRepositories => "search_repositories",
            GithubOperation::ListRepositories => "list_repositories",
            GithubOperation::GetRepository => "get_repository",
            GithubOperation::ListIssues => "list_issues",
            GithubOperation::CreateIssue => "create_issue",
        }
    }

    fn description(&self) -> &str {
        match self.operation {
            GithubOperation::SearchRepositories => "Search GitHub repositories. Returns name, description, stars and URL.",
            GithubOperation::ListRepositories => "List the repositories of the authenticated user.",
            GithubOperation::GetRepository => "Get details of a GitHub repository.",
            GithubOperation::ListIssues => "List issues of a GitHub repository.",
            GithubOperation::CreateIssue => "Create an issue in a GitHub repository.",
        }
    }

    fn parameters(&self) -> Value {
        let repo = json!({"type": "string", "description": "Repository as owner/name"});
        let limit = json!({"type": "integer", "description": "Maximum number of results (default: 10)"});
        match self.operation {
            GithubOperation::SearchRepositories => json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "GitHub search query, e.g. 'agent framework language:rust'"},
                    "sort": {"type": "string", "enum": ["stars", "forks", "updated"]},
                    "limit": limit
                },
                "required": ["query"]
            }),
            GithubOperation::ListRepositories => json!({
                "type": "object",
                "properties": { "limit": limit }
            }),
            GithubOperation::GetRepository => json!({
                "type": "object",
                "properties": { "repo": repo },
                "required": ["repo"]
            }),
            GithubOperation::ListIssues => json!({
                "type": "object",
                "properties": {
                    "repo": repo,
                    "state": {"type": "string", "enum": ["open", "closed", "all"]},
                    "limit": limit
                },
                "required": ["repo"]
            }),
            GithubOperation::CreateIssue => json!({
                "type": "object",
                "properties": {
                    "repo": repo,
                    "title": {"type": "string"},
                    "body": {"type": "string"}
                },
                "required": ["repo", "title"]
            }),
        }
    }

    async fn invoke(&self, args: Value) -> Result<String> {
        match self.operation {
            GithubOperation::SearchRepositories => {
                let query = required_str(&args, "query")?;
                let mut params = vec![("q", query.to_string()), ("per_page", per_page(&args))];
                if let Some(sort) = args.get("sort").and_then(|v| v.as_str()) {
                    params.push(("sort", sort.to_string()));
                }
                let body = self.client.get("/search/repositories", &params).await?;
                Ok(summarize_list(&body["items"], summarize_repo))
            }
            GithubOperation::ListRepositories => {
                let body = self
                    .client
                    .get("/user/repos", &[("per_page", per_page(&args)), ("sort", "updated".to_string())])
                    .await?;
                Ok(summarize_list(&body, summarize_repo))
            }
            GithubOperation::GetRepository => {
                let repo = repo_arg(&args)?;
                let body = self.client.get(&format!("/repos/{}", repo), &[]).await?;
                Ok(summarize_repo(&body).to_string())
            }
            GithubOperation::ListIssues => {
                let repo = repo_arg(&args)?;
                let state = args.get("state").and_then(|v| v.as_str()).unwrap_or("open");
                let body = self
                    .client
                    .get(
                        &format!("/repos/{}/issues", repo),
                        &[("state", state.to_string()), ("per_page", per_page(&args))],
                    )
                    .await?;
                Ok(summarize_list(&body, summarize_issue))
            }
            GithubOperation::CreateIssue => {
                let repo = repo_arg(&args)?;
                let title = required_str(&args, "title")?;
                let body = args.get("body").and_then(|v| v.as_str()).unwrap_or_default();
                let created = self
                    .client
                    .post(&format!("/repos/{}/issues", repo), json!({"title": title, "body": body}))
                    .await?;
                Ok(summarize_issue(&created).to_string())
            }
        }
    }
}
