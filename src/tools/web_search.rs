//! Web search through the DuckDuckGo instant answer API.

use super::{required_str, Tool};
use crate::error::{Result, TroupeError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

const ENDPOINT: &str = "https://api.duckduckgo.com/";
const DEFAULT_MAX_RESULTS: usize = 5;

pub struct WebSearchTool {
    http: reqwest::Client,
    endpoint: String,
}

impl WebSearchTool {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            endpoint: ENDPOINT.to_string(),
        }
    }

    #[instrument(skip(self))]
    async fn search(&self, query: &str, max_results: usize) -> Result<String> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .header(reqwest::header::USER_AGENT, concat!("troupe/", env!("CARGO_PKG_VERSION")))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TroupeError::Tool(format!("Search failed with status {}", response.status())));
        }

        let answer: InstantAnswer = response.json().await?;
        Ok(format_results(query, &answer, max_results))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct InstantAnswer {
    heading: String,
    abstract_text: String,
    #[serde(rename = "AbstractURL")]
    abstract_url: String,
    answer: Value,
    related_topics: Vec<RelatedTopic>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RelatedTopic {
    text: Option<String>,
    #[serde(rename = "FirstURL")]
    first_url: Option<String>,
    /// Grouped topics nest one level deep.
    topics: Vec<RelatedTopic>,
}

fn flatten_topics(topics: &[RelatedTopic], out: &mut Vec<(String, String)>) {
    for topic in topics {
        if let (Some(text), Some(url)) = (&topic.text, &topic.first_url) {
            out.push((text.clone(), url.clone()));
        }
        flatten_topics(&topic.topics, out);
    }
}

fn format_results(query: &str, answer: &InstantAnswer, max_results: usize) -> String {
    let mut results = Vec::new();

    if let Some(direct) = answer.answer.as_str().filter(|a| !a.is_empty()) {
        results.push(json!({ "title": "Answer", "body": direct }));
    }
    if !answer.abstract_text.is_empty() {
        results.push(json!({
            "title": answer.heading,
            "href": answer.abstract_url,
            "body": answer.abstract_text,
        }));
    }

    let mut topics = Vec::new();
    flatten_topics(&answer.related_topics, &mut topics);
    for (text, url) in topics {
        if results.len() >= max_results {
            break;
        }
        results.push(json!({ "href": url, "body": text }));
    }
    results.truncate(max_results);

    if results.is_empty() {
        return format!("No results found for '{}'.", query);
    }
    Value::Array(results).to_string()
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web with DuckDuckGo. Returns a JSON list of results with titles, links and snippets."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default: 5)",
                    "default": DEFAULT_MAX_RESULTS
                }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String> {
        let query = required_str(&args, "query")?;
        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|n| n.clamp(1, 20) as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);
        self.search(query, max_results).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "Heading": "Rust (programming language)",
        "AbstractText": "Rust is a general-purpose programming language.",
        "AbstractURL": "https://en.wikipedia.org/wiki/Rust_(programming_language)",
        "Answer": "",
        "RelatedTopics": [
            {"Text": "Cargo - package manager", "FirstURL": "https://duckduckgo.com/Cargo"},
            {"Name": "See also", "Topics": [
                {"Text": "Ferris - mascot", "FirstURL": "https://duckduckgo.com/Ferris"}
            ]}
        ]
    }"#;

    #[test]
    fn test_format_results_flattens_topics() {
        let answer: InstantAnswer = serde_json::from_str(RESPONSE).unwrap();
        let formatted = format_results("rust", &answer, 5);
        let results: Vec<Value> = serde_json::from_str(&formatted).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["title"], "Rust (programming language)");
        assert_eq!(results[2]["href"], "https://duckduckgo.com/Ferris");
    }

    #[test]
    fn test_format_results_limits_and_handles_empty() {
        let answer: InstantAnswer = serde_json::from_str(RESPONSE).unwrap();
        let results: Vec<Value> = serde_json::from_str(&format_results("rust", &answer, 1)).unwrap();
        assert_eq!(results.len(), 1);

        let empty = InstantAnswer::default();
        assert_eq!(format_results("zzz", &empty, 5), "No results found for 'zzz'.");
    }
}
