//! Reddit REST adapter
//!
//! Script-app OAuth (password grant) plus the four calls the crawl needs.
//! All traffic goes through the agent's [`ThrottledTransport`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};

use super::transport::ThrottledTransport;
use crate::config::PlatformConfig;
use crate::domain::{Comment, ContentItem, Credentials, ReplyHandle};
use crate::error::{PilotError, Result};
use crate::platform::PlatformClient;

/// Refresh the token this long before the server says it expires
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Thing>,
}

#[derive(Debug, Deserialize)]
struct Thing {
    kind: String,
    data: Value,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    created_utc: f64,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    permalink: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentData {
    id: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    replies: Value,
}

pub struct RedditClient {
    credentials: Credentials,
    transport: Arc<ThrottledTransport>,
    auth_url: String,
    api_url: String,
    token: Mutex<Option<AccessToken>>,
}

impl RedditClient {
    pub fn new(
        credentials: Credentials,
        transport: Arc<ThrottledTransport>,
        platform: &PlatformConfig,
    ) -> Self {
        Self {
            credentials,
            transport,
            auth_url: platform.auth_url.clone(),
            api_url: platform.api_url.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < current.expires_at {
                return Ok(current.value.clone());
            }
        }

        debug!("Requesting access token for /u/{}", self.credentials.username);
        let request = self
            .transport
            .request(Method::POST, &self.auth_url)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ]);
        let response = self.transport.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PilotError::Auth(format!(
                "token request for /u/{} failed: status={}",
                self.credentials.username, status
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| PilotError::Auth(format!("invalid token response: {}", e)))?;
        let value = body.access_token.clone();
        *token = Some(AccessToken {
            value: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        });

        Ok(value)
    }

    /// Authorized API call; any non-success status becomes an error
    async fn send_api(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        form: Option<&[(&str, String)]>,
    ) -> Result<Response> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.api_url, path);

        let mut req = self
            .transport
            .request(method.clone(), &url)
            .bearer_auth(token)
            .query(query);
        if let Some(form) = form {
            req = req.form(form);
        }

        let resp = self.transport.send(req).await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        if status == StatusCode::UNAUTHORIZED {
            // Revoked before its expiry; the next call fetches a fresh one
            *self.token.lock().await = None;
            return Err(PilotError::Auth(format!(
                "{} {} rejected the access token for /u/{}",
                method, path, self.credentials.username
            )));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PilotError::Platform(format!(
                "rate limited for {} {}",
                method, path
            )));
        }

        let text = resp.text().await.unwrap_or_default();
        Err(PilotError::Platform(format!(
            "{} {} failed: status={} body={}",
            method,
            path,
            status,
            truncate(&text, 200)
        )))
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        form: Option<&[(&str, String)]>,
    ) -> Result<Value> {
        let resp = self.send_api(method, path, query, form).await?;
        let text = resp.text().await?;
        parse_body(path, &text)
    }
}

#[async_trait]
impl PlatformClient for RedditClient {
    #[instrument(skip(self), level = "debug")]
    async fn search(&self, community: &str, term: &str, limit: usize) -> Result<Vec<ContentItem>> {
        let path = format!("/r/{}/search", community);
        let query = [
            ("q", term.to_string()),
            ("restrict_sr", "1".to_string()),
            ("sort", "relevance".to_string()),
            ("t", "all".to_string()),
            ("type", "link".to_string()),
            ("limit", limit.to_string()),
            ("raw_json", "1".to_string()),
        ];
        let value = self.request_json(Method::GET, &path, &query, None).await?;
        let mut items = parse_search_listing(value)?;
        items.truncate(limit);
        Ok(items)
    }

    #[instrument(skip(self), level = "debug")]
    async fn comments(&self, item_id: &str) -> Result<Vec<Comment>> {
        let path = format!("/comments/{}", item_id);
        let query = [("sort", "top".to_string()), ("raw_json", "1".to_string())];
        let value = self.request_json(Method::GET, &path, &query, None).await?;
        parse_comment_page(value)
    }

    #[instrument(skip(self, text), level = "debug")]
    async fn reply(&self, item_id: &str, text: &str) -> Result<ReplyHandle> {
        let form = [
            ("api_type", "json".to_string()),
            ("thing_id", format!("t3_{}", item_id)),
            ("text", text.to_string()),
        ];
        let resp = self
            .send_api(Method::POST, "/api/comment", &[], Some(&form))
            .await?;

        // Accepted: the comment may be live even if the answer is unreadable
        let text = resp
            .text()
            .await
            .map_err(|e| PilotError::ReplyUnconfirmed(format!("reply body unreadable: {}", e)))?;
        let value = parse_body("/api/comment", &text)
            .map_err(|e| PilotError::ReplyUnconfirmed(e.to_string()))?;
        parse_reply(&value)
    }

    #[instrument(skip(self), level = "debug")]
    async fn upvote(&self, comment_id: &str) -> Result<()> {
        let form = [
            ("id", format!("t1_{}", comment_id)),
            ("dir", "1".to_string()),
        ];
        self.request_json(Method::POST, "/api/vote", &[], Some(&form))
            .await?;
        Ok(())
    }
}

fn parse_body(path: &str, text: &str) -> Result<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text)
        .map_err(|e| PilotError::Platform(format!("invalid JSON from {}: {}", path, e)))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn timestamp(secs: f64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs.trunc() as i64, 0)
        .ok_or_else(|| PilotError::Platform(format!("invalid created_utc {}", secs)))
}

fn parse_search_listing(value: Value) -> Result<Vec<ContentItem>> {
    let listing: Listing = serde_json::from_value(value)?;
    let mut items = Vec::new();

    for thing in listing.data.children {
        if thing.kind != "t3" {
            continue;
        }
        let post: PostData = serde_json::from_value(thing.data)?;
        items.push(ContentItem {
            created_at: timestamp(post.created_utc)?,
            id: post.id,
            title: post.title,
            body: post.selftext,
            score: post.score,
            permalink: post.permalink,
        });
    }

    Ok(items)
}

/// `/comments/{id}` answers `[post_listing, comment_listing]`
fn parse_comment_page(value: Value) -> Result<Vec<Comment>> {
    let Value::Array(mut pages) = value else {
        return Err(PilotError::Platform(
            "comment page is not a two-listing array".to_string(),
        ));
    };
    if pages.len() < 2 {
        return Err(PilotError::Platform(
            "comment page is missing the comment listing".to_string(),
        ));
    }

    let listing: Listing = serde_json::from_value(pages.swap_remove(1))?;
    let mut out = Vec::new();
    flatten_comments(listing.data.children, &mut out)?;
    Ok(out)
}

/// Depth-first flatten; "more" stubs are dropped rather than expanded
fn flatten_comments(children: Vec<Thing>, out: &mut Vec<Comment>) -> Result<()> {
    for thing in children {
        if thing.kind != "t1" {
            continue;
        }
        let data: CommentData = serde_json::from_value(thing.data)?;
        let author = data.author.filter(|a| a != "[deleted]");

        out.push(Comment {
            id: data.id,
            author,
            body: data.body,
            score: data.score,
        });

        // An empty string means no replies
        if data.replies.is_object() {
            let nested: Listing = serde_json::from_value(data.replies)?;
            flatten_comments(nested.data.children, out)?;
        }
    }
    Ok(())
}

fn parse_reply(value: &Value) -> Result<ReplyHandle> {
    let json = value
        .get("json")
        .ok_or_else(|| PilotError::ReplyUnconfirmed("reply response missing 'json'".to_string()))?;

    if let Some(errors) = json.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            return Err(PilotError::Platform(format!(
                "reply rejected: {}",
                Value::Array(errors.clone())
            )));
        }
    }

    let data = json
        .pointer("/data/things/0/data")
        .ok_or_else(|| PilotError::ReplyUnconfirmed("reply response missing comment data".to_string()))?;
    let id = data
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| PilotError::ReplyUnconfirmed("reply response missing comment id".to_string()))?;

    Ok(ReplyHandle {
        id: id.to_string(),
        permalink: data
            .get("permalink")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn comment(id: &str, author: &str, body: &str, score: i64, replies: Value) -> Value {
        json!({
            "kind": "t1",
            "data": { "id": id, "author": author, "body": body, "score": score, "replies": replies }
        })
    }

    #[test]
    fn test_parse_search_listing_skips_non_posts() {
        let value = json!({
            "kind": "Listing",
            "data": { "children": [
                { "kind": "t3", "data": {
                    "id": "abc123", "title": "Unit testing a CLI?", "selftext": "Any tips?",
                    "created_utc": 1_792_300_000.0, "score": 12, "permalink": "/r/x/comments/abc123/"
                }},
                { "kind": "t5", "data": { "id": "sub" } }
            ]}
        });

        let items = parse_search_listing(value).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "abc123");
        assert_eq!(items[0].body, "Any tips?");
        assert_eq!(items[0].created_at.timestamp(), 1_792_300_000);
        assert_eq!(items[0].permalink.as_deref(), Some("/r/x/comments/abc123/"));
    }

    #[test]
    fn test_parse_comment_page_flattens_nested_replies() {
        let nested = json!({ "kind": "Listing", "data": { "children": [
            comment("c2", "bob", "agreed", 3, json!("")),
            { "kind": "more", "data": { "count": 4, "children": ["c9"] } }
        ]}});
        let page = json!([
            { "kind": "Listing", "data": { "children": [] } },
            { "kind": "Listing", "data": { "children": [
                comment("c1", "alice", "use fixtures", 10, nested),
                comment("c3", "[deleted]", "[deleted]", 1, json!(""))
            ]}}
        ]);

        let comments = parse_comment_page(page).unwrap();
        let ids: Vec<&str> = comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(comments[2].author, None);
        assert!(!comments[2].is_valid());
    }

    #[test]
    fn test_parse_comment_page_rejects_wrong_shape() {
        assert!(parse_comment_page(json!({})).is_err());
        assert!(parse_comment_page(json!([{}])).is_err());
    }

    #[test]
    fn test_parse_reply() {
        let ok = json!({ "json": { "errors": [], "data": { "things": [
            { "kind": "t1", "data": { "id": "k1", "permalink": "/r/x/comments/abc123/_/k1/" } }
        ]}}});
        let handle = parse_reply(&ok).unwrap();
        assert_eq!(handle.id, "k1");
        assert_eq!(handle.permalink.as_deref(), Some("/r/x/comments/abc123/_/k1/"));

        let rejected = json!({ "json": { "errors": [["RATELIMIT", "try again later", "ratelimit"]] }});
        let err = parse_reply(&rejected).unwrap_err();
        assert!(matches!(err, PilotError::Platform(_)));
        assert!(err.to_string().contains("RATELIMIT"));

        // Accepted but unreadable: the comment may exist
        let empty = json!({ "json": { "errors": [] }});
        assert!(matches!(parse_reply(&empty), Err(PilotError::ReplyUnconfirmed(_))));
        assert!(matches!(parse_reply(&Value::Null), Err(PilotError::ReplyUnconfirmed(_))));
    }
}
