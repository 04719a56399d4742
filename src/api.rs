use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.mosaic.social/";
pub const CSRF_COOKIE: &str = "csrf_token";
pub const CSRF_HEADER: &str = "X-CSRF-Token";

pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// Provider for unauthenticated browsing.
pub struct AnonymousToken;

impl TokenProvider for AnonymousToken {
    fn token(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    token_provider: Arc<dyn TokenProvider>,
    http: HttpClient,
    user_agent: String,
    base_url: Url,
    cookies: Arc<Jar>,
}

impl Client {
    pub fn new(token_provider: Arc<dyn TokenProvider>, config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("api client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base)?;
        let cookies = Arc::new(Jar::default());
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(Duration::from_secs(20))
                .cookie_provider(cookies.clone())
                .build()?,
        };

        Ok(Client {
            token_provider,
            http,
            user_agent: config.user_agent,
            base_url,
            cookies,
        })
    }

    pub fn list_comments(
        &self,
        post_id: i64,
        page: u32,
        per_page: u32,
        order: &str,
    ) -> Result<Page<Comment>> {
        let path = format!("/api/posts/{}/comments", post_id);
        let params = paging_params(page, per_page, &[("order".into(), order.to_string())]);
        self.fetch_page(&path, &params)
    }

    pub fn list_replies(&self, parent_id: i64, page: u32, per_page: u32) -> Result<Page<Comment>> {
        let path = format!("/api/comments/{}/replies", parent_id);
        let params = paging_params(page, per_page, &[("order".into(), "oldest".into())]);
        self.fetch_page(&path, &params)
    }

    pub fn create_comment(&self, post_id: i64, draft: &CommentDraft) -> Result<Comment> {
        if draft.is_empty() {
            bail!("api: comment draft is empty");
        }
        let path = format!("/api/posts/{}/comments", post_id);
        let resp = self.submit_draft(Method::POST, &path, draft)?;
        resp.json().context("api: decode created comment")
    }

    pub fn update_comment(&self, comment_id: i64, draft: &CommentDraft) -> Result<Comment> {
        let path = format!("/api/comments/{}", comment_id);
        let resp = self.submit_draft(Method::PUT, &path, draft)?;
        resp.json().context("api: decode updated comment")
    }

    pub fn delete_comment(&self, comment_id: i64) -> Result<()> {
        let path = format!("/api/comments/{}", comment_id);
        self.request(Method::DELETE, &path, &[], None)?;
        Ok(())
    }

    pub fn like_comment(&self, comment_id: i64) -> Result<LikeOutcome> {
        let path = format!("/api/comments/{}/like", comment_id);
        let resp = self.request(Method::POST, &path, &[], None)?;
        resp.json().context("api: decode like outcome")
    }

    pub fn unlike_comment(&self, comment_id: i64) -> Result<LikeOutcome> {
        let path = format!("/api/comments/{}/like", comment_id);
        let resp = self.request(Method::DELETE, &path, &[], None)?;
        resp.json().context("api: decode unlike outcome")
    }

    pub fn pin_comment(&self, comment_id: i64, pinned: bool) -> Result<Comment> {
        let path = format!("/api/comments/{}/pin", comment_id);
        let body = json!({ "pinned": pinned });
        let resp = self.request(Method::POST, &path, &[], Some(body))?;
        resp.json().context("api: decode pinned comment")
    }

    pub fn report_comment(&self, comment_id: i64, reason: &str) -> Result<()> {
        if reason.trim().is_empty() {
            bail!("api: report reason is required");
        }
        let path = format!("/api/comments/{}/report", comment_id);
        let body = json!({ "reason": reason });
        self.request(Method::POST, &path, &[], Some(body))?;
        Ok(())
    }

    pub fn list_posts(&self, page: u32, per_page: u32, sort: &str) -> Result<Page<Post>> {
        let params = paging_params(page, per_page, &[("sort".into(), sort.to_string())]);
        self.fetch_page("/api/posts", &params)
    }

    pub fn list_profiles(&self, category: &str) -> Result<Vec<Profile>> {
        let params = vec![("category".to_string(), category.to_string())];
        let resp = self.request(Method::GET, "/api/profiles", &params, None)?;
        resp.json().context("api: decode profiles")
    }

    pub fn lookup_profile(&self, username: &str) -> Result<Option<Profile>> {
        if username.trim().is_empty() {
            bail!("api: username is required");
        }
        let params = vec![("username".to_string(), username.to_string())];
        let url = self.build_url("/api/profiles/lookup", &params)?;
        let mut req = self.http.request(Method::GET, url);
        req = req.header(USER_AGENT, self.user_agent.clone());
        if let Some(token) = self.token_provider.token() {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let resp = req.send()?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check_status(resp)?;
        resp.json().context("api: decode profile lookup")
    }

    pub fn list_groups(&self) -> Result<Vec<Group>> {
        let resp = self.request(Method::GET, "/api/groups", &[], None)?;
        resp.json().context("api: decode groups")
    }

    pub fn join_group(&self, group_id: i64) -> Result<Group> {
        let path = format!("/api/groups/{}/join", group_id);
        let resp = self.request(Method::POST, &path, &[], None)?;
        resp.json().context("api: decode joined group")
    }

    pub fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        if username.trim().is_empty() || password.is_empty() {
            bail!("api: username and password are required");
        }
        let body = json!({ "username": username, "password": password });
        let resp = self.request(Method::POST, "/api/auth/login", &[], Some(body))?;
        resp.json().context("api: decode login response")
    }

    pub fn logout(&self) -> Result<()> {
        self.request(Method::POST, "/api/auth/logout", &[], None)?;
        Ok(())
    }

    pub fn current_user(&self) -> Result<CurrentUser> {
        let resp = self.request(Method::GET, "/api/account/me", &[], None)?;
        resp.json().context("api: decode current user")
    }

    pub fn request_password_change(&self) -> Result<()> {
        self.request(Method::POST, "/api/account/password/request", &[], None)?;
        Ok(())
    }

    pub fn verify_password_change(&self, code: &str) -> Result<()> {
        let body = json!({ "code": code });
        self.request(Method::POST, "/api/account/password/verify", &[], Some(body))?;
        Ok(())
    }

    pub fn commit_password_change(&self, new_password: &str) -> Result<()> {
        let body = json!({ "new_password": new_password });
        self.request(Method::POST, "/api/account/password/commit", &[], Some(body))?;
        Ok(())
    }

    pub fn request_deletion(&self) -> Result<()> {
        self.request(Method::POST, "/api/account/delete/request", &[], None)?;
        Ok(())
    }

    pub fn verify_deletion(&self, code: &str) -> Result<()> {
        let body = json!({ "code": code });
        self.request(Method::POST, "/api/account/delete/verify", &[], Some(body))?;
        Ok(())
    }

    pub fn commit_deletion(&self) -> Result<()> {
        self.request(Method::POST, "/api/account/delete/commit", &[], None)?;
        Ok(())
    }

    fn submit_draft(&self, method: Method, path: &str, draft: &CommentDraft) -> Result<Response> {
        match &draft.media {
            Some(upload) => {
                let mut form = reqwest::blocking::multipart::Form::new()
                    .text("content", draft.content.clone());
                if let Some(parent_id) = draft.parent_id {
                    form = form.text("parent_comment_id", parent_id.to_string());
                }
                for profile_id in &draft.mention_ids {
                    form = form.text("mentions[]", profile_id.to_string());
                }
                for media_id in &draft.remove_media_ids {
                    form = form.text("remove_media_ids[]", media_id.to_string());
                }
                let part = reqwest::blocking::multipart::Part::bytes(upload.bytes.clone())
                    .file_name(upload.filename.clone())
                    .mime_str(&upload.mime)
                    .context("api: attachment mime")?;
                form = form.part(upload.kind.field_name(), part);
                self.request_multipart(method, path, form)
            }
            None => {
                let mut body = json!({ "content": draft.content });
                if let Some(parent_id) = draft.parent_id {
                    body["parent_comment_id"] = json!(parent_id);
                }
                if !draft.mention_ids.is_empty() {
                    body["mentions"] = json!(draft.mention_ids);
                }
                if !draft.remove_media_ids.is_empty() {
                    body["remove_media_ids"] = json!(draft.remove_media_ids);
                }
                self.request(method, path, &[], Some(body))
            }
        }
    }

    fn fetch_page<T>(&self, path: &str, params: &[(String, String)]) -> Result<Page<T>>
    where
        T: DeserializeOwned,
    {
        let resp = self.request(Method::GET, path, params, None)?;
        resp.json().context("api: decode page")
    }

    fn build_url(&self, path: &str, params: &[(String, String)]) -> Result<Url> {
        let mut url = self.base_url.join(path.trim_start_matches('/'))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        body: Option<Value>,
    ) -> Result<Response> {
        let url = self.build_url(path, params)?;
        let mutating = method != Method::GET;
        let mut req = self.http.request(method, url.clone());
        req = req.header(USER_AGENT, self.user_agent.clone());
        if let Some(token) = self.token_provider.token() {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if mutating {
            if let Some(csrf) = self.csrf_token(&url) {
                req = req.header(CSRF_HEADER, csrf);
            }
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        check_status(req.send()?)
    }

    fn request_multipart(
        &self,
        method: Method,
        path: &str,
        form: reqwest::blocking::multipart::Form,
    ) -> Result<Response> {
        let url = self.build_url(path, &[])?;
        let mut req = self.http.request(method, url.clone());
        req = req.header(USER_AGENT, self.user_agent.clone());
        if let Some(token) = self.token_provider.token() {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(csrf) = self.csrf_token(&url) {
            req = req.header(CSRF_HEADER, csrf);
        }
        check_status(req.multipart(form).send()?)
    }

    /// CSRF token is set by the server as a cookie; mutating requests echo
    /// it back in a header.
    fn csrf_token(&self, url: &Url) -> Option<String> {
        let header = self.cookies.cookies(url)?;
        let raw = header.to_str().ok()?;
        for pair in raw.split(';') {
            let pair = pair.trim();
            if let Some(value) = pair.strip_prefix(CSRF_COOKIE) {
                if let Some(value) = value.strip_prefix('=') {
                    return Some(value.to_string());
                }
            }
        }
        None
    }
}

fn check_status(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    match status.as_u16() {
        401 => Err(anyhow!("api: authentication required")),
        403 => Err(anyhow!("api: forbidden")),
        _ => Err(anyhow!(
            "api: {}",
            extract_error_message(&body, status.as_u16())
        )),
    }
}

/// Pulls a human-readable message out of an error body: `error`, then
/// `detail`, then the first entry of the first field-specific array.
pub fn extract_error_message(body: &str, status: u16) -> String {
    let fallback = format!("request failed ({})", status);
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return fallback;
    };
    if let Some(msg) = value.get("error").and_then(Value::as_str) {
        return msg.to_string();
    }
    if let Some(msg) = value.get("detail").and_then(Value::as_str) {
        return msg.to_string();
    }
    if let Some(fields) = value.as_object() {
        for entry in fields.values() {
            if let Some(first) = entry.as_array().and_then(|list| list.first()) {
                if let Some(msg) = first.as_str() {
                    return msg.to_string();
                }
            }
        }
    }
    fallback
}

fn paging_params(page: u32, per_page: u32, extra: &[(String, String)]) -> Vec<(String, String)> {
    let mut params = vec![
        ("page".to_string(), page.to_string()),
        ("per_page".to_string(), per_page.to_string()),
    ];
    params.extend(extra.iter().cloned());
    params
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub has_more: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub profile_picture: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub has_liked: bool,
    #[serde(default)]
    pub reply_count: i64,
    /// Loaded-replies cache. Absence does not mean zero replies; consult
    /// `reply_count`.
    #[serde(default)]
    pub replies: Option<Vec<Comment>>,
    #[serde(default)]
    pub parent_comment: Option<i64>,
    pub user: Author,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default)]
    pub is_owner: Option<bool>,
    #[serde(default)]
    pub is_post_owner: Option<bool>,
    #[serde(default)]
    pub user_can_pin: Option<bool>,
    #[serde(default)]
    pub user_can_edit: Option<bool>,
    #[serde(default)]
    pub user_can_delete: Option<bool>,
}

impl Comment {
    /// Server flags are the sole authority; an absent flag denies.
    pub fn can_edit(&self) -> bool {
        self.user_can_edit.unwrap_or(false)
    }

    pub fn can_delete(&self) -> bool {
        self.user_can_delete.unwrap_or(false)
    }

    pub fn can_pin(&self) -> bool {
        self.user_can_pin.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: i64,
    pub url: String,
    #[serde(default)]
    pub media_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeOutcome {
    pub likes_count: i64,
    pub has_liked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub user: Author,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub profile_picture: String,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub member_count: i64,
    #[serde(default)]
    pub is_member: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub profile_picture: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: CurrentUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    File,
}

impl MediaKind {
    pub fn field_name(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::File => "file",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub kind: MediaKind,
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Outgoing comment or reply, already validated and normalized by the
/// composer.
#[derive(Debug, Clone, Default)]
pub struct CommentDraft {
    pub content: String,
    pub parent_id: Option<i64>,
    pub media: Option<MediaUpload>,
    pub mention_ids: Vec<i64>,
    pub remove_media_ids: Vec<i64>,
}

impl CommentDraft {
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.media.is_none()
    }
}

impl Default for MediaUpload {
    fn default() -> Self {
        Self {
            kind: MediaKind::File,
            filename: String::new(),
            mime: "application/octet-stream".to_string(),
            bytes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_error_field() {
        let body = r#"{"error": "comment not found", "detail": "ignored"}"#;
        assert_eq!(extract_error_message(body, 404), "comment not found");
    }

    #[test]
    fn error_message_falls_back_to_detail() {
        let body = r#"{"detail": "not allowed"}"#;
        assert_eq!(extract_error_message(body, 403), "not allowed");
    }

    #[test]
    fn error_message_reads_field_arrays() {
        let body = r#"{"content": ["must not be blank"]}"#;
        assert_eq!(extract_error_message(body, 422), "must not be blank");
    }

    #[test]
    fn error_message_generic_on_garbage() {
        assert_eq!(extract_error_message("<html>", 500), "request failed (500)");
    }

    #[test]
    fn draft_emptiness_considers_media() {
        let mut draft = CommentDraft {
            content: "   ".into(),
            ..Default::default()
        };
        assert!(draft.is_empty());
        draft.media = Some(MediaUpload::default());
        assert!(!draft.is_empty());
    }

    #[test]
    fn absent_permission_flags_deny() {
        let comment: Comment = serde_json::from_value(serde_json::json!({
            "id": 1,
            "created_at": "2024-05-01T12:00:00Z",
            "user": { "id": 7, "username": "ada" }
        }))
        .unwrap();
        assert!(!comment.can_edit());
        assert!(!comment.can_delete());
        assert!(!comment.can_pin());
    }
}
