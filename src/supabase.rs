//! Supabase client shared by the PostgREST store, the GoTrue identity
//! provider and the Storage backend.

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::config::SupabaseConfig;

#[derive(Debug, Error)]
pub enum SupabaseError {
    #[error("Supabase is not configured: missing {0}")]
    NotConfigured(&'static str),

    #[error("Supabase request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status; `message` is the backend's own error text.
    #[error("{message}")]
    Status { status: StatusCode, message: String },

    #[error("Unexpected Supabase response: {0}")]
    Decode(String),
}

impl SupabaseError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            SupabaseError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type SupabaseResult<T> = Result<T, SupabaseError>;

/// Supabase client for PostgREST, GoTrue and Storage.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    url: String,
    anon_key: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> SupabaseResult<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or(SupabaseError::NotConfigured("SUPABASE_URL"))?;
        let anon_key = config
            .anon_key
            .clone()
            .ok_or(SupabaseError::NotConfigured("SUPABASE_ANON_KEY"))?;
        let service_role_key = config
            .service_role_key
            .clone()
            .ok_or(SupabaseError::NotConfigured("SUPABASE_SERVICE_ROLE_KEY"))?;

        Ok(Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            anon_key,
            service_role_key,
        })
    }

    /// Get the PostgREST URL.
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.url)
    }

    /// Get the GoTrue URL.
    pub fn auth_url(&self) -> String {
        format!("{}/auth/v1", self.url)
    }

    /// Get the Storage URL.
    pub fn storage_url(&self) -> String {
        format!("{}/storage/v1", self.url)
    }

    /// Public URL of an object in a public bucket.
    pub fn public_object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/object/public/{}/{}", self.storage_url(), bucket, path)
    }

    /// Request carrying the service-role key. Server-side paths only.
    pub fn service_request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
    }

    /// Request on behalf of an end user. Without a user token the anon key
    /// is the bearer.
    pub fn user_request(&self, method: Method, url: &str, token: Option<&str>) -> RequestBuilder {
        let bearer = token.unwrap_or(&self.anon_key);
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    /// Send and turn non-success statuses into `SupabaseError::Status`.
    pub async fn send(request: RequestBuilder) -> SupabaseResult<Response> {
        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(SupabaseError::Status {
            status,
            message: error_message(status, &text),
        })
    }

    /// Send and decode the JSON body.
    pub async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> SupabaseResult<T> {
        let resp = Self::send(request).await?;
        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| SupabaseError::Decode(e.to_string()))
    }

    // ==================== PostgREST ====================

    fn table_url(&self, table: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}/{}", self.rest_url(), table)
        } else {
            format!("{}/{}?{}", self.rest_url(), table, query)
        }
    }

    /// `GET /rest/v1/<table>?<query>`.
    pub async fn select<T: DeserializeOwned>(&self, table: &str, query: &str) -> SupabaseResult<Vec<T>> {
        Self::send_json(self.service_request(Method::GET, &self.table_url(table, query))).await
    }

    /// Insert rows and return what was written. `prefer` is added to the
    /// `return=representation` preference (e.g. `resolution=ignore-duplicates`).
    pub async fn insert<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        table: &str,
        query: &str,
        body: &B,
        prefer: Option<&str>,
    ) -> SupabaseResult<Vec<T>> {
        let prefer = match prefer {
            Some(p) => format!("{},return=representation", p),
            None => "return=representation".to_string(),
        };
        let request = self
            .service_request(Method::POST, &self.table_url(table, query))
            .header("Prefer", prefer)
            .json(body);
        Self::send_json(request).await
    }

    /// PATCH rows matching `filter` and return them.
    pub async fn update<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        table: &str,
        filter: &str,
        body: &B,
    ) -> SupabaseResult<Vec<T>> {
        let request = self
            .service_request(Method::PATCH, &self.table_url(table, filter))
            .header("Prefer", "return=representation")
            .json(body);
        Self::send_json(request).await
    }

    /// DELETE rows matching `filter`; returns how many went away.
    pub async fn delete(&self, table: &str, filter: &str) -> SupabaseResult<usize> {
        let request = self
            .service_request(Method::DELETE, &self.table_url(table, filter))
            .header("Prefer", "return=representation");
        let rows: Vec<serde_json::Value> = Self::send_json(request).await?;
        Ok(rows.len())
    }

    /// Exact row count via `Prefer: count=exact` on a HEAD request.
    pub async fn count(&self, table: &str, filter: &str) -> SupabaseResult<usize> {
        let query = if filter.is_empty() {
            "select=id".to_string()
        } else {
            format!("select=id&{}", filter)
        };
        let request = self
            .service_request(Method::HEAD, &self.table_url(table, &query))
            .header("Prefer", "count=exact");
        let resp = Self::send(request).await?;
        resp.headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| SupabaseError::Decode("missing Content-Range total".to_string()))
    }
}

/// Pull a readable message out of a PostgREST/GoTrue/Storage error body.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "msg", "error_description", "error"] {
            if let Some(s) = value.get(key).and_then(|v| v.as_str()) {
                if !s.is_empty() {
                    return s.to_string();
                }
            }
        }
    }
    let body = body.trim();
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}

/// `0-9/42` or `*/42` → 42.
fn parse_content_range_total(value: &str) -> Option<usize> {
    value.rsplit('/').next()?.trim().parse().ok()
}

/// PostgREST `eq.` filter value.
pub(crate) fn eq(value: &str) -> String {
    format!("eq.{}", urlencoding::encode(value))
}

/// PostgREST `in.(...)` filter value. Items are double-quoted so commas and
/// parentheses inside values survive.
pub(crate) fn in_list<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let items: Vec<String> = values
        .into_iter()
        .map(|v| {
            let quoted = format!("\"{}\"", v.as_ref().replace('"', "\\\""));
            urlencoding::encode(&quoted).into_owned()
        })
        .collect();
    format!("in.({})", items.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SupabaseConfig {
        SupabaseConfig {
            url: Some("https://demo.supabase.co/".to_string()),
            anon_key: Some("anon".to_string()),
            service_role_key: Some("service".to_string()),
        }
    }

    #[test]
    fn test_urls_drop_trailing_slash() {
        let client = SupabaseClient::new(&config()).unwrap();
        assert_eq!(client.rest_url(), "https://demo.supabase.co/rest/v1");
        assert_eq!(client.auth_url(), "https://demo.supabase.co/auth/v1");
        assert_eq!(
            client.public_object_url("avatars", "u1/avatar.png"),
            "https://demo.supabase.co/storage/v1/object/public/avatars/u1/avatar.png"
        );
    }

    #[test]
    fn test_new_requires_all_keys() {
        let mut cfg = config();
        cfg.service_role_key = None;
        assert!(matches!(
            SupabaseClient::new(&cfg),
            Err(SupabaseError::NotConfigured("SUPABASE_SERVICE_ROLE_KEY"))
        ));
    }

    #[test]
    fn test_error_message_prefers_backend_text() {
        let body = r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#;
        assert_eq!(
            error_message(StatusCode::CONFLICT, body),
            "duplicate key value violates unique constraint"
        );
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, r#"{"error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, ""), "Bad Gateway");
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, "upstream down"), "upstream down");
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(parse_content_range_total("0-9/42"), Some(42));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-9/*"), None);
    }

    #[test]
    fn test_filters_are_encoded() {
        assert_eq!(eq("uber-eats"), "eq.uber-eats");
        assert_eq!(eq("a b"), "eq.a%20b");
        assert_eq!(in_list(["acme", "globex"]), "in.(%22acme%22,%22globex%22)");
    }
}
