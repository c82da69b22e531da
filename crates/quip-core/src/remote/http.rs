//! reqwest implementation of `MessageApi`.

use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{LoginResponse, MessageApi, MessagePage, RemoteError, RemoteResult};
use crate::models::{Message, MessageId};
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// HTTP client for the message REST API
pub struct HttpMessageApi {
    base_url: String,
    client: Client,
    token: RwLock<Option<String>>,
}

impl fmt::Debug for HttpMessageApi {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpMessageApi")
            .field("base_url", &self.base_url)
            .field("token", &self.has_token().then_some("[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpMessageApi {
    /// Build a client for `base_url` (for example `https://quip.example.com/api`)
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| RemoteError::InvalidConfiguration(error.to_string()))?;
        Ok(Self {
            base_url,
            client,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let request = request.header("Accept", "application/json");
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResult<T> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|error| RemoteError::Transport(error.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(RemoteError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|error| RemoteError::InvalidResponse(error.to_string()))
    }
}

#[async_trait]
impl MessageApi for HttpMessageApi {
    async fn login(&self, email: &str, password: &str) -> RemoteResult<LoginResponse> {
        let request = self
            .client
            .post(self.url("/login"))
            .json(&LoginRequest { email, password });
        self.send(request).await
    }

    fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn has_token(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    async fn list_messages(&self, since: Option<DateTime<Utc>>) -> RemoteResult<MessagePage> {
        let mut request = self.client.get(self.url("/messages"));
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339_opts(SecondsFormat::AutoSi, true))]);
        }
        self.send(request).await
    }

    async fn create_message(&self, id: MessageId, content: &str) -> RemoteResult<Message> {
        let request = self
            .client
            .post(self.url("/messages"))
            .json(&CreateMessageRequest { content, id });
        self.send(request).await
    }

    async fn update_message(&self, id: MessageId, content: &str) -> RemoteResult<Message> {
        let request = self
            .client
            .put(self.url(&format!("/messages/{id}")))
            .json(&UpdateMessageRequest { content });
        self.send(request).await
    }

    async fn delete_message(&self, id: MessageId) -> RemoteResult<()> {
        let request = self.client.delete(self.url(&format!("/messages/{id}")));
        self.send::<SuccessResponse>(request).await?.into_result("delete")
    }

    async fn update_email(&self, email: &str) -> RemoteResult<()> {
        let request = self
            .client
            .put(self.url("/user/email"))
            .json(&UpdateEmailRequest { email });
        self.send::<SuccessResponse>(request).await?.into_result("email update")
    }

    async fn update_username(&self, username: &str) -> RemoteResult<()> {
        let request = self
            .client
            .put(self.url("/user/username"))
            .json(&UpdateUsernameRequest { username });
        self.send::<SuccessResponse>(request)
            .await?
            .into_result("username update")
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct CreateMessageRequest<'a> {
    content: &'a str,
    id: MessageId,
}

#[derive(Serialize)]
struct UpdateMessageRequest<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct UpdateEmailRequest<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct UpdateUsernameRequest<'a> {
    username: &'a str,
}

#[derive(Deserialize)]
struct SuccessResponse {
    success: bool,
}

impl SuccessResponse {
    fn into_result(self, action: &str) -> RemoteResult<()> {
        if self.success {
            Ok(())
        } else {
            Err(RemoteError::InvalidResponse(format!(
                "{action} response reported success=false"
            )))
        }
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let base_url = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("API base URL must not be empty".to_string())
    })?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ID: &str = "0194a3c2-0000-7000-8000-000000000001";

    fn message_json(content: &str, updated_at: &str) -> serde_json::Value {
        json!({
            "id": ID,
            "user_id": "0194a3c2-0000-7000-8000-0000000000ff",
            "content": content,
            "created_at": "2026-01-04T10:00:00Z",
            "updated_at": updated_at,
        })
    }

    async fn client(server: &MockServer) -> HttpMessageApi {
        let api = HttpMessageApi::new(format!("{}/api/", server.uri()), Duration::from_secs(5))
            .unwrap();
        api.set_token(Some("token-123".to_string()));
        api
    }

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("quip.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url(" https://quip.example.com/api/ ".to_string()).unwrap(),
            "https://quip.example.com/api"
        );

        let api = HttpMessageApi::new("https://quip.example.com/api/", Duration::from_secs(1))
            .unwrap();
        assert_eq!(api.base_url(), "https://quip.example.com/api");
    }

    #[test]
    fn parse_api_error_prefers_json_message() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, r#"{"error":"content required"}"#),
            "content required (400)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }

    #[test]
    fn debug_redacts_token() {
        let api = HttpMessageApi::new("https://quip.example.com", Duration::from_secs(1)).unwrap();
        api.set_token(Some("secret-token".to_string()));
        let debug = format!("{api:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn list_messages_sends_since_and_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/messages"))
            .and(query_param("since", "2026-01-04T10:00:00Z"))
            .and(header("Authorization", "Bearer token-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [message_json("hello", "2026-01-04T11:00:00Z")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let since = Utc.with_ymd_and_hms(2026, 1, 4, 10, 0, 0).unwrap();
        let page = client(&server).await.list_messages(Some(since)).await.unwrap();

        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].content, "hello");
        assert!(page.deleted.is_empty());
        assert_eq!(page.server_time, None);
    }

    #[tokio::test]
    async fn create_message_posts_client_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/messages"))
            .and(body_json(json!({"content": "hello", "id": ID})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(message_json("hello", "2026-01-04T10:00:00Z")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let message = client(&server)
            .await
            .create_message(ID.parse().unwrap(), "hello")
            .await
            .unwrap();
        assert_eq!(message.id.as_str(), ID);
    }

    #[tokio::test]
    async fn update_and_delete_use_message_path() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(format!("/api/messages/{ID}")))
            .and(body_json(json!({"content": "edited"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(message_json("edited", "2026-01-04T12:00:00Z")),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(format!("/api/messages/{ID}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;

        let api = client(&server).await;
        let updated = api.update_message(ID.parse().unwrap(), "edited").await.unwrap();
        assert_eq!(updated.content, "edited");
        api.delete_message(ID.parse().unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn maps_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/messages"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let api = client(&server).await;
        assert_eq!(
            api.list_messages(None).await.unwrap_err(),
            RemoteError::Unauthorized
        );
        assert_eq!(
            api.delete_message(ID.parse().unwrap()).await.unwrap_err().status(),
            Some(404)
        );
        let err = api.update_message(ID.parse().unwrap(), "x").await.unwrap_err();
        assert_eq!(
            err,
            RemoteError::Status {
                status: 503,
                message: "maintenance (503)".to_string()
            }
        );
    }

    #[tokio::test]
    async fn account_updates_put_to_user_routes() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/user/email"))
            .and(header("Authorization", "Bearer token-123"))
            .and(body_json(json!({"email": "new@example.com"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/user/username"))
            .and(body_json(json!({"username": "quipper"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let api = client(&server).await;
        api.update_email("new@example.com").await.unwrap();
        api.update_username("quipper").await.unwrap();
    }

    #[tokio::test]
    async fn account_update_failures_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/user/email"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/user/username"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false})))
            .mount(&server)
            .await;

        let api = client(&server).await;
        assert_eq!(
            api.update_email("taken@example.com").await.unwrap_err().status(),
            Some(500)
        );
        assert!(matches!(
            api.update_username("quipper").await.unwrap_err(),
            RemoteError::InvalidResponse(_)
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_transport_error() {
        let api = HttpMessageApi::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = api.list_messages(None).await.unwrap_err();
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn login_returns_token_and_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/login"))
            .and(body_json(json!({"email": "me@example.com", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "jwt",
                "user": {"id": "u1", "email": "me@example.com", "username": "me"}
            })))
            .mount(&server)
            .await;

        let api = HttpMessageApi::new(format!("{}/api", server.uri()), Duration::from_secs(5))
            .unwrap();
        assert!(!api.has_token());
        let response = api.login("me@example.com", "pw").await.unwrap();
        assert_eq!(response.token, "jwt");
        assert_eq!(response.user.username.as_deref(), Some("me"));
    }
}
