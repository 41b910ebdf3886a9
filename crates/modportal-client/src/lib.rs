//! Authenticated HTTP client for the moderator API, plus the error translator
//! every call site uses before showing a failure to the user.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use modportal_core::{
    Category, CreateOpportunityPayload, Leaderboard, LeaderboardPeriod, ModeratorId,
    ModeratorProfile, Opportunity, OpportunityId, Route,
};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

mod session;
pub mod wire;

pub use session::{
    FileTokenStore, LoggingNavigator, MemoryTokenStore, Navigator, RecordingNavigator, TokenStore,
};
pub use wire::AuthResponse;

pub const CRATE_NAME: &str = "modportal-client";

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";

pub const MSG_NETWORK: &str =
    "Unable to connect to the server. Please check your internet connection.";
pub const MSG_BAD_REQUEST: &str = "Please check the form details and try again.";
pub const MSG_UNPROCESSABLE: &str = "Please check the form details for errors.";
pub const MSG_PERMISSION: &str = "You do not have permission to perform this action.";
pub const MSG_NOT_FOUND: &str = "The requested resource could not be found.";
pub const MSG_SERVER: &str = "Something went wrong on our end. Please try again later.";
pub const MSG_FALLBACK: &str = "An unexpected error occurred. Please try again.";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(20),
            user_agent: Some("modportal/0.1".to_string()),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("MODPORTAL_API_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.base_url),
            timeout: std::env::var("MODPORTAL_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            user_agent: std::env::var("MODPORTAL_USER_AGENT")
                .ok()
                .or(defaults.user_agent),
        }
    }

    pub fn build_http_client(&self) -> anyhow::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(self.timeout);

        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        builder.build().context("building reqwest client")
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// No response was received.
    #[error("network error: {0}")]
    Network(String),
    #[error("http status {status}")]
    Status {
        status: u16,
        message: Option<String>,
    },
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("token store error: {0}")]
    TokenStore(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Maps any API failure to a fixed user-facing sentence. Total and pure.
pub fn friendly_message(err: &ApiError) -> String {
    match err {
        ApiError::Network(_) => MSG_NETWORK.to_string(),
        ApiError::Status { status, message } => match status {
            400 => message.clone().unwrap_or_else(|| MSG_BAD_REQUEST.to_string()),
            422 => message.clone().unwrap_or_else(|| MSG_UNPROCESSABLE.to_string()),
            401 | 403 => MSG_PERMISSION.to_string(),
            404 => MSG_NOT_FOUND.to_string(),
            s if *s >= 500 => MSG_SERVER.to_string(),
            _ => MSG_FALLBACK.to_string(),
        },
        ApiError::Decode(_) | ApiError::InvalidRequest(_) | ApiError::TokenStore(_) => {
            MSG_FALLBACK.to_string()
        }
    }
}

/// File attached to the create form.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

/// Uniform client for the remote API. Attaches the stored bearer token to
/// every request; a 401 clears the token and requests navigation to the login
/// route before the error is returned to the caller. No retries.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
}

impl ApiClient {
    pub fn new(
        config: &ApiConfig,
        tokens: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
    ) -> anyhow::Result<Self> {
        Ok(Self::with_http(
            config.build_http_client()?,
            &config.base_url,
            tokens,
            navigator,
        ))
    }

    /// Reuses an existing connection pool; the web layer builds one client per
    /// request around a shared `reqwest::Client`.
    pub fn with_http(
        http: reqwest::Client,
        base_url: &str,
        tokens: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            navigator,
        }
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    pub async fn has_token(&self) -> Result<bool, ApiError> {
        Ok(self.tokens.load().await?.is_some())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.base_url, path))
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        request: RequestBuilder,
        intercept_unauthorized: bool,
    ) -> Result<reqwest::Response, ApiError> {
        let span = info_span!("api_request", method = %method, path);
        self.send_authenticated(request, intercept_unauthorized)
            .instrument(span)
            .await
    }

    async fn send_authenticated(
        &self,
        request: RequestBuilder,
        intercept_unauthorized: bool,
    ) -> Result<reqwest::Response, ApiError> {
        let request = match self.tokens.load().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.map_err(|err| {
            if err.is_builder() {
                ApiError::InvalidRequest(err.to_string())
            } else {
                ApiError::Network(err.to_string())
            }
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED && intercept_unauthorized {
            warn!("api rejected credentials; clearing stored token");
            if let Err(err) = self.tokens.clear().await {
                warn!(error = %err, "failed to clear stored token");
            }
            self.navigator.navigate(Route::Login);
        }

        let body = response.bytes().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            message: wire::server_message(&body),
        })
    }

    async fn json_body(response: reqwest::Response) -> Result<JsonValue, ApiError> {
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ApiError::Network(err.to_string()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(JsonValue::Null);
        }
        serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode(err.to_string()))
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<JsonValue, ApiError> {
        let request = self.request(Method::GET, path).query(query);
        let response = self.execute(Method::GET, path, request, true).await?;
        Self::json_body(response).await
    }

    /// Logs in and stores the returned token. A 401 here means bad
    /// credentials, so the login call is not subject to the redirect.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let path = "/auth/mod/login";
        let request = self
            .request(Method::POST, path)
            .json(&LoginBody { email, password });
        let response = self.execute(Method::POST, path, request, false).await?;
        let auth: AuthResponse = serde_json::from_value(Self::json_body(response).await?)
            .map_err(|err| ApiError::Decode(err.to_string()))?;
        self.tokens.save(&auth.access_token).await?;
        Ok(auth)
    }

    pub async fn profile(&self) -> Result<ModeratorProfile, ApiError> {
        wire::moderator_profile(self.get_json("/moderator/profile", &[]).await?)
    }

    pub async fn moderator(&self, mod_id: ModeratorId) -> Result<ModeratorProfile, ApiError> {
        let path = format!("/moderator/moderators/{mod_id}");
        wire::moderator_profile(self.get_json(&path, &[]).await?)
    }

    pub async fn categories(&self) -> Result<Vec<Category>, ApiError> {
        wire::categories(self.get_json("/moderator/categories", &[]).await?)
    }

    pub async fn my_opportunities(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Opportunity>, ApiError> {
        let query = [("page", page.to_string()), ("page_size", page_size.to_string())];
        wire::opportunity_list(self.get_json("/moderator/opportunities", &query).await?)
    }

    pub async fn global_opportunities(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Opportunity>, ApiError> {
        let query = [
            ("page", page.to_string()),
            ("page_size", page_size.to_string()),
            ("status_filter", "all".to_string()),
        ];
        wire::opportunity_list(self.get_json("/moderator/global-opportunities", &query).await?)
    }

    pub async fn my_opportunity(&self, id: OpportunityId) -> Result<Opportunity, ApiError> {
        let path = format!("/moderator/opportunities/{id}");
        wire::opportunity(self.get_json(&path, &[]).await?)
    }

    pub async fn global_opportunity(&self, id: OpportunityId) -> Result<Opportunity, ApiError> {
        let path = format!("/moderator/global-opportunities/{id}");
        wire::opportunity(self.get_json(&path, &[]).await?)
    }

    /// Returns the new record's id when the server reports one.
    pub async fn create_opportunity(
        &self,
        payload: &CreateOpportunityPayload,
    ) -> Result<Option<OpportunityId>, ApiError> {
        let path = "/moderator/opportunities";
        let request = self.request(Method::POST, path).json(payload);
        let response = self.execute(Method::POST, path, request, true).await?;
        Ok(wire::created_id(&Self::json_body(response).await?))
    }

    pub async fn upload_opportunity_image(
        &self,
        id: OpportunityId,
        image: ImageUpload,
    ) -> Result<(), ApiError> {
        let path = format!("/moderator/opportunities/{id}/image");
        let part = reqwest::multipart::Part::bytes(image.bytes).file_name(image.file_name);
        let part = match image.content_type.as_deref() {
            Some(content_type) => part
                .mime_str(content_type)
                .map_err(|err| ApiError::InvalidRequest(err.to_string()))?,
            None => part,
        };
        let form = reqwest::multipart::Form::new().part("file", part);
        let request = self.request(Method::POST, &path).multipart(form);
        self.execute(Method::POST, &path, request, true).await?;
        Ok(())
    }

    pub async fn delete_opportunity(&self, id: OpportunityId) -> Result<(), ApiError> {
        let path = format!("/moderator/opportunities/{id}");
        let request = self.request(Method::DELETE, &path);
        self.execute(Method::DELETE, &path, request, true).await?;
        Ok(())
    }

    pub async fn leaderboard(&self, period: LeaderboardPeriod) -> Result<Leaderboard, ApiError> {
        let query = [("period", period.as_str().to_string())];
        wire::leaderboard(
            self.get_json("/moderator/leaderboard", &query).await?,
            period,
        )
    }
}
