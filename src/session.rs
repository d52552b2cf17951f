use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::logger::SharedLogger;
use crate::protocol::{
    auth_form, parse_auth_response, redact, refresh_query, regional_base_url, skill_message,
    AuthReply, TokenGrant, AUTH_EXCEED_ONCE, AUTH_PATH, REFRESH_PATH, SKILL_PATH,
};
use crate::types::{Credentials, Region, SessionState};
use crate::{Error, Result};

/// Minimum spacing between two authentication attempts.
pub const AUTH_GUARD: Duration = Duration::from_secs(65);

/// Tokens expiring within this margin are renewed ahead of time.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch milliseconds.
    pub expire_time: i64,
    pub region: Region,
    pub last_call: Option<Instant>,
}

impl Session {
    pub fn has_tokens(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }

    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        self.has_tokens() && now_ms < self.expire_time
    }

    fn apply_grant(&mut self, grant: TokenGrant, now_ms: i64) {
        self.region = Region::from_token(&grant.access_token);
        self.access_token = grant.access_token;
        self.refresh_token = grant.refresh_token;
        self.expire_time = now_ms + grant.expires_in_secs.saturating_mul(1000);
    }
}

/// Where skill requests go. A fixed base is never rewritten by region changes.
#[derive(Debug, Clone)]
pub(crate) enum Endpoint {
    Regional,
    Fixed(String),
}

impl Endpoint {
    fn base_url(&self, region: Region) -> String {
        match self {
            Endpoint::Regional => regional_base_url(region),
            Endpoint::Fixed(base) => base.trim_end_matches('/').to_string(),
        }
    }
}

struct Inner {
    credentials: Option<Credentials>,
    session: Session,
    state: SessionState,
    last_error: Option<String>,
}

/// Owns the cloud session and is the only path to the `/skill` endpoint.
///
/// Token checks run under one async mutex, so concurrent callers that all see
/// an expiring token wait for a single authentication instead of racing.
pub struct SessionManager {
    http: reqwest::Client,
    endpoint: Endpoint,
    auth_guard: Duration,
    refresh_margin: Duration,
    logger: Option<SharedLogger>,
    inner: Mutex<Inner>,
}

impl SessionManager {
    pub(crate) fn new(
        http: reqwest::Client,
        endpoint: Endpoint,
        auth_guard: Duration,
        refresh_margin: Duration,
        logger: Option<SharedLogger>,
    ) -> Self {
        Self {
            http,
            endpoint,
            auth_guard,
            refresh_margin,
            logger,
            inner: Mutex::new(Inner {
                credentials: None,
                session: Session::default(),
                state: SessionState::Uninitialized,
                last_error: None,
            }),
        }
    }

    /// Seed already validated credentials before the manager is shared.
    pub(crate) fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.inner.get_mut().credentials = Some(credentials);
        self
    }

    /// Replace the credentials and drop the current session. No network traffic.
    pub async fn initialize(&self, credentials: Credentials) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.session = Session::default();
        inner.state = SessionState::Uninitialized;
        if let Err(e) = credentials.validate() {
            inner.credentials = None;
            inner.last_error = Some(e.to_string());
            return Err(e);
        }
        inner.credentials = Some(credentials);
        inner.last_error = None;
        Ok(())
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn has_credentials(&self) -> bool {
        self.inner.lock().await.credentials.is_some()
    }

    pub async fn session(&self) -> Session {
        self.inner.lock().await.session.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.lock().await.last_error.clone()
    }

    pub async fn base_url(&self) -> String {
        let region = self.inner.lock().await.session.region;
        self.endpoint.base_url(region)
    }

    /// Make sure a usable token exists, authenticating at most once per guard interval.
    pub async fn ensure_valid_token(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_locked(&mut inner).await
    }

    /// Send one skill request with a valid token attached.
    pub async fn request(
        &self,
        name: &str,
        namespace: &str,
        dev_id: Option<&str>,
        payload: Value,
    ) -> Result<Value> {
        let (token, base) = {
            let mut inner = self.inner.lock().await;
            self.ensure_locked(&mut inner).await?;
            (
                inner.session.access_token.clone(),
                self.endpoint.base_url(inner.session.region),
            )
        };

        let message = skill_message(name, namespace, &token, dev_id, payload);
        let url = format!("{base}{SKILL_PATH}");
        trace!(url = %url, namespace, "skill request");
        let log_id = self.log_request("POST", SKILL_PATH, Some(&redact(&message)));

        let resp = self
            .http
            .post(&url)
            .json(&message)
            .send()
            .await?
            .error_for_status()?;
        let status = resp.status().as_u16();
        let body: Value = resp.json().await?;

        if let Some(logger) = &self.logger
            && let Ok(mut logger) = logger.lock()
        {
            logger.log_response(log_id.as_deref().unwrap_or(""), namespace, status, &body);
        }
        Ok(body)
    }

    async fn ensure_locked(&self, inner: &mut Inner) -> Result<()> {
        let Some(credentials) = inner.credentials.clone() else {
            return Err(Error::Config("credentials not set".into()));
        };
        if inner.state == SessionState::Error {
            return Err(Error::Session {
                message: inner.last_error.clone().unwrap_or_else(|| "session failed".into()),
                fatal: true,
            });
        }

        let now = now_ms();
        if let Some(last) = inner.session.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.auth_guard {
                if inner.session.is_valid_at(now) {
                    return Ok(());
                }
                return Err(Error::AuthThrottled {
                    retry_in: self.auth_guard - elapsed,
                });
            }
        }
        let margin = i64::try_from(self.refresh_margin.as_millis()).unwrap_or(i64::MAX);
        if inner.session.is_valid_at(now.saturating_add(margin)) {
            return Ok(());
        }

        inner.state = SessionState::Authenticating;
        let mut result = Err(Error::Session {
            message: "no refresh token".into(),
            fatal: false,
        });
        if !inner.session.refresh_token.is_empty() {
            result = self.refresh(inner).await;
            if let Err(e) = &result {
                debug!(error = %e, "token refresh failed, re-authenticating");
            }
        }
        if result.is_err() {
            result = self.authenticate(inner, &credentials).await;
        }

        inner.state = match &result {
            Ok(()) => SessionState::Authenticated,
            Err(Error::Session { fatal: true, .. }) => SessionState::Error,
            Err(_) if inner.session.has_tokens() => SessionState::Authenticated,
            Err(_) => SessionState::Uninitialized,
        };
        result
    }

    async fn refresh(&self, inner: &mut Inner) -> Result<()> {
        let url = format!(
            "{}{REFRESH_PATH}",
            self.endpoint.base_url(inner.session.region)
        );
        debug!(url = %url, "refreshing access token");
        self.log_request("GET", REFRESH_PATH, None);
        // Every attempt counts towards the guard, answered or not.
        inner.session.last_call = Some(Instant::now());

        let resp = self
            .http
            .get(&url)
            .query(&refresh_query(&inner.session.refresh_token))
            .send()
            .await?
            .error_for_status()?;
        let body = resp.text().await?;

        match parse_auth_response(&body)? {
            AuthReply::Granted(grant) => {
                inner.session.apply_grant(grant, now_ms());
                info!(region = %inner.session.region, "access token refreshed");
                Ok(())
            }
            AuthReply::Rejected(message) => Err(Error::Session {
                message,
                fatal: false,
            }),
        }
    }

    async fn authenticate(&self, inner: &mut Inner, credentials: &Credentials) -> Result<()> {
        let url = format!(
            "{}{AUTH_PATH}",
            self.endpoint.base_url(inner.session.region)
        );
        debug!(url = %url, user = %credentials.username, "authenticating");
        let log_body = json!({
            "userName": credentials.username,
            "countryCode": credentials.country_code,
            "bizType": credentials.biz_type,
        });
        self.log_request("POST", AUTH_PATH, Some(&log_body));
        inner.session.last_call = Some(Instant::now());

        let resp = self
            .http
            .post(&url)
            .form(&auth_form(credentials))
            .send()
            .await?
            .error_for_status()?;
        let body = resp.text().await?;

        match parse_auth_response(&body)? {
            AuthReply::Granted(grant) => {
                inner.session.apply_grant(grant, now_ms());
                inner.last_error = None;
                info!(region = %inner.session.region, "authenticated with cloud");
                Ok(())
            }
            AuthReply::Rejected(message) => {
                let fatal = !message.starts_with(AUTH_EXCEED_ONCE);
                if fatal {
                    warn!(error = %message, "authentication rejected");
                } else {
                    debug!(error = %message, "authentication rate limited by cloud");
                }
                inner.last_error = Some(message.clone());
                Err(Error::Session { message, fatal })
            }
        }
    }

    fn log_request(&self, method: &str, path: &str, body: Option<&Value>) -> Option<String> {
        let logger = self.logger.as_ref()?;
        let mut logger = logger.lock().ok()?;
        Some(logger.log_request(method, path, body))
    }
}
