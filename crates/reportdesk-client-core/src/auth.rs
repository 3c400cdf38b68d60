use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::api::{DEFAULT_LINK_TTL_SECONDS, ReportApi};
use crate::error::ClientError;
use crate::features::{AccessGrant, Capabilities, capabilities};
use crate::location::{AddressBar, one_time_token, scrub_one_time_token};
use crate::store::{PersistentStore, Session};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthInputError {
    #[error("base url must not be empty")]
    EmptyBaseUrl,
    #[error("base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
    #[error("email must not be empty")]
    EmptyEmail,
    #[error("email must contain '@'")]
    InvalidEmail,
    #[error("login token must not be empty")]
    EmptyLoginToken,
}

pub fn normalize_base_url(raw: &str) -> Result<String, AuthInputError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthInputError::EmptyBaseUrl);
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(AuthInputError::InvalidBaseUrl);
    }
    let Some((_, remainder)) = trimmed.split_once("://") else {
        return Err(AuthInputError::InvalidBaseUrl);
    };
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(AuthInputError::InvalidBaseUrl);
    }
    Ok(trimmed.to_string())
}

/// Syntactic pre-check only; the server decides whether the address is real.
pub fn normalize_email(raw: &str) -> Result<String, AuthInputError> {
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(AuthInputError::EmptyEmail);
    }
    if !normalized.contains('@') {
        return Err(AuthInputError::InvalidEmail);
    }
    Ok(normalized)
}

pub fn normalize_login_token(raw: &str) -> Result<String, AuthInputError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AuthInputError::EmptyLoginToken);
    }
    Ok(trimmed.to_string())
}

/// Where the user stands in the passwordless login flow.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthPhase {
    Unauthenticated,
    LinkRequested { email: String, ttl_seconds: u64 },
    Verifying,
    Authenticated(Session),
}

impl AuthPhase {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

/// Result of asking for a login link. `ttl_seconds` is a countdown hint for
/// display; the client does not enforce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRequest {
    pub email: String,
    pub ttl_seconds: u64,
}

pub struct AuthFlow {
    api: Arc<dyn ReportApi>,
    store: Arc<PersistentStore>,
    phase: Mutex<AuthPhase>,
}

impl AuthFlow {
    pub fn new(api: Arc<dyn ReportApi>, store: Arc<PersistentStore>) -> Self {
        Self {
            api,
            store,
            phase: Mutex::new(AuthPhase::Unauthenticated),
        }
    }

    pub fn phase(&self) -> AuthPhase {
        self.phase_guard().clone()
    }

    /// App entry. A token in the address always wins over a cached session;
    /// otherwise the stored session (or a bare stored token) is reused.
    pub async fn resume(&self, address: &mut dyn AddressBar) -> AuthPhase {
        if let Some(token) = one_time_token(&address.current()) {
            tracing::info!("one-time token found in address; verifying");
            if let Err(error) = self.verify(&token, address).await {
                tracing::warn!(code = error.code(), %error, "login link verification failed");
            }
            return self.phase();
        }

        if let (Some(session), Some(_)) = (self.store.load_session(), self.store.load_token()) {
            self.set_phase(AuthPhase::Authenticated(session));
            return self.phase();
        }

        if let Some(token) = self.store.load_token() {
            match self.recover_session(&token).await {
                Ok(session) => self.set_phase(AuthPhase::Authenticated(session)),
                Err(error) => {
                    tracing::warn!(code = error.code(), %error, "stored token could not be revalidated");
                    self.set_phase(AuthPhase::Unauthenticated);
                }
            }
            return self.phase();
        }

        self.set_phase(AuthPhase::Unauthenticated);
        self.phase()
    }

    pub async fn request_link(&self, email: &str) -> Result<LinkRequest, ClientError> {
        let email = normalize_email(email)?;
        let response = self.api.request_link(&email).await?;
        if !response.ok {
            return Err(ClientError::Rejected(
                response
                    .error
                    .unwrap_or_else(|| "login link request was rejected".to_string()),
            ));
        }
        let request = LinkRequest {
            email: response.email.unwrap_or(email),
            ttl_seconds: response.ttl_seconds.unwrap_or(DEFAULT_LINK_TTL_SECONDS),
        };
        tracing::info!(email = %request.email, ttl_seconds = request.ttl_seconds, "login link requested");
        self.set_phase(AuthPhase::LinkRequested {
            email: request.email.clone(),
            ttl_seconds: request.ttl_seconds,
        });
        Ok(request)
    }

    /// Exchanges a one-time token for a session. The token is scrubbed from
    /// the address whatever the outcome and is never retried.
    pub async fn verify(
        &self,
        one_time_token: &str,
        address: &mut dyn AddressBar,
    ) -> Result<Session, ClientError> {
        self.set_phase(AuthPhase::Verifying);
        let result = self.exchange(one_time_token).await;
        scrub_one_time_token(address);
        match result {
            Ok(session) => {
                self.store.save_token(&session.session_token);
                self.store.save_session(&session);
                tracing::info!(email = %session.email, "session verified");
                self.set_phase(AuthPhase::Authenticated(session.clone()));
                Ok(session)
            }
            Err(error) => {
                self.set_phase(AuthPhase::Unauthenticated);
                Err(error)
            }
        }
    }

    /// Read-only, idempotent grant lookup.
    pub async fn access_check(&self, session_token: &str) -> Result<AccessGrant, ClientError> {
        let raw = self.api.access(session_token).await?;
        Ok(AccessGrant::new(raw))
    }

    /// Re-fetches the grant with the stored token and replaces the stored
    /// session's grant wholesale.
    pub async fn refresh_access(&self) -> Result<Capabilities, ClientError> {
        let token = self.store.load_token().ok_or(ClientError::MissingToken)?;
        let grant = self.access_check(&token).await?;
        let caps = capabilities(Some(&grant));
        if let Some(mut session) = self.store.load_session() {
            session.access_grant = grant;
            self.store.save_session(&session);
            if self.phase().is_authenticated() {
                self.set_phase(AuthPhase::Authenticated(session));
            }
        }
        Ok(caps)
    }

    pub fn logout(&self) {
        self.store.clear_all();
        self.set_phase(AuthPhase::Unauthenticated);
        tracing::info!("logged out");
    }

    async fn exchange(&self, one_time_token: &str) -> Result<Session, ClientError> {
        let token = normalize_login_token(one_time_token)?;
        let response = self.api.verify(&token).await?;
        if !response.ok {
            return Err(ClientError::Rejected(
                response
                    .error
                    .unwrap_or_else(|| "login link is invalid or expired".to_string()),
            ));
        }
        let session_token = response
            .session_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or(ClientError::VerifyMissingSessionToken)?;
        Ok(Session {
            email: response.email.unwrap_or_default(),
            access_grant: AccessGrant::new(response.access.unwrap_or_default()),
            app_url: response.app_url,
            verified_at: Utc::now(),
            session_token,
        })
    }

    // Rebuilds a session snapshot when only the bare token survived.
    async fn recover_session(&self, token: &str) -> Result<Session, ClientError> {
        let grant = self.access_check(token).await?;
        let session = Session {
            email: String::new(),
            access_grant: grant,
            app_url: None,
            verified_at: Utc::now(),
            session_token: token.to_string(),
        };
        self.store.save_session(&session);
        Ok(session)
    }

    fn phase_guard(&self) -> MutexGuard<'_, AuthPhase> {
        self.phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_phase(&self, phase: AuthPhase) {
        *self.phase_guard() = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_trims_and_drops_trailing_slash() {
        let normalized = normalize_base_url(" https://reports.example.com/ ").expect("valid base url");
        assert_eq!(normalized, "https://reports.example.com");
    }

    #[test]
    fn normalize_base_url_requires_http_scheme() {
        let error = normalize_base_url("reports.example.com").expect_err("expected invalid url");
        assert_eq!(error, AuthInputError::InvalidBaseUrl);
        let error = normalize_base_url("https:///path").expect_err("expected invalid url");
        assert_eq!(error, AuthInputError::InvalidBaseUrl);
    }

    #[test]
    fn normalize_email_lowercases_and_trims() {
        let normalized = normalize_email("  Ayse@Example.COM ").expect("valid email");
        assert_eq!(normalized, "ayse@example.com");
    }

    #[test]
    fn normalize_email_requires_at_sign() {
        assert_eq!(normalize_email("   "), Err(AuthInputError::EmptyEmail));
        assert_eq!(
            normalize_email("ayse.example.com"),
            Err(AuthInputError::InvalidEmail)
        );
    }

    #[test]
    fn normalize_login_token_rejects_blank_input() {
        assert_eq!(
            normalize_login_token(" \t "),
            Err(AuthInputError::EmptyLoginToken)
        );
        assert_eq!(normalize_login_token(" abc ").as_deref(), Ok("abc"));
    }
}
