//! Ticket-based session handling for the PVE API.
//!
//! Proxmox VE authenticates with a short-lived ticket obtained from
//! `/access/ticket`. The ticket travels as the `PVEAuthCookie` cookie and is
//! paired with a CSRF prevention token. The manager owns the current session
//! and re-authenticates when the ticket ages out or the API answers 401;
//! re-authentication is serialized behind a write lock so concurrent callers
//! never race to log in.

use crate::config::PveConfig;
use crate::error::{PveError, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// An authenticated PVE API session.
#[derive(Debug, Clone)]
pub struct Session {
    ticket: String,
    csrf_token: String,
    created_at: Instant,
}

impl Session {
    /// Format the ticket as the `Cookie` header value expected by PVE.
    pub fn cookie_header(&self) -> String {
        format!("PVEAuthCookie={}", self.ticket)
    }

    /// CSRF prevention token paired with the ticket. Only write requests
    /// need it; a read-only run carries it for completeness.
    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    /// Whether the ticket has outlived the given lifetime.
    pub fn is_expired(&self, lifetime: Duration) -> bool {
        self.created_at.elapsed() > lifetime
    }
}

#[derive(Serialize)]
struct TicketRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct TicketResponse {
    data: TicketData,
}

#[derive(Deserialize)]
struct TicketData {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

/// Owns the session state and performs logins against `/access/ticket`.
pub struct SessionManager {
    http: Client,
    config: PveConfig,
    session: RwLock<Option<Session>>,
}

impl SessionManager {
    /// Create a manager with no session; the first call to [`login`] or
    /// [`ensure_valid`] authenticates.
    ///
    /// [`login`]: SessionManager::login
    /// [`ensure_valid`]: SessionManager::ensure_valid
    pub fn new(http: Client, config: PveConfig) -> Self {
        Self {
            http,
            config,
            session: RwLock::new(None),
        }
    }

    /// Authenticate and store the session.
    ///
    /// # Errors
    ///
    /// Returns `PveError::Auth` on invalid credentials, an unreachable
    /// endpoint, or a malformed ticket response. All are fatal to the run.
    pub async fn login(&self) -> Result<Session> {
        let mut guard = self.session.write().await;
        let session = self.authenticate().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Current session, logging in again if it is missing or aged out.
    pub async fn ensure_valid(&self) -> Result<Session> {
        let lifetime = Duration::from_secs(self.config.ticket_lifetime_secs);
        {
            let guard = self.session.read().await;
            if let Some(session) = guard.as_ref() {
                if !session.is_expired(lifetime) {
                    return Ok(session.clone());
                }
            }
        }

        let mut guard = self.session.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(session) = guard.as_ref() {
            if !session.is_expired(lifetime) {
                return Ok(session.clone());
            }
        }
        debug!("Ticket missing or expired, logging in again");
        let session = self.authenticate().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Force a fresh ticket regardless of age (after an observed 401).
    pub async fn refresh(&self) -> Result<Session> {
        let mut guard = self.session.write().await;
        debug!("Refreshing API ticket");
        let session = self.authenticate().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn authenticate(&self) -> Result<Session> {
        let url = format!(
            "{}/api2/json/access/ticket",
            self.config.endpoint.trim_end_matches('/')
        );
        debug!("Requesting ticket from: {}", url);

        let response = self
            .http
            .post(&url)
            .form(&TicketRequest {
                username: &self.config.username,
                password: &self.config.password,
            })
            .send()
            .await
            .map_err(|e| PveError::Auth(format!("login request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(PveError::Auth("invalid credentials".to_string()));
        }
        if !status.is_success() {
            return Err(PveError::Auth(format!(
                "login rejected with status {}",
                status
            )));
        }

        let body: TicketResponse = response
            .json()
            .await
            .map_err(|e| PveError::Auth(format!("malformed ticket response: {}", e)))?;

        info!(
            "Authenticated against {} as {}",
            self.config.endpoint, self.config.username
        );

        Ok(Session {
            ticket: body.data.ticket,
            csrf_token: body.data.csrf_token,
            created_at: Instant::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_age(age: Duration) -> Session {
        Session {
            ticket: "PVE:audit@pve:4EEC61E2::sig".to_string(),
            csrf_token: "4EEC61E2:token".to_string(),
            created_at: Instant::now() - age,
        }
    }

    #[test]
    fn test_cookie_header_format() {
        let session = session_with_age(Duration::ZERO);
        assert_eq!(
            session.cookie_header(),
            "PVEAuthCookie=PVE:audit@pve:4EEC61E2::sig"
        );
    }

    #[test]
    fn test_ticket_expiry() {
        let fresh = session_with_age(Duration::from_secs(60));
        assert!(!fresh.is_expired(Duration::from_secs(6600)));

        let stale = session_with_age(Duration::from_secs(7000));
        assert!(stale.is_expired(Duration::from_secs(6600)));
    }

    #[test]
    fn test_csrf_token_is_kept() {
        let session = session_with_age(Duration::ZERO);
        assert_eq!(session.csrf_token(), "4EEC61E2:token");
    }
}
