use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

/// Endpoint and credentials for one [`Connection`](super::Connection).
///
/// Either the host/port/database/credential parts or a complete driver URL.
/// `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Overrides every other field when set
    pub url: Option<String>,
}

impl ConnectionInfo {
    /// MySQL endpoint
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            scheme: "mysql".to_string(),
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: password.into(),
            url: None,
        }
    }

    /// Use a complete driver URL such as `sqlite::memory:`
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            scheme: String::new(),
            host: String::new(),
            port: 0,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            url: Some(url.into()),
        }
    }

    /// `DATABASE_URL`, falling back to an in-memory SQLite database
    pub fn from_env() -> Self {
        let url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());
        Self::from_url(url)
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn to_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        match self.parts_url() {
            Some(url) => url.to_string(),
            None => {
                warn!(scheme = %self.scheme, host = %self.host, "Connection parts do not form a valid URL");
                format!(
                    "{}://{}:{}@{}:{}/{}",
                    self.scheme, self.username, self.password, self.host, self.port, self.database
                )
            }
        }
    }

    /// URL safe for logs
    pub fn redacted_url(&self) -> String {
        match &self.url {
            Some(url) => redact_url(url),
            None => match self.parts_url() {
                Some(mut url) => {
                    if !self.password.is_empty() {
                        let _ = url.set_password(Some("***"));
                    }
                    url.to_string()
                }
                None => format!(
                    "{}://{}:***@{}:{}/{}",
                    self.scheme, self.username, self.host, self.port, self.database
                ),
            },
        }
    }

    /// `set_username` and `set_password` percent-encode the credentials.
    fn parts_url(&self) -> Option<Url> {
        let mut url = Url::parse(&format!(
            "{}://{}:{}/{}",
            self.scheme, self.host, self.port, self.database
        ))
        .ok()?;
        url.set_username(&self.username).ok()?;
        if !self.password.is_empty() {
            url.set_password(Some(&self.password)).ok()?;
        }
        Some(url)
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("url", &self.redacted_url())
            .finish()
    }
}

/// Masks the password of a parseable URL. Anything else is returned as given.
fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("***")).is_err() {
                return url.scheme().to_string() + "://***";
            }
            url.to_string()
        }
        _ => raw.to_string(),
    }
}
