//! Captured cookie files and their replay as an HTTP cookie jar.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use reqwest::cookie::Jar;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ScrapeError;

/// One cookie as captured by the browser-side tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedCookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

/// An authenticated session snapshot for one supplier site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieFile {
    pub id: String,
    pub supplier_id: String,
    pub domain: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub cookies: Vec<CapturedCookie>,
    /// Ordered by key so serialization is canonical.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CookieFile {
    /// Parse a cookie file from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, ScrapeError> {
        serde_json::from_str(json).map_err(|e| ScrapeError::InvalidCookieFile(e.to_string()))
    }

    /// Canonical serialized form used for hashing and storage.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Content hash over [`CookieFile::canonical_bytes`].
    pub fn content_hash(&self) -> Result<String, serde_json::Error> {
        Ok(crate::staging::content_hash(&self.canonical_bytes()?))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Build a cookie jar holding the cookies that belong to `origin`'s host.
    ///
    /// Cookies without a domain are scoped to the file's domain. Cookies for
    /// other hosts and cookies that already expired are left out.
    pub fn to_jar(&self, origin: &Url, now: DateTime<Utc>) -> Result<Jar, ScrapeError> {
        let host = origin
            .host_str()
            .ok_or_else(|| ScrapeError::InvalidCookieFile(format!("{} has no host", origin)))?;

        let jar = Jar::default();
        let mut added = 0;

        for cookie in &self.cookies {
            let domain = cookie
                .domain
                .as_deref()
                .unwrap_or(&self.domain)
                .trim_start_matches('.');

            if !domain_matches(host, domain) {
                warn!(
                    cookie = %cookie.name,
                    domain = %domain,
                    host = %host,
                    "Dropping cookie for foreign domain"
                );
                continue;
            }

            if cookie.expires.is_some_and(|expires| expires <= now) {
                debug!(cookie = %cookie.name, "Skipping expired cookie");
                continue;
            }

            let path = cookie.path.as_deref().unwrap_or("/");
            let url = origin
                .join(path)
                .map_err(|e| ScrapeError::InvalidCookieFile(e.to_string()))?;
            jar.add_cookie_str(&cookie_header(cookie, domain, path), &url);
            added += 1;
        }

        if added == 0 {
            return Err(ScrapeError::InvalidCookieFile(format!(
                "no usable cookies for {}",
                host
            )));
        }

        Ok(jar)
    }
}

/// Whether a cookie for `domain` may be sent to `host`.
fn domain_matches(host: &str, domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

fn cookie_header(cookie: &CapturedCookie, domain: &str, path: &str) -> String {
    let mut header = format!(
        "{}={}; Domain={}; Path={}",
        cookie.name, cookie.value, domain, path
    );
    if cookie.secure {
        header.push_str("; Secure");
    }
    if cookie.http_only {
        header.push_str("; HttpOnly");
    }
    if let Some(same_site) = &cookie.same_site {
        header.push_str("; SameSite=");
        header.push_str(same_site);
    }
    header
}
