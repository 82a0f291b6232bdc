//! Maps catalog identifiers to time-limited download URLs.
//!
//! Any non-success answer from the archive API is a per-entry failure: the
//! pipeline records it and moves on to the next identifier.

use log::debug;
use serde::Deserialize;
use std::fmt;

use crate::auth::BearerToken;
use crate::http::{diagnostic_body, http_agent};

/// Storage region the signed URL should point into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// Asia-Pacific bucket.
    Asia,
    /// United States bucket.
    #[default]
    Us,
}

impl Region {
    /// Query-string tag for this region.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asia => "asia",
            Self::Us => "us",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A direct download URL, consumed once by the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    url: String,
}

impl ResolvedLocation {
    /// Wrap a resolved URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The download URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Errors raised while resolving a download URL.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    /// The archive API answered with a non-success status.
    #[error("failed to get URL for {identifier}: {status} - {body}")]
    Rejected {
        /// Catalog identifier being resolved.
        identifier: String,
        /// HTTP status code.
        status: u16,
        /// Diagnostic response body.
        body: String,
    },

    /// The request could not be sent or its response not received.
    #[error("URL request for {identifier} failed: {reason}")]
    Transport {
        /// Catalog identifier being resolved.
        identifier: String,
        /// Description of the failure.
        reason: String,
    },

    /// The success body did not carry a URL.
    #[error("malformed URL response for {identifier}: {reason}")]
    MalformedResponse {
        /// Catalog identifier being resolved.
        identifier: String,
        /// Description of the parse failure.
        reason: String,
    },
}

/// Resolves identifiers to download locations.
#[cfg_attr(test, mockall::automock)]
pub trait UrlResolver {
    /// Resolve `identifier` in `region` using `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError`] on any non-success answer or network
    /// failure.
    fn resolve(
        &self,
        identifier: &str,
        token: &BearerToken,
        region: Region,
    ) -> Result<ResolvedLocation, ResolutionError>;
}

#[derive(Deserialize)]
struct LocationResponse {
    url: String,
}

/// Parse the JSON body of a successful resolution response.
///
/// # Errors
///
/// Returns [`ResolutionError::MalformedResponse`] when `url` is absent.
pub fn parse_location(identifier: &str, body: &str) -> Result<ResolvedLocation, ResolutionError> {
    let response: LocationResponse =
        serde_json::from_str(body).map_err(|err| ResolutionError::MalformedResponse {
            identifier: identifier.to_owned(),
            reason: err.to_string(),
        })?;
    Ok(ResolvedLocation { url: response.url })
}

/// Resolver for the dataset's archive API.
#[derive(Debug, Clone)]
pub struct ArchiveApiResolver {
    api_base: String,
    project: String,
}

impl ArchiveApiResolver {
    /// Create a resolver for `api_base` (the archive listing root) and
    /// `project` tag.
    #[must_use]
    pub fn new(api_base: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            project: project.into(),
        }
    }

    /// URL queried for `identifier`, without the query string.
    ///
    /// # Examples
    ///
    /// ```
    /// use nuscenes_fetch::resolve::ArchiveApiResolver;
    ///
    /// let resolver = ArchiveApiResolver::new("https://api.test/v1/archives/v1.0/", "nuScenes");
    /// assert_eq!(
    ///     resolver.endpoint("v1.0-test_meta.tgz"),
    ///     "https://api.test/v1/archives/v1.0/v1.0-test_meta.tgz"
    /// );
    /// ```
    #[must_use]
    pub fn endpoint(&self, identifier: &str) -> String {
        format!("{}/{identifier}", self.api_base.trim_end_matches('/'))
    }
}

impl UrlResolver for ArchiveApiResolver {
    fn resolve(
        &self,
        identifier: &str,
        token: &BearerToken,
        region: Region,
    ) -> Result<ResolvedLocation, ResolutionError> {
        let endpoint = self.endpoint(identifier);
        debug!("resolving {identifier} via {endpoint} (region {region})");

        let transport = |reason: String| ResolutionError::Transport {
            identifier: identifier.to_owned(),
            reason,
        };
        let response = http_agent()
            .get(&endpoint)
            .query("region", region.as_str())
            .query("project", &self.project)
            .header("Authorization", token.authorization_header())
            .call()
            .map_err(|err| transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolutionError::Rejected {
                identifier: identifier.to_owned(),
                status: status.as_u16(),
                body: diagnostic_body(response),
            });
        }

        let text = response
            .into_body()
            .read_to_string()
            .map_err(|err| transport(err.to_string()))?;
        parse_location(identifier, &text)
    }
}
