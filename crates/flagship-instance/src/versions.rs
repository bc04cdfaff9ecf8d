//! Release versions of the custom Unleash image
//!
//! Releases are tagged `v<major>.<minor>.<patch>-<YYYYMMDD>-<HHMMSS>-<commit>`
//! in the image source repository. Only the normalizer consumes them, to pick
//! a default version pin, so failures here are never fatal.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use flagship_common::retry::{retry_with_backoff, RetryConfig};
use flagship_common::{Error, Result};
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tracing::{debug, warn};

/// Public GitHub API
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
/// Repository the image is built from
pub const DEFAULT_REPO_OWNER: &str = "nais";
/// Repository the image is built from
pub const DEFAULT_REPO_NAME: &str = "unleash";

const COMMIT_HASH_LEN: usize = 7;
const USER_AGENT: &str = concat!("flagship/", env!("CARGO_PKG_VERSION"));

/// One released image version
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseVersion {
    /// Semantic version without the leading `v` (e.g. "5.10.2")
    pub version_number: String,
    /// Build time encoded in the tag
    pub release_time: DateTime<Utc>,
    /// Abbreviated commit hash
    pub commit_hash: String,
    /// The full tag, usable as a version pin
    pub git_tag: String,
}

impl ReleaseVersion {
    /// Parse a release tag, returning `None` for anything that is not one
    pub fn parse_tag(tag: &str) -> Option<Self> {
        let rest = tag.strip_prefix('v')?;
        let mut parts = rest.split('-');
        let (version, date, time, commit) =
            (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }

        let numbers: Vec<&str> = version.split('.').collect();
        if numbers.len() != 3 || !numbers.iter().all(|n| is_digits(n, None)) {
            return None;
        }
        if !is_digits(date, Some(8)) || !is_digits(time, Some(6)) {
            return None;
        }
        if commit.len() != COMMIT_HASH_LEN
            || !commit.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return None;
        }

        let release_time =
            NaiveDateTime::parse_from_str(&format!("{}-{}", date, time), "%Y%m%d-%H%M%S")
                .ok()?
                .and_utc();

        Some(Self {
            version_number: version.to_string(),
            release_time,
            commit_hash: commit.to_string(),
            git_tag: tag.to_string(),
        })
    }
}

fn is_digits(s: &str, len: Option<usize>) -> bool {
    !s.is_empty() && len.map_or(true, |l| s.len() == l) && s.chars().all(|c| c.is_ascii_digit())
}

/// Where release versions come from
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// Released versions, most recent first
    async fn list_versions(&self) -> Result<Vec<ReleaseVersion>>;
}

/// Fetch versions, logging and swallowing any failure
pub async fn available_versions(source: &dyn VersionSource) -> Vec<ReleaseVersion> {
    match source.list_versions().await {
        Ok(versions) => versions,
        Err(e) => {
            warn!(error = %e, "failed to list release versions, continuing without a default");
            Vec::new()
        }
    }
}

#[derive(Deserialize)]
struct Tag {
    name: String,
}

/// Reads release tags from the GitHub REST API
#[derive(Clone)]
pub struct GithubVersionSource {
    http: reqwest::Client,
    api_url: String,
    owner: String,
    repo: String,
    retry: RetryConfig,
}

impl GithubVersionSource {
    /// Source for the public image repository
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_repo(http, DEFAULT_GITHUB_API_URL, DEFAULT_REPO_OWNER, DEFAULT_REPO_NAME)
    }

    /// Source for an arbitrary repository behind an arbitrary API URL
    pub fn with_repo(
        http: reqwest::Client,
        api_url: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into(),
            owner: owner.into(),
            repo: repo.into(),
            retry: RetryConfig::with_max_attempts(3),
        }
    }

    fn tags_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/tags",
            self.api_url.trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }

    async fn fetch_tags(&self) -> Result<Vec<String>> {
        let response = self
            .http
            .get(self.tags_url())
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), body));
        }

        let tags: Vec<Tag> = response.json().await?;
        Ok(tags.into_iter().map(|t| t.name).collect())
    }
}

#[async_trait]
impl VersionSource for GithubVersionSource {
    async fn list_versions(&self) -> Result<Vec<ReleaseVersion>> {
        let tags = retry_with_backoff(&self.retry, "list_release_tags", || self.fetch_tags()).await?;
        let total = tags.len();
        let versions: Vec<ReleaseVersion> = tags
            .iter()
            .filter_map(|t| ReleaseVersion::parse_tag(t))
            .collect();
        debug!(total, releases = versions.len(), "fetched release tags");
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_release_tag_components() {
        let v = ReleaseVersion::parse_tag("v4.23.4-20230804-081623-e0123bf").expect("release tag");

        assert_eq!(v.version_number, "4.23.4");
        assert_eq!(v.commit_hash, "e0123bf");
        assert_eq!(v.git_tag, "v4.23.4-20230804-081623-e0123bf");
        assert_eq!(
            (v.release_time.year(), v.release_time.month(), v.release_time.day()),
            (2023, 8, 4)
        );
        assert_eq!(
            (v.release_time.hour(), v.release_time.minute(), v.release_time.second()),
            (8, 16, 23)
        );
    }

    #[test]
    fn rejects_tags_outside_the_release_scheme() {
        for tag in [
            "68.20191007.1233",
            "4.23.4-20230804-081623-e0123bf",
            "v4.23-20230804-081623-e0123bf",
            "v4.23.4-2023084-081623-e0123bf",
            "v4.23.4-20230804-081623-e0123b",
            "v4.23.4-20230804-081623-e0123bf-extra",
            "v4.23.4-20231304-081623-e0123bf",
            "",
        ] {
            assert!(ReleaseVersion::parse_tag(tag).is_none(), "{tag} should be rejected");
        }
    }

    /// A registry outage must not block instance creation, it only means
    /// no default version can be chosen.
    #[tokio::test]
    async fn registry_failure_yields_no_versions() {
        let mut source = MockVersionSource::new();
        source
            .expect_list_versions()
            .returning(|| Err(Error::api(503, "unavailable")));

        assert!(available_versions(&source).await.is_empty());
    }

    #[tokio::test]
    async fn registry_success_is_passed_through() {
        let mut source = MockVersionSource::new();
        source.expect_list_versions().returning(|| {
            Ok(vec![
                ReleaseVersion::parse_tag("v5.1.0-20240101-120000-abcdef1").expect("tag")
            ])
        });

        let versions = available_versions(&source).await;
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version_number, "5.1.0");
    }

    #[test]
    fn tags_url_tolerates_trailing_slash() {
        let source =
            GithubVersionSource::with_repo(reqwest::Client::new(), "http://localhost/", "o", "r");
        assert_eq!(source.tags_url(), "http://localhost/repos/o/r/tags");
    }
}
