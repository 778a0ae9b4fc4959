//! Dependency-freshness checks against each module's declared repository.
//!
//! There is no `package.json` to read natively; each module's
//! [`crate::module::ModuleMeta`] carries its own `version` and the kernel
//! compares it against the latest tag of a declared repository URL. The
//! remote query is a blocking [`ureq`] call moved off the async executor via
//! [`tokio::task::spawn_blocking`] rather than pulling in an async-native
//! HTTP client solely for this one path.

use std::cmp::Ordering;
use std::time::Duration;

use crate::error::UpdateCheckerError;

/// Result of comparing one module's installed version against the latest
/// tag found at its repository.
#[derive(Debug, Clone)]
pub struct UpdateStatus {
    pub module: String,
    pub current_version: String,
    pub latest_version: Option<String>,
    pub update_available: bool,
}

/// Parses a three-shape repository URL (`git@host:owner/repo.git`,
/// `https://host/owner/repo`, `https://host/owner/repo.git`) into
/// `(host, owner, repo)`.
fn normalize_repository_url(url: &str) -> Result<(String, String, String), ()> {
    let ssh = regex::Regex::new(r"^git@([^:]+):([^/]+)/(.+?)(\.git)?$").unwrap();
    if let Some(caps) = ssh.captures(url) {
        return Ok((caps[1].to_string(), caps[2].to_string(), caps[3].to_string()));
    }

    let https = regex::Regex::new(r"^https?://([^/]+)/([^/]+)/(.+?)(\.git)?/?$").unwrap();
    if let Some(caps) = https.captures(url) {
        return Ok((caps[1].to_string(), caps[2].to_string(), caps[3].to_string()));
    }

    Err(())
}

/// Compares two dotted version strings (`"1.2.3"`-style, non-numeric
/// segments sort as `0`). Mirrors the classic `<0 / 0 / >0` contract: `a < b`
/// returns negative, equal returns `0`, `a > b` returns positive.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> i32 {
    let parse = |v: &str| -> Vec<u64> {
        v.trim_start_matches('v')
            .split(['.', '-', '+'])
            .map(|seg| seg.parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (pa, pb) = (parse(a), parse(b));
    let len = pa.len().max(pb.len());
    for i in 0..len {
        let xa = pa.get(i).copied().unwrap_or(0);
        let xb = pb.get(i).copied().unwrap_or(0);
        match xa.cmp(&xb) {
            Ordering::Less => return -1,
            Ordering::Greater => return 1,
            Ordering::Equal => {}
        }
    }
    0
}

/// Queries the latest release tag for a module's declared repository.
///
/// The query itself runs inside `spawn_blocking` since `ureq` is a blocking
/// client; this function is the async boundary the rest of the kernel calls.
pub struct UpdateChecker {
    timeout: Duration,
}

impl Default for UpdateChecker {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

impl UpdateChecker {
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// # Errors
    /// Returns [`UpdateCheckerError::UnrecognizedRepositoryUrl`] if the URL
    /// doesn't match a known shape, or [`UpdateCheckerError::RemoteQuery`] if
    /// the HTTP round trip fails.
    pub async fn check(
        &self,
        module: &str,
        current_version: &str,
        repository_url: &str,
    ) -> Result<UpdateStatus, UpdateCheckerError> {
        let (host, owner, repo) =
            normalize_repository_url(repository_url).map_err(|()| UpdateCheckerError::UnrecognizedRepositoryUrl {
                module: module.to_string(),
                url: repository_url.to_string(),
            })?;

        let timeout = self.timeout;
        let module_owned = module.to_string();
        let latest = tokio::task::spawn_blocking(move || query_latest_tag(&host, &owner, &repo, timeout))
            .await
            .map_err(|join_err| UpdateCheckerError::RemoteQuery {
                module: module_owned.clone(),
                source: anyhow::anyhow!(join_err),
            })?
            .map_err(|source| UpdateCheckerError::RemoteQuery {
                module: module_owned,
                source,
            })?;

        let update_available = latest
            .as_deref()
            .is_some_and(|v| compare_versions(v, current_version) > 0);

        Ok(UpdateStatus {
            module: module.to_string(),
            current_version: current_version.to_string(),
            latest_version: latest,
            update_available,
        })
    }
}

fn query_latest_tag(host: &str, owner: &str, repo: &str, timeout: Duration) -> anyhow::Result<Option<String>> {
    let url = format!("https://api.{host}/repos/{owner}/{repo}/tags");
    let response = ureq::get(&url)
        .timeout(timeout)
        .set("User-Agent", "modkit-update-checker")
        .call()?;
    let body: serde_json::Value = response.into_json()?;
    Ok(body
        .as_array()
        .and_then(|tags| tags.first())
        .and_then(|tag| tag.get("name"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_simple_versions() {
        assert_eq!(compare_versions("1.2.3", "1.2.3"), 0);
        assert!(compare_versions("1.2.3", "1.3.0") < 0);
        assert!(compare_versions("2.0.0", "1.9.9") > 0);
    }

    #[test]
    fn compares_versions_with_v_prefix_and_uneven_length() {
        assert_eq!(compare_versions("v1.2", "1.2.0"), 0);
        assert!(compare_versions("1.2", "1.2.1") < 0);
    }

    #[test]
    fn normalizes_ssh_and_https_repository_urls() {
        assert_eq!(
            normalize_repository_url("git@github.com:acme/widgets.git").unwrap(),
            ("github.com".to_string(), "acme".to_string(), "widgets".to_string())
        );
        assert_eq!(
            normalize_repository_url("https://github.com/acme/widgets").unwrap(),
            ("github.com".to_string(), "acme".to_string(), "widgets".to_string())
        );
        assert_eq!(
            normalize_repository_url("https://github.com/acme/widgets.git").unwrap(),
            ("github.com".to_string(), "acme".to_string(), "widgets".to_string())
        );
    }

    #[test]
    fn rejects_unrecognized_repository_url() {
        assert!(normalize_repository_url("not a url").is_err());
    }
}
