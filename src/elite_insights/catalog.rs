use std::time::Duration;

use serde::Deserialize;

use super::version::ToolVersion;

pub const RELEASE_ASSET_NAME: &str = "GW2EICLI.zip";
const GITHUB_RELEASES_URL: &str =
    "https://api.github.com/repos/baaron4/GW2-Elite-Insights-Parser/releases";
const WINGMAN_VERSION_URL: &str = "https://gw2wingman.nevermindcreations.de/api/EIversion";

/// A published Elite Insights release with its CLI archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub version: ToolVersion,
    pub download_url: String,
}

/// Where tool releases come from.
pub trait ReleaseCatalog: Send + Sync {
    fn latest_release(&self) -> Result<Release, String>;

    fn release_by_tag(&self, tag_name: &str) -> Result<Release, String>;

    /// The Elite Insights version Wingman currently expects.
    fn wingman_version(&self) -> Result<ToolVersion, String>;

    fn download(&self, url: &str) -> Result<Vec<u8>, String>;
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
}

/// Reads a GitHub release document and picks the CLI archive out of its assets.
pub fn parse_release(raw_json: &str) -> Result<Release, String> {
    let release: GithubRelease = serde_json::from_str(raw_json)
        .map_err(|error| format!("Failed to parse release information: {error}"))?;

    let version = ToolVersion::parse(&release.tag_name)
        .ok_or_else(|| format!("Release has an invalid tag name '{}'", release.tag_name))?;

    let download_url = release
        .assets
        .into_iter()
        .find(|asset| asset.name == RELEASE_ASSET_NAME)
        .map(|asset| asset.browser_download_url)
        .ok_or_else(|| {
            format!(
                "Release {} has no {RELEASE_ASSET_NAME} asset",
                release.tag_name
            )
        })?;

    Ok(Release {
        version,
        download_url,
    })
}

/// GitHub releases plus the Wingman version endpoint, over blocking HTTP.
pub struct GithubReleaseCatalog {
    http: reqwest::blocking::Client,
    timeout: Duration,
}

impl GithubReleaseCatalog {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()?;
        Ok(Self { http, timeout })
    }

    fn get_text(&self, url: &str) -> Result<String, String> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .map_err(|error| format!("Request to {url} failed: {error}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Request to {url} returned status {status}"));
        }

        response
            .text()
            .map_err(|error| format!("Failed to read response from {url}: {error}"))
    }
}

impl ReleaseCatalog for GithubReleaseCatalog {
    fn latest_release(&self) -> Result<Release, String> {
        parse_release(&self.get_text(&format!("{GITHUB_RELEASES_URL}/latest"))?)
    }

    fn release_by_tag(&self, tag_name: &str) -> Result<Release, String> {
        parse_release(&self.get_text(&format!("{GITHUB_RELEASES_URL}/tags/{tag_name}"))?)
    }

    fn wingman_version(&self) -> Result<ToolVersion, String> {
        let body = self.get_text(WINGMAN_VERSION_URL)?;
        ToolVersion::parse(&body)
            .ok_or_else(|| format!("Wingman returned an invalid version '{}'", body.trim()))
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, String> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .map_err(|error| format!("Download failed: {error}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Download returned status {status}"));
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|error| format!("Failed to read download: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_cli_asset_from_release() {
        let release = parse_release(
            r#"{
                "tag_name": "v3.7.0.1",
                "assets": [
                    { "name": "GW2EI.zip", "browser_download_url": "https://example.invalid/GW2EI.zip" },
                    { "name": "GW2EICLI.zip", "browser_download_url": "https://example.invalid/GW2EICLI.zip" }
                ]
            }"#,
        )
        .expect("parse release");

        assert_eq!(release.version.tag_name(), "v3.7.0.1");
        assert_eq!(release.download_url, "https://example.invalid/GW2EICLI.zip");
    }

    #[test]
    fn rejects_releases_without_cli_asset_or_valid_tag() {
        assert!(parse_release(r#"{ "tag_name": "v3.7.0.1", "assets": [] }"#)
            .expect_err("missing asset")
            .contains("GW2EICLI.zip"));
        assert!(parse_release(
            r#"{ "tag_name": "nightly", "assets": [{ "name": "GW2EICLI.zip", "browser_download_url": "x" }] }"#
        )
        .is_err());
        assert!(parse_release("[]").is_err());
    }
}
