// SPDX-License-Identifier: MIT OR Apache-2.0
//! Link-format layer: the last step between an upload result and the URL
//! the user actually copies.
//!
//! Backends produce canonical URLs; this layer optionally rewrites them —
//! a proxy prefix for weibo when output is proxied, and a CDN mirror
//! template for GitHub raw links.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use mpx_config::{OutputFormat, UserConfig};
use mpx_core::{BackendId, UploadResult};

/// Host of GitHub raw content URLs.
const RAW_GITHUB_HOST: &str = "raw.githubusercontent.com";

/// Placeholders every CDN template must carry.
const CDN_PLACEHOLDERS: &[&str] = &["{owner}", "{repo}", "{branch}", "{path}"];

/// Errors from template validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// A CDN template is missing one or more required placeholders.
    #[error("cdn template missing placeholders: {missing:?}")]
    MissingPlaceholders {
        /// The placeholders that were absent.
        missing: Vec<&'static str>,
    },
}

/// The four components of a GitHub raw URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubParts {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Branch name.
    pub branch: String,
    /// Path within the repository.
    pub path: String,
}

/// Check that a CDN template carries all four placeholders.
pub fn validate_cdn_template(template: &str) -> Result<(), LinkError> {
    let missing: Vec<&'static str> = CDN_PLACEHOLDERS
        .iter()
        .copied()
        .filter(|p| !template.contains(p))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(LinkError::MissingPlaceholders { missing })
    }
}

/// Substitute parts into a CDN template.
pub fn build_cdn_url(parts: &GithubParts, template: &str) -> String {
    template
        .replace("{owner}", &parts.owner)
        .replace("{repo}", &parts.repo)
        .replace("{branch}", &parts.branch)
        .replace("{path}", &parts.path)
}

/// Parse a `raw.githubusercontent.com` URL back into its parts.
///
/// Returns `None` for anything that is not a well-formed raw URL.
pub fn parse_raw_url(url: &str) -> Option<GithubParts> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let rest = rest.strip_prefix(RAW_GITHUB_HOST)?.strip_prefix('/')?;
    let mut segments = rest.splitn(4, '/');
    let owner = segments.next()?.to_string();
    let repo = segments.next()?.to_string();
    let branch = segments.next()?.to_string();
    let path = segments.next()?.to_string();
    if owner.is_empty() || repo.is_empty() || branch.is_empty() || path.is_empty() {
        return None;
    }
    Some(GithubParts {
        owner,
        repo,
        branch,
        path,
    })
}

/// Render the user-visible link for an upload result under the current
/// config.
///
/// The canonical URL comes straight from the backend; rewriting applies in
/// two cases only: weibo under proxied output with an enabled prefix, and
/// GitHub raw URLs when the GitHub CDN config is enabled with a valid
/// template.
pub fn render_link(result: &UploadResult, config: &UserConfig) -> String {
    let canonical = result.url.clone();
    match result.backend_id {
        BackendId::Weibo => {
            if config.output_format == OutputFormat::Proxied {
                if let Some(prefix) = config.link_prefix_config.active_prefix() {
                    return format!("{prefix}{canonical}");
                }
            }
            canonical
        }
        BackendId::Github => {
            let Some(mpx_config::BackendConfig::Github(params)) =
                config.backend(BackendId::Github)
            else {
                return canonical;
            };
            let Some(cdn) = params.cdn_config.as_ref().filter(|c| c.enabled) else {
                return canonical;
            };
            let Some(template) = cdn.active_template() else {
                return canonical;
            };
            if validate_cdn_template(template).is_err() {
                return canonical;
            }
            match parse_raw_url(&canonical) {
                Some(parts) => build_cdn_url(&parts, template),
                None => canonical,
            }
        }
        _ => canonical,
    }
}
