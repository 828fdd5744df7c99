// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cookie-jar watching for the in-process login webview.
//!
//! The webview itself belongs to the GUI host; the engine owns the rule for
//! deciding when a login actually happened: each backend names the cookie
//! fields that must appear before the jar is worth emitting.

use mpx_core::BackendId;
use std::time::Duration;

/// When a backend's login is considered complete.
#[derive(Debug, Clone, Copy)]
pub struct CookieRule {
    /// Backend this rule belongs to.
    pub id: BackendId,
    /// Cookie fields that must all be present.
    pub required_fields: &'static [&'static str],
    /// Delay before the first poll, giving the login page time to settle.
    pub initial_delay: Duration,
    /// Interval between polls.
    pub poll_interval: Duration,
}

/// Per-backend cookie completion rules.
pub const COOKIE_RULES: &[CookieRule] = &[
    CookieRule {
        id: BackendId::Weibo,
        required_fields: &["SUB", "SUBP"],
        initial_delay: Duration::from_secs(2),
        poll_interval: Duration::from_millis(800),
    },
    CookieRule {
        id: BackendId::Nami,
        required_fields: &["Auth-Token"],
        initial_delay: Duration::from_secs(1),
        poll_interval: Duration::from_millis(500),
    },
    CookieRule {
        id: BackendId::Bilibili,
        required_fields: &["SESSDATA", "bili_jct"],
        initial_delay: Duration::from_secs(2),
        poll_interval: Duration::from_millis(800),
    },
    CookieRule {
        id: BackendId::Nowcoder,
        required_fields: &["t"],
        initial_delay: Duration::from_secs(1),
        poll_interval: Duration::from_millis(500),
    },
    CookieRule {
        id: BackendId::Zhihu,
        required_fields: &["z_c0"],
        initial_delay: Duration::from_secs(2),
        poll_interval: Duration::from_millis(800),
    },
    CookieRule {
        id: BackendId::Chaoxing,
        required_fields: &["_uid", "_d"],
        initial_delay: Duration::from_secs(1),
        poll_interval: Duration::from_millis(500),
    },
];

/// Look up the rule for a backend.
pub fn cookie_rule(id: BackendId) -> Option<&'static CookieRule> {
    COOKIE_RULES.iter().find(|r| r.id == id)
}

/// Whether a cookie string satisfies a rule.
pub fn cookie_satisfies(rule: &CookieRule, cookie: &str) -> bool {
    rule.required_fields.iter().all(|field| {
        cookie.split(';').any(|pair| {
            pair.trim()
                .split_once('=')
                .is_some_and(|(k, v)| k == *field && !v.is_empty())
        })
    })
}

/// Poll a cookie source until the rule is satisfied or `budget` runs out.
///
/// `poll` returns the current cookie string each round; the full string is
/// returned once every required field has appeared.
pub async fn watch_cookies<F, Fut>(
    rule: &CookieRule,
    mut poll: F,
    budget: Duration,
) -> Option<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<String>>,
{
    let deadline = tokio::time::Instant::now() + budget;
    tokio::time::sleep(rule.initial_delay).await;
    loop {
        if let Some(cookie) = poll().await {
            if cookie_satisfies(rule, &cookie) {
                return Some(cookie);
            }
        }
        if tokio::time::Instant::now() + rule.poll_interval > deadline {
            return None;
        }
        tokio::time::sleep(rule.poll_interval).await;
    }
}
