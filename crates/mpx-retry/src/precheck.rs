// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connectivity precheck before spending a retry.

use mpx_error::UploadError;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::debug;

/// Endpoints that are up when the internet is up.
const DEFAULT_ENDPOINTS: &[&str] = &[
    "https://www.baidu.com",
    "https://www.gstatic.com/generate_204",
    "https://cp.cloudflare.com",
];

/// Overall precheck budget.
const PRECHECK_TIMEOUT: Duration = Duration::from_millis(2_500);

/// Concurrent HEAD probe against several reliable endpoints.
///
/// The host environment may already know it is online (the GUI's navigator
/// flag); [`assume_online`](Self::assume_online) skips the probe entirely.
#[derive(Debug, Clone)]
pub struct NetworkPrecheck {
    endpoints: Vec<String>,
    timeout: Duration,
    assume_online: bool,
}

impl Default for NetworkPrecheck {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            timeout: PRECHECK_TIMEOUT,
            assume_online: false,
        }
    }
}

impl NetworkPrecheck {
    /// The standard probe.
    pub fn new() -> Self {
        Self::default()
    }

    /// A precheck that always passes; for hosts that track connectivity
    /// themselves and for tests.
    pub fn assume_online() -> Self {
        Self {
            assume_online: true,
            ..Self::default()
        }
    }

    /// Probe different endpoints; used by tests.
    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Require at least one endpoint to answer within the budget.
    ///
    /// # Errors
    ///
    /// [`UploadError::NetworkUnavailable`] when nothing answered in time.
    pub async fn check(&self) -> Result<(), UploadError> {
        if self.assume_online {
            return Ok(());
        }
        let client = mpx_backend::shared_client();
        let mut set = JoinSet::new();
        for endpoint in &self.endpoints {
            let client = client.clone();
            let endpoint = endpoint.clone();
            set.spawn(async move {
                client
                    .head(&endpoint)
                    .timeout(PRECHECK_TIMEOUT)
                    .send()
                    .await
                    .is_ok()
            });
        }

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return Err(UploadError::NetworkUnavailable),
                joined = set.join_next() => match joined {
                    Some(Ok(true)) => {
                        debug!("network precheck passed");
                        return Ok(());
                    }
                    Some(_) => continue,
                    None => return Err(UploadError::NetworkUnavailable),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn one_reachable_endpoint_is_enough() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let precheck = NetworkPrecheck::new().with_endpoints(vec![
            "http://127.0.0.1:1/unreachable".into(),
            server.uri(),
        ]);
        precheck.check().await.unwrap();
    }

    #[tokio::test]
    async fn all_unreachable_is_network_unavailable() {
        let precheck = NetworkPrecheck::new().with_endpoints(vec![
            "http://127.0.0.1:1/a".into(),
            "http://127.0.0.1:1/b".into(),
        ]);
        let err = precheck.check().await.unwrap_err();
        assert_eq!(err.code(), "NETWORK_UNAVAILABLE");
    }

    #[tokio::test]
    async fn assume_online_skips_the_probe() {
        let precheck = NetworkPrecheck::assume_online().with_endpoints(vec![]);
        precheck.check().await.unwrap();
    }
}
