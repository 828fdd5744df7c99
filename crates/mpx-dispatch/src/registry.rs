// SPDX-License-Identifier: MIT OR Apache-2.0
//! The compile-time backend list.

use mpx_backend::{Backend, BackendRegistry};
use mpx_backend_github::GithubBackend;
use mpx_backend_s3::{S3Backend, UpyunBackend};
use mpx_backend_social::{ApiTokenBackend, CookieSiteBackend, WeiboBackend};
use mpx_backend_token::{SidecarTokenSource, TokenBackend, TokenSource};
use mpx_core::BackendId;
use mpx_sidecar::FetcherClient;
use std::path::PathBuf;
use std::sync::Arc;

/// Build the registry with every supported backend.
///
/// `fetcher_program` is the credential sidecar binary used by the
/// token-dance backends; it is resolved through `PATH` when relative.
pub fn standard_registry(fetcher_program: impl Into<PathBuf>) -> BackendRegistry {
    let token_source: Arc<dyn TokenSource> = Arc::new(SidecarTokenSource::new(
        FetcherClient::new(fetcher_program.into()),
    ));
    let mut registry = BackendRegistry::new();

    registry.register(BackendId::Weibo, |cfg| {
        Ok(Box::new(WeiboBackend::from_config(cfg)?) as Box<dyn Backend>)
    });
    for id in [
        BackendId::Jd,
        BackendId::Nowcoder,
        BackendId::Zhihu,
        BackendId::Bilibili,
        BackendId::Chaoxing,
    ] {
        registry.register(id, move |cfg| {
            Ok(Box::new(CookieSiteBackend::from_config(id, cfg)?) as Box<dyn Backend>)
        });
    }
    for id in [
        BackendId::R2,
        BackendId::Tencent,
        BackendId::Aliyun,
        BackendId::Qiniu,
    ] {
        registry.register(id, move |cfg| {
            Ok(Box::new(S3Backend::from_config(id, cfg)?) as Box<dyn Backend>)
        });
    }
    registry.register(BackendId::Upyun, |cfg| {
        Ok(Box::new(UpyunBackend::from_config(cfg)?) as Box<dyn Backend>)
    });
    registry.register(BackendId::Github, |cfg| {
        Ok(Box::new(GithubBackend::from_config(cfg)?) as Box<dyn Backend>)
    });
    for id in [BackendId::Smms, BackendId::Imgur] {
        registry.register(id, move |cfg| {
            Ok(Box::new(ApiTokenBackend::from_config(id, cfg)?) as Box<dyn Backend>)
        });
    }
    for id in [BackendId::Qiyu, BackendId::Nami] {
        let source = Arc::clone(&token_source);
        registry.register(id, move |cfg| {
            Ok(Box::new(TokenBackend::from_config(id, cfg, Arc::clone(&source))?)
                as Box<dyn Backend>)
        });
    }

    registry
}
