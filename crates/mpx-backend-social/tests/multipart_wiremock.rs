// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end multipart backend tests against a mock server.

use mpx_backend::{Backend, CancelToken, UploadRequest};
use mpx_backend_social::{ApiTokenBackend, CookieSiteBackend, WeiboBackend};
use mpx_config::{ApiTokenParams, BackendConfig, CookieParams, UserConfig};
use mpx_core::BackendId;
use std::io::Write;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn temp_png(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("pic.png");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(&[1u8; 2048]).unwrap();
    path
}

fn request(file: &std::path::Path, backend: BackendId) -> UploadRequest {
    UploadRequest::new(
        file,
        mpx_progress::ProgressSink::disabled(backend),
        CancelToken::new(),
    )
}

fn weibo_config(cookie: &str) -> UserConfig {
    let mut config = UserConfig::default();
    config.backends.insert(
        BackendId::Weibo,
        BackendConfig::Weibo(CookieParams {
            cookie: cookie.into(),
            enabled: true,
        }),
    );
    config
}

#[tokio::test]
async fn weibo_upload_extracts_pid_and_builds_cdn_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(header("cookie", "SUB=abc; SUBP=def"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"code":"A00000","data":{"pics":{"pic_1":{"pid":"007Xyz"}}}}"#,
        ))
        .mount(&server)
        .await;

    let backend = WeiboBackend::from_config(&weibo_config("SUB=abc; SUBP=def"))
        .unwrap()
        .with_urls(format!("{}/upload", server.uri()), server.uri());

    let dir = tempfile::tempdir().unwrap();
    let file = temp_png(&dir);
    let result = backend.upload(request(&file, BackendId::Weibo)).await.unwrap();
    assert_eq!(result.file_key, "007Xyz");
    assert_eq!(result.url, "https://tvax1.sinaimg.cn/large/007Xyz.jpg");
    assert_eq!(result.size_bytes, 2048);
}

#[tokio::test]
async fn weibo_error_code_maps_to_credential_expired() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"code":"100006","msg":"token expired"}"#),
        )
        .mount(&server)
        .await;

    let backend = WeiboBackend::from_config(&weibo_config("SUB=old"))
        .unwrap()
        .with_urls(server.uri(), server.uri());

    let dir = tempfile::tempdir().unwrap();
    let file = temp_png(&dir);
    let err = backend
        .upload(request(&file, BackendId::Weibo))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CREDENTIAL_EXPIRED");
    assert_eq!(err.expired_backend(), Some(BackendId::Weibo));
}

#[tokio::test]
async fn weibo_http_401_maps_to_credential_expired() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let backend = WeiboBackend::from_config(&weibo_config("SUB=old"))
        .unwrap()
        .with_urls(server.uri(), server.uri());

    let dir = tempfile::tempdir().unwrap();
    let file = temp_png(&dir);
    let err = backend
        .upload(request(&file, BackendId::Weibo))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CREDENTIAL_EXPIRED");
}

#[tokio::test]
async fn bilibili_sends_csrf_from_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"code":0,"data":{"image_url":"https://i0.hdslb.com/bfs/x.png"}}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = UserConfig::default();
    config.backends.insert(
        BackendId::Bilibili,
        BackendConfig::Bilibili(CookieParams {
            cookie: "SESSDATA=s; bili_jct=csrf-token".into(),
            enabled: true,
        }),
    );
    let backend = CookieSiteBackend::from_config(BackendId::Bilibili, &config)
        .unwrap()
        .with_urls(server.uri(), server.uri());

    let dir = tempfile::tempdir().unwrap();
    let file = temp_png(&dir);
    let result = backend
        .upload(request(&file, BackendId::Bilibili))
        .await
        .unwrap();
    assert_eq!(result.url, "https://i0.hdslb.com/bfs/x.png");

    // The multipart body carried the csrf field copied from the cookie.
    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body).into_owned();
    assert!(body.contains("csrf-token"));
    assert!(body.contains("name=\"csrf\""));
}

#[tokio::test]
async fn smms_upload_parses_data_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"success":true,"data":{"url":"https://s2.loli.net/x.png"}}"#,
        ))
        .mount(&server)
        .await;

    let mut config = UserConfig::default();
    config.backends.insert(
        BackendId::Smms,
        BackendConfig::Smms(ApiTokenParams {
            api_token: "tok".into(),
            enabled: true,
        }),
    );
    let backend = ApiTokenBackend::from_config(BackendId::Smms, &config)
        .unwrap()
        .with_urls(server.uri(), server.uri());

    let dir = tempfile::tempdir().unwrap();
    let file = temp_png(&dir);
    let result = backend.upload(request(&file, BackendId::Smms)).await.unwrap();
    assert_eq!(result.url, "https://s2.loli.net/x.png");
}

#[tokio::test]
async fn api_token_401_is_auth_failure_not_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .mount(&server)
        .await;

    let mut config = UserConfig::default();
    config.backends.insert(
        BackendId::Imgur,
        BackendConfig::Imgur(ApiTokenParams {
            api_token: "cid".into(),
            enabled: true,
        }),
    );
    let backend = ApiTokenBackend::from_config(BackendId::Imgur, &config)
        .unwrap()
        .with_urls(server.uri(), server.uri());

    let dir = tempfile::tempdir().unwrap();
    let file = temp_png(&dir);
    let err = backend
        .upload(request(&file, BackendId::Imgur))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "AUTH_FAILURE");
}
