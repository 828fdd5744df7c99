// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared multipart POST with chunked progress.

use mpx_backend::{CancelToken, UploadRequest, map_reqwest_err, status_error};
use mpx_core::BackendId;
use mpx_error::UploadError;
use mpx_progress::TransferReporter;
use std::sync::{Arc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

/// Streaming chunk size for multipart file parts.
const PART_CHUNK: usize = 64 * 1024;

/// Build a multipart file part that records progress as it streams.
fn streamed_part(
    data: Vec<u8>,
    file_name: String,
    content_type: &str,
    reporter: Arc<Mutex<TransferReporter>>,
) -> Result<reqwest::multipart::Part, UploadError> {
    let total = data.len();
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Vec<u8>, std::io::Error>>(4);
    tokio::spawn(async move {
        let mut offset = 0;
        while offset < total {
            let end = (offset + PART_CHUNK).min(total);
            let chunk = data[offset..end].to_vec();
            let n = chunk.len() as u64;
            if tx.send(Ok(chunk)).await.is_err() {
                return;
            }
            if let Ok(mut rep) = reporter.lock() {
                rep.record(n);
            }
            offset = end;
        }
    });

    let body = reqwest::Body::wrap_stream(ReceiverStream::new(rx));
    reqwest::multipart::Part::stream_with_length(body, total as u64)
        .file_name(file_name)
        .mime_str(content_type)
        .map_err(|e| UploadError::Unknown {
            message: format!("invalid mime type: {e}"),
        })
}

/// POST a file as `multipart/form-data` and return the response body.
///
/// Emits the full progress contract through the request's sink; the 100 %
/// event fires only after the server answered with success. Non-success
/// statuses are mapped with `session_auth` semantics before the body is
/// handed to the caller.
pub async fn post_multipart(
    backend_id: BackendId,
    client: &reqwest::Client,
    url: &str,
    file_field: &str,
    extra_fields: &[(String, String)],
    headers: &[(String, String)],
    req: &UploadRequest,
    session_auth: bool,
) -> Result<String, UploadError> {
    req.cancel.check()?;
    let data = req.read_file().await?;
    let size = data.len() as u64;
    let reporter = Arc::new(Mutex::new(TransferReporter::start(req.sink.clone(), size)));

    let part = streamed_part(
        data,
        req.file_name.clone(),
        &req.content_type(),
        Arc::clone(&reporter),
    )?;
    let mut form = reqwest::multipart::Form::new().part(file_field.to_string(), part);
    for (k, v) in extra_fields {
        form = form.text(k.clone(), v.clone());
    }

    let mut builder = client.post(url).multipart(form);
    for (k, v) in headers {
        builder = builder.header(k.as_str(), v.as_str());
    }

    let resp = race_cancel(&req.cancel, builder.send())
        .await?
        .map_err(|e| map_reqwest_err(backend_id, e))?;
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| map_reqwest_err(backend_id, e))?;
    if !status.is_success() {
        return Err(status_error(backend_id, status, &body, session_auth));
    }
    if let Ok(mut rep) = reporter.lock() {
        rep.finish();
    }
    Ok(body)
}

async fn race_cancel<T>(
    cancel: &CancelToken,
    fut: impl Future<Output = T>,
) -> Result<T, UploadError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(UploadError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Walk a JSON value along object keys.
pub fn json_path<'a>(
    value: &'a serde_json::Value,
    path: &[&str],
) -> Option<&'a serde_json::Value> {
    let mut cur = value;
    for key in path {
        cur = cur.get(key)?;
    }
    Some(cur)
}

/// Extract a named field from a cookie string (`k=v; k2=v2`).
pub fn cookie_field(cookie: &str, name: &str) -> Option<String> {
    cookie.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}
