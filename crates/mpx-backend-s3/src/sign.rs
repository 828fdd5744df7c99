// SPDX-License-Identifier: MIT OR Apache-2.0
//! AWS Signature Version 4 for S3-compatible services.
//!
//! Hand-rolled rather than SDK-provided: the providers here disagree about
//! endpoints and regions but all accept plain SigV4 over the `s3` service
//! name with a signed payload hash.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Credentials and scope for one signature.
#[derive(Debug, Clone)]
pub struct SigningContext<'a> {
    /// Access key id.
    pub access_key_id: &'a str,
    /// Secret access key.
    pub secret_access_key: &'a str,
    /// Region component of the credential scope.
    pub region: &'a str,
}

/// Headers produced by signing; attach all of them to the request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    /// `x-amz-date` value.
    pub amz_date: String,
    /// `x-amz-content-sha256` value.
    pub content_sha256: String,
    /// `authorization` value.
    pub authorization: String,
}

/// SHA-256 of a payload as lowercase hex.
pub fn payload_hash(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn signing_key(secret_key: &str, date_stamp: &str, region: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

/// Encode a URI path for the canonical request: each segment individually,
/// `/` kept as the separator.
pub fn encode_uri_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Canonical query string: keys sorted, both halves encoded.
fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Sign one request.
///
/// `uri_path` is the unencoded object path starting with `/`; `query` is the
/// unencoded query pairs. The signed header set is fixed to
/// `host;x-amz-content-sha256;x-amz-date`, which is all the providers here
/// need.
pub fn sign_request(
    ctx: &SigningContext<'_>,
    method: &str,
    host: &str,
    uri_path: &str,
    query: &[(String, String)],
    content_sha256: &str,
    now: DateTime<Utc>,
) -> SignedHeaders {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();

    let canonical_uri = encode_uri_path(uri_path);
    let canonical_qs = canonical_query(query);
    let canonical_headers = format!(
        "host:{host}\nx-amz-content-sha256:{content_sha256}\nx-amz-date:{amz_date}\n"
    );
    let signed_headers = "host;x-amz-content-sha256;x-amz-date";

    let canonical_request = format!(
        "{method}\n{canonical_uri}\n{canonical_qs}\n{canonical_headers}\n{signed_headers}\n{content_sha256}"
    );

    let scope = format!("{date_stamp}/{}/s3/aws4_request", ctx.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        payload_hash(canonical_request.as_bytes())
    );

    let key = signing_key(ctx.secret_access_key, &date_stamp, ctx.region);
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        ctx.access_key_id
    );

    SignedHeaders {
        amz_date,
        content_sha256: content_sha256.to_string(),
        authorization,
    }
}
