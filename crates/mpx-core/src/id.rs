// SPDX-License-Identifier: MIT OR Apache-2.0
//! Backend identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of one remote image-hosting target.
///
/// The set is closed: backends are compiled in, never discovered at runtime.
/// Serialises to the lowercase id string used in config files and the
/// history database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    /// Weibo image host (cookie-authenticated multipart).
    Weibo,
    /// Cloudflare R2 (S3-compatible).
    R2,
    /// JD image service (cookie-authenticated multipart).
    Jd,
    /// Nowcoder image host (cookie-authenticated multipart).
    Nowcoder,
    /// Qiyu image host (sidecar-acquired one-shot token).
    Qiyu,
    /// Zhihu image host (cookie-authenticated multipart).
    Zhihu,
    /// Nami image host (auth-token multipart).
    Nami,
    /// Bilibili image host (cookie-authenticated multipart).
    Bilibili,
    /// Chaoxing image host (cookie-authenticated multipart).
    Chaoxing,
    /// SM.MS image host (API-token multipart).
    Smms,
    /// GitHub repository contents API.
    Github,
    /// Imgur (API-token multipart).
    Imgur,
    /// Tencent COS (S3-compatible).
    Tencent,
    /// Aliyun OSS (S3-compatible).
    Aliyun,
    /// Qiniu Kodo (S3-compatible).
    Qiniu,
    /// Upyun USS (S3-style object storage).
    Upyun,
}

/// Whether a backend stores into user-owned storage or a third-party platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPartition {
    /// User-owned storage (S3 family, GitHub repos).
    Private,
    /// Third-party platform the user does not control.
    Public,
}

impl BackendId {
    /// Every backend id, in the canonical display order.
    pub const ALL: &'static [BackendId] = &[
        BackendId::Weibo,
        BackendId::R2,
        BackendId::Jd,
        BackendId::Nowcoder,
        BackendId::Qiyu,
        BackendId::Zhihu,
        BackendId::Nami,
        BackendId::Bilibili,
        BackendId::Chaoxing,
        BackendId::Smms,
        BackendId::Github,
        BackendId::Imgur,
        BackendId::Tencent,
        BackendId::Aliyun,
        BackendId::Qiniu,
        BackendId::Upyun,
    ];

    /// The stable lowercase string form used on the wire and on disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weibo => "weibo",
            Self::R2 => "r2",
            Self::Jd => "jd",
            Self::Nowcoder => "nowcoder",
            Self::Qiyu => "qiyu",
            Self::Zhihu => "zhihu",
            Self::Nami => "nami",
            Self::Bilibili => "bilibili",
            Self::Chaoxing => "chaoxing",
            Self::Smms => "smms",
            Self::Github => "github",
            Self::Imgur => "imgur",
            Self::Tencent => "tencent",
            Self::Aliyun => "aliyun",
            Self::Qiniu => "qiniu",
            Self::Upyun => "upyun",
        }
    }

    /// Which ownership partition this backend belongs to.
    pub fn partition(&self) -> BackendPartition {
        match self {
            Self::R2
            | Self::Tencent
            | Self::Aliyun
            | Self::Qiniu
            | Self::Upyun
            | Self::Github => BackendPartition::Private,
            _ => BackendPartition::Public,
        }
    }

    /// `true` for S3-compatible object stores.
    pub fn is_s3_family(&self) -> bool {
        matches!(
            self,
            Self::R2 | Self::Tencent | Self::Aliyun | Self::Qiniu | Self::Upyun
        )
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unrecognised backend id string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown backend id: {0}")]
pub struct UnknownBackendId(pub String);

impl FromStr for BackendId {
    type Err = UnknownBackendId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownBackendId(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_str_roundtrips_through_from_str() {
        for id in BackendId::ALL {
            assert_eq!(id.as_str().parse::<BackendId>().unwrap(), *id);
        }
    }

    #[test]
    fn serde_uses_lowercase_strings() {
        let json = serde_json::to_string(&BackendId::Weibo).unwrap();
        assert_eq!(json, r#""weibo""#);
        let back: BackendId = serde_json::from_str(r#""r2""#).unwrap();
        assert_eq!(back, BackendId::R2);
    }

    #[test]
    fn unknown_id_fails_to_parse() {
        let err = "flickr".parse::<BackendId>().unwrap_err();
        assert_eq!(err, UnknownBackendId("flickr".into()));
    }

    #[test]
    fn partitions_split_private_storage_from_platforms() {
        assert_eq!(BackendId::R2.partition(), BackendPartition::Private);
        assert_eq!(BackendId::Github.partition(), BackendPartition::Private);
        assert_eq!(BackendId::Weibo.partition(), BackendPartition::Public);
        assert_eq!(BackendId::Smms.partition(), BackendPartition::Public);
    }

    #[test]
    fn all_ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for id in BackendId::ALL {
            assert!(seen.insert(id.as_str()), "duplicate id {id}");
        }
        assert_eq!(seen.len(), 16);
    }
}
