// SPDX-License-Identifier: MIT OR Apache-2.0
//! Minimal tag extraction for S3 list responses.
//!
//! ListObjectsV2 replies are flat, attribute-free XML; a full parser buys
//! nothing here. This scanner only handles the handful of tags the engine
//! reads and unescapes the five standard entities.

/// Extract the text content of the first `<tag>…</tag>` in `xml`.
pub fn first_tag<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(&xml[start..end])
}

/// Extract every `<tag>…</tag>` block, outermost only, in document order.
pub fn all_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        let body_start = start + open.len();
        let Some(body_end) = rest[body_start..].find(&close) else {
            break;
        };
        out.push(&rest[body_start..body_start + body_end]);
        rest = &rest[body_start + body_end + close.len()..];
    }
    out
}

/// Undo the five standard XML entities.
pub fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
