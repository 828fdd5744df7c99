// SPDX-License-Identifier: MIT OR Apache-2.0
//! Local image metadata probe.
//!
//! Reads just enough of the file header to recover dimensions and format for
//! PNG, JPEG, GIF, and WebP. Anything else still yields size and a `None`
//! format rather than an error; the probe is advisory.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// Locally probed image metadata stored alongside a history record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMeta {
    /// Pixel width.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Pixel height.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Width divided by height.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<f64>,
    /// File size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Detected container format (`png`, `jpeg`, `gif`, `webp`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl ImageMeta {
    fn with_dimensions(mut self, width: u32, height: u32, format: &str) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        if height != 0 {
            self.aspect_ratio = Some(f64::from(width) / f64::from(height));
        }
        self.format = Some(format.to_string());
        self
    }
}

/// Probe a local file for dimensions, format, and size.
///
/// # Errors
///
/// Fails only when the file cannot be opened or read; an unrecognised format
/// is not an error.
pub fn probe_image_metadata(path: &Path) -> std::io::Result<ImageMeta> {
    let mut file = std::fs::File::open(path)?;
    let file_size = file.metadata()?.len();

    // 64 KiB covers every header layout we parse, including JPEGs with
    // moderate EXIF segments before the first SOF marker.
    let mut head = vec![0u8; 64 * 1024];
    let n = read_up_to(&mut file, &mut head)?;
    head.truncate(n);

    let meta = ImageMeta {
        file_size: Some(file_size),
        ..ImageMeta::default()
    };
    Ok(sniff_dimensions(&head, meta))
}

fn read_up_to(r: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn sniff_dimensions(head: &[u8], meta: ImageMeta) -> ImageMeta {
    if let Some((w, h)) = png_dimensions(head) {
        return meta.with_dimensions(w, h, "png");
    }
    if let Some((w, h)) = gif_dimensions(head) {
        return meta.with_dimensions(w, h, "gif");
    }
    if let Some((w, h)) = jpeg_dimensions(head) {
        return meta.with_dimensions(w, h, "jpeg");
    }
    if let Some((w, h)) = webp_dimensions(head) {
        return meta.with_dimensions(w, h, "webp");
    }
    meta
}

fn png_dimensions(b: &[u8]) -> Option<(u32, u32)> {
    const SIG: &[u8] = b"\x89PNG\r\n\x1a\n";
    if b.len() < 24 || !b.starts_with(SIG) || &b[12..16] != b"IHDR" {
        return None;
    }
    let w = u32::from_be_bytes([b[16], b[17], b[18], b[19]]);
    let h = u32::from_be_bytes([b[20], b[21], b[22], b[23]]);
    Some((w, h))
}

fn gif_dimensions(b: &[u8]) -> Option<(u32, u32)> {
    if b.len() < 10 || (!b.starts_with(b"GIF87a") && !b.starts_with(b"GIF89a")) {
        return None;
    }
    let w = u16::from_le_bytes([b[6], b[7]]);
    let h = u16::from_le_bytes([b[8], b[9]]);
    Some((u32::from(w), u32::from(h)))
}

fn jpeg_dimensions(b: &[u8]) -> Option<(u32, u32)> {
    if b.len() < 4 || b[0] != 0xFF || b[1] != 0xD8 {
        return None;
    }
    let mut i = 2;
    while i + 9 < b.len() {
        if b[i] != 0xFF {
            i += 1;
            continue;
        }
        let marker = b[i + 1];
        // SOF0..SOF15 except DHT (C4), JPG (C8), DAC (CC).
        let is_sof = (0xC0..=0xCF).contains(&marker)
            && marker != 0xC4
            && marker != 0xC8
            && marker != 0xCC;
        if is_sof {
            let h = u32::from(u16::from_be_bytes([b[i + 5], b[i + 6]]));
            let w = u32::from(u16::from_be_bytes([b[i + 7], b[i + 8]]));
            return Some((w, h));
        }
        let len = usize::from(u16::from_be_bytes([b[i + 2], b[i + 3]]));
        if len < 2 {
            return None;
        }
        i += 2 + len;
    }
    None
}

fn webp_dimensions(b: &[u8]) -> Option<(u32, u32)> {
    if b.len() < 30 || &b[0..4] != b"RIFF" || &b[8..12] != b"WEBP" {
        return None;
    }
    match &b[12..16] {
        b"VP8X" => {
            let w = 1 + u32::from_le_bytes([b[24], b[25], b[26], 0]);
            let h = 1 + u32::from_le_bytes([b[27], b[28], b[29], 0]);
            Some((w, h))
        }
        b"VP8 " => {
            let w = u32::from(u16::from_le_bytes([b[26], b[27]]) & 0x3FFF);
            let h = u32::from(u16::from_le_bytes([b[28], b[29]]) & 0x3FFF);
            Some((w, h))
        }
        b"VP8L" => {
            let bits = u32::from_le_bytes([b[21], b[22], b[23], b[24]]);
            let w = (bits & 0x3FFF) + 1;
            let h = ((bits >> 14) & 0x3FFF) + 1;
            Some((w, h))
        }
        _ => None,
    }
}
