use std::fmt;

use serde::Serialize;

const MIN_SIGNATURE_LEN: usize = 12;
const HTML_SNIFF_LEN: usize = 512;

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
        }
    }

    pub(crate) fn codec(self) -> image::ImageFormat {
        match self {
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Gif => image::ImageFormat::Gif,
            ImageFormat::Webp => image::ImageFormat::WebP,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DetectError {
    #[error("unknown image format (header {header})")]
    UnknownFormat { header: String },
    #[error("body is an HTML page, not an image")]
    HtmlPage,
}

/// Classifies raw bytes by magic signature.
///
/// An HTML document is reported as [`DetectError::HtmlPage`] so a blocked or
/// soft-failed download can be told apart from an unrecognized binary.
pub fn detect(bytes: &[u8]) -> Result<ImageFormat, DetectError> {
    if looks_like_html(bytes) {
        return Err(DetectError::HtmlPage);
    }

    if bytes.len() < MIN_SIGNATURE_LEN {
        return Err(unknown(bytes));
    }

    if bytes.starts_with(JPEG_MAGIC) {
        return Ok(ImageFormat::Jpeg);
    }
    if bytes.starts_with(PNG_MAGIC) {
        return Ok(ImageFormat::Png);
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Ok(ImageFormat::Gif);
    }
    if bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return Ok(ImageFormat::Webp);
    }

    Err(unknown(bytes))
}

/// True when the leading bytes are markup: after optional BOM and whitespace
/// the buffer opens a tag and mentions `<html` or `<!doctype` early on.
pub fn looks_like_html(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(HTML_SNIFF_LEN)];
    let head = head.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(head);
    let start = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(head.len());
    let head = &head[start..];
    if head.first() != Some(&b'<') {
        return false;
    }

    let lower = head.to_ascii_lowercase();
    contains(&lower, b"<!doctype") || contains(&lower, b"<html")
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn unknown(bytes: &[u8]) -> DetectError {
    let header = bytes
        .iter()
        .take(16)
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    DetectError::UnknownFormat { header }
}
