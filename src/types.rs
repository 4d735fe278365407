//! Data types shared between the editing session and the backend client

use serde::{Deserialize, Serialize};
use std::path::Path;

/// An encoded image ready to be sent as a multipart field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// File name reported to the backend
    pub file_name: String,
    /// MIME type of `bytes`
    pub content_type: String,
    /// Encoded image data
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    pub fn new<N: Into<String>, C: Into<String>>(
        file_name: N,
        content_type: C,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// PNG payload, the format the backend returns results in
    pub fn png<N: Into<String>>(file_name: N, bytes: Vec<u8>) -> Self {
        Self::new(file_name, "image/png", bytes)
    }

    /// Build a payload from a file name, guessing the MIME type from its extension
    pub fn from_named_bytes<N: Into<String>>(file_name: N, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = content_type_for(Path::new(&file_name));
        Self::new(file_name, content_type, bytes)
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// File name without its extension
    #[must_use]
    pub fn stem(&self) -> &str {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image")
    }
}

/// MIME type for a path based on its extension
#[must_use]
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Pixels to add on each side when extending the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutpaintExtents {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl Default for OutpaintExtents {
    fn default() -> Self {
        Self {
            left: 50,
            right: 50,
            top: 50,
            bottom: 50,
        }
    }
}

impl OutpaintExtents {
    /// Query parameters in the order the backend documents them
    #[must_use]
    pub fn query_pairs(&self) -> [(&'static str, String); 4] {
        [
            ("extend_left", self.left.to_string()),
            ("extend_right", self.right.to_string()),
            ("extend_top", self.top.to_string()),
            ("extend_bottom", self.bottom.to_string()),
        ]
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.left == 0 && self.right == 0 && self.top == 0 && self.bottom == 0
    }
}

/// Health-probe response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_name: String,
    #[serde(default)]
    pub device: Option<String>,
}
