//! Resolved share metadata: the manifest, the file tree, and download candidates.
//!
//! Every extraction strategy normalizes its wire responses into these types at
//! its own boundary, so callers above the strategies never branch on response
//! shape. A [`ShareManifest`] is produced once per resolve and treated as
//! immutable afterwards.

use serde::{Deserialize, Serialize};

/// Coarse media classification derived from a file name's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
    Image,
    Document,
    Archive,
    Other,
}

impl MediaType {
    /// Classifies a file name by extension.
    ///
    /// Unknown or missing extensions classify as [`MediaType::Other`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let name = name.to_lowercase();
        let has_ext = |exts: &[&str]| exts.iter().any(|ext| name.ends_with(ext));

        if has_ext(&[
            ".mp4", ".mov", ".m4v", ".mkv", ".avi", ".wmv", ".flv", ".asf", ".m2ts", ".3g2",
        ]) {
            Self::Video
        } else if has_ext(&[".mp3", ".wav", ".flac", ".aac", ".ogg", ".m4a"]) {
            Self::Audio
        } else if has_ext(&[".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp", ".svg"]) {
            Self::Image
        } else if has_ext(&[".pdf", ".doc", ".docx", ".txt", ".rtf"]) {
            Self::Document
        } else if has_ext(&[".zip", ".rar", ".7z", ".tar", ".gz"]) {
            Self::Archive
        } else {
            Self::Other
        }
    }

    fn other() -> Self {
        Self::Other
    }
}

/// One file or directory entry in a resolved share.
///
/// Children are exclusively owned by their parent; the tree has no cycles and
/// its depth is bounded by the provider's own folder nesting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Provider-assigned file identifier, used for download-link generation.
    pub fs_id: String,
    /// Full path within the share.
    pub path: String,
    /// Display name (the provider's `server_filename`).
    pub name: String,
    pub is_directory: bool,
    /// Size in bytes; zero for directories.
    pub size_bytes: u64,
    pub media: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileRecord>,
}

impl FileRecord {
    /// Depth-first iteration over this record and all descendants.
    pub fn walk(&self) -> impl Iterator<Item = &FileRecord> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(next)
        })
    }
}

/// Cookie and page-token context captured while resolving a share, needed
/// again by the token-based download endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    /// Cookie header value presented to the download endpoint.
    #[serde(default)]
    pub cookie: String,
    /// Single-use page token mined from the share page (`jsToken`).
    #[serde(default)]
    pub js_token: String,
}

/// The resolved bundle of share metadata and the file tree for one share link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareManifest {
    /// Provider share identifier (`shareid`).
    pub share_id: String,
    /// Share owner identifier (`uk`).
    pub owner_id: String,
    /// Signing token required by the download endpoint.
    pub sign: String,
    /// Timestamp paired with the signing token.
    pub timestamp: u64,
    /// Session context for strategies whose download endpoint needs the
    /// page token; absent for relay-based manifests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionContext>,
    /// Root entries of the share.
    pub files: Vec<FileRecord>,
}

impl ShareManifest {
    /// Counts non-directory files across the whole tree.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files
            .iter()
            .flat_map(FileRecord::walk)
            .filter(|record| !record.is_directory)
            .count()
    }
}

/// An ordered list of mirror URLs for one file.
///
/// Order expresses preference, not validity: callers try candidates in order
/// until one succeeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadCandidate {
    pub urls: Vec<String>,
}

impl DownloadCandidate {
    #[must_use]
    pub fn new(urls: Vec<String>) -> Self {
        Self { urls }
    }

    /// Appends a mirror unless it is empty or already present.
    pub fn push_unique(&mut self, url: impl Into<String>) {
        let url = url.into();
        if !url.is_empty() && !self.urls.contains(&url) {
            self.urls.push(url);
        }
    }

    /// The preferred URL, when any mirror is known.
    #[must_use]
    pub fn primary(&self) -> Option<&str> {
        self.urls.first().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Flat single-file payload returned by the commercial metadata API and
/// persisted verbatim in the response cache.
///
/// Field names are part of the persisted contract: downstream consumers depend
/// on `file_name`, `size`, `sizebytes`, `thumb`, and at least one of
/// `direct_link` / `download_link` / `link` exactly as spelled here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePayload {
    pub file_name: String,
    /// Human-readable size string as reported upstream.
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub sizebytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default = "MediaType::other")]
    pub file_type: MediaType,
}

impl FilePayload {
    /// Normalizes a raw commercial-API response into a payload.
    ///
    /// The service answers with either a single object or an array of file
    /// objects (the first is taken), and its field names drift: `file_name`
    /// vs `fn`, `thumb` vs `thumbnail`, sizes as numbers or numeric strings.
    /// Returns `None` for shapes with no file object at all; link and name
    /// validation is the caller's concern via [`FilePayload::is_usable`].
    #[must_use]
    pub fn from_api_value(data: &serde_json::Value) -> Option<Self> {
        let file_data = match data {
            serde_json::Value::Array(items) => items.first()?,
            object @ serde_json::Value::Object(_) => object,
            _ => return None,
        };

        let raw_name = string_field(file_data, &["file_name", "fn"])?;
        // Names arrive percent-encoded often enough to always decode.
        let file_name = urlencoding::decode(&raw_name)
            .map(|decoded| decoded.into_owned())
            .unwrap_or(raw_name);

        let direct_link = string_field(file_data, &["direct_link"]);
        let download_link = string_field(file_data, &["link"]).or_else(|| direct_link.clone());

        Some(Self {
            file_type: MediaType::from_name(&file_name),
            file_name,
            size: string_field(file_data, &["size"]).unwrap_or_default(),
            sizebytes: lenient_u64(file_data.get("sizebytes")),
            thumb: string_field(file_data, &["thumb", "thumbnail"]),
            direct_link,
            download_link,
            link: None,
        })
    }

    /// True when the payload names a file and carries at least one usable link.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.file_name.is_empty() && !self.candidates().is_empty()
    }

    /// Mirror URLs in preference order: direct link first, then the
    /// alternate link fields.
    #[must_use]
    pub fn candidates(&self) -> DownloadCandidate {
        let mut candidate = DownloadCandidate::default();
        for url in [&self.direct_link, &self.download_link, &self.link]
            .into_iter()
            .flatten()
        {
            candidate.push_unique(url.clone());
        }
        candidate
    }
}

/// First non-empty string among `keys`.
fn string_field(value: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        value
            .get(key)
            .and_then(serde_json::Value::as_str)
            .filter(|text| !text.is_empty())
            .map(ToString::to_string)
    })
}

/// Integer from a number or a numeric string; anything else is zero.
fn lenient_u64(value: Option<&serde_json::Value>) -> u64 {
    match value {
        Some(serde_json::Value::Number(number)) => number.as_u64().unwrap_or(0),
        Some(serde_json::Value::String(text)) => text.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn file(name: &str, children: Vec<FileRecord>) -> FileRecord {
        FileRecord {
            fs_id: "1".to_string(),
            path: format!("/{name}"),
            name: name.to_string(),
            is_directory: !children.is_empty(),
            size_bytes: 0,
            media: MediaType::from_name(name),
            thumbnail: None,
            children,
        }
    }

    #[test]
    fn test_media_type_video() {
        assert_eq!(MediaType::from_name("movie.MP4"), MediaType::Video);
        assert_eq!(MediaType::from_name("clip.mkv"), MediaType::Video);
    }

    #[test]
    fn test_media_type_audio() {
        assert_eq!(MediaType::from_name("song.flac"), MediaType::Audio);
    }

    #[test]
    fn test_media_type_image() {
        assert_eq!(MediaType::from_name("photo.jpeg"), MediaType::Image);
    }

    #[test]
    fn test_media_type_document() {
        assert_eq!(MediaType::from_name("paper.pdf"), MediaType::Document);
    }

    #[test]
    fn test_media_type_archive() {
        assert_eq!(MediaType::from_name("bundle.tar"), MediaType::Archive);
    }

    #[test]
    fn test_media_type_unknown_is_other() {
        assert_eq!(MediaType::from_name("README"), MediaType::Other);
        assert_eq!(MediaType::from_name("data.xyz"), MediaType::Other);
    }

    #[test]
    fn test_media_type_extension_must_be_suffix() {
        // ".mp4" appearing mid-name must not classify as video
        assert_eq!(MediaType::from_name("notes.mp4.txt"), MediaType::Document);
    }

    #[test]
    fn test_walk_visits_depth_first() {
        let tree = file(
            "root",
            vec![file("a", vec![file("a1.mp4", vec![])]), file("b.pdf", vec![])],
        );
        let names: Vec<&str> = tree.walk().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["root", "a", "a1.mp4", "b.pdf"]);
    }

    #[test]
    fn test_manifest_file_count_skips_directories() {
        let manifest = ShareManifest {
            share_id: "s".to_string(),
            owner_id: "u".to_string(),
            sign: String::new(),
            timestamp: 0,
            session: None,
            files: vec![file(
                "dir",
                vec![file("x.mp4", vec![]), file("y.pdf", vec![])],
            )],
        };
        assert_eq!(manifest.file_count(), 2);
    }

    #[test]
    fn test_candidate_push_unique_dedupes_and_skips_empty() {
        let mut candidate = DownloadCandidate::default();
        candidate.push_unique("https://a/1");
        candidate.push_unique("https://a/1");
        candidate.push_unique("");
        candidate.push_unique("https://a/2");
        assert_eq!(candidate.urls.len(), 2);
        assert_eq!(candidate.primary(), Some("https://a/1"));
    }

    #[test]
    fn test_payload_candidates_preference_order() {
        let payload = FilePayload {
            file_name: "video.mp4".to_string(),
            size: "12 MB".to_string(),
            sizebytes: 12_582_912,
            thumb: None,
            direct_link: Some("https://d/direct".to_string()),
            download_link: Some("https://d/download".to_string()),
            link: Some("https://d/plain".to_string()),
            file_type: MediaType::Video,
        };
        assert_eq!(
            payload.candidates().urls,
            vec!["https://d/direct", "https://d/download", "https://d/plain"]
        );
        assert!(payload.is_usable());
    }

    #[test]
    fn test_payload_without_links_is_not_usable() {
        let payload = FilePayload {
            file_name: "video.mp4".to_string(),
            size: String::new(),
            sizebytes: 0,
            thumb: None,
            direct_link: None,
            download_link: None,
            link: None,
            file_type: MediaType::Video,
        };
        assert!(!payload.is_usable());
    }

    #[test]
    fn test_payload_serde_field_names_are_stable() {
        let payload = FilePayload {
            file_name: "a.pdf".to_string(),
            size: "1 MB".to_string(),
            sizebytes: 1_048_576,
            thumb: Some("https://t/1".to_string()),
            direct_link: Some("https://d/1".to_string()),
            download_link: None,
            link: None,
            file_type: MediaType::Document,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["file_name"], "a.pdf");
        assert_eq!(json["sizebytes"], 1_048_576);
        assert_eq!(json["thumb"], "https://t/1");
        assert_eq!(json["direct_link"], "https://d/1");
        assert_eq!(json["file_type"], "document");
        // absent links are omitted entirely, not serialized as null
        assert!(json.get("download_link").is_none());
    }

    #[test]
    fn test_from_api_value_object() {
        let data = serde_json::json!({
            "file_name": "My%20Video.mp4",
            "size": "12 MB",
            "sizebytes": "12582912",
            "thumb": "https://t/1.jpg",
            "direct_link": "https://d/direct",
            "link": "https://d/alt"
        });
        let payload = FilePayload::from_api_value(&data).unwrap();
        assert_eq!(payload.file_name, "My Video.mp4");
        assert_eq!(payload.sizebytes, 12_582_912);
        assert_eq!(payload.file_type, MediaType::Video);
        assert_eq!(payload.direct_link.as_deref(), Some("https://d/direct"));
        assert_eq!(payload.download_link.as_deref(), Some("https://d/alt"));
        assert!(payload.is_usable());
    }

    #[test]
    fn test_from_api_value_array_takes_first() {
        let data = serde_json::json!([
            {"fn": "first.pdf", "direct_link": "https://d/1", "sizebytes": 10},
            {"fn": "second.pdf", "direct_link": "https://d/2", "sizebytes": 20}
        ]);
        let payload = FilePayload::from_api_value(&data).unwrap();
        assert_eq!(payload.file_name, "first.pdf");
        assert_eq!(payload.sizebytes, 10);
    }

    #[test]
    fn test_from_api_value_link_only_response() {
        let data = serde_json::json!({"file_name": "a.zip", "link": "https://d/only"});
        let payload = FilePayload::from_api_value(&data).unwrap();
        assert!(payload.direct_link.is_none());
        assert_eq!(payload.download_link.as_deref(), Some("https://d/only"));
        assert!(payload.is_usable());
    }

    #[test]
    fn test_from_api_value_rejects_nameless_and_scalar() {
        assert!(FilePayload::from_api_value(&serde_json::json!({"direct_link": "x"})).is_none());
        assert!(FilePayload::from_api_value(&serde_json::json!("nope")).is_none());
        assert!(FilePayload::from_api_value(&serde_json::json!([])).is_none());
    }
}
