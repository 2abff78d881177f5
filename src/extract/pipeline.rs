//! Shared resolve pipeline for the token-based strategies.
//!
//! Both the dynamic-token and static-session strategies walk the same state
//! machine (resolve the short code, fetch the share manifest, expand
//! subdirectories) and differ only in where their session context comes
//! from. The machinery lives here; the strategies wire it together.

use std::pin::Pin;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::Client;
use reqwest::header::{ACCEPT, COOKIE, REFERER, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::manifest::{
    DownloadCandidate, FileRecord, MediaType, SessionContext, ShareManifest,
};
use crate::net::{FetchError, RetryExecutor, check_status};
use crate::parser::ShareLink;

use super::error::ExtractError;

/// Application id expected by the share endpoints.
const APP_ID: &str = "250528";

/// Hard ceiling on directory recursion; the provider's own nesting stays far
/// below this.
const MAX_DIRECTORY_DEPTH: u32 = 32;

/// Short code embedded in a redirect target.
#[allow(clippy::expect_used)]
static REDIRECT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"surl=([^\s&]+)").expect("redirect code regex is valid"));

/// Single-use page token embedded in the share page body.
#[allow(clippy::expect_used)]
static PAGE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%28%22(.*?)%22%29").expect("page token regex is valid"));

/// First host label of a download URL, used for mirror derivation.
#[allow(clippy::expect_used)]
static HOST_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"://(.*?)\.").expect("host label regex is valid"));

/// Base URLs for the share endpoints, overridable for testing.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Host serving `api/shorturlinfo`, `share/list`, and `share/download`.
    pub share_base: String,
    /// Host serving the share page the token is mined from.
    pub page_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            share_base: "https://www.terabox.com".to_string(),
            page_base: "https://www.terabox.app".to_string(),
        }
    }
}

/// A value upstream serves interchangeably as a number or a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(u64),
    Str(String),
}

impl NumOrStr {
    fn as_u64(&self) -> u64 {
        match self {
            Self::Num(value) => *value,
            Self::Str(text) => text.trim().parse().unwrap_or(0),
        }
    }

    fn into_string(self) -> String {
        match self {
            Self::Num(value) => value.to_string(),
            Self::Str(text) => text,
        }
    }
}

fn default_num() -> NumOrStr {
    NumOrStr::Num(0)
}

#[derive(Debug, Deserialize)]
struct Thumbs {
    #[serde(default)]
    url3: Option<String>,
}

/// One entry of a share or directory listing, as served on the wire.
#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(default = "default_num")]
    isdir: NumOrStr,
    #[serde(default)]
    path: String,
    #[serde(default = "default_num")]
    fs_id: NumOrStr,
    #[serde(default)]
    server_filename: String,
    #[serde(default)]
    size: Option<NumOrStr>,
    #[serde(default)]
    thumbs: Option<Thumbs>,
}

#[derive(Debug, Deserialize)]
struct ShortUrlInfo {
    #[serde(default)]
    errno: i64,
    #[serde(default = "default_num")]
    shareid: NumOrStr,
    #[serde(default = "default_num")]
    uk: NumOrStr,
    #[serde(default)]
    sign: String,
    #[serde(default = "default_num")]
    timestamp: NumOrStr,
    #[serde(default)]
    list: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default)]
    errno: i64,
    #[serde(default)]
    list: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
struct DownloadResponse {
    #[serde(default)]
    errno: i64,
    #[serde(default)]
    dlink: Option<String>,
}

/// The shared fetch-and-normalize machinery behind the token strategies.
#[derive(Debug, Clone)]
pub(super) struct SharePipeline {
    client: Client,
    executor: RetryExecutor,
    endpoints: Endpoints,
}

impl SharePipeline {
    pub(super) fn new(client: Client, executor: RetryExecutor, endpoints: Endpoints) -> Self {
        Self {
            client,
            executor,
            endpoints,
        }
    }

    /// Follows the share URL's redirect chain and recovers the short code
    /// from the landing URL, falling back to the code the normalizer already
    /// extracted.
    pub(super) async fn discover_short_code(
        &self,
        link: &ShareLink,
    ) -> Result<String, ExtractError> {
        let target = link.raw.clone();
        let client = self.client.clone();
        let landing = self
            .executor
            .execute("share-redirect", move |attempt| {
                let client = client.clone();
                let target = target.clone();
                async move {
                    let response = client
                        .get(&target)
                        .header(USER_AGENT, attempt.user_agent)
                        .send()
                        .await
                        .map_err(|error| FetchError::from_reqwest(&target, error))?;
                    let response = check_status(response).await?;
                    Ok(response.url().to_string())
                }
            })
            .await?;

        let code = REDIRECT_CODE
            .captures(&landing)
            .map_or_else(|| link.short_code.clone(), |captures| captures[1].to_string());
        debug!(short_code = %code, "short code resolved");
        Ok(code)
    }

    /// Fetches the share page and mines the embedded single-use token plus
    /// the session cookies needed by the download endpoint.
    pub(super) async fn scrape_session(
        &self,
        link: &ShareLink,
        code: &str,
    ) -> Result<SessionContext, ExtractError> {
        let page_url = format!(
            "{}/wap/share/filelist?surl={code}",
            self.endpoints.page_base
        );
        let referer = link.canonical.clone();
        let client = self.client.clone();

        let (body, cookies) = self
            .executor
            .execute("share-page", move |attempt| {
                let client = client.clone();
                let page_url = page_url.clone();
                let referer = referer.clone();
                async move {
                    let response = client
                        .get(&page_url)
                        .header(USER_AGENT, attempt.user_agent)
                        .header(REFERER, referer)
                        .send()
                        .await
                        .map_err(|error| FetchError::from_reqwest(&page_url, error))?;
                    let response = check_status(response).await?;
                    let cookies: Vec<(String, String)> = response
                        .cookies()
                        .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
                        .collect();
                    let body = response
                        .text()
                        .await
                        .map_err(|error| FetchError::from_reqwest(&page_url, error))?;
                    Ok((body, cookies))
                }
            })
            .await?;

        let stripped = body.replace('\\', "");
        let js_token = PAGE_TOKEN
            .captures(&stripped)
            .map(|captures| captures[1].to_string())
            .ok_or_else(|| {
                ExtractError::external("share page carries no embedded token", None)
            })?;

        let mut cookie = String::from("lang=id;");
        for (name, value) in &cookies {
            cookie.push_str(&format!("{name}={value};"));
        }

        Ok(SessionContext { cookie, js_token })
    }

    /// Fetches share metadata and the full file tree, producing the manifest.
    pub(super) async fn fetch_manifest(
        &self,
        link: &ShareLink,
        code: &str,
        session: Option<SessionContext>,
    ) -> Result<ShareManifest, ExtractError> {
        let info_url = format!(
            "{}/api/shorturlinfo?app_id={APP_ID}&shorturl=1{code}&root=1",
            self.endpoints.share_base
        );
        let referer = link.canonical.clone();
        let client = self.client.clone();

        let info: ShortUrlInfo = self
            .executor
            .execute("share-metadata", move |attempt| {
                let client = client.clone();
                let info_url = info_url.clone();
                let referer = referer.clone();
                async move {
                    let response = client
                        .get(&info_url)
                        .header(USER_AGENT, attempt.user_agent)
                        .header(ACCEPT, "application/json, text/plain, */*")
                        .header(REFERER, referer)
                        .send()
                        .await
                        .map_err(|error| FetchError::from_reqwest(&info_url, error))?;
                    let response = check_status(response).await?;
                    response
                        .json()
                        .await
                        .map_err(|error| FetchError::invalid_body(&info_url, error.to_string()))
                }
            })
            .await?;

        if info.errno != 0 {
            return Err(ExtractError::external(
                format!("metadata endpoint returned errno {}", info.errno),
                None,
            ));
        }
        if info.list.is_empty() {
            return Err(ExtractError::not_found("share lists no files"));
        }

        let mut files = Vec::with_capacity(info.list.len());
        for item in info.list {
            files.push(self.expand_item(code, item, 0).await?);
        }

        Ok(ShareManifest {
            share_id: info.shareid.into_string(),
            owner_id: info.uk.into_string(),
            sign: info.sign,
            timestamp: info.timestamp.as_u64(),
            session,
            files,
        })
    }

    /// Turns one raw listing item into a [`FileRecord`], recursing depth-first
    /// into directories.
    fn expand_item<'a>(
        &'a self,
        code: &'a str,
        item: RawItem,
        depth: u32,
    ) -> Pin<Box<dyn Future<Output = Result<FileRecord, ExtractError>> + Send + 'a>> {
        Box::pin(async move {
            let is_directory = item.isdir.as_u64() != 0;
            let name = item.server_filename;

            let children = if is_directory {
                if depth >= MAX_DIRECTORY_DEPTH {
                    warn!(path = %item.path, depth, "directory nesting limit reached");
                    Vec::new()
                } else {
                    let listing = self.list_directory(code, &item.path).await?;
                    let mut children = Vec::with_capacity(listing.len());
                    for child in listing {
                        children.push(self.expand_item(code, child, depth + 1).await?);
                    }
                    children
                }
            } else {
                Vec::new()
            };

            Ok(FileRecord {
                fs_id: item.fs_id.into_string(),
                path: item.path,
                media: if is_directory {
                    MediaType::Other
                } else {
                    MediaType::from_name(&name)
                },
                size_bytes: if is_directory {
                    0
                } else {
                    item.size.as_ref().map_or(0, NumOrStr::as_u64)
                },
                thumbnail: if is_directory {
                    None
                } else {
                    item.thumbs.and_then(|thumbs| thumbs.url3)
                },
                is_directory,
                name,
                children,
            })
        })
    }

    async fn list_directory(&self, code: &str, dir: &str) -> Result<Vec<RawItem>, ExtractError> {
        let list_url = format!(
            "{}/share/list?app_id={APP_ID}&shorturl={code}&root=0&dir={}",
            self.endpoints.share_base,
            urlencoding::encode(dir)
        );
        let client = self.client.clone();

        let listing: Listing = self
            .executor
            .execute("share-listing", move |attempt| {
                let client = client.clone();
                let list_url = list_url.clone();
                async move {
                    let response = client
                        .get(&list_url)
                        .header(USER_AGENT, attempt.user_agent)
                        .header(ACCEPT, "application/json, text/plain, */*")
                        .send()
                        .await
                        .map_err(|error| FetchError::from_reqwest(&list_url, error))?;
                    let response = check_status(response).await?;
                    response
                        .json()
                        .await
                        .map_err(|error| FetchError::invalid_body(&list_url, error.to_string()))
                }
            })
            .await?;

        if listing.errno != 0 {
            return Err(ExtractError::external(
                format!("listing endpoint returned errno {} for {dir}", listing.errno),
                None,
            ));
        }
        Ok(listing.list)
    }

    /// Calls the token-based download endpoint and derives mirror URLs from
    /// the primary link.
    pub(super) async fn token_download_links(
        &self,
        file: &FileRecord,
        manifest: &ShareManifest,
    ) -> Result<DownloadCandidate, ExtractError> {
        let session = manifest.session.as_ref().ok_or_else(|| {
            ExtractError::external("manifest carries no session context for downloads", None)
        })?;

        let download_url = format!(
            "{}/share/download?app_id={APP_ID}&channel=dubox&product=share&clienttype=0\
             &dp-logid=&nozip=0&web=1&uk={}&sign={}&shareid={}&primaryid={}&timestamp={}\
             &jsToken={}&fid_list=%5B{}%5D",
            self.endpoints.share_base,
            manifest.owner_id,
            urlencoding::encode(&manifest.sign),
            manifest.share_id,
            manifest.share_id,
            manifest.timestamp,
            urlencoding::encode(&session.js_token),
            file.fs_id,
        );
        let cookie = session.cookie.clone();
        let client = self.client.clone();

        let response: DownloadResponse = self
            .executor
            .execute("share-download", move |attempt| {
                let client = client.clone();
                let download_url = download_url.clone();
                let cookie = cookie.clone();
                async move {
                    let response = client
                        .get(&download_url)
                        .header(USER_AGENT, attempt.user_agent)
                        .header(ACCEPT, "application/json, text/plain, */*")
                        .header(COOKIE, cookie)
                        .send()
                        .await
                        .map_err(|error| FetchError::from_reqwest(&download_url, error))?;
                    let response = check_status(response).await?;
                    response
                        .json()
                        .await
                        .map_err(|error| FetchError::invalid_body(&download_url, error.to_string()))
                }
            })
            .await?;

        if response.errno != 0 {
            return Err(ExtractError::external(
                format!("download endpoint returned errno {}", response.errno),
                None,
            ));
        }
        let primary = response.dlink.filter(|dlink| !dlink.is_empty()).ok_or_else(
            || ExtractError::external("download endpoint returned no link", None),
        )?;

        let mut candidate = DownloadCandidate::default();
        candidate.push_unique(primary.clone());

        // Mirror derivation is best-effort; the primary link stands alone
        // when the redirect probe fails.
        if let Some(resolved) = self.probe_redirect(&primary).await {
            for mirror in derive_mirrors(&resolved) {
                candidate.push_unique(mirror);
            }
        }

        Ok(candidate)
    }

    /// Follows a download link's redirect and returns the landing URL.
    async fn probe_redirect(&self, url: &str) -> Option<String> {
        match self.client.head(url).send().await {
            Ok(response) => Some(response.url().to_string()),
            Err(error) => {
                debug!(error = %error, "mirror probe failed");
                None
            }
        }
    }
}

/// Derives up to two extra mirrors from a resolved download URL: one by
/// query substitution, one by host substitution.
fn derive_mirrors(resolved: &str) -> Vec<String> {
    let mut mirrors = Vec::new();

    let medium = resolved.replace("by=themis", "by=dapunta");
    if medium != resolved {
        mirrors.push(medium);
    }

    if let Some(captures) = HOST_LABEL.captures(resolved) {
        let label = &captures[1];
        let fast = resolved
            .replacen(&format!("://{label}."), "://d3.", 1)
            .replace("by=themis", "by=dapunta");
        if fast != resolved {
            mirrors.push(fast);
        }
    }

    mirrors
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_num_or_str_lenient_parsing() {
        let num: NumOrStr = serde_json::from_str("42").unwrap();
        let text: NumOrStr = serde_json::from_str("\"42\"").unwrap();
        let junk: NumOrStr = serde_json::from_str("\"n/a\"").unwrap();
        assert_eq!(num.as_u64(), 42);
        assert_eq!(text.as_u64(), 42);
        assert_eq!(junk.as_u64(), 0);
        assert_eq!(NumOrStr::Num(7).into_string(), "7");
    }

    #[test]
    fn test_raw_item_tolerates_mixed_shapes() {
        let item: RawItem = serde_json::from_str(
            r#"{"isdir": "1", "path": "/dir", "fs_id": 123, "server_filename": "dir"}"#,
        )
        .unwrap();
        assert_eq!(item.isdir.as_u64(), 1);
        assert_eq!(item.fs_id.as_u64(), 123);
        assert!(item.size.is_none());
    }

    #[test]
    fn test_page_token_regex() {
        let body = r"window.jsToken%28%22AB12cd34%22%29";
        let captures = PAGE_TOKEN.captures(body).unwrap();
        assert_eq!(&captures[1], "AB12cd34");
    }

    #[test]
    fn test_page_token_regex_after_backslash_strip() {
        let raw = r"fn%28%22token%22%29".replace('\\', "");
        assert!(PAGE_TOKEN.captures(&raw).is_some());
    }

    #[test]
    fn test_redirect_code_regex() {
        let landing = "https://www.terabox.app/sharing/link?surl=1abcDEF&from=web";
        assert_eq!(&REDIRECT_CODE.captures(landing).unwrap()[1], "1abcDEF");
    }

    #[test]
    fn test_derive_mirrors_query_and_host() {
        let resolved = "https://cdn01.terabox.com/file/x?by=themis&sig=1";
        let mirrors = derive_mirrors(resolved);
        assert_eq!(mirrors.len(), 2);
        assert_eq!(mirrors[0], "https://cdn01.terabox.com/file/x?by=dapunta&sig=1");
        assert_eq!(mirrors[1], "https://d3.terabox.com/file/x?by=dapunta&sig=1");
    }

    #[test]
    fn test_derive_mirrors_without_markers() {
        // No by=themis and host substitution yields an identical URL only
        // when the query replacement also did nothing.
        let mirrors = derive_mirrors("https://cdn.terabox.com/file/x?sig=1");
        assert_eq!(mirrors, vec!["https://d3.terabox.com/file/x?sig=1"]);
    }
}
