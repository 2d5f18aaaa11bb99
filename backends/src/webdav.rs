use crate::backend::{Backend, BackendType};
use async_trait::async_trait;
use dumpvault_core::{BackupArtifact, Error, Result};
use futures::StreamExt;
use regex::Regex;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Patterns for the parts of a multistatus body this backend reads.
struct DavPatterns {
    response: Regex,
    href: Regex,
    length: Regex,
    collection: Regex,
    quota: Regex,
}

impl DavPatterns {
    fn new() -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            response: Regex::new(r"(?s)<(?:[\w-]+:)?response\b[^>]*>(.*?)</(?:[\w-]+:)?response>")?,
            href: Regex::new(r"(?s)<(?:[\w-]+:)?href>\s*([^<]*?)\s*</(?:[\w-]+:)?href>")?,
            length: Regex::new(r"<(?:[\w-]+:)?getcontentlength>\s*(\d+)\s*</(?:[\w-]+:)?getcontentlength>")?,
            collection: Regex::new(r"<(?:[\w-]+:)?collection\s*/>")?,
            quota: Regex::new(r"<(?:[\w-]+:)?quota-available-bytes>\s*(\d+)\s*</(?:[\w-]+:)?quota-available-bytes>")?,
        })
    }

    fn entries(&self, xml: &str) -> Vec<DavEntry> {
        self.response
            .captures_iter(xml)
            .filter_map(|caps| {
                let block = caps.get(1)?.as_str();
                if self.collection.is_match(block) {
                    return None;
                }
                let href = self.href.captures(block)?.get(1)?.as_str();
                let name = href.trim_end_matches('/').rsplit('/').next()?;
                if name.is_empty() {
                    return None;
                }
                let size = self
                    .length
                    .captures(block)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0);
                Some(DavEntry {
                    name: name.to_string(),
                    size,
                })
            })
            .collect()
    }

    fn quota(&self, xml: &str) -> Option<u64> {
        self.quota.captures(xml)?.get(1)?.as_str().parse().ok()
    }
}

const LIST_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:getcontentlength/><d:resourcetype/></d:prop></d:propfind>"#;

const QUOTA_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:quota-available-bytes/></d:prop></d:propfind>"#;

/// A file entry from a PROPFIND multistatus response.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DavEntry {
    name: String,
    size: u64,
}

pub struct WebDavBackend {
    name: String,
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    patterns: DavPatterns,
}

impl WebDavBackend {
    pub fn new(
        name: impl Into<String>,
        url: &str,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("dumpvault/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Backend(format!("Failed to build HTTP client: {}", e)))?;

        let mut base_url = url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            name: name.into(),
            client,
            base_url,
            username,
            password,
            patterns: DavPatterns::new().map_err(|e| Error::Backend(format!("Invalid pattern: {}", e)))?,
        })
    }

    fn file_url(&self, remote_name: &str) -> Result<String> {
        if remote_name.is_empty() || remote_name.contains(['/', '\\']) || remote_name == ".." {
            return Err(Error::Backend(format!("Invalid remote name: {:?}", remote_name)));
        }
        Ok(format!("{}{}", self.base_url, remote_name))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        }
    }

    async fn propfind(&self, depth: &str, body: &'static str) -> Result<Response> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| Error::Backend(format!("Invalid method: {}", e)))?;
        let response = self
            .request(method, &self.base_url)
            .header("Depth", depth)
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("PROPFIND failed: {}", e)))?;
        check_status(response, "PROPFIND").await
    }
}

async fn check_status(response: Response, operation: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() || status == StatusCode::MULTI_STATUS {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Backend(format!(
        "{} returned HTTP {}: {}",
        operation,
        status.as_u16(),
        body.chars().take(200).collect::<String>()
    )))
}

#[async_trait]
impl Backend for WebDavBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend_type(&self) -> BackendType {
        BackendType::WebDav
    }

    async fn is_available(&self) -> bool {
        match self.propfind("0", LIST_BODY).await {
            Ok(_) => true,
            Err(e) => {
                debug!("WebDAV storage {} unavailable: {}", self.base_url, e);
                false
            }
        }
    }

    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<()> {
        let url = self.file_url(remote_name)?;
        let file = tokio::fs::File::open(local_path).await?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let response = self
            .request(Method::PUT, &url)
            .header("Content-Length", length)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Failed to write {}: {}", remote_name, e)))?;
        check_status(response, "PUT").await?;
        Ok(())
    }

    async fn download(&self, remote_name: &str, local_path: &Path) -> Result<()> {
        let url = self.file_url(remote_name)?;
        let response = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Failed to read {}: {}", remote_name, e)))?;
        let response = check_status(response, "GET").await?;

        let mut file = tokio::fs::File::create(local_path).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| Error::Backend(format!("Failed to read body of {}: {}", remote_name, e)))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn delete(&self, remote_name: &str) -> Result<()> {
        let url = self.file_url(remote_name)?;
        let response = self
            .request(Method::DELETE, &url)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Failed to delete {}: {}", remote_name, e)))?;
        check_status(response, "DELETE").await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<BackupArtifact>> {
        let response = self.propfind("1", LIST_BODY).await?;
        let xml = response
            .text()
            .await
            .map_err(|e| Error::Backend(format!("Failed to read listing: {}", e)))?;

        Ok(self
            .patterns
            .entries(&xml)
            .into_iter()
            .filter_map(|entry| {
                let path = format!("{}{}", self.base_url, entry.name);
                BackupArtifact::from_listing(&entry.name, path, entry.size)
            })
            .collect())
    }

    async fn exists(&self, remote_name: &str) -> Result<bool> {
        let url = self.file_url(remote_name)?;
        let response = self
            .request(Method::HEAD, &url)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Failed to check existence: {}", e)))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(Error::Backend(format!(
                "HEAD returned HTTP {}",
                status.as_u16()
            ))),
        }
    }

    async fn free_space(&self) -> Result<Option<u64>> {
        let response = self.propfind("0", QUOTA_BODY).await?;
        let xml = response
            .text()
            .await
            .map_err(|e| Error::Backend(format!("Failed to read quota: {}", e)))?;
        Ok(self.patterns.quota(&xml))
    }
}
