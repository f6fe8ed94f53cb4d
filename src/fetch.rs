//! Authenticated ranged fetcher: one signed HEAD to discover the object's
//! size and version, then one signed GET per page SQLite's pager wants.

use std::io::Read;
use std::time::Instant;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use url::Url;

use crate::config::FetcherConfig;
use crate::credentials::CredentialsProvider;
use crate::error::{Error, Result};
use crate::sigv4;

/// The empty-body SHA-256, used as `x-amz-content-sha256` on every call this
/// crate makes — it never sends a request body.
fn empty_body_hash() -> String {
    hex::encode(Sha256::digest(b""))
}

/// The S3 object this session is pinned to: a version id and byte length
/// discovered once, at session open, and carried on every subsequent read.
#[derive(Debug, Clone)]
pub struct ObjectBinding {
    pub version_id: String,
    pub size: u64,
}

/// Wraps a blocking HTTP client and the target URL, performing signed
/// HEAD/GET calls against one S3-compatible endpoint.
pub struct Fetcher {
    client: reqwest::blocking::Client,
    credentials: CredentialsProvider,
    scheme: String,
    host: String,
    path: String,
}

impl Fetcher {
    pub fn new(url: &str, credentials: CredentialsProvider, config: &FetcherConfig) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| Error::Io(format!("invalid URL: {e}")))?;
        let client = config
            .build_client()
            .map_err(|e| Error::Io(format!("failed to build HTTP client: {e}")))?;

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::Io("URL has no host".to_string()))?
            .to_string();
        let host = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };

        Ok(Self {
            client,
            credentials,
            scheme: parsed.scheme().to_string(),
            host,
            path: parsed.path().to_string(),
        })
    }

    fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path)
    }

    /// Issues a signed HEAD with no query parameters and an empty body.
    /// Fails with `VersioningRequired` if the response carries no
    /// `x-amz-version-id`.
    #[instrument(skip(self))]
    pub fn open(&self) -> Result<ObjectBinding> {
        let response = self.signed_request(reqwest::Method::HEAD, &[], &[])?;

        let version_id = response
            .headers()
            .get("x-amz-version-id")
            .and_then(|v| v.to_str().ok())
            .ok_or(Error::VersioningRequired)?
            .to_string();

        let size: u64 = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::Io("HEAD response had no content-length".to_string()))?;

        debug!(%version_id, size, "discovered object binding");
        Ok(ObjectBinding { version_id, size })
    }

    /// Issues a signed GET for `[offset, offset+length)`, pinned to
    /// `binding.version_id`. Returns exactly `length` bytes or fails with
    /// `Error::Io` — including when the server sends even one byte more
    /// than requested. The short-circuit is a hard abort, not a drain: once
    /// `length` bytes have arrived, any further byte read from the body is
    /// itself the failure, not something to quietly discard.
    #[instrument(skip(self, binding))]
    pub fn read_range(&self, binding: &ObjectBinding, offset: u64, length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let range_header = format!("bytes={offset}-{}", offset + length - 1);
        let response = self.signed_request(
            reqwest::Method::GET,
            &[("versionId".to_string(), binding.version_id.clone())],
            &[("range".to_string(), range_header)],
        )?;

        let mut body = response;
        let mut buf = vec![0u8; length as usize];
        let mut filled = 0usize;

        while filled < buf.len() {
            let n = body
                .read(&mut buf[filled..])
                .map_err(|e| Error::Io(e.to_string()))?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled != buf.len() {
            return Err(Error::Io(format!(
                "expected {} bytes, got {filled}",
                buf.len()
            )));
        }

        let mut probe = [0u8; 1];
        let surplus = body.read(&mut probe).map_err(|e| Error::Io(e.to_string()))?;
        if surplus > 0 {
            return Err(Error::Io(format!(
                "server returned more than the requested {} bytes",
                buf.len()
            )));
        }

        debug!(offset, length, elapsed = ?started.elapsed(), "ranged GET complete");
        Ok(buf)
    }

    fn signed_request(
        &self,
        method: reqwest::Method,
        query: &[(String, String)],
        extra_headers: &[(String, String)],
    ) -> Result<reqwest::blocking::Response> {
        let now = Utc::now();
        let credentials = (self.credentials)(now)?;
        let body_hash = empty_body_hash();

        let signed = sigv4::sign(
            now,
            &credentials,
            method.as_str(),
            &self.host,
            &self.path,
            query,
            extra_headers,
            &body_hash,
        )?;

        let mut request = self.client.request(method, self.url());
        for (name, value) in query {
            request = request.query(&[(name, value)]);
        }
        for (name, value) in &signed.headers {
            if name.eq_ignore_ascii_case("host") {
                continue; // reqwest sets Host from the URL itself.
            }
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().map_err(Error::from)?;
        if !response.status().is_success() {
            return Err(Error::Io(format!(
                "request failed with status {}",
                response.status()
            )));
        }
        Ok(response)
    }
}
