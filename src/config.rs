//! Fetcher configuration: timeouts and transport knobs for the HTTP client
//! the ranged fetcher drives. Credentials are a separate concern — see
//! `credentials.rs`.

use std::env;
use std::time::Duration;

/// Configuration for the blocking HTTP client backing the fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Timeout for establishing the TCP/TLS connection.
    pub connect_timeout: Duration,

    /// Timeout for the whole HEAD/GET round trip, including body transfer.
    pub read_timeout: Duration,

    /// Optional HTTP(S) proxy URL.
    pub proxy: Option<String>,

    /// User-Agent header sent on every request.
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            proxy: None,
            user_agent: format!("sqlite-s3-query/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(60)
}

impl FetcherConfig {
    /// Overlays environment variables onto the defaults:
    /// `SQLITE_S3_QUERY_CONNECT_TIMEOUT_MS`, `SQLITE_S3_QUERY_READ_TIMEOUT_MS`,
    /// `SQLITE_S3_QUERY_PROXY`. Unset or unparseable variables are ignored,
    /// leaving the corresponding default in place.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(ms) = env::var("SQLITE_S3_QUERY_CONNECT_TIMEOUT_MS") {
            if let Ok(parsed) = ms.parse() {
                config.connect_timeout = Duration::from_millis(parsed);
            }
        }

        if let Ok(ms) = env::var("SQLITE_S3_QUERY_READ_TIMEOUT_MS") {
            if let Ok(parsed) = ms.parse() {
                config.read_timeout = Duration::from_millis(parsed);
            }
        }

        if let Ok(proxy) = env::var("SQLITE_S3_QUERY_PROXY") {
            config.proxy = Some(proxy);
        }

        config
    }

    pub(crate) fn build_client(&self) -> reqwest::Result<reqwest::blocking::Client> {
        let mut builder = reqwest::blocking::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .user_agent(self.user_agent.as_str());

        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        builder.build()
    }
}
