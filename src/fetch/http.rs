//! HTTP transport for the installer download.

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use std::io::{self, Write};
use std::time::Duration;

use super::Transport;
use crate::error::PipelineError;

/// Connection establishment timeout. The transfer itself is not bounded.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocking HTTP client.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None::<Duration>)
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64> {
        tracing::info!("GET {url}");
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| PipelineError::Transfer(format!("request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            bail!(PipelineError::Transfer(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        if let Some(len) = response.content_length() {
            tracing::debug!("content length: {len} bytes");
        }

        let written = io::copy(&mut response, sink)
            .map_err(|e| PipelineError::Transfer(format!("reading body of {url}: {e}")))?;
        sink.flush().context("flushing download")?;
        Ok(written)
    }
}
