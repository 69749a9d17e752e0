//! Server-pool configuration fetch.
//!
//! The platform publishes its current server pool as a small JS-like
//! blob of `var name = [...];` assignments. The client fetches it once,
//! picks servers at random from the pool, and caches the result for its
//! lifetime. The fetch itself sits behind the [`ConfigFetcher`] trait so
//! tests (and integrators with pinned servers) can skip HTTP entirely.

use async_trait::async_trait;
use tracing::debug;

use crate::error::ClientError;

/// The server pool parsed from the platform's config blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Raw-TCP chat server addresses.
    pub chat_servers: Vec<String>,
    /// WebSocket server addresses.
    pub websocket_servers: Vec<String>,
}

/// Fetches the raw config blob from wherever it lives.
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    /// Fetches and parses the server pool.
    async fn fetch(&self, url: &str) -> Result<ServerConfig, ClientError>;
}

// ---------------------------------------------------------------------------
// HTTP fetcher (the production one)
// ---------------------------------------------------------------------------

/// Fetches the config blob over HTTP GET.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConfigFetcher;

#[async_trait]
impl ConfigFetcher for HttpConfigFetcher {
    async fn fetch(&self, url: &str) -> Result<ServerConfig, ClientError> {
        let body = reqwest::get(url)
            .await
            .map_err(|e| ClientError::Config(format!("GET {url}: {e}")))?
            .text()
            .await
            .map_err(|e| ClientError::Config(format!("read body: {e}")))?;
        let config = parse_server_config(&body)?;
        debug!(
            chat = config.chat_servers.len(),
            websocket = config.websocket_servers.len(),
            "server pool loaded"
        );
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Static pool (tests, pinned deployments)
// ---------------------------------------------------------------------------

/// A [`ConfigFetcher`] that returns a fixed pool without any I/O.
#[derive(Debug, Clone)]
pub struct StaticServers(pub ServerConfig);

#[async_trait]
impl ConfigFetcher for StaticServers {
    async fn fetch(&self, _url: &str) -> Result<ServerConfig, ClientError> {
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// Blob parsing
// ---------------------------------------------------------------------------

/// Parses the JS-like config blob into a server pool.
///
/// Only two assignments matter: `chat_servers` and
/// `websocket_servers`, each a JS array literal of strings. Everything
/// else in the blob is ignored.
pub fn parse_server_config(blob: &str) -> Result<ServerConfig, ClientError> {
    let chat_servers = extract_string_array(blob, "chat_servers")
        .ok_or_else(|| ClientError::Config("missing chat_servers".into()))?;
    let websocket_servers = extract_string_array(blob, "websocket_servers")
        .ok_or_else(|| ClientError::Config("missing websocket_servers".into()))?;
    if chat_servers.is_empty() && websocket_servers.is_empty() {
        return Err(ClientError::Config("empty server pool".into()));
    }
    Ok(ServerConfig {
        chat_servers,
        websocket_servers,
    })
}

/// Pulls `name = [ ... ]` out of the blob and parses the array literal.
/// JS single quotes are normalized to JSON double quotes first.
fn extract_string_array(blob: &str, name: &str) -> Option<Vec<String>> {
    let at = blob.find(name)?;
    let rest = &blob[at + name.len()..];
    let eq = rest.find('=')?;
    let rest = &rest[eq + 1..];
    let open = rest.find('[')?;
    let close = rest[open..].find(']')? + open;
    let literal = rest[open..=close].replace('\'', "\"");
    serde_json::from_str(&literal).ok()
}

// =========================================================================
// Tests
// =========================================================================
