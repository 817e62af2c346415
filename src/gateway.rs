//! Storage gateway: the request-intercepting worker in front of the cache.
//!
//! The gateway runs in its own execution context (a dedicated thread) and is
//! reached only two ways:
//!
//! 1. **Requests**: [`GatewayHandle::fetch`] hands it a [`Request`]; it
//!    answers from the shared [`Cache`] or passes the request through.
//! 2. **Messages**: [`GatewayHandle::post_message`] delivers a structured
//!    [`GatewayMessage`] serialized as JSON, e.g. the bulk-clear reset.
//!
//! Everything else it shares with clients goes through the persistent cache.
//!
//! # Interception rules
//!
//! A request is handled when its URL has the scope's origin, its path lies
//! under the scope path, and the scope-relative path starts with `contents/`
//! or `theme/`. Handled requests resolve in three steps:
//!
//! ```text
//! exact URL (fragment ignored)  →  URL without query/fragment  →  404 Not found
//! ```
//!
//! The second step is what lets callers add cache-busting parameters
//! (`?v=1699999999`) to reads.
//!
//! # Lifecycle
//!
//! `Parsed → Installed → Activated`. Install supersedes any older instance
//! immediately and activation claims existing clients, so by the time
//! [`GatewayHandle::spawn`] returns the gateway is answering requests. A
//! gateway that is not yet activated lets every request pass through.

use crate::cache::{Cache, CacheError, CacheStorage, CachedResponse};
use crate::types::{CONTENTS_PREFIX, THEME_PREFIX};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Failed to start gateway worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Gateway worker is not running")]
    WorkerGone,
    #[error("Message could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The URL prefix a gateway controls, e.g. `http://127.0.0.1:8080/designer/`.
///
/// The base always ends with `/` and carries no query or fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    base: Url,
}

impl Scope {
    pub fn parse(base: &str) -> Result<Self, url::ParseError> {
        let mut base = Url::parse(base)?;
        base.set_query(None);
        base.set_fragment(None);
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Path component of the scope, always ending in `/`.
    pub fn path(&self) -> &str {
        self.base.path()
    }

    /// Absolute URL of a store path. A leading `/` on `path` is ignored, so
    /// store paths always resolve under the scope.
    pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base.join(path.trim_start_matches('/'))
    }

    /// Resolve a URL as a page inside the scope would: absolute URLs stay
    /// as they are, path-absolute ones take the scope's origin.
    pub fn resolve_href(&self, href: &str) -> Result<Url, url::ParseError> {
        self.base.join(href)
    }

    /// The part of `url`'s path below the scope, if it is inside it.
    pub fn relative_path<'a>(&self, url: &'a Url) -> Option<&'a str> {
        if url.origin() != self.base.origin() {
            return None;
        }
        url.path().strip_prefix(self.base.path())
    }

    /// Whether the scope's host is a local loopback development host.
    pub fn is_loopback(&self) -> bool {
        matches!(
            self.base.host_str(),
            Some("localhost") | Some("127.0.0.1") | Some("[::1]")
        )
    }

    /// Whether the scope is served from a secure context.
    pub fn is_secure(&self) -> bool {
        self.base.scheme() == "https"
    }
}

/// A request presented to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub url: Url,
}

impl Request {
    pub fn get(url: Url) -> Self {
        Self {
            method: "GET".to_string(),
            url,
        }
    }

    pub fn head(url: Url) -> Self {
        Self {
            method: "HEAD".to_string(),
            url,
        }
    }
}

/// A response produced by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Response {
    /// The synthetic answer for scoped paths with nothing stored.
    pub fn not_found() -> Self {
        Self {
            status: 404,
            content_type: Some("text/plain; charset=utf-8".to_string()),
            body: b"Not found".to_vec(),
        }
    }

    /// The answer for scoped requests that are neither `GET` nor `HEAD`.
    pub fn method_not_allowed() -> Self {
        Self {
            status: 405,
            content_type: Some("text/plain; charset=utf-8".to_string()),
            body: b"Method not allowed".to_vec(),
        }
    }

    /// 2xx status.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl From<CachedResponse> for Response {
    fn from(cached: CachedResponse) -> Self {
        Self {
            status: cached.status,
            content_type: cached.content_type,
            body: cached.body,
        }
    }
}

/// What the gateway did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The request was in scope and answered (possibly with a 404).
    Respond(Response),
    /// The request is not the gateway's business.
    PassThrough,
}

/// Out-of-band messages understood by the gateway.
///
/// Encoded as `{"type": "<TAG>"}` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayMessage {
    /// Drop the entire persistent cache.
    #[serde(rename = "STYLE_CACHE_CLEAR")]
    CacheClear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Parsed,
    Installed,
    Activated,
}

/// The gateway proper. Single-threaded; see [`GatewayHandle`] for running it
/// on its own worker.
#[derive(Debug)]
pub struct Gateway {
    scope: Scope,
    caches: Arc<CacheStorage>,
    cache_name: String,
    cache: Option<Arc<Cache>>,
    lifecycle: Lifecycle,
}

impl Gateway {
    pub fn new(scope: Scope, caches: Arc<CacheStorage>, cache_name: impl Into<String>) -> Self {
        Self {
            scope,
            caches,
            cache_name: cache_name.into(),
            cache: None,
            lifecycle: Lifecycle::Parsed,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Install, superseding any older instance without waiting.
    pub fn install(&mut self) {
        if self.lifecycle == Lifecycle::Parsed {
            self.lifecycle = Lifecycle::Installed;
            tracing::debug!(scope = %self.scope.base(), "gateway installed");
        }
    }

    /// Activate and claim existing clients.
    pub fn activate(&mut self) {
        if self.lifecycle == Lifecycle::Installed {
            self.lifecycle = Lifecycle::Activated;
            tracing::debug!(scope = %self.scope.base(), "gateway activated");
        }
    }

    /// Whether a request URL falls under this gateway's interception rules.
    pub fn should_handle(&self, url: &Url) -> bool {
        match self.scope.relative_path(url) {
            Some(relative) => {
                relative.starts_with(CONTENTS_PREFIX) || relative.starts_with(THEME_PREFIX)
            }
            None => false,
        }
    }

    /// The open cache handle, re-opened if it was deleted underneath us.
    fn cache(&mut self) -> Result<Arc<Cache>, CacheError> {
        if let Some(cache) = &self.cache
            && !cache.is_deleted()
        {
            return Ok(Arc::clone(cache));
        }
        let cache = self.caches.open(&self.cache_name)?;
        self.cache = Some(Arc::clone(&cache));
        Ok(cache)
    }

    /// Answer a request from the cache.
    pub fn handle_fetch(&mut self, request: &Request) -> Result<FetchOutcome, GatewayError> {
        if self.lifecycle != Lifecycle::Activated || !self.should_handle(&request.url) {
            return Ok(FetchOutcome::PassThrough);
        }
        let head_only = match request.method.as_str() {
            "GET" => false,
            "HEAD" => true,
            _ => return Ok(FetchOutcome::Respond(Response::method_not_allowed())),
        };

        let mut response = self.lookup(&request.url)?;
        if head_only {
            response.body.clear();
        }
        Ok(FetchOutcome::Respond(response))
    }

    /// Exact URL first, then without query; a synthetic 404 otherwise.
    fn lookup(&mut self, url: &Url) -> Result<Response, GatewayError> {
        let cache = self.cache()?;
        let mut exact = url.clone();
        exact.set_fragment(None);
        if let Some(hit) = cache.match_key(exact.as_str())? {
            return Ok(hit.into());
        }

        let mut normalized = exact;
        normalized.set_query(None);
        if let Some(hit) = cache.match_key(normalized.as_str())? {
            return Ok(hit.into());
        }

        tracing::debug!(%url, "gateway miss");
        Ok(Response::not_found())
    }

    /// Handle a structured message. Unrecognized payloads are ignored.
    pub fn handle_message(&mut self, payload: serde_json::Value) -> Result<(), GatewayError> {
        match serde_json::from_value::<GatewayMessage>(payload) {
            Ok(GatewayMessage::CacheClear) => {
                self.cache = None;
                self.caches.delete(&self.cache_name)?;
                tracing::info!(cache = %self.cache_name, "gateway dropped cache");
                Ok(())
            }
            Err(err) => {
                tracing::debug!(%err, "gateway ignored unknown message");
                Ok(())
            }
        }
    }
}

enum Command {
    Fetch {
        request: Request,
        reply: Sender<Result<FetchOutcome, GatewayError>>,
    },
    Message {
        payload: serde_json::Value,
        ack: Sender<Result<(), GatewayError>>,
    },
    Shutdown,
}

/// Client-side handle to a gateway running on its own worker thread.
///
/// Dropping the handle stops the worker.
#[derive(Debug)]
pub struct GatewayHandle {
    tx: Sender<Command>,
    scope: Scope,
    worker: Option<JoinHandle<()>>,
}

impl GatewayHandle {
    /// Start `gateway` on a worker thread and wait until it is activated.
    pub fn spawn(mut gateway: Gateway) -> Result<Self, GatewayError> {
        let scope = gateway.scope().clone();
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("storage-gateway".to_string())
            .spawn(move || {
                gateway.install();
                gateway.activate();
                if ready_tx.send(()).is_ok() {
                    run_worker(gateway, rx);
                }
            })?;

        ready_rx.recv().map_err(|_| GatewayError::WorkerGone)?;
        Ok(Self {
            tx,
            scope,
            worker: Some(worker),
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Send a request through the gateway and wait for its answer.
    pub fn fetch(&self, request: Request) -> Result<FetchOutcome, GatewayError> {
        let (reply, answer) = mpsc::channel();
        self.tx
            .send(Command::Fetch { request, reply })
            .map_err(|_| GatewayError::WorkerGone)?;
        answer.recv().map_err(|_| GatewayError::WorkerGone)?
    }

    /// Post a message and wait until the gateway has handled it.
    pub fn post_message(&self, message: &GatewayMessage) -> Result<(), GatewayError> {
        self.post_raw(serde_json::to_value(message)?)
    }

    /// Post an arbitrary JSON payload and wait until the gateway has
    /// handled it.
    pub fn post_raw(&self, payload: serde_json::Value) -> Result<(), GatewayError> {
        let (ack, done) = mpsc::channel();
        self.tx
            .send(Command::Message { payload, ack })
            .map_err(|_| GatewayError::WorkerGone)?;
        done.recv().map_err(|_| GatewayError::WorkerGone)?
    }
}

impl Drop for GatewayHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(mut gateway: Gateway, rx: Receiver<Command>) {
    for command in rx {
        match command {
            Command::Fetch { request, reply } => {
                let outcome = gateway.handle_fetch(&request);
                if let Err(err) = &outcome {
                    tracing::error!(url = %request.url, %err, "gateway fetch failed");
                }
                let _ = reply.send(outcome);
            }
            Command::Message { payload, ack } => {
                let _ = ack.send(gateway.handle_message(payload));
            }
            Command::Shutdown => break,
        }
    }
    tracing::debug!("gateway worker stopped");
}
