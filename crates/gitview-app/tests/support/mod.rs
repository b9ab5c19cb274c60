#![allow(dead_code, missing_docs, clippy::expect_used, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gitview_app::{DirectoryFetcher, Transport, TransportError};
use gitview_core::{FileNode, ManualClock};
use gitview_store::{ByteCache, ByteCacheOptions};
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::sync::Semaphore;

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        OffsetDateTime::UNIX_EPOCH + time::Duration::days(19_500),
    ))
}

pub async fn open_cache(temp: &TempDir, clock: Arc<ManualClock>) -> Arc<ByteCache> {
    let cache = ByteCache::open(ByteCacheOptions::new(temp.path()), clock)
        .await
        .expect("open cache");
    Arc::new(cache)
}

/// Wait (in real time, bounded) until `done` holds.
pub async fn eventually(mut done: impl FnMut() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(done(), "condition not reached in time");
}

/// Blocks fetches until opened.
#[derive(Clone)]
pub struct Gate(Arc<Semaphore>);

impl Gate {
    pub fn closed() -> Self {
        Self(Arc::new(Semaphore::new(0)))
    }

    pub fn open(&self) {
        self.0.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    async fn pass(&self) {
        let _permit = self.0.acquire().await.expect("gate semaphore closed");
    }
}

/// Transport answering `body of <url>` and counting calls.
#[derive(Default)]
pub struct StubTransport {
    calls: AtomicUsize,
    gate: Option<Gate>,
    failing: bool,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Gate) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self, url: &str) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        if self.failing {
            return Err(TransportError::Status {
                url: url.to_owned(),
                status: 503,
            });
        }
        Ok(format!("body of {url}"))
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn fetch_text(&self, url: &str) -> Result<String, TransportError> {
        self.respond(url).await
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        self.respond(url).await.map(String::into_bytes)
    }
}

/// Directory fetcher serving canned listings (empty for unknown paths).
#[derive(Default)]
pub struct StubFetcher {
    listings: HashMap<String, Vec<FileNode>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
    gate: Option<Gate>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing(mut self, path: &str, files: Vec<FileNode>) -> Self {
        self.listings.insert(path.to_owned(), files);
        self
    }

    pub fn failing_on(mut self, path: &str) -> Self {
        self.failing.insert(path.to_owned());
        self
    }

    pub fn gated(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl DirectoryFetcher for StubFetcher {
    async fn fetch_directory_listing(
        &self,
        _repository: &str,
        path: &str,
    ) -> Result<Vec<FileNode>, TransportError> {
        self.calls.lock().expect("calls lock").push(path.to_owned());
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        if self.failing.contains(path) {
            return Err(TransportError::Network(format!("cannot list {path}")));
        }
        Ok(self.listings.get(path).cloned().unwrap_or_default())
    }
}

pub fn dirs(parent: &str, names: &[&str]) -> Vec<FileNode> {
    names
        .iter()
        .map(|name| {
            let path = if parent.is_empty() {
                (*name).to_owned()
            } else {
                format!("{parent}/{name}")
            };
            FileNode::directory(*name, path)
        })
        .collect()
}
