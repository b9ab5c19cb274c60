#![allow(missing_docs, clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use gitview_app::{FetchError, RequestCoordinator, Transport, TransportError};
use gitview_core::ResourceKey;
use tempfile::TempDir;

use support::{Gate, StubTransport, clock, eventually, open_cache};

const TREE_URL: &str = "https://x/tree/";

#[tokio::test]
async fn concurrent_uncached_fetches_share_one_transport_call() -> Result<()> {
    let temp = TempDir::new()?;
    let gate = Gate::closed();
    let transport = Arc::new(StubTransport::gated(gate.clone()));
    let coordinator = RequestCoordinator::new(transport.clone(), open_cache(&temp, clock()).await);

    let callers = join_all((0..8).map(|_| coordinator.fetch_content(TREE_URL, false)));
    let opener = async {
        eventually(|| transport.calls() == 1).await;
        assert_eq!(coordinator.active_count(), 1);
        assert!(coordinator.is_active(TREE_URL));
        gate.open();
    };
    let (outcomes, ()) = tokio::join!(callers, opener);

    assert_eq!(transport.calls(), 1);
    for outcome in outcomes {
        assert_eq!(outcome, Ok(format!("body of {TREE_URL}")));
    }
    assert_eq!(coordinator.active_count(), 0);
    assert!(!coordinator.is_active(TREE_URL));
    Ok(())
}

#[tokio::test]
async fn waiters_observe_the_same_failure() -> Result<()> {
    let temp = TempDir::new()?;
    let transport = Arc::new(StubTransport::failing());
    let coordinator = RequestCoordinator::new(transport.clone(), open_cache(&temp, clock()).await);

    let (a, b) = tokio::join!(
        coordinator.fetch_content(TREE_URL, true),
        coordinator.fetch_content(TREE_URL, true)
    );

    let expected = Err(FetchError::Transport(TransportError::Status {
        url: TREE_URL.to_owned(),
        status: 503,
    }));
    assert_eq!(a, expected);
    assert_eq!(b, expected);
    assert_eq!(transport.calls(), 1);
    assert_eq!(coordinator.active_count(), 0);
    Ok(())
}

#[tokio::test]
async fn successful_fetch_is_served_from_cache_afterwards() -> Result<()> {
    let temp = TempDir::new()?;
    let transport = Arc::new(StubTransport::new());
    let coordinator = RequestCoordinator::new(transport.clone(), open_cache(&temp, clock()).await);
    let url = "https://x/repo/log/";

    let first = coordinator.fetch_html(url, true).await?;
    let second = coordinator.fetch_html(url, true).await?;
    assert_eq!(first, second);
    assert_eq!(transport.calls(), 1);

    coordinator.fetch_content(url, false).await?;
    assert_eq!(transport.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn cancelled_fetch_never_writes_the_cache() -> Result<()> {
    let temp = TempDir::new()?;
    let gate = Gate::closed();
    let transport = Arc::new(StubTransport::gated(gate.clone()));
    let cache = open_cache(&temp, clock()).await;
    let coordinator = Arc::new(RequestCoordinator::new(transport.clone(), cache.clone()));

    let waiter = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.fetch_content(TREE_URL, true).await })
    };
    eventually(|| transport.calls() == 1).await;

    assert!(coordinator.cancel(TREE_URL));
    assert!(!coordinator.is_active(TREE_URL));
    gate.open();

    assert_eq!(waiter.await?, Err(FetchError::Cancelled));
    assert!(cache.get_cached_html(TREE_URL).await.is_none());
    assert!(!cache.contains(&ResourceKey::new(TREE_URL)).await);
    Ok(())
}

#[tokio::test]
async fn cancel_all_reports_every_flight() -> Result<()> {
    let temp = TempDir::new()?;
    let gate = Gate::closed();
    let transport = Arc::new(StubTransport::gated(gate.clone()));
    let coordinator = Arc::new(RequestCoordinator::new(
        transport.clone(),
        open_cache(&temp, clock()).await,
    ));

    let mut waiters = Vec::new();
    for url in ["https://x/a/", "https://x/b/"] {
        let coordinator = Arc::clone(&coordinator);
        waiters.push(tokio::spawn(async move { coordinator.fetch_binary(url).await }));
    }
    eventually(|| transport.calls() == 2).await;

    assert_eq!(coordinator.cancel_all(), 2);
    assert_eq!(coordinator.active_count(), 0);
    for waiter in waiters {
        assert_eq!(waiter.await?, Err(FetchError::Cancelled));
    }
    Ok(())
}

#[tokio::test]
async fn binary_fetches_bypass_the_cache_but_data_fetches_do_not() -> Result<()> {
    let temp = TempDir::new()?;
    let transport = Arc::new(StubTransport::new());
    let cache = open_cache(&temp, clock()).await;
    let coordinator = RequestCoordinator::new(transport.clone(), cache.clone());
    let image = "https://x/repo/plain/logo.png";
    let data = "https://x/repo/plain/data.json";

    let bytes = coordinator.fetch_binary(image).await?;
    assert_eq!(bytes, format!("body of {image}").into_bytes());
    assert!(cache.get(&ResourceKey::new(image)).await.is_none());

    coordinator.fetch_data(data, true).await?;
    coordinator.fetch_data(data, true).await?;
    assert_eq!(transport.calls(), 2);
    assert!(cache.contains(&ResourceKey::new(data)).await);
    Ok(())
}

#[tokio::test]
async fn undecodable_json_is_an_invalid_response() -> Result<()> {
    let temp = TempDir::new()?;
    let coordinator = RequestCoordinator::new(
        Arc::new(StubTransport::new()),
        open_cache(&temp, clock()).await,
    );

    let decoded: Result<Vec<u32>, FetchError> =
        coordinator.fetch_json("https://x/repo/stats", false).await;

    assert!(matches!(
        decoded,
        Err(FetchError::Transport(TransportError::InvalidResponse(_)))
    ));
    Ok(())
}

/// Transport whose first call panics; later calls answer normally.
#[derive(Default)]
struct PanicsOnce {
    calls: AtomicUsize,
}

impl PanicsOnce {
    fn respond(&self, url: &str) -> String {
        assert!(
            self.calls.fetch_add(1, Ordering::SeqCst) > 0,
            "transport crashed on first call"
        );
        format!("body of {url}")
    }
}

#[async_trait]
impl Transport for PanicsOnce {
    async fn fetch_text(&self, url: &str) -> Result<String, TransportError> {
        Ok(self.respond(url))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        Ok(self.respond(url).into_bytes())
    }
}

#[tokio::test]
async fn panicking_transport_does_not_wedge_the_url() -> Result<()> {
    let temp = TempDir::new()?;
    let transport = Arc::new(PanicsOnce::default());
    let coordinator = RequestCoordinator::new(transport.clone(), open_cache(&temp, clock()).await);
    let url = "https://x/a/";

    let first = coordinator.fetch_content(url, false).await;
    assert!(matches!(first, Err(FetchError::Aborted(_))));
    assert!(!coordinator.is_active(url));
    assert_eq!(coordinator.active_count(), 0);

    assert_eq!(coordinator.fetch_content(url, false).await?, format!("body of {url}"));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn cache_aware_caller_joining_an_uncached_flight_writes_back() -> Result<()> {
    let temp = TempDir::new()?;
    let gate = Gate::closed();
    let transport = Arc::new(StubTransport::gated(gate.clone()));
    let cache = open_cache(&temp, clock()).await;
    let coordinator = Arc::new(RequestCoordinator::new(transport.clone(), cache.clone()));

    let plain = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.fetch_content(TREE_URL, false).await })
    };
    eventually(|| transport.calls() == 1).await;

    let opener = async {
        tokio::task::yield_now().await;
        gate.open();
    };
    let (cached, ()) = tokio::join!(coordinator.fetch_content(TREE_URL, true), opener);

    assert_eq!(plain.await??, cached?);
    assert_eq!(transport.calls(), 1);
    assert_eq!(
        cache.get_cached_html(TREE_URL).await,
        Some(format!("body of {TREE_URL}"))
    );
    Ok(())
}

#[tokio::test]
async fn data_fetch_joining_a_binary_flight_is_cached() -> Result<()> {
    let temp = TempDir::new()?;
    let gate = Gate::closed();
    let transport = Arc::new(StubTransport::gated(gate.clone()));
    let cache = open_cache(&temp, clock()).await;
    let coordinator = Arc::new(RequestCoordinator::new(transport.clone(), cache.clone()));
    let url = "https://x/repo/plain/data.json";

    let binary = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.fetch_binary(url).await })
    };
    eventually(|| transport.calls() == 1).await;

    let opener = async {
        tokio::task::yield_now().await;
        gate.open();
    };
    let (data, ()) = tokio::join!(coordinator.fetch_data(url, true), opener);

    assert_eq!(binary.await??, data?);
    assert_eq!(transport.calls(), 1);
    assert!(cache.contains(&ResourceKey::new(url)).await);
    Ok(())
}
