#![allow(missing_docs, clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use gitview_app::{DirectoryCache, DirectoryCacheOptions, FetchError};
use gitview_core::{FileNode, ManualClock, is_canonical};
use tempfile::TempDir;

use support::{Gate, StubFetcher, clock, dirs, eventually, open_cache};

async fn directory_cache(temp: &TempDir, clock: Arc<ManualClock>) -> DirectoryCache {
    let cache = open_cache(temp, clock.clone()).await;
    DirectoryCache::new(cache, clock, DirectoryCacheOptions::default())
}

#[tokio::test]
async fn listing_survives_a_restart_in_canonical_order() -> Result<()> {
    let temp = TempDir::new()?;
    let clock = clock();
    {
        let cache = directory_cache(&temp, clock.clone()).await;
        cache
            .put_directory(
                "repo",
                "src",
                vec![
                    FileNode::file("b", "src/b"),
                    FileNode::directory("A", "src/A"),
                    FileNode::file("a", "src/a"),
                ],
            )
            .await;
    }

    let cache = directory_cache(&temp, clock).await;
    let files = cache.get_directory("repo", "/src/").await.expect("persisted listing");
    let names: Vec<&str> = files.iter().map(|node| node.name.as_str()).collect();
    assert_eq!(names, ["A", "a", "b"]);
    assert!(is_canonical(&files));
    Ok(())
}

#[tokio::test]
async fn concurrent_loads_share_one_fetch_and_track_loading() -> Result<()> {
    let temp = TempDir::new()?;
    let gate = Gate::closed();
    let fetcher = Arc::new(
        StubFetcher::new()
            .with_listing("docs", vec![FileNode::file("z", "docs/z"), FileNode::directory("img", "docs/img")])
            .gated(gate.clone()),
    );
    let cache = directory_cache(&temp, clock()).await;

    let first = cache.load_directory("repo", "docs", fetcher.clone());
    let second = cache.load_directory("repo", "docs/", fetcher.clone());
    let observer = async {
        eventually(|| fetcher.call_count() == 1).await;
        assert!(cache.is_loading("repo", "docs"));
        assert!(cache.is_load_in_flight("repo", "docs"));
        gate.open();
    };
    let (first, second, ()) = tokio::join!(first, second, observer);

    assert_eq!(first?, second?);
    assert_eq!(fetcher.call_count(), 1);
    assert!(!cache.is_loading("repo", "docs"));
    let cached = cache.get_directory("repo", "docs").await.expect("stored listing");
    assert_eq!(cached[0].name, "img");
    Ok(())
}

#[tokio::test]
async fn failed_load_clears_loading_state() -> Result<()> {
    let temp = TempDir::new()?;
    let fetcher = Arc::new(StubFetcher::new().failing_on("broken"));
    let cache = directory_cache(&temp, clock()).await;

    let outcome = cache.load_directory("repo", "broken", fetcher).await;

    assert!(matches!(outcome, Err(FetchError::Transport(_))));
    assert!(!cache.is_loading("repo", "broken"));
    assert!(cache.get_directory("repo", "broken").await.is_none());
    Ok(())
}

#[tokio::test]
async fn abandoned_load_clears_loading_state() -> Result<()> {
    let temp = TempDir::new()?;
    let gate = Gate::closed();
    let fetcher = Arc::new(StubFetcher::new().gated(gate.clone()));
    let cache = directory_cache(&temp, clock()).await;
    let mut loading = cache.subscribe_loading();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        cache.load_directory("repo", "slow", fetcher.clone()),
    )
    .await;

    assert!(abandoned.is_err());
    assert_eq!(fetcher.call_count(), 1);
    assert!(!cache.is_loading("repo", "slow"));
    assert!(loading.borrow_and_update().is_empty());
    gate.open();
    Ok(())
}

#[tokio::test]
async fn prefetch_children_is_capped_and_isolates_failures() -> Result<()> {
    let temp = TempDir::new()?;
    let fetcher = Arc::new(StubFetcher::new().failing_on("c"));
    let cache = directory_cache(&temp, clock()).await;
    cache.put_directory("repo", "a", Vec::new()).await;

    let mut listing = dirs("", &["a", "b", "c", "d", "e", "f", "g"]);
    listing.push(FileNode::file("README", "README"));

    let loaded = cache.prefetch_children("repo", "", &listing, fetcher.clone()).await;

    let mut fetched = fetcher.calls();
    fetched.sort();
    assert_eq!(fetched, ["b", "c", "d", "e", "f"]);
    assert_eq!(loaded, 4);
    assert!(cache.is_cached("repo", "f").await);
    assert!(!cache.is_cached("repo", "c").await);
    assert!(!cache.is_cached("repo", "g").await);
    Ok(())
}

#[tokio::test]
async fn saved_tree_seeds_listings_and_clear_drops_it() -> Result<()> {
    let temp = TempDir::new()?;
    let cache = directory_cache(&temp, clock()).await;
    let mut directories = BTreeMap::new();
    directories.insert("/".to_owned(), vec![FileNode::file("z", "z"), FileNode::directory("src", "src")]);
    directories.insert("src/".to_owned(), vec![FileNode::file("lib.rs", "src/lib.rs")]);

    cache.save_repository_tree("repo", directories).await;

    let tree = cache.load_repository_tree("repo").expect("saved tree");
    assert_eq!(tree.directories.len(), 2);
    assert_eq!(tree.directories[""][0].name, "src");
    assert!(cache.get_directory("repo", "src").await.is_some());

    cache.clear("repo");
    assert!(cache.load_repository_tree("repo").is_none());
    // The persistent tier still answers after the in-process tier is cleared.
    assert!(cache.get_directory("repo", "src").await.is_some());
    Ok(())
}
