//! End-to-end crawls over HTTP, local disk and in-memory storage

use crate::common::{default_registry, memory_registry, spider, stac_doc, stac_item};
use stac_spider::storage::MemoryStorage;
use stac_spider::{EventKind, Flow, FETCH_ERROR_ID};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mounts a JSON document that must be requested exactly `times` times
async fn mount_json(server: &MockServer, at: &str, body: String, times: u64) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "application/json"),
        )
        .expect(times)
        .mount(server)
        .await;
}

/// Mounts a small tree: a catalog with one collection of two items, a
/// duplicate child link and a child that does not exist
async fn mount_tree(server: &MockServer) {
    mount_json(
        server,
        "/stac/catalog.json",
        stac_doc(
            "root",
            &[
                ("child", "./nz/collection.json"),
                ("child", "./nz/../nz/collection.json#summary"),
                ("child", "./missing/catalog.json"),
                ("self", "./catalog.json"),
            ],
        ),
        1,
    )
    .await;
    mount_json(
        server,
        "/stac/nz/collection.json",
        stac_doc("nz", &[("item", "./a.json"), ("item", "./b.json")]),
        1,
    )
    .await;
    mount_json(
        server,
        "/stac/nz/a.json",
        stac_item("a", "2024-01-01T00:00:00Z", "2024-01-01T00:00:00Z"),
        1,
    )
    .await;
    mount_json(
        server,
        "/stac/nz/b.json",
        stac_item("b", "2024-01-01T00:00:00Z", "2024-02-01T00:00:00Z"),
        1,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/stac/missing/catalog.json"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_http_crawl_visits_every_document_once() {
    let server = MockServer::start().await;
    mount_tree(&server).await;
    let cache_dir = TempDir::new().expect("Failed to create temp dir");

    let spider = spider(default_registry(), cache_dir.path(), 4, 100);
    let errors = Arc::new(AtomicUsize::new(0));
    {
        let errors = Arc::clone(&errors);
        spider.on(EventKind::Catalog, move |_, event| {
            if event.document().is_some_and(|d| d.is_error()) {
                errors.fetch_add(1, Ordering::SeqCst);
            }
            async { Ok(Flow::Continue) }
        });
    }

    spider
        .process_seed(&format!("{}/stac/catalog.json", server.uri()))
        .await
        .expect("Failed to submit seed");
    spider.join().await.expect("Crawl failed");

    let stats = spider.stats();
    // root, nz collection, missing catalog and two items
    assert_eq!(stats.seen, 5);
    assert_eq!(stats.catalogs, 2);
    assert_eq!(stats.collections, 1);
    assert_eq!(stats.items, 2);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cache_is_reused_across_runs() {
    let server = MockServer::start().await;
    mount_tree(&server).await;
    let cache_dir = TempDir::new().expect("Failed to create temp dir");
    let seed = format!("{}/stac/catalog.json", server.uri());

    for _ in 0..2 {
        let spider = spider(default_registry(), cache_dir.path(), 4, 100);
        spider.process_seed(&seed).await.expect("Failed to submit seed");
        spider.join().await.expect("Crawl failed");
        assert_eq!(spider.stats().items, 2);
    }

    // Every mock expects a single request, including the 404
}

#[tokio::test]
async fn test_local_tree_crawl() {
    let root = TempDir::new().expect("Failed to create temp dir");
    let cache_dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::create_dir_all(root.path().join("imagery")).unwrap();
    std::fs::write(
        root.path().join("catalog.json"),
        stac_doc("root", &[("child", "./imagery/collection.json")]),
    )
    .unwrap();
    std::fs::write(
        root.path().join("imagery/collection.json"),
        stac_doc("imagery", &[("item", "./tile.json")]),
    )
    .unwrap();
    std::fs::write(
        root.path().join("imagery/tile.json"),
        stac_item("tile", "2024-01-01T00:00:00Z", "2024-01-01T00:00:00Z"),
    )
    .unwrap();

    let spider = spider(default_registry(), cache_dir.path(), 2, 100);
    let items = Arc::new(Mutex::new(Vec::new()));
    {
        let items = Arc::clone(&items);
        spider.on(EventKind::Item, move |_, event| {
            if let Some(document) = event.document() {
                items.lock().unwrap().push(document.id().to_string());
            }
            async { Ok(Flow::Continue) }
        });
    }

    let seed = root.path().join("catalog.json");
    spider
        .process_seed(seed.to_str().unwrap())
        .await
        .expect("Failed to submit seed");
    spider.join().await.expect("Crawl failed");

    assert_eq!(*items.lock().unwrap(), vec!["tile".to_string()]);
    assert_eq!(spider.seen_count(), 3);
}

#[tokio::test]
async fn test_item_with_missing_collection_is_still_emitted() {
    let memory = MemoryStorage::new();
    let item = Url::parse("memory://stac/orphans/item.json").unwrap();
    memory.insert(
        &item,
        stac_item("orphan", "2024-01-01T00:00:00Z", "2024-01-01T00:00:00Z"),
    );
    let cache_dir = TempDir::new().expect("Failed to create temp dir");
    let spider = spider(memory_registry(&memory), cache_dir.path(), 2, 100);

    let collection_ids = Arc::new(Mutex::new(Vec::new()));
    {
        let collection_ids = Arc::clone(&collection_ids);
        spider.on(EventKind::Item, move |spider, event| {
            let collection_ids = Arc::clone(&collection_ids);
            async move {
                let url = event.url().expect("item events carry a url");
                let collection = spider.get_collection(url).await?;
                collection_ids
                    .lock()
                    .unwrap()
                    .push(collection.id().to_string());
                Ok(Flow::Continue)
            }
        });
    }

    spider.process_url(item).await.expect("Failed to submit item");
    spider.join().await.expect("Crawl failed");

    assert_eq!(*collection_ids.lock().unwrap(), vec![FETCH_ERROR_ID]);
    assert_eq!(spider.stats().items, 1);
    assert_eq!(
        memory.read_count(&Url::parse("memory://stac/orphans/collection.json").unwrap()),
        1
    );
}

#[tokio::test]
async fn test_wide_collection_respects_backpressure() {
    const CHILDREN: usize = 10_000;
    const CEILING: usize = 5;

    let memory = MemoryStorage::new();
    let root = Url::parse("memory://wide/items/collection.json").unwrap();
    let hrefs: Vec<String> = (0..CHILDREN).map(|i| format!("./{}.json", i)).collect();
    let links: Vec<(&str, &str)> = hrefs.iter().map(|h| ("item", h.as_str())).collect();
    memory.insert(&root, stac_doc("wide", &links));

    let cache_dir = TempDir::new().expect("Failed to create temp dir");
    let spider = spider(memory_registry(&memory), cache_dir.path(), 8, CEILING);

    let peak = Arc::new(AtomicUsize::new(0));
    {
        let peak = Arc::clone(&peak);
        spider.on(EventKind::Item, move |spider, _| {
            peak.fetch_max(spider.outstanding(), Ordering::SeqCst);
            async { Ok(Flow::Continue) }
        });
    }

    spider.process_url(root).await.expect("Failed to submit seed");
    spider.join().await.expect("Crawl failed");

    assert_eq!(spider.seen_count(), CHILDREN + 1);
    assert_eq!(spider.stats().items, CHILDREN);
    let peak = peak.load(Ordering::SeqCst);
    assert!(
        peak <= CEILING + 2,
        "Expected at most {} outstanding tasks, saw {}",
        CEILING + 2,
        peak
    );
}
