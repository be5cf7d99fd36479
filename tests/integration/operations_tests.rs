//! Operations driven by complete crawls

use crate::common::{default_registry, memory_registry, spider, stac_doc, stac_item};
use serde_json::Value;
use stac_spider::operations::{submit_args, submit_lines, DateIndex, FeatureWriter};
use stac_spider::storage::MemoryStorage;
use stac_spider::url::to_directory_url;
use tempfile::TempDir;
use url::Url;

/// Writes a collection of three items under `root/<name>/`
fn write_collection(root: &std::path::Path, name: &str) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("collection.json"),
        serde_json::json!({
            "type": "Collection",
            "id": name,
            "title": format!("{} imagery", name),
            "description": "Aerial photos",
            "license": "CC-BY-4.0",
            "links": [
                {"rel": "item", "href": "./1.json"},
                {"rel": "item", "href": "./2.json"},
                {"rel": "item", "href": "./3.json"}
            ]
        })
        .to_string(),
    )
    .unwrap();
    std::fs::write(
        dir.join("1.json"),
        stac_item("1", "2024-01-01T00:00:00Z", "2024-01-01T00:00:00Z"),
    )
    .unwrap();
    std::fs::write(
        dir.join("2.json"),
        stac_item("2", "2024-01-01T00:00:00Z", "2024-03-01T00:00:00Z"),
    )
    .unwrap();
    std::fs::write(
        dir.join("3.json"),
        stac_item("3", "2024-02-01T00:00:00Z", "2024-03-01T00:00:00Z"),
    )
    .unwrap();
}

fn read_json(path: &std::path::Path) -> Value {
    let text = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    serde_json::from_str(&text).expect("Output is not valid JSON")
}

#[tokio::test]
async fn test_dates_summary_from_collection_list() {
    let stac = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    write_collection(stac.path(), "auckland");
    write_collection(stac.path(), "otago");

    // One prefix without the document name, one with it
    let list = work.path().join("collections.txt");
    std::fs::write(
        &list,
        format!(
            "{}\n{}\n",
            stac.path().join("auckland").display(),
            stac.path().join("otago/collection.json").display()
        ),
    )
    .unwrap();

    let registry = default_registry();
    let spider = spider(registry.clone(), &work.path().join("cache"), 4, 100);
    let output = work.path().join("output");
    let index = DateIndex::new(to_directory_url(&output).unwrap(), registry, Vec::new());
    index.attach(&spider);

    let submitted = submit_args(&spider, &[list.display().to_string()])
        .await
        .expect("Failed to submit seeds");
    assert_eq!(submitted, 2);
    spider.join().await.expect("Crawl failed");

    let created = read_json(&output.join("created.json"));
    assert_eq!(created["2024-01-01T00:00:00Z"].as_array().unwrap().len(), 4);
    assert_eq!(created["2024-02-01T00:00:00Z"].as_array().unwrap().len(), 2);

    let updated = read_json(&output.join("updated.json"));
    assert_eq!(updated["2024-03-01T00:00:00Z"].as_array().unwrap().len(), 4);
    assert!(updated.get("2024-01-01T00:00:00Z").is_none());

    let summary = read_json(&output.join("summary.json"));
    assert_eq!(summary["updated"]["2024-03-01T00:00:00Z"]["items"], 4);
    let collections = summary["created"]["2024-01-01T00:00:00Z"]["collections"]
        .as_array()
        .unwrap();
    assert_eq!(collections.len(), 2);
    assert!(collections[0].as_str().unwrap().ends_with("/auckland"));
    assert!(collections[1].as_str().unwrap().ends_with("/otago"));
}

#[tokio::test]
async fn test_dates_rejects_unknown_host() {
    let memory = MemoryStorage::new();
    let collection = Url::parse("memory://elsewhere/collection.json").unwrap();
    memory.insert(&collection, stac_doc("elsewhere", &[]));

    let work = TempDir::new().unwrap();
    let registry = memory_registry(&memory);
    let spider = spider(registry.clone(), work.path(), 2, 100);
    let index = DateIndex::new(
        Url::parse("memory://output/").unwrap(),
        registry,
        vec!["nz-imagery".to_string()],
    );
    index.attach(&spider);

    spider.process_url(collection).await.unwrap();
    let err = spider.join().await.expect_err("Crawl should fail");
    assert!(err.to_string().contains("Unknown host: elsewhere"));
}

#[tokio::test]
async fn test_features_export() {
    let stac = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    write_collection(stac.path(), "auckland");

    let spider = spider(default_registry(), &work.path().join("cache"), 4, 100);
    let writer = FeatureWriter::create(work.path().join("output/features.geojson"))
        .await
        .unwrap();
    writer.attach(&spider);

    let seed = format!("{}\n", stac.path().join("auckland/collection.json").display());
    let submitted = submit_lines(&spider, seed.as_bytes()).await.unwrap();
    assert_eq!(submitted, 1);
    spider.join().await.expect("Crawl failed");
    assert_eq!(writer.finish().await.unwrap(), 3);

    let json = read_json(writer.path());
    assert_eq!(json["type"], "FeatureCollection");
    let features = json["features"].as_array().unwrap();
    assert_eq!(features.len(), 3);
    for feature in features {
        let properties = &feature["properties"];
        assert_eq!(properties["title"], "auckland imagery");
        assert_eq!(properties["license"], "CC-BY-4.0");
        assert!(properties.get("datetime").is_none());
        assert!(feature.get("stac_spider:source").is_none());
        assert!(feature.get("stac_spider:fetched_at").is_none());
    }
}

#[tokio::test]
async fn test_usage_error_submits_nothing() {
    let work = TempDir::new().unwrap();
    let spider = spider(default_registry(), work.path(), 2, 100);

    let args = vec![
        "/tmp/stac/catalog.json".to_string(),
        "catalog.yaml".to_string(),
    ];
    assert!(submit_args(&spider, &args).await.is_err());
    assert_eq!(spider.seen_count(), 0);
}
