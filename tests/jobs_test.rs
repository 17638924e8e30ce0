//! End-to-end tests for the sizer and reaper jobs.

mod common;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use cairn::cost::BYTES_PER_GIB;
use cairn::{
    Backoff, ObjectStore, Reaper, ResourceStore, Sizer, TieredCostAnalyzer,
};
use common::{create_directory, create_file, resource_store, seed_tree, Backend, TestObjects};

fn backoff() -> Backoff {
    Backoff::new(3, Duration::from_millis(1))
}

fn sizer(resources: &ResourceStore, objects: &TestObjects) -> Sizer {
    Sizer::new(
        resources.clone(),
        objects.blobs(2),
        Arc::new(TieredCostAnalyzer::default()),
        backoff(),
    )
}

async fn size_of(resources: &ResourceStore, path: &str) -> i64 {
    resources
        .get_resource_at_path(path)
        .await
        .unwrap()
        .unwrap()
        .size()
}

#[tokio::test]
async fn test_sizer_aggregates_each_home() {
    for backend in Backend::ALL {
        let resources = resource_store(backend).await;
        let objects = TestObjects::new();
        seed_tree(&resources).await;

        for (key, len) in [
            ("alice/docs/a.txt", 3),
            ("alice/docs/deep/b.txt", 5),
            ("alice/photo.jpg", 7),
            ("alice2/c.txt", 1),
        ] {
            objects.store.put(key, &vec![0u8; len]).await.unwrap();
        }

        let total = sizer(&resources, &objects).run().await.unwrap();
        assert_eq!(total.resources, 4, "{backend:?}");
        assert_eq!(total.size, 16);

        assert_eq!(size_of(&resources, "/alice/docs/deep").await, 5);
        assert_eq!(size_of(&resources, "/alice/docs").await, 8);
        assert_eq!(size_of(&resources, "/alice").await, 15);
        assert_eq!(size_of(&resources, "/alice2").await, 1);
        assert_eq!(size_of(&resources, "/bob").await, 0);
    }
}

#[tokio::test]
async fn test_sizer_corrects_metadata_from_objects() {
    let resources = resource_store(Backend::Sqlite).await;
    let objects = TestObjects::new();
    create_directory(&resources, "/frank", "frank").await;
    // Metadata claims a gibibyte, the object holds 10 bytes
    create_file(&resources, "/frank/big.iso", "frank", BYTES_PER_GIB).await;
    objects.store.put("frank/big.iso", &[1u8; 10]).await.unwrap();

    sizer(&resources, &objects).run().await.unwrap();

    let file = resources
        .get_resource_at_path("/frank/big.iso")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(file.size(), 10);
    assert!(file.cost() > Decimal::ZERO);
    assert!(file.cost() < Decimal::new(1, 6));
}

#[tokio::test]
async fn test_reaper_removes_dangling_objects() {
    for backend in Backend::ALL {
        let resources = resource_store(backend).await;
        let objects = TestObjects::new();
        seed_tree(&resources).await;

        for key in [
            "alice/docs/a.txt",
            "alice/docs/deleted.txt",
            "alice/photo.jpg",
            "ghost/left-behind.bin",
            "ghost/nested/also.bin",
        ] {
            objects.store.put(key, b"data").await.unwrap();
        }

        let reaper = Reaper::new(resources.clone(), objects.blobs(2), backoff(), Duration::ZERO);
        let report = reaper.run().await.unwrap();

        assert_eq!(report.scanned, 5, "{backend:?}");
        assert_eq!(report.deleted, 3, "{backend:?}");

        let remaining = objects.store.list_page("", None, 100).await.unwrap();
        let keys: Vec<_> = remaining.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["alice/docs/a.txt", "alice/photo.jpg"]);
    }
}

#[tokio::test]
async fn test_metadata_delete_then_reaper_cleans_content() {
    let resources = resource_store(Backend::Sqlite).await;
    let objects = TestObjects::new();
    seed_tree(&resources).await;
    for key in ["alice/docs/a.txt", "alice/docs/deep/b.txt", "alice/photo.jpg"] {
        objects.store.put(key, b"data").await.unwrap();
    }

    // Only the metadata goes; the objects are left for the reaper
    let docs = resources
        .get_resource_at_path("/alice/docs")
        .await
        .unwrap()
        .unwrap();
    resources.delete_resource(&docs).await.unwrap();

    let reaper = Reaper::new(resources.clone(), objects.blobs(100), backoff(), Duration::ZERO);
    let report = reaper.run().await.unwrap();
    assert_eq!(report.deleted, 2);

    let second = reaper.run().await.unwrap();
    assert_eq!(second.scanned, 1);
    assert_eq!(second.deleted, 0);
}
