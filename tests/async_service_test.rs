mod common;

use shardlite::{Condition, Error, Filter, Record, Shardlite};

#[tokio::test]
async fn clones_share_one_table() {
    let db = Shardlite::open_in_memory(common::people_table(4)).await.unwrap();
    db.initialize().await.unwrap();

    let mut handles = Vec::new();
    for task in 0..4i64 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            for id in task * 25 + 1..=(task + 1) * 25 {
                db.insert(common::person(id)).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(db.count(Condition::new()).await.unwrap(), 100);

    let (page, total) = db
        .find(Condition::new().order_by("id", false), 95, 10)
        .await
        .unwrap();
    assert_eq!(total, 100);
    assert_eq!(common::ids(&page), [96, 97, 98, 99, 100]);

    db.shutdown().await;
}

#[tokio::test]
async fn concurrent_finds_agree() {
    let db = Shardlite::open_in_memory(common::people_table(4)).await.unwrap();
    db.initialize().await.unwrap();
    let records: Vec<Record> = (1..=15).map(common::person).collect();
    db.batch_insert(records).await.unwrap();

    // every task races the first index build for the same shape
    let mut handles = Vec::new();
    for _ in 0..8 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            db.find(Condition::new().order_by("id", true), 0, 5)
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        let (page, total) = handle.await.unwrap();
        assert_eq!(total, 15);
        assert_eq!(common::ids(&page), [15, 14, 13, 12, 11]);
    }

    db.shutdown().await;
}

#[tokio::test]
async fn full_query_surface_over_the_channel() {
    let db = Shardlite::open_in_memory(common::people_table(4)).await.unwrap();
    db.initialize().await.unwrap();

    let records: Vec<Record> = (1..=10).map(common::person).collect();
    db.batch_insert(records).await.unwrap();
    db.insert(common::person(11)).await.unwrap();

    assert_eq!(db.shards().await.unwrap().len(), 4);
    assert_eq!(db.count(Condition::new()).await.unwrap(), 11);
    assert_eq!(
        db.count(Condition::new().filter(Filter::eq("name", "alice")))
            .await
            .unwrap(),
        3
    );

    let hit = db
        .find_one(Condition::new().filter(Filter::eq("id", 7i64)))
        .await
        .unwrap();
    assert_eq!(hit.unwrap().text("name"), "bob");

    let cond = Condition::new().order_by("id", false);
    let (_, total) = db.find(cond.clone(), 0, 5).await.unwrap();
    assert_eq!(total, 11);

    db.insert(common::person(12)).await.unwrap();
    db.invalidate(cond.clone()).await.unwrap();
    let (_, total) = db.find(cond, 0, 5).await.unwrap();
    assert_eq!(total, 12);

    db.shutdown().await;
}

#[tokio::test]
async fn worker_survives_request_errors() {
    let db = Shardlite::open_in_memory(common::people_table(4)).await.unwrap();
    db.initialize().await.unwrap();

    // a routing fault comes back as an error without killing the worker
    let err = db
        .insert(Record::new().with("name", "keyless"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Strategy { .. }));

    db.insert(common::person(1)).await.unwrap();
    assert_eq!(db.count(Condition::new()).await.unwrap(), 1);

    db.shutdown().await;
}

#[tokio::test]
async fn file_backed_service_persists_across_generations() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("people.db");

    let db = Shardlite::open(&path, common::people_table(4)).await.unwrap();
    db.initialize().await.unwrap();
    let records: Vec<Record> = (1..=8).map(common::person).collect();
    db.batch_insert(records).await.unwrap();
    db.shutdown().await;

    // a new generation sees the registry and the rows, and keeps writing
    let db = Shardlite::open(&path, common::people_table(4)).await.unwrap();
    db.initialize().await.unwrap();
    assert_eq!(db.shards().await.unwrap().len(), 4);
    db.insert(common::person(9)).await.unwrap();

    let (page, total) = db
        .find(Condition::new().order_by("id", false), 0, 20)
        .await
        .unwrap();
    assert_eq!(total, 9);
    assert_eq!(common::ids(&page), (1..=9).collect::<Vec<i64>>());

    db.shutdown().await;
}
