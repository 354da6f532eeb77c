use nbase_common::{Metadata, VectorId};
use nbase_vectorstore::VectorStore;

#[tokio::test]
async fn batch_insert_returns_ids_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = VectorStore::new(dir.path(), false);

    let items = vec![
        (None, vec![1.0, 0.0], None),
        (Some(VectorId::from("named")), vec![0.0, 1.0], None),
        (None, vec![1.0, 1.0], None),
    ];
    let ids = store.add_batch(items).unwrap();

    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0], VectorId::Int(0));
    assert_eq!(ids[1], VectorId::from("named"));
    assert_eq!(ids[2], VectorId::Int(1));
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn compressed_round_trip_across_processes() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = VectorStore::new(dir.path(), true);
        let mut meta = Metadata::new();
        meta.insert("source".to_string(), serde_json::json!("test"));
        store.add(Some(VectorId::Int(42)), vec![1.0, 2.0, 3.0], Some(meta)).unwrap();
        store.save().await.unwrap();
    }

    // Simulate a fresh process reopening the same directory.
    let reopened = VectorStore::new(dir.path(), true);
    reopened.load().unwrap();

    assert_eq!(
        reopened.get(&VectorId::Int(42)).unwrap(),
        Some(vec![1.0, 2.0, 3.0])
    );
    assert!(reopened.get_metadata(&VectorId::Int(42)).unwrap().is_some());
}

#[tokio::test]
async fn delete_then_save_does_not_resurrect_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let store = VectorStore::new(dir.path(), false);

    let id = store.add(None, vec![1.0], None).unwrap();
    store.add(None, vec![2.0], None).unwrap();
    store.save().await.unwrap();

    assert!(store.delete(&id).unwrap());
    store.save().await.unwrap();

    let reloaded = VectorStore::new(dir.path(), false);
    reloaded.load().unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded.get(&id).unwrap(), None);
}
