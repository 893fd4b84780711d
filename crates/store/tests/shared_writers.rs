#![forbid(unsafe_code)]

use std::sync::Arc;

use serde_json::json;
use steward_core::{FieldPath, LocalId, ObjectStore, PatchDocument, PatchOp, RemoteObject};
use steward_store::{MemoryStore, StoreOp};

fn labelled(i: usize) -> PatchDocument {
    [PatchOp::add(FieldPath::from_keys(&["metadata", "labels", &format!("writer-{i}")]), json!("on"))]
        .into_iter()
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn key_level_patches_from_many_writers_all_land() {
    let store = Arc::new(MemoryStore::new());
    let id = LocalId::namespaced("apps", "settings");
    let draft = RemoteObject::from_json(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": "settings", "namespace": "apps", "labels": {"seed": "1"}},
        "data": {"k": "v"}
    }));
    store.create(&draft).await.unwrap();

    let writers = (0..8).map(|i| {
        let store = Arc::clone(&store);
        let id = id.clone();
        tokio::spawn(async move { store.patch(&id, &labelled(i)).await })
    });
    for res in futures::future::join_all(writers).await {
        res.unwrap().unwrap();
    }

    let obj = store.get(&id).await.unwrap().unwrap();
    let labels = obj.as_json()["metadata"]["labels"].as_object().unwrap().clone();
    assert_eq!(labels.len(), 9);
    assert_eq!(obj.resource_version(), Some("9"));
    // labels are metadata, so the generation does not move
    assert_eq!(obj.as_json()["metadata"]["generation"], json!(1));
    assert_eq!(store.calls(StoreOp::Patch), 8);
}
