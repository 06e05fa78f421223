use std::time::Duration;

use crate::batch::WriteBatch;
use crate::error::StateError;
use crate::key::{KeyKind, StateKey};
use crate::store::StateStore;

fn test_key(kind: KeyKind, id: &str) -> StateKey {
    StateKey::new(kind, format!("conformance/{id}"))
}

/// Run the full state store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if any store operation fails.
pub async fn run_store_conformance_tests(store: &dyn StateStore) -> Result<(), StateError> {
    test_get_missing(store).await?;
    test_set_and_get(store).await?;
    test_get_many_preserves_order(store).await?;
    test_check_and_set_new(store).await?;
    test_check_and_set_existing(store).await?;
    test_delete(store).await?;
    test_increment(store).await?;
    test_ttl_set(store).await?;
    test_set_membership(store).await?;
    test_execute_batch(store).await?;
    Ok(())
}

async fn test_get_missing(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Settings, "missing");
    let val = store.get(&key).await?;
    assert!(val.is_none(), "get on missing key should return None");
    Ok(())
}

async fn test_set_and_get(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Settings, "set-get");
    store.set(&key, "hello", None).await?;
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("hello"));

    store.set(&key, "again", None).await?;
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("again"), "set should overwrite");
    Ok(())
}

async fn test_get_many_preserves_order(store: &dyn StateStore) -> Result<(), StateError> {
    let a = test_key(KeyKind::Service, "many-a");
    let b = test_key(KeyKind::Service, "many-b");
    let missing = test_key(KeyKind::Service, "many-missing");
    store.set(&a, "A", None).await?;
    store.set(&b, "B", None).await?;

    let values = store
        .get_many(&[b.clone(), missing.clone(), a.clone()])
        .await?;
    assert_eq!(
        values,
        vec![Some("B".to_owned()), None, Some("A".to_owned())],
        "get_many should return values in key order"
    );

    let none = store.get_many(&[]).await?;
    assert!(none.is_empty(), "get_many of no keys should be empty");
    Ok(())
}

async fn test_check_and_set_new(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::User, "cas-new");
    let created = store.check_and_set(&key, "v1", None).await?;
    assert!(created, "check_and_set on new key should return true");
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("v1"));
    Ok(())
}

async fn test_check_and_set_existing(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::User, "cas-existing");
    store.set(&key, "v1", None).await?;
    let created = store.check_and_set(&key, "v2", None).await?;
    assert!(
        !created,
        "check_and_set on existing key should return false"
    );
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("v1"), "original value should remain");
    Ok(())
}

async fn test_delete(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Settings, "to-delete");
    store.set(&key, "bye", None).await?;
    let existed = store.delete(&key).await?;
    assert!(existed, "delete should return true for existing key");
    let val = store.get(&key).await?;
    assert!(val.is_none(), "get after delete should return None");

    let existed = store.delete(&key).await?;
    assert!(!existed, "delete on missing key should return false");
    Ok(())
}

async fn test_increment(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Usage, "counter-1");
    let val = store.increment(&key, 1, None).await?;
    assert_eq!(val, 1, "first increment from zero should yield 1");

    let val = store.increment(&key, 5, None).await?;
    assert_eq!(val, 6, "second increment should accumulate");

    let val = store.increment(&key, -2, None).await?;
    assert_eq!(val, 4, "negative delta should decrement");

    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("4"), "counters read back as strings");
    Ok(())
}

async fn test_ttl_set(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Cache, "ttl-test");
    store
        .set(&key, "ephemeral", Some(Duration::from_secs(3600)))
        .await?;
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("ephemeral"));
    Ok(())
}

async fn test_set_membership(store: &dyn StateStore) -> Result<(), StateError> {
    let set = test_key(KeyKind::Index, "members");
    assert!(
        !store.set_contains(&set, "a").await?,
        "missing set has no members"
    );

    store
        .execute(WriteBatch::new().set_add(set.clone(), "a").set_add(set.clone(), "b"))
        .await?;
    assert!(store.set_contains(&set, "a").await?);
    assert!(store.set_contains(&set, "b").await?);

    store
        .execute(WriteBatch::new().set_remove(set.clone(), "a"))
        .await?;
    assert!(!store.set_contains(&set, "a").await?, "removed member");
    assert!(store.set_contains(&set, "b").await?, "other member stays");
    Ok(())
}

async fn test_execute_batch(store: &dyn StateStore) -> Result<(), StateError> {
    let doc = test_key(KeyKind::Application, "batch-doc");
    let version = test_key(KeyKind::Application, "batch-doc/version");
    let stale = test_key(KeyKind::Application, "batch-stale");
    store.set(&stale, "old", None).await?;

    store
        .execute(
            WriteBatch::new()
                .set(doc.clone(), "{}", Some(Duration::from_secs(60)))
                .increment(version.clone(), 1)
                .increment(version.clone(), 1)
                .delete(stale.clone()),
        )
        .await?;

    let values = store.get_many(&[doc, version, stale]).await?;
    assert_eq!(values[0].as_deref(), Some("{}"));
    assert_eq!(values[1].as_deref(), Some("2"), "increments apply in order");
    assert!(values[2].is_none(), "batched delete removes the key");

    store.execute(WriteBatch::new()).await?;
    Ok(())
}
