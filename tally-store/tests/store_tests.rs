use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashSet;
use tally_model::Kind;
use tally_store::{EntityStore, StoreError};
use tally_types::{ApiError, EntityId};

fn seed_donor(store: &EntityStore, alias: &str) -> EntityId {
    store
        .with_transaction::<_, StoreError>(|txn| {
            let entity = txn.insert(
                Kind::Donor,
                json!({"alias": alias, "visibility": "ALIAS"}),
            )?;
            Ok(entity.id)
        })
        .unwrap()
}

#[test]
fn insert_and_get_round_trip() {
    let store = EntityStore::open_in_memory().unwrap();
    let id = seed_donor(&store, "Foo");
    let entity = store.get(id).unwrap().unwrap();
    assert_eq!(entity.kind, Kind::Donor);
    assert_eq!(entity.get_str("alias"), Some("Foo"));
    assert!(entity.created_at > 0);
}

#[test]
fn get_missing_is_none() {
    let store = EntityStore::open_in_memory().unwrap();
    assert!(store.get(EntityId::from_raw(999)).unwrap().is_none());
}

#[test]
fn page_orders_and_slices() {
    let store = EntityStore::open_in_memory().unwrap();
    for alias in ["carol", "alice", "bob", "dave"] {
        seed_donor(&store, alias);
    }
    let page = store.page(Kind::Donor, None, &["alias"], 1, 2).unwrap();
    let aliases: Vec<_> = page.iter().map(|e| e.get_str("alias").unwrap()).collect();
    assert_eq!(aliases, vec!["bob", "carol"]);
}

#[test]
fn page_offset_past_end_is_empty() {
    let store = EntityStore::open_in_memory().unwrap();
    seed_donor(&store, "only");
    let page = store.page(Kind::Donor, None, &["alias"], 10, 5).unwrap();
    assert!(page.is_empty());
}

#[test]
fn page_applies_filter_before_slicing() {
    let store = EntityStore::open_in_memory().unwrap();
    for alias in ["alice", "bob", "bravo", "carol"] {
        seed_donor(&store, alias);
    }
    let filter = |e: &tally_model::Entity| e.get_str("alias").unwrap().starts_with('b');
    let page = store
        .page(Kind::Donor, Some(&filter), &["alias"], 0, 10)
        .unwrap();
    let aliases: Vec<_> = page.iter().map(|e| e.get_str("alias").unwrap()).collect();
    assert_eq!(aliases, vec!["bob", "bravo"]);
}

#[test]
fn page_ties_break_by_primary_key() {
    let store = EntityStore::open_in_memory().unwrap();
    let a = seed_donor(&store, "same");
    let b = seed_donor(&store, "same");
    let page = store.page(Kind::Donor, None, &["alias"], 0, 10).unwrap();
    assert_eq!(page[0].id, a.min(b));
    assert_eq!(page[1].id, a.max(b));
}

#[test]
fn descending_order_prefix() {
    let store = EntityStore::open_in_memory().unwrap();
    for alias in ["alice", "bob", "carol"] {
        seed_donor(&store, alias);
    }
    let page = store.page(Kind::Donor, None, &["-alias"], 0, 3).unwrap();
    let aliases: Vec<_> = page.iter().map(|e| e.get_str("alias").unwrap()).collect();
    assert_eq!(aliases, vec!["carol", "bob", "alice"]);
}

#[test]
fn referencing_matches_fk_values() {
    let store = EntityStore::open_in_memory().unwrap();
    let (event_a, event_b) = store
        .with_transaction::<_, StoreError>(|txn| {
            let a = txn.insert(Kind::Event, json!({"short": "a", "name": "A"}))?;
            let b = txn.insert(Kind::Event, json!({"short": "b", "name": "B"}))?;
            for (event, amount) in [(a.id, 5.0), (a.id, 10.0), (b.id, 25.0)] {
                txn.insert(
                    Kind::Donation,
                    json!({"event": event.as_i64(), "amount": amount}),
                )?;
            }
            Ok((a.id, b.id))
        })
        .unwrap();

    let ids: HashSet<_> = [event_a].into_iter().collect();
    let rows = store.referencing(Kind::Donation, "event", &ids).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|d| d.get_ref("event") == Some(event_a)));

    let both: HashSet<_> = [event_a, event_b].into_iter().collect();
    assert_eq!(store.referencing(Kind::Donation, "event", &both).unwrap().len(), 3);
}

#[test]
fn natural_key_lookup() {
    let store = EntityStore::open_in_memory().unwrap();
    store
        .with_transaction::<_, StoreError>(|txn| {
            txn.insert(Kind::Country, json!({"name": "Canada", "alpha2": "CA"}))?;
            Ok(())
        })
        .unwrap();
    let hit = store
        .find_by_natural_key(Kind::Country, &[("alpha2", &json!("CA"))])
        .unwrap();
    assert_eq!(hit.unwrap().get_str("name"), Some("Canada"));
    let miss = store
        .find_by_natural_key(Kind::Country, &[("alpha2", &json!("ZZ"))])
        .unwrap();
    assert!(miss.is_none());
}

#[test]
fn failed_transaction_rolls_back_every_write() {
    let store = EntityStore::open_in_memory().unwrap();
    let result: Result<(), ApiError> = store.with_transaction(|txn| {
        txn.insert(Kind::Donor, json!({"alias": "ghost", "visibility": "ALIAS"}))?;
        txn.insert(Kind::Donor, json!({"alias": "ghost2", "visibility": "ALIAS"}))?;
        Err(ApiError::ValidationFailed("abort".into()))
    });
    assert!(result.is_err());
    assert!(store.list(Kind::Donor).unwrap().is_empty());
}

#[test]
fn update_and_delete() {
    let store = EntityStore::open_in_memory().unwrap();
    let id = seed_donor(&store, "Foo");
    store
        .with_transaction::<_, StoreError>(|txn| {
            let mut entity = txn.get(id)?.unwrap();
            entity.set_field("alias", json!("Bar"));
            txn.update(&entity)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(store.get(id).unwrap().unwrap().get_str("alias"), Some("Bar"));

    let deleted = store
        .with_transaction::<_, StoreError>(|txn| txn.delete(id))
        .unwrap();
    assert!(deleted);
    assert!(store.get(id).unwrap().is_none());
}

#[test]
fn persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.db");
    {
        let store = EntityStore::open(&path).unwrap();
        seed_donor(&store, "durable");
    }
    let store = EntityStore::open(&path).unwrap();
    let donors = store.list(Kind::Donor).unwrap();
    assert_eq!(donors.len(), 1);
    assert_eq!(donors[0].get_str("alias"), Some("durable"));
}
