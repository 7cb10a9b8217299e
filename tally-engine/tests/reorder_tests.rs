//! Resequencing behavior: dense ranks, sentinel append, displacement rules,
//! and the density invariant under arbitrary move sequences.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{Value, json};
use tally_engine::{Capability, Engine, Principal};
use tally_model::{Kind, Registry};
use tally_store::EntityStore;
use tally_types::{ApiError, EntityId};

fn engine() -> Engine {
    Engine::new(
        Registry::tracker(),
        EntityStore::open_in_memory().unwrap(),
    )
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn staff() -> Principal {
    Principal::named("staff", [Capability::Change(Kind::Interstitial)])
}

fn seed(engine: &Engine, kind: Kind, data: Value) -> EntityId {
    engine
        .store()
        .with_transaction::<_, ApiError>(|txn| Ok(txn.insert(kind, data)?.id))
        .unwrap()
}

/// Seeds `count` interstitials into `slot` at ranks 1..=count; returns ids in
/// rank order.
fn seed_slot(engine: &Engine, event: EntityId, slot: i64, count: i64) -> Vec<EntityId> {
    (1..=count)
        .map(|rank| {
            seed(
                engine,
                Kind::Interstitial,
                json!({"event": event.as_i64(), "order": slot, "suborder": rank, "length": 60}),
            )
        })
        .collect()
}

/// Current (slot, rank) layout keyed by id, straight from the store.
fn layout(engine: &Engine, ids: &[EntityId]) -> Vec<(i64, i64)> {
    ids.iter()
        .map(|id| {
            let e = engine.store().get(*id).unwrap().unwrap();
            (e.get_i64("order").unwrap(), e.get_i64("suborder").unwrap())
        })
        .collect()
}

fn reorder(engine: &Engine, id: EntityId, slot: i64, rank: i64) -> Result<Vec<(EntityId, i64)>, ApiError> {
    let records = engine.reorder(
        &staff(),
        pairs(&[
            ("id", &id.to_string()),
            ("order", &slot.to_string()),
            ("suborder", &rank.to_string()),
        ]),
    )?;
    Ok(records
        .iter()
        .map(|r| (r.pk, r.fields["suborder"].as_i64().unwrap()))
        .collect())
}

#[test]
fn append_moves_item_to_end_of_slot() {
    let engine = engine();
    let event = seed(&engine, Kind::Event, json!({"short": "agdq"}));
    let ids = seed_slot(&engine, event, 10, 4);

    let touched = reorder(&engine, ids[1], 10, -1).unwrap();
    assert_eq!(
        touched,
        vec![(ids[0], 1), (ids[2], 2), (ids[3], 3), (ids[1], 4)]
    );
    assert_eq!(layout(&engine, &ids), vec![(10, 1), (10, 4), (10, 2), (10, 3)]);
}

#[test]
fn moving_up_displaces_the_occupant_downward() {
    let engine = engine();
    let event = seed(&engine, Kind::Event, json!({"short": "agdq"}));
    let ids = seed_slot(&engine, event, 10, 4);

    let touched = reorder(&engine, ids[3], 10, 2).unwrap();
    assert_eq!(
        touched,
        vec![(ids[0], 1), (ids[3], 2), (ids[1], 3), (ids[2], 4)]
    );
}

#[test]
fn moving_down_closes_the_gap_behind() {
    let engine = engine();
    let event = seed(&engine, Kind::Event, json!({"short": "agdq"}));
    let ids = seed_slot(&engine, event, 10, 4);

    // The occupant of the target rank ends up ahead of the moved item.
    let touched = reorder(&engine, ids[0], 10, 3).unwrap();
    assert_eq!(
        touched,
        vec![(ids[1], 1), (ids[2], 2), (ids[0], 3), (ids[3], 4)]
    );
}

#[test]
fn cross_slot_move_renumbers_both_slots() {
    let engine = engine();
    let event = seed(&engine, Kind::Event, json!({"short": "agdq"}));
    let a = seed_slot(&engine, event, 10, 3);
    let b = seed_slot(&engine, event, 20, 2);

    reorder(&engine, a[0], 20, 1).unwrap();
    assert_eq!(layout(&engine, &a), vec![(20, 1), (10, 1), (10, 2)]);
    assert_eq!(layout(&engine, &b), vec![(20, 2), (20, 3)]);
}

#[test]
fn move_to_own_position_is_a_no_op() {
    let engine = engine();
    let event = seed(&engine, Kind::Event, json!({"short": "agdq"}));
    let ids = seed_slot(&engine, event, 10, 3);

    let touched = reorder(&engine, ids[1], 10, 2).unwrap();
    assert_eq!(touched, vec![(ids[1], 2)]);
    assert_eq!(layout(&engine, &ids), vec![(10, 1), (10, 2), (10, 3)]);
}

#[test]
fn overshooting_rank_clamps_to_append() {
    let engine = engine();
    let event = seed(&engine, Kind::Event, json!({"short": "agdq"}));
    let ids = seed_slot(&engine, event, 10, 3);

    reorder(&engine, ids[0], 10, 99).unwrap();
    assert_eq!(layout(&engine, &ids), vec![(10, 3), (10, 1), (10, 2)]);
}

#[test]
fn invalid_ranks_are_rejected() {
    let engine = engine();
    let event = seed(&engine, Kind::Event, json!({"short": "agdq"}));
    let ids = seed_slot(&engine, event, 10, 2);

    for rank in [0, -2, -99] {
        let err = reorder(&engine, ids[0], 10, rank).unwrap_err();
        assert_eq!(err.category(), "malformed_parameters", "rank={rank}");
    }
    assert_eq!(layout(&engine, &ids), vec![(10, 1), (10, 2)]);
}

#[test]
fn reorder_requires_change_capability() {
    let engine = engine();
    let event = seed(&engine, Kind::Event, json!({"short": "agdq"}));
    let ids = seed_slot(&engine, event, 10, 2);

    let err = engine
        .reorder(
            &Principal::anonymous(),
            pairs(&[("id", &ids[0].to_string()), ("order", "10"), ("suborder", "-1")]),
        )
        .unwrap_err();
    assert_eq!(err.category(), "permission_denied");
}

#[test]
fn locked_event_rejects_reorder() {
    let engine = engine();
    let event = seed(&engine, Kind::Event, json!({"short": "agdq", "locked": true}));
    let ids = seed_slot(&engine, event, 10, 2);

    let err = reorder(&engine, ids[0], 10, -1).unwrap_err();
    assert_eq!(err.category(), "permission_denied");
    assert_eq!(layout(&engine, &ids), vec![(10, 1), (10, 2)]);
}

#[test]
fn missing_interstitial_is_not_found() {
    let engine = engine();
    let err = reorder(&engine, EntityId::from_raw(999), 10, -1).unwrap_err();
    assert_eq!(err.category(), "not_found");
}

proptest! {
    /// Any sequence of valid moves leaves every slot dense: ranks are exactly
    /// 1..=count with no gaps or duplicates.
    #[test]
    fn random_moves_keep_slots_dense(
        moves in prop::collection::vec((0usize..6, 0i64..3, prop_oneof![Just(-1i64), 1i64..8]), 1..12)
    ) {
        let engine = engine();
        let event = seed(&engine, Kind::Event, json!({"short": "agdq"}));
        let mut ids = seed_slot(&engine, event, 0, 3);
        ids.extend(seed_slot(&engine, event, 1, 3));

        for (which, slot, rank) in moves {
            reorder(&engine, ids[which], slot, rank).unwrap();

            let mut slots: std::collections::BTreeMap<i64, Vec<i64>> = Default::default();
            for (slot, rank) in layout(&engine, &ids) {
                slots.entry(slot).or_default().push(rank);
            }
            for (slot, mut ranks) in slots {
                ranks.sort_unstable();
                let expected: Vec<i64> = (1..=ranks.len() as i64).collect();
                prop_assert_eq!(&ranks, &expected, "slot {} not dense", slot);
            }
        }
    }
}
