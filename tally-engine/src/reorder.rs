//! Two-level resequencing for interstitials.
//!
//! Every interstitial occupies a (slot, rank) position: ranks within a slot
//! are dense, starting at 1, with no gaps or duplicates. Moves go through
//! [`move_item`], which rewrites whole slots rather than patching individual
//! ranks; the rank-0 sentinel parks the moved item so no intermediate write
//! can collide with a sibling.

use crate::params::Params;
use crate::perms::{Capability, Principal};
use crate::serialize::{Record, Serializer};
use serde_json::Value;
use tally_model::{Entity, Kind, Registry};
use tally_store::{EntityStore, StoreTxn};
use tally_types::{ApiError, ApiResult, EntityId};
use tracing::info;

pub(crate) fn reorder(
    registry: &Registry,
    store: &EntityStore,
    principal: &Principal,
    params: Vec<(String, String)>,
) -> ApiResult<Vec<Record>> {
    let mut params = Params::new(params);
    let id: EntityId = params
        .single("id")?
        .parse()
        .map_err(|_| ApiError::Malformed("id must be an integer primary key".into()))?;
    let slot: i64 = params
        .single("order")?
        .parse()
        .map_err(|_| ApiError::Malformed("order must be an integer".into()))?;
    let rank: i64 = params
        .single("suborder")?
        .parse()
        .map_err(|_| ApiError::Malformed("suborder must be an integer".into()))?;
    params.remaining()?;

    if !principal.has(Capability::Change(Kind::Interstitial)) {
        return Err(ApiError::denied());
    }

    let touched = store.with_transaction::<_, ApiError>(|txn| {
        let item = txn
            .get(id)?
            .filter(|e| e.kind == Kind::Interstitial)
            .ok_or_else(|| {
                ApiError::NotFound(format!("interstitial with pk {id} does not exist"))
            })?;
        ensure_event_unlocked(txn, &item)?;
        move_item(txn, item, slot, rank)
    })?;

    let desc = registry.get(Kind::Interstitial)?;
    let serializer = Serializer::new(registry, store);
    touched
        .iter()
        .map(|entity| serializer.serialize_one(desc, entity))
        .collect()
}

pub(crate) fn ensure_event_unlocked(txn: &StoreTxn<'_>, item: &Entity) -> ApiResult<()> {
    let Some(event_id) = item.get_ref("event") else {
        return Ok(());
    };
    if let Some(event) = txn.get(event_id)? {
        if event.field("locked").and_then(Value::as_bool) == Some(true) {
            return Err(ApiError::PermissionDenied(
                "that event is locked and cannot be reordered".into(),
            ));
        }
    }
    Ok(())
}

/// Moves `item` to (`new_slot`, `new_rank`) and renumbers every slot it
/// touches back to dense 1..N. A `new_rank` of -1 appends to the destination
/// slot; ranks past the end clamp to an append. Returns the touched entities
/// in final rank order, destination slot first.
pub(crate) fn move_item(
    txn: &StoreTxn<'_>,
    mut item: Entity,
    new_slot: i64,
    new_rank: i64,
) -> ApiResult<Vec<Entity>> {
    if new_rank < 1 && new_rank != -1 {
        return Err(ApiError::Malformed(
            "suborder must be a positive rank or -1 to append".into(),
        ));
    }
    let old_slot = item.get_i64("order").ok_or_else(|| {
        ApiError::ValidationFailed("interstitial is missing its order slot".into())
    })?;
    let old_rank = item.get_i64("suborder").unwrap_or(0);

    let mut dest = slot_siblings(txn, new_slot, item.id)?;
    let new_rank = if new_rank == -1 {
        dest.len() as i64 + 1
    } else {
        new_rank
    };
    if new_slot == old_slot && new_rank == old_rank {
        return Ok(vec![item]);
    }

    // Moving down within one slot: siblings holding (old, new] close the gap
    // upward, so the one sitting exactly at the target rank stays ahead of
    // the item. Every other case displaces the occupant after the item. An
    // item parked at the rank-0 sentinel holds no real position yet.
    let moving_down = new_slot == old_slot && old_rank >= 1 && new_rank > old_rank;
    let split = dest
        .iter()
        .position(|e| {
            let rank = e.get_i64("suborder").unwrap_or(0);
            if moving_down { rank > new_rank } else { rank >= new_rank }
        })
        .unwrap_or(dest.len());
    let mut after = dest.split_off(split);
    let mut before = dest;

    item.set_field("order", Value::from(new_slot));
    item.set_field("suborder", Value::from(0));
    txn.update(&item)?;

    for (i, sibling) in before.iter_mut().enumerate() {
        assign_rank(txn, sibling, i as i64 + 1)?;
    }
    let final_rank = before.len() as i64 + 1;
    // Ranks above the item shift in descending order so no two siblings ever
    // hold the same rank mid-write.
    for (i, sibling) in after.iter_mut().enumerate().rev() {
        assign_rank(txn, sibling, final_rank + 1 + i as i64)?;
    }
    item.set_field("suborder", Value::from(final_rank));
    txn.update(&item)?;

    let mut touched = before;
    touched.push(item.clone());
    touched.append(&mut after);

    if new_slot != old_slot {
        let mut source = slot_siblings(txn, old_slot, item.id)?;
        for (i, sibling) in source.iter_mut().enumerate() {
            assign_rank(txn, sibling, i as i64 + 1)?;
        }
        touched.append(&mut source);
    }

    info!(id = %item.id, slot = new_slot, rank = final_rank, "resequenced interstitial");
    Ok(touched)
}

/// The members of a slot other than `exclude`, in current rank order.
fn slot_siblings(txn: &StoreTxn<'_>, slot: i64, exclude: EntityId) -> ApiResult<Vec<Entity>> {
    let mut siblings: Vec<Entity> = txn
        .list(Kind::Interstitial)?
        .into_iter()
        .filter(|e| e.get_i64("order") == Some(slot) && e.id != exclude)
        .collect();
    siblings.sort_by_key(|e| (e.get_i64("suborder").unwrap_or(0), e.id));
    Ok(siblings)
}

fn assign_rank(txn: &StoreTxn<'_>, sibling: &mut Entity, rank: i64) -> ApiResult<()> {
    if sibling.get_i64("suborder") != Some(rank) {
        sibling.set_field("suborder", Value::from(rank));
        txn.update(sibling)?;
    }
    Ok(())
}
