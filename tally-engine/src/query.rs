//! Query composition and the search path.
//!
//! A search request becomes one bounded store query: filter, order, slice.
//! When the kind declares annotations, page membership is fixed first and
//! aggregates are computed afterwards for exactly that id set — the two
//! passes may observe slightly different snapshots, which is the documented
//! weak-consistency window for reads.

use crate::filter::FilterBuilder;
use crate::params::Params;
use crate::perms::{Capability, Principal};
use crate::privacy::{self, RedactionFlags};
use crate::serialize::{AnnotationValues, Record, Serializer};
use std::collections::{HashMap, HashSet};
use tally_model::{AggFunc, KindDescriptor, Kind, Registry};
use tally_store::EntityStore;
use tally_types::{ApiError, ApiResult, EntityId};
use tracing::debug;

/// Hard limits applied to every search.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default and ceiling for the `limit` parameter.
    pub pagination_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pagination_limit: 500,
        }
    }
}

struct SearchPlan<'a> {
    desc: &'a KindDescriptor,
    offset: usize,
    limit: usize,
    flags: RedactionFlags,
}

/// Parses pagination and privilege flags, failing before any data is read.
fn compose<'a>(
    registry: &'a Registry,
    config: &EngineConfig,
    principal: &Principal,
    params: &mut Params,
) -> ApiResult<SearchPlan<'a>> {
    let kind_key = params.single("type")?;
    let desc = registry.lookup(&kind_key)?;

    let flags = RedactionFlags {
        donor_names: unlock_flag(
            params,
            "donor_names",
            desc.kind,
            Kind::Donor,
            "donor",
            principal,
            Capability::ViewHiddenNames,
        )?,
        all_comments: unlock_flag(
            params,
            "all_comments",
            desc.kind,
            Kind::Donation,
            "donation",
            principal,
            Capability::ViewAllComments,
        )?,
        tech_notes: unlock_flag(
            params,
            "tech_notes",
            desc.kind,
            Kind::Run,
            "run",
            principal,
            Capability::ViewTechNotes,
        )?,
    };

    let offset = params
        .single_or("offset", "0")?
        .parse::<usize>()
        .map_err(|_| ApiError::Malformed("offset must be a non-negative integer".into()))?;
    let ceiling = config.pagination_limit;
    let limit = params
        .single_or("limit", &ceiling.to_string())?
        .parse::<i64>()
        .map_err(|_| ApiError::Malformed("limit must be an integer".into()))?;
    if limit > ceiling as i64 {
        return Err(ApiError::Malformed(format!(
            "limit can not be above {ceiling}"
        )));
    }
    if limit < 1 {
        return Err(ApiError::Malformed("limit must be at least 1".into()));
    }

    Ok(SearchPlan {
        desc,
        offset,
        limit: limit as usize,
        flags,
    })
}

/// A privilege flag needs both kind applicability and a capability; either
/// failure rejects the whole request.
fn unlock_flag(
    params: &mut Params,
    name: &str,
    requested: Kind,
    applicable: Kind,
    applicable_name: &str,
    principal: &Principal,
    capability: Capability,
) -> ApiResult<bool> {
    if !params.flag(name)? {
        return Ok(false);
    }
    if requested != applicable {
        return Err(ApiError::Malformed(format!(
            "\"{name}\" can only be applied to {applicable_name} searches"
        )));
    }
    if !principal.has(capability) {
        return Err(ApiError::denied());
    }
    Ok(true)
}

/// Runs a full search: compose, page, annotate, serialize, redact.
pub(crate) fn run_search(
    registry: &Registry,
    store: &EntityStore,
    filters: &dyn FilterBuilder,
    config: &EngineConfig,
    principal: &Principal,
    params: Vec<(String, String)>,
) -> ApiResult<Vec<Record>> {
    let mut params = Params::new(params);
    let plan = compose(registry, config, principal, &mut params)?;
    let filter_params = params.remaining()?;
    let filter = filters.build(plan.desc, &filter_params, principal)?;

    let page = store.page(
        plan.desc.kind,
        filter.as_deref(),
        &plan.desc.order_by,
        plan.offset,
        plan.limit,
    )?;
    debug!(kind = %plan.desc.kind, rows = page.len(), "search page selected");

    let annotations = if plan.desc.annotations.is_empty() {
        AnnotationValues::new()
    } else {
        let ids: HashSet<EntityId> = page.iter().map(|e| e.id).collect();
        compute_annotations(store, plan.desc, &ids)?
    };

    let mut records = Serializer::new(registry, store).serialize_page(plan.desc, &page, &annotations)?;
    for record in &mut records {
        privacy::redact(plan.desc.kind, &mut record.fields, plan.flags);
    }
    Ok(records)
}

/// Second pass of the annotated query: aggregates over exactly the rows that
/// made the page, regardless of what the first pass's snapshot looked like.
pub(crate) fn compute_annotations(
    store: &EntityStore,
    desc: &KindDescriptor,
    ids: &HashSet<EntityId>,
) -> ApiResult<AnnotationValues> {
    let mut out: AnnotationValues = ids
        .iter()
        .map(|id| (*id, HashMap::new()))
        .collect();
    for annotation in &desc.annotations {
        let agg = &annotation.aggregate;
        let rows = store.referencing(agg.source, agg.fk_field, ids)?;
        let mut grouped: HashMap<EntityId, Vec<f64>> = HashMap::new();
        for row in rows {
            if agg.filter.is_some_and(|keep| !keep(&row)) {
                continue;
            }
            let Some(owner) = row.get_ref(agg.fk_field) else {
                continue;
            };
            let value = match agg.value_field {
                Some(field) => row.get_f64(field).unwrap_or(0.0),
                None => 1.0,
            };
            grouped.entry(owner).or_default().push(value);
        }
        for id in ids {
            let values = grouped.get(id).map(Vec::as_slice).unwrap_or(&[]);
            let computed = match agg.func {
                AggFunc::Sum => values.iter().sum(),
                AggFunc::Count => values.len() as f64,
                AggFunc::Max => values.iter().copied().fold(0.0, f64::max),
                AggFunc::Avg => {
                    if values.is_empty() {
                        0.0
                    } else {
                        values.iter().sum::<f64>() / values.len() as f64
                    }
                }
            };
            if let Some(slot) = out.get_mut(id) {
                slot.insert(annotation.name, computed);
            }
        }
    }
    Ok(out)
}
