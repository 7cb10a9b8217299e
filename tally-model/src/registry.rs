//! The entity kind registry.
//!
//! Each [`KindDescriptor`] is the single source of truth for which fields may
//! ever be returned for its kind, which relations may ever be followed, and
//! which annotations may ever be computed. The engine treats this allowlist
//! as a security boundary: nothing outside a descriptor reaches the wire.
//!
//! Descriptors are plain data built once at startup via [`Registry::tracker`];
//! the engine never branches on a specific kind.

use crate::{Entity, Kind, Visibility};
use std::collections::BTreeMap;
use tally_types::{ApiError, ApiResult};

/// A single-valued relation whose fields are flattened into the parent
/// record under a `relation__field` prefix. Flattening is one level deep;
/// relations-of-relations are never followed.
#[derive(Debug, Clone)]
pub struct RelatedInclude {
    pub field: &'static str,
    pub target: Kind,
    /// Nested field allowlist for the related record.
    pub fields: Vec<&'static str>,
}

/// A relation-typed field, used by mutation coercion and prefetch emission.
#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    pub field: &'static str,
    pub target: Kind,
    /// Multi-valued relations hold an array of primary keys.
    pub multi: bool,
    /// When false, the serializer never follows this relation.
    pub serialize: bool,
}

/// Aggregate function over related rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Sum,
    Count,
    Max,
    Avg,
}

/// Output coercion for a computed annotation value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coerce {
    Int,
    Float,
}

/// An aggregate expression: fold `value_field` over rows of `source` whose
/// `fk_field` points back at the annotated instance, optionally restricted
/// by a row filter.
#[derive(Clone)]
pub struct Aggregate {
    pub func: AggFunc,
    pub source: Kind,
    pub fk_field: &'static str,
    pub value_field: Option<&'static str>,
    pub filter: Option<fn(&Entity) -> bool>,
}

impl std::fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregate")
            .field("func", &self.func)
            .field("source", &self.source)
            .field("fk_field", &self.fk_field)
            .field("value_field", &self.value_field)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// A computed annotation attached to a kind's records at read time.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub name: &'static str,
    pub aggregate: Aggregate,
    pub coerce: Coerce,
}

/// Immutable description of one entity kind.
#[derive(Debug, Clone)]
pub struct KindDescriptor {
    pub kind: Kind,
    /// Self-field serialization allowlist, in output order.
    pub fields: Vec<&'static str>,
    /// Fields the write-authorization default policy considers editable.
    pub editable: Vec<&'static str>,
    pub related: Vec<RelatedInclude>,
    pub relations: Vec<RelationDescriptor>,
    /// Multi-valued relations emitted as id lists on every record.
    pub prefetch: Vec<&'static str>,
    pub annotations: Vec<Annotation>,
    /// Alternate human-meaningful unique key, tried when pk lookup fails.
    pub natural_key: Vec<&'static str>,
    /// Stable default ordering; a `-` prefix means descending. The store
    /// always breaks ties by primary key.
    pub order_by: Vec<&'static str>,
    pub read_only: bool,
    /// Instances must carry a valid `visibility` value before serialization.
    pub requires_visibility: bool,
    /// Kind-specific display formatter; falls back to `kind#pk`.
    pub display: Option<fn(&Entity) -> String>,
}

impl KindDescriptor {
    fn new(kind: Kind, fields: &[&'static str]) -> Self {
        Self {
            kind,
            fields: fields.to_vec(),
            editable: fields.to_vec(),
            related: Vec::new(),
            relations: Vec::new(),
            prefetch: Vec::new(),
            annotations: Vec::new(),
            natural_key: Vec::new(),
            order_by: Vec::new(),
            read_only: false,
            requires_visibility: false,
            display: None,
        }
    }

    fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Declares a single-valued relation that is flattened into the record.
    fn related(mut self, field: &'static str, target: Kind, fields: &[&'static str]) -> Self {
        self.related.push(RelatedInclude {
            field,
            target,
            fields: fields.to_vec(),
        });
        self.relation(field, target)
    }

    /// Declares a single-valued relation without flattening.
    fn relation(mut self, field: &'static str, target: Kind) -> Self {
        self.relations.push(RelationDescriptor {
            field,
            target,
            multi: false,
            serialize: true,
        });
        self
    }

    /// Declares a multi-valued relation, emitted as a list of primary keys.
    fn multi(mut self, field: &'static str, target: Kind) -> Self {
        self.relations.push(RelationDescriptor {
            field,
            target,
            multi: true,
            serialize: true,
        });
        self.prefetch.push(field);
        self
    }

    fn annotate(mut self, name: &'static str, aggregate: Aggregate, coerce: Coerce) -> Self {
        self.annotations.push(Annotation {
            name,
            aggregate,
            coerce,
        });
        self
    }

    fn natural_key(mut self, fields: &[&'static str]) -> Self {
        self.natural_key = fields.to_vec();
        self
    }

    fn order_by(mut self, fields: &[&'static str]) -> Self {
        self.order_by = fields.to_vec();
        self
    }

    fn requires_visibility(mut self) -> Self {
        self.requires_visibility = true;
        self
    }

    fn display(mut self, f: fn(&Entity) -> String) -> Self {
        self.display = Some(f);
        self
    }

    /// The relation descriptor for a field, if the field is relation-typed.
    #[must_use]
    pub fn relation_for(&self, field: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.field == field)
    }

    /// The annotation with the given name, if declared.
    #[must_use]
    pub fn annotation(&self, name: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.name == name)
    }

    /// Whether `field` is in the self-field allowlist.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains(&field)
    }
}

/// The registry of every searchable/writable kind, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Registry {
    kinds: BTreeMap<Kind, KindDescriptor>,
}

impl Registry {
    /// Builds a registry from explicit descriptors.
    #[must_use]
    pub fn new(descriptors: Vec<KindDescriptor>) -> Self {
        Self {
            kinds: descriptors.into_iter().map(|d| (d.kind, d)).collect(),
        }
    }

    /// The descriptor for a kind, or an unrecognized-kind error.
    pub fn get(&self, kind: Kind) -> ApiResult<&KindDescriptor> {
        self.kinds
            .get(&kind)
            .ok_or_else(|| ApiError::UnrecognizedKind(kind.to_string()))
    }

    /// Resolves a wire key and returns its descriptor.
    pub fn lookup(&self, key: &str) -> ApiResult<&KindDescriptor> {
        let kind = Kind::parse(key).ok_or_else(|| ApiError::UnrecognizedKind(key.to_string()))?;
        self.get(kind)
    }

    /// All registered descriptors, in kind order.
    pub fn descriptors(&self) -> impl Iterator<Item = &KindDescriptor> {
        self.kinds.values()
    }

    /// The full donation-tracker registry.
    #[must_use]
    pub fn tracker() -> Self {
        let run_include = [
            "name",
            "display_name",
            "twitch_name",
            "order",
            "starttime",
            "endtime",
        ];
        Self::new(vec![
            KindDescriptor::new(
                Kind::Bid,
                &[
                    "event",
                    "speedrun",
                    "parent",
                    "name",
                    "state",
                    "description",
                    "shortdescription",
                    "goal",
                    "repeat",
                    "istarget",
                    "allowuseroptions",
                    "option_max_length",
                    "revealedtime",
                    "biddependency",
                    "total",
                    "count",
                    "pinned",
                ],
            )
            .read_only()
            .related("speedrun", Kind::Run, &run_include)
            .related("event", Kind::Event, &["short", "name", "timezone", "datetime"])
            .related(
                "parent",
                Kind::Bid,
                &[
                    "name",
                    "state",
                    "goal",
                    "allowuseroptions",
                    "option_max_length",
                    "total",
                    "count",
                ],
            )
            .relation("biddependency", Kind::Bid)
            .order_by(&["event", "speedrun", "name"])
            .display(name_display),
            KindDescriptor::new(Kind::DonationBid, &["bid", "donation", "amount"])
                .relation("bid", Kind::Bid)
                .relation("donation", Kind::Donation),
            KindDescriptor::new(
                Kind::Donation,
                &[
                    "donor",
                    "event",
                    "domain",
                    "transactionstate",
                    "readstate",
                    "commentstate",
                    "amount",
                    "currency",
                    "timereceived",
                    "comment",
                    "commentlanguage",
                    "pinned",
                ],
            )
            .related("donor", Kind::Donor, &["alias", "alias_num", "visibility"])
            .relation("event", Kind::Event)
            .order_by(&["timereceived"]),
            KindDescriptor::new(
                Kind::Donor,
                &[
                    "alias",
                    "alias_num",
                    "firstname",
                    "lastname",
                    "visibility",
                    "canonical_url",
                ],
            )
            .requires_visibility()
            .order_by(&["alias"])
            .display(donor_display),
            KindDescriptor::new(
                Kind::Event,
                &[
                    "short",
                    "name",
                    "hashtag",
                    "receivername",
                    "targetamount",
                    "minimumdonation",
                    "paypalemail",
                    "paypalcurrency",
                    "datetime",
                    "timezone",
                    "locked",
                    "allow_donations",
                ],
            )
            .multi("allowed_prize_countries", Kind::Country)
            .annotate(
                "amount",
                donation_aggregate(AggFunc::Sum),
                Coerce::Float,
            )
            .annotate(
                "count",
                donation_aggregate(AggFunc::Count),
                Coerce::Int,
            )
            .annotate("max", donation_aggregate(AggFunc::Max), Coerce::Float)
            .annotate("avg", donation_aggregate(AggFunc::Avg), Coerce::Float)
            .natural_key(&["short"])
            .order_by(&["datetime"])
            .display(name_display),
            KindDescriptor::new(
                Kind::Run,
                &[
                    "event",
                    "name",
                    "display_name",
                    "twitch_name",
                    "description",
                    "category",
                    "coop",
                    "onsite",
                    "order",
                    "run_time",
                    "setup_time",
                    "starttime",
                    "endtime",
                    "tech_notes",
                    "layout",
                ],
            )
            .relation("event", Kind::Event)
            .multi("runners", Kind::Runner)
            .multi("hosts", Kind::Runner)
            .multi("commentators", Kind::Runner)
            .order_by(&["order"])
            .display(run_display),
            KindDescriptor::new(
                Kind::Runner,
                &["name", "stream", "twitter", "youtube", "pronouns", "platform"],
            )
            .natural_key(&["name"])
            .order_by(&["name"])
            .display(name_display),
            KindDescriptor::new(
                Kind::Prize,
                &[
                    "name",
                    "category",
                    "image",
                    "description",
                    "shortdescription",
                    "estimatedvalue",
                    "minimumbid",
                    "maximumbid",
                    "sumdonations",
                    "randomdraw",
                    "event",
                    "startrun",
                    "endrun",
                    "starttime",
                    "endtime",
                    "maxwinners",
                    "provider",
                    "creator",
                    "creatoremail",
                    "key_code",
                ],
            )
            .related("startrun", Kind::Run, &run_include)
            .related("endrun", Kind::Run, &run_include)
            .relation("event", Kind::Event)
            .multi("allowed_prize_countries", Kind::Country)
            .annotate(
                "numwinners",
                Aggregate {
                    func: AggFunc::Count,
                    source: Kind::PrizeClaim,
                    fk_field: "prize",
                    value_field: None,
                    filter: Some(claim_counts_as_winner),
                },
                Coerce::Int,
            )
            .order_by(&["name"])
            .display(name_display),
            KindDescriptor::new(Kind::PrizeClaim, &["prize", "winner", "acceptstate"])
                .relation("prize", Kind::Prize)
                .relation("winner", Kind::Donor),
            KindDescriptor::new(Kind::Country, &["name", "alpha2", "alpha3"])
                .natural_key(&["alpha2"])
                .order_by(&["alpha2"])
                .display(name_display),
            KindDescriptor::new(
                Kind::Milestone,
                &["event", "name", "amount", "visible", "description"],
            )
            .relation("event", Kind::Event)
            .order_by(&["amount"])
            .display(name_display),
            KindDescriptor::new(Kind::Interstitial, &["event", "order", "suborder", "length"])
                .relation("event", Kind::Event)
                .order_by(&["order", "suborder"]),
        ])
    }
}

fn donation_aggregate(func: AggFunc) -> Aggregate {
    Aggregate {
        func,
        source: Kind::Donation,
        fk_field: "event",
        value_field: Some("amount"),
        filter: Some(donation_completed),
    }
}

fn donation_completed(e: &Entity) -> bool {
    e.get_str("transactionstate") == Some("COMPLETED")
}

fn claim_counts_as_winner(e: &Entity) -> bool {
    e.get_str("acceptstate") != Some("DECLINED")
}

fn name_display(e: &Entity) -> String {
    e.get_str("name").unwrap_or_default().to_string()
}

fn run_display(e: &Entity) -> String {
    e.get_str("display_name")
        .filter(|s| !s.is_empty())
        .or_else(|| e.get_str("name"))
        .unwrap_or_default()
        .to_string()
}

fn donor_display(e: &Entity) -> String {
    let visibility = e
        .get_str("visibility")
        .and_then(Visibility::parse)
        .unwrap_or(Visibility::Anonymous);
    match visibility {
        Visibility::Anonymous => "(Anonymous)".to_string(),
        Visibility::Alias => match (e.get_str("alias"), e.get_i64("alias_num")) {
            (Some(alias), Some(num)) => format!("{alias}#{num}"),
            (Some(alias), None) => alias.to_string(),
            _ => "(No Name)".to_string(),
        },
        Visibility::FirstName => {
            let first = e.get_str("firstname").unwrap_or_default();
            let last = e.get_str("lastname").unwrap_or_default();
            match last.chars().next() {
                Some(initial) => format!("{first} {initial}..."),
                None => first.to_string(),
            }
        }
        Visibility::Full => {
            let first = e.get_str("firstname").unwrap_or_default();
            let last = e.get_str("lastname").unwrap_or_default();
            format!("{first} {last}").trim().to_string()
        }
    }
}
