//! Principals and capabilities.
//!
//! Authentication is an external collaborator; the engine only ever asks a
//! boolean oracle whether the current principal holds a capability. Field
//! level writability comes from an injected [`WritePolicy`] rather than any
//! per-kind logic baked into the engine.

use std::collections::HashSet;
use std::fmt;
use tally_model::{Entity, Kind, KindDescriptor};

/// A single grantable capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Reveal donor real names on search.
    ViewHiddenNames,
    /// Reveal donation comments regardless of moderation state.
    ViewAllComments,
    /// Reveal run internal notes.
    ViewTechNotes,
    Add(Kind),
    Change(Kind),
    Delete(Kind),
}

impl Capability {
    /// Parses the wire form (`view_hidden_names`, `add_donor`, `change_run`, …).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "view_hidden_names" => return Some(Self::ViewHiddenNames),
            "view_all_comments" => return Some(Self::ViewAllComments),
            "view_tech_notes" => return Some(Self::ViewTechNotes),
            _ => {}
        }
        let (verb, kind) = s.split_once('_')?;
        let kind = Kind::parse(kind)?;
        match verb {
            "add" => Some(Self::Add(kind)),
            "change" => Some(Self::Change(kind)),
            "delete" => Some(Self::Delete(kind)),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ViewHiddenNames => f.write_str("view_hidden_names"),
            Self::ViewAllComments => f.write_str("view_all_comments"),
            Self::ViewTechNotes => f.write_str("view_tech_notes"),
            Self::Add(kind) => write!(f, "add_{kind}"),
            Self::Change(kind) => write!(f, "change_{kind}"),
            Self::Delete(kind) => write!(f, "delete_{kind}"),
        }
    }
}

/// The authenticated caller, as resolved by the transport layer.
#[derive(Debug, Clone)]
pub struct Principal {
    name: String,
    caps: HashSet<Capability>,
    superuser: bool,
    anonymous: bool,
}

impl Principal {
    /// The unauthenticated caller; holds no capabilities.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            name: String::new(),
            caps: HashSet::new(),
            superuser: false,
            anonymous: true,
        }
    }

    /// A named principal with an explicit capability set.
    #[must_use]
    pub fn named(name: impl Into<String>, caps: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            name: name.into(),
            caps: caps.into_iter().collect(),
            superuser: false,
            anonymous: false,
        }
    }

    /// A principal that holds every capability.
    #[must_use]
    pub fn superuser(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            caps: HashSet::new(),
            superuser: true,
            anonymous: false,
        }
    }

    #[must_use]
    pub fn has(&self, cap: Capability) -> bool {
        self.superuser || self.caps.contains(&cap)
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    #[must_use]
    pub fn is_superuser(&self) -> bool {
        self.superuser
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sorted wire forms of the held capabilities.
    #[must_use]
    pub fn permissions(&self) -> Vec<String> {
        let mut perms: Vec<String> = self.caps.iter().map(ToString::to_string).collect();
        perms.sort();
        perms
    }
}

/// The write-authorization collaborator: which fields a principal may set on
/// a kind, and whether it may touch a specific instance at all.
pub trait WritePolicy {
    /// Fields the principal may set. Anything submitted outside this set is a
    /// hard permission error.
    fn writable_fields(&self, principal: &Principal, desc: &KindDescriptor) -> Vec<&'static str>;

    fn can_add(&self, principal: &Principal, desc: &KindDescriptor) -> bool {
        principal.has(Capability::Add(desc.kind))
    }

    /// Change permission is checked per instance, not just per kind.
    fn can_change(&self, principal: &Principal, desc: &KindDescriptor, _existing: &Entity) -> bool {
        principal.has(Capability::Change(desc.kind))
    }

    /// Delete permission is checked per instance, not just per kind.
    fn can_delete(&self, principal: &Principal, desc: &KindDescriptor, _existing: &Entity) -> bool {
        principal.has(Capability::Delete(desc.kind))
    }
}

/// Default policy: the registry's editable set for anyone holding the kind's
/// write capability; nothing for read-only kinds.
pub struct RegistryWritePolicy;

impl WritePolicy for RegistryWritePolicy {
    fn writable_fields(&self, principal: &Principal, desc: &KindDescriptor) -> Vec<&'static str> {
        if desc.read_only {
            return Vec::new();
        }
        if principal.has(Capability::Add(desc.kind)) || principal.has(Capability::Change(desc.kind))
        {
            desc.editable.clone()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_wire_round_trip() {
        for cap in [
            Capability::ViewHiddenNames,
            Capability::Add(Kind::Donor),
            Capability::Change(Kind::Run),
            Capability::Delete(Kind::Interstitial),
        ] {
            assert_eq!(Capability::parse(&cap.to_string()), Some(cap));
        }
        assert_eq!(Capability::parse("add_gizmo"), None);
        assert_eq!(Capability::parse("frobnicate"), None);
    }

    #[test]
    fn superuser_holds_everything() {
        let root = Principal::superuser("root");
        assert!(root.has(Capability::Delete(Kind::Event)));
        assert!(root.permissions().is_empty());
    }

    #[test]
    fn anonymous_holds_nothing() {
        let anon = Principal::anonymous();
        assert!(anon.is_anonymous());
        assert!(!anon.has(Capability::ViewHiddenNames));
    }
}
