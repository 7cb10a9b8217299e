//! The closed enumeration of entity kinds.
//!
//! Kinds are resolved once from the request's string key; the engine never
//! reflects over arbitrary type names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One entity kind in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Bid,
    DonationBid,
    Donation,
    Donor,
    Event,
    Run,
    Runner,
    Prize,
    PrizeClaim,
    Country,
    Milestone,
    Interstitial,
}

impl Kind {
    /// The wire key for this kind, as used in `type=` parameters and record tags.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::DonationBid => "donationbid",
            Self::Donation => "donation",
            Self::Donor => "donor",
            Self::Event => "event",
            Self::Run => "run",
            Self::Runner => "runner",
            Self::Prize => "prize",
            Self::PrizeClaim => "prizeclaim",
            Self::Country => "country",
            Self::Milestone => "milestone",
            Self::Interstitial => "interstitial",
        }
    }

    /// Resolves a wire key to a kind, or `None` if unrecognized.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "bid" => Self::Bid,
            "donationbid" => Self::DonationBid,
            "donation" => Self::Donation,
            "donor" => Self::Donor,
            "event" => Self::Event,
            "run" => Self::Run,
            "runner" => Self::Runner,
            "prize" => Self::Prize,
            "prizeclaim" => Self::PrizeClaim,
            "country" => Self::Country,
            "milestone" => Self::Milestone,
            "interstitial" => Self::Interstitial,
            _ => return None,
        })
    }

    /// All kinds, in registry order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Bid,
            Self::DonationBid,
            Self::Donation,
            Self::Donor,
            Self::Event,
            Self::Run,
            Self::Runner,
            Self::Prize,
            Self::PrizeClaim,
            Self::Country,
            Self::Milestone,
            Self::Interstitial,
        ]
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
