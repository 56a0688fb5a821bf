//! Resolution label vocabulary.
//!
//! The tracker stores labels as free-form strings. Only two of them carry
//! meaning for triage; they are translated to [`ResolutionLabel`] at the
//! adapter edge and every other label is dropped there.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const FIX_PENDING: &str = "fix-pending";
const PENDING_MERGE: &str = "pending-merge";

/// A label that marks a ticket as believed-resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionLabel {
    /// A different failure was seen for the same feature; the original may be fixed.
    FixPending,
    /// An automated fix succeeded and awaits review and merge.
    PendingMerge,
}

impl ResolutionLabel {
    /// Every label triage reads or writes.
    pub const ALL: [ResolutionLabel; 2] = [Self::FixPending, Self::PendingMerge];

    /// The label string as stored in the tracker.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FixPending => FIX_PENDING,
            Self::PendingMerge => PENDING_MERGE,
        }
    }

    /// Translate a tracker label. Returns `None` for labels triage ignores.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL.into_iter().find(|known| known.as_str() == label)
    }

    /// Keep only the labels triage understands.
    pub fn translate_all<I, S>(labels: I) -> BTreeSet<ResolutionLabel>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        labels
            .into_iter()
            .filter_map(|l| Self::from_label(l.as_ref()))
            .collect()
    }
}

impl fmt::Display for ResolutionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| format!("unknown resolution label '{s}'"))
    }
}
