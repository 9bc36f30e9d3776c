use serde::{Deserialize, Serialize};

use crate::field::{FieldMap, PostField};
use crate::sync::DiffOutcome;

/// Wire shape of a difference: `[forward|null, backward|null]`.
type DifferencePair = (Option<FieldMap>, Option<FieldMap>);

/// Field-level drift between a remote record and its local post.
///
/// - `forward` holds the values the local post should adopt. For tag-set
///   fields it is the set of tag names to add.
/// - `backward` holds, for tag-set fields, the names to remove. Scalars
///   never appear in it.
/// - `forward == None` marks a post that cannot be patched because one side
///   is missing; `backward` then keeps a snapshot of the side that exists.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DifferencePair", into = "DifferencePair")]
pub struct Difference {
    pub forward: Option<FieldMap>,
    pub backward: Option<FieldMap>,
}

impl Difference {
    /// No drift.
    #[must_use]
    pub fn up_to_date() -> Self {
        Self {
            forward: Some(FieldMap::new()),
            backward: Some(FieldMap::new()),
        }
    }

    /// One side is missing; `snapshot` is the side that exists, if any.
    #[must_use]
    pub fn missing(snapshot: Option<FieldMap>) -> Self {
        Self {
            forward: None,
            backward: snapshot,
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        self.forward.is_none()
    }

    /// True when both sides are present and empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.as_ref().is_some_and(FieldMap::is_empty)
            && self.backward.as_ref().is_none_or(FieldMap::is_empty)
    }

    /// Fields that drifted, in field order.
    pub fn fields(&self) -> impl Iterator<Item = PostField> + '_ {
        self.forward.iter().flat_map(|forward| forward.keys().copied())
    }

    #[must_use]
    pub fn outcome(&self) -> DiffOutcome {
        if self.is_missing() {
            DiffOutcome::Missing
        } else if self.is_empty() {
            DiffOutcome::UpToDate
        } else {
            DiffOutcome::Drift {
                fields: self.fields().count(),
            }
        }
    }
}

impl From<DifferencePair> for Difference {
    fn from((forward, backward): DifferencePair) -> Self {
        Self { forward, backward }
    }
}

impl From<Difference> for DifferencePair {
    fn from(difference: Difference) -> Self {
        (difference.forward, difference.backward)
    }
}
