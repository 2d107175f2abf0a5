//! Composable policy describing which operations a snapshot walk should
//! apply and which properties it should populate from them.
//!
//! A leaf [`Filler`] is the product of a [`PropertySelection`] (which
//! fields to populate) and a [`Constraint`] (which files to populate them
//! for). Fillers compose with [`Filler::sum`] (union of effects — an op
//! is accepted if either side's own scope accepts it) and
//! [`Filler::constrain`] (intersection — narrow an existing filler to a
//! smaller file range).

use vfs_core::FileId;
use vfs_log::{Operation, TagMask};

/// Which scalar/attribute properties a filler populates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropertySelection(u8);

impl PropertySelection {
    /// `parentId`.
    pub const PARENT_ID: Self = Self(1 << 0);
    /// `nameId`.
    pub const NAME_ID: Self = Self(1 << 1);
    /// `length`.
    pub const LENGTH: Self = Self(1 << 2);
    /// `timestamp`.
    pub const TIMESTAMP: Self = Self(1 << 3);
    /// `flags`.
    pub const FLAGS: Self = Self(1 << 4);
    /// `contentId`.
    pub const CONTENT_ID: Self = Self(1 << 5);
    /// The attribute map.
    pub const ATTRIBUTES: Self = Self(1 << 6);
    /// Every property.
    pub const ALL: Self = Self(0b111_1111);
    /// No properties.
    pub const NONE: Self = Self(0);

    /// The union of two selections.
    pub fn union(self, other: Self) -> Self {
        PropertySelection(self.0 | other.0)
    }

    /// Whether `other`'s bits are all present in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The tag mask of log operations that can set any property in this
    /// selection.
    pub fn tag_mask(self) -> TagMask {
        let mut mask = TagMask::default();
        if self.contains(Self::PARENT_ID) {
            mask = mask.union(TagMask::only(&[vfs_log::codec::TAG_SET_PARENT]));
        }
        if self.contains(Self::NAME_ID) {
            mask = mask.union(TagMask::only(&[vfs_log::codec::TAG_SET_NAME]));
        }
        if self.contains(Self::LENGTH) {
            mask = mask.union(TagMask::only(&[vfs_log::codec::TAG_SET_LENGTH]));
        }
        if self.contains(Self::TIMESTAMP) {
            mask = mask.union(TagMask::only(&[vfs_log::codec::TAG_SET_TIMESTAMP]));
        }
        if self.contains(Self::FLAGS) {
            mask = mask.union(TagMask::only(&[vfs_log::codec::TAG_SET_FLAGS]));
        }
        if self.contains(Self::CONTENT_ID) {
            mask = mask.union(TagMask::only(&[vfs_log::codec::TAG_SET_CONTENT_RECORD_ID]));
        }
        if self.contains(Self::ATTRIBUTES) {
            mask = mask.union(TagMask::only(&[vfs_log::codec::TAG_SET_ATTRIBUTE]));
        }
        mask
    }
}

/// Which files a filler applies to.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Every file.
    All,
    /// Files whose id falls in `[lo, hi]` inclusive.
    Range {
        /// Lower bound, inclusive.
        lo: FileId,
        /// Upper bound, inclusive.
        hi: FileId,
    },
    /// Only the super-root record.
    SuperRootOnly,
    /// Either constraint matches.
    Or(Box<Constraint>, Box<Constraint>),
    /// Both constraints must match.
    And(Box<Constraint>, Box<Constraint>),
}

impl Constraint {
    /// Whether an operation's file scope satisfies this constraint.
    /// Operations with no file scope (`EventStart`, `AppendContent`)
    /// never match a file-scoped constraint.
    pub fn matches(&self, file_id: Option<FileId>) -> bool {
        match self {
            Constraint::All => file_id.is_some(),
            Constraint::Range { lo, hi } => matches!(file_id, Some(id) if id >= *lo && id <= *hi),
            Constraint::SuperRootOnly => file_id == Some(vfs_core::SUPER_ROOT),
            Constraint::Or(a, b) => a.matches(file_id) || b.matches(file_id),
            Constraint::And(a, b) => a.matches(file_id) && b.matches(file_id),
        }
    }

    /// The union of two constraints.
    pub fn or(self, other: Constraint) -> Constraint {
        Constraint::Or(Box::new(self), Box::new(other))
    }

    /// The intersection of two constraints.
    pub fn and(self, other: Constraint) -> Constraint {
        Constraint::And(Box::new(self), Box::new(other))
    }
}

/// How values accumulate for a property as a backward walk encounters
/// successive writes. Fixed per property kind (scalar fields are always
/// newest-wins, the attribute map always accumulates by key) — this
/// type exists so a filler can document and assert its own behavior
/// rather than to toggle it at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The first (i.e. newest, since the walk runs backward) value wins;
    /// later (older) writes to the same field are ignored.
    NewestWins,
    /// Every distinct key latches its own newest value independently.
    Accumulate,
}

/// A composable policy: which properties to populate, scoped to which
/// files.
///
/// Represented as a tree rather than a single flattened
/// `(properties, constraint)` pair so that [`Filler::sum`] is an actual
/// disjunction: an operation is in scope if *either* side's own
/// properties-and-constraint pair covers it, not if its tag happens to be
/// in the union of properties while its file happens to satisfy the
/// union of constraints (which would wrongly accept e.g. a `nameId`
/// write whose file only matches the *other* filler's file range).
#[derive(Debug, Clone)]
pub enum Filler {
    /// A single properties/constraint pair.
    Leaf {
        /// Which properties this leaf populates.
        properties: PropertySelection,
        /// Which files this leaf applies to.
        constraint: Constraint,
    },
    /// The union of two fillers, each evaluated on its own scope.
    Or(Box<Filler>, Box<Filler>),
}

impl Filler {
    /// A filler over the given property selection, unconstrained by
    /// file id.
    pub fn for_properties(properties: PropertySelection) -> Self {
        Filler::Leaf {
            properties,
            constraint: Constraint::All,
        }
    }

    /// A filler that does nothing — the identity element for `sum`.
    pub fn none() -> Self {
        Filler::Leaf {
            properties: PropertySelection::NONE,
            constraint: Constraint::All,
        }
    }

    /// Narrow this filler to files also satisfying `constraint`. For a
    /// summed filler, the narrowing distributes over both branches
    /// (`(A ∨ B) ∧ C == (A ∧ C) ∨ (B ∧ C)`), so both original scopes are
    /// narrowed independently rather than merged.
    pub fn constrain(self, constraint: Constraint) -> Self {
        match self {
            Filler::Leaf {
                properties,
                constraint: existing,
            } => Filler::Leaf {
                properties,
                constraint: existing.and(constraint),
            },
            Filler::Or(a, b) => Filler::Or(
                Box::new(a.constrain(constraint.clone())),
                Box::new(b.constrain(constraint)),
            ),
        }
    }

    /// Combine two fillers: an operation is accepted if either filler's
    /// own properties-and-scope would accept it.
    pub fn sum(self, other: Filler) -> Self {
        Filler::Or(Box::new(self), Box::new(other))
    }

    /// The properties this filler populates anywhere in its scope.
    pub fn properties(&self) -> PropertySelection {
        match self {
            Filler::Leaf { properties, .. } => *properties,
            Filler::Or(a, b) => a.properties().union(b.properties()),
        }
    }

    /// Whether `op`'s tag/file scope is covered by this filler,
    /// regardless of its exceptional status. Used to decide whether an
    /// exceptional write should still count as "touched" for
    /// [`crate::snapshot::NotAvailableReason::AllExceptional`] purposes.
    pub fn in_scope(&self, op: &Operation) -> bool {
        match self {
            Filler::Leaf {
                properties,
                constraint,
            } => properties.tag_mask().contains(op.tag()) && constraint.matches(op.file_id()),
            Filler::Or(a, b) => a.in_scope(op) || b.in_scope(op),
        }
    }

    /// Whether `op` is in scope for this filler: its tag sets a selected
    /// property, it is not exceptional, and its file id (if any)
    /// satisfies the constraint.
    pub fn accepts(&self, op: &Operation) -> bool {
        !op.is_exceptional() && self.in_scope(op)
    }

    /// The tag mask this filler's properties correspond to, for driving
    /// a filtered [`vfs_log::LogIterator`] walk.
    pub fn tag_mask(&self) -> TagMask {
        self.properties().tag_mask()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfs_log::codec::OperationStatus;

    #[test]
    fn sum_unions_properties_and_scope() {
        let a = Filler::for_properties(PropertySelection::NAME_ID).constrain(Constraint::Range { lo: 1, hi: 5 });
        let b = Filler::for_properties(PropertySelection::LENGTH).constrain(Constraint::Range { lo: 10, hi: 20 });
        let combined = a.sum(b);
        assert!(combined.properties().contains(PropertySelection::NAME_ID));
        assert!(combined.properties().contains(PropertySelection::LENGTH));

        let op = Operation::SetName {
            file_id: 3,
            name_id: 1,
            status: OperationStatus::Success,
        };
        assert!(combined.accepts(&op));
        let op2 = Operation::SetLength {
            file_id: 15,
            length: 1,
            status: OperationStatus::Success,
        };
        assert!(combined.accepts(&op2));
        let out_of_range = Operation::SetName {
            file_id: 99,
            name_id: 1,
            status: OperationStatus::Success,
        };
        assert!(!combined.accepts(&out_of_range));
    }

    #[test]
    fn sum_does_not_cross_pollinate_properties_and_scope() {
        // `a` covers nameId for files 1-5; `b` covers length for files
        // 10-20. A nameId write to a file only in `b`'s range (or a
        // length write to a file only in `a`'s range) must be rejected —
        // each side's properties only apply within that side's own scope.
        let a = Filler::for_properties(PropertySelection::NAME_ID).constrain(Constraint::Range { lo: 1, hi: 5 });
        let b = Filler::for_properties(PropertySelection::LENGTH).constrain(Constraint::Range { lo: 10, hi: 20 });
        let combined = a.sum(b);

        let name_in_wrong_range = Operation::SetName {
            file_id: 15,
            name_id: 1,
            status: OperationStatus::Success,
        };
        assert!(!combined.accepts(&name_in_wrong_range));

        let length_in_wrong_range = Operation::SetLength {
            file_id: 3,
            length: 1,
            status: OperationStatus::Success,
        };
        assert!(!combined.accepts(&length_in_wrong_range));
    }

    #[test]
    fn exceptional_operations_are_never_accepted() {
        let filler = Filler::for_properties(PropertySelection::ALL);
        let op = Operation::SetFlags {
            file_id: 1,
            flags: 0,
            status: OperationStatus::Exception,
        };
        assert!(!filler.accepts(&op));
    }

    #[test]
    fn constrain_narrows_existing_scope() {
        let filler = Filler::for_properties(PropertySelection::FLAGS)
            .constrain(Constraint::Range { lo: 1, hi: 100 })
            .constrain(Constraint::Range { lo: 50, hi: 60 });
        let op = Operation::SetFlags {
            file_id: 10,
            flags: 0,
            status: OperationStatus::Success,
        };
        assert!(!filler.accepts(&op));
        let op2 = Operation::SetFlags {
            file_id: 55,
            flags: 0,
            status: OperationStatus::Success,
        };
        assert!(filler.accepts(&op2));
    }

    #[test]
    fn unscoped_operations_never_match_all_or_range() {
        assert!(!Constraint::All.matches(None));
        assert!(!Constraint::Range { lo: 0, hi: 10 }.matches(None));
    }
}
