// 🛡️ Guard - Protection predicate for deletions
// A protected record (e.g. already linked to an invoice) may never be deleted

use crate::record::RecordId;
use std::collections::{BTreeSet, HashSet};

/// Caller-supplied veto on deletions
pub trait Guard {
    fn is_protected(&self, id: RecordId) -> bool;
}

/// Nothing is protected
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProtection;

impl Guard for NoProtection {
    fn is_protected(&self, _id: RecordId) -> bool {
        false
    }
}

impl<F> Guard for F
where
    F: Fn(RecordId) -> bool,
{
    fn is_protected(&self, id: RecordId) -> bool {
        self(id)
    }
}

impl Guard for HashSet<RecordId> {
    fn is_protected(&self, id: RecordId) -> bool {
        self.contains(&id)
    }
}

impl Guard for BTreeSet<RecordId> {
    fn is_protected(&self, id: RecordId) -> bool {
        self.contains(&id)
    }
}
