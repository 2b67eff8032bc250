use std::collections::BTreeMap;
use std::fmt;

use crate::constants::{MAX_NUMBER_OF_VARIABLES_IN_QUERY, MAX_VARIABLE_NAME_SIZE};
use crate::handle::Handle;

/// Mapping from variable labels to the handles bound by a partial match.
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    table: BTreeMap<String, Handle>,
    unique_assignment: bool,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables the per-variable conflict check *across* assignments.
    ///
    /// Conflicts within a single assignment are still rejected by
    /// [`Assignment::assign`].
    pub fn set_unique_assignment(&mut self, unique: bool) {
        self.unique_assignment = unique;
    }

    pub fn unique_assignment(&self) -> bool {
        self.unique_assignment
    }

    /// Binds `label` to `value`.
    ///
    /// Returns false when the label is already bound to a different value,
    /// when the label exceeds the maximum variable name size or when the
    /// table is full. A rejected binding leaves the assignment untouched.
    pub fn assign(&mut self, label: &str, value: Handle) -> bool {
        if label.len() > MAX_VARIABLE_NAME_SIZE {
            return false;
        }
        match self.table.get(label) {
            Some(existing) => *existing == value,
            None => {
                if self.table.len() >= MAX_NUMBER_OF_VARIABLES_IN_QUERY {
                    return false;
                }
                self.table.insert(label.to_owned(), value);
                true
            }
        }
    }

    pub fn get(&self, label: &str) -> Option<Handle> {
        self.table.get(label).copied()
    }

    /// True iff every label shared with `other` is bound to the same value.
    ///
    /// With `unique_assignment` set on either side the cross-assignment
    /// check is skipped entirely.
    pub fn is_compatible(&self, other: &Assignment) -> bool {
        if self.unique_assignment || other.unique_assignment {
            return true;
        }
        for (label, value) in &self.table {
            if let Some(other_value) = other.table.get(label) {
                if other_value != value {
                    return false;
                }
            }
        }
        true
    }

    /// Unions `other` into this assignment. Existing bindings win.
    pub fn add_assignments(&mut self, other: &Assignment) {
        for (label, value) in &other.table {
            self.table.entry(label.clone()).or_insert(*value);
        }
        self.unique_assignment |= other.unique_assignment;
    }

    pub fn variable_count(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Handle)> {
        self.table.iter()
    }

    pub fn labels(&self) -> impl Iterator<Item = &String> {
        self.table.keys()
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }
}

impl PartialEq for Assignment {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table
    }
}

impl Eq for Assignment {}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (label, value)) in self.table.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "({label}: {value})")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hasher::compute_hash;

    fn handle(tag: &str) -> Handle {
        compute_hash(tag)
    }

    #[test]
    fn assign_and_get() {
        let mut assignment = Assignment::new();
        assert!(assignment.assign("v1", handle("a")));
        assert_eq!(assignment.get("v1"), Some(handle("a")));
        assert_eq!(assignment.get("v2"), None);
    }

    #[test]
    fn conflicting_reassignment_is_rejected() {
        let mut assignment = Assignment::new();
        assert!(assignment.assign("v1", handle("a")));
        assert!(assignment.assign("v1", handle("a")));
        assert!(!assignment.assign("v1", handle("b")));
        assert_eq!(assignment.get("v1"), Some(handle("a")));
    }

    #[test]
    fn compatibility_checks_shared_labels_only() {
        let mut a = Assignment::new();
        a.assign("v1", handle("a"));
        a.assign("v2", handle("b"));
        let mut b = Assignment::new();
        b.assign("v2", handle("b"));
        b.assign("v3", handle("c"));
        assert!(a.is_compatible(&b));
        assert!(b.is_compatible(&a));

        let mut c = Assignment::new();
        c.assign("v2", handle("x"));
        assert!(!a.is_compatible(&c));
    }

    #[test]
    fn compatibility_is_reflexive() {
        let mut a = Assignment::new();
        a.assign("v1", handle("a"));
        assert!(a.is_compatible(&a));
    }

    #[test]
    fn unique_assignment_disables_cross_checks() {
        let mut a = Assignment::new();
        a.assign("v1", handle("a"));
        let mut b = Assignment::new();
        b.assign("v1", handle("b"));
        assert!(!a.is_compatible(&b));
        b.set_unique_assignment(true);
        assert!(a.is_compatible(&b));
        assert!(b.is_compatible(&a));
    }

    #[test]
    fn merge_keeps_existing_bindings() {
        let mut a = Assignment::new();
        a.assign("v1", handle("a"));
        let mut b = Assignment::new();
        b.assign("v1", handle("other"));
        b.assign("v2", handle("b"));
        a.add_assignments(&b);
        assert_eq!(a.get("v1"), Some(handle("a")));
        assert_eq!(a.get("v2"), Some(handle("b")));
    }

    #[test]
    fn oversized_label_is_rejected() {
        let mut a = Assignment::new();
        let label = "v".repeat(MAX_VARIABLE_NAME_SIZE + 1);
        assert!(!a.assign(&label, handle("a")));
        assert!(a.is_empty());
    }
}
