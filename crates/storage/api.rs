use das_common::Handle;
use rustc_hash::FxHashSet;

use crate::atom::{Atom, HandleDecoder};
use crate::error::StoreError;
use crate::schema::LinkSchema;

pub type HandleSet = FxHashSet<Handle>;
pub type HandleList = Vec<Handle>;

/// Storage boundary consumed by the query pipeline.
///
/// The in-memory store is the reference implementation; remote peers plug
/// in behind the same trait.
pub trait AtomStore: HandleDecoder + Send + Sync {
    fn atom_exists(&self, handle: &Handle) -> bool;

    /// Candidate links matching the schema's pattern handle, re-validated
    /// against the stored atoms.
    fn query_for_pattern(&self, schema: &LinkSchema) -> HandleSet;

    /// Ordered targets when the handle resolves to a link, absent for
    /// nodes and unknown handles.
    fn query_for_targets(&self, handle: &Handle) -> Option<HandleList>;

    /// Handles of every link referencing `handle` directly.
    fn query_for_incoming_set(&self, handle: &Handle) -> HandleSet;

    fn add_atom(&self, atom: Atom, throw_if_exists: bool) -> Result<Handle, StoreError>;

    fn delete_atom(&self, handle: &Handle, delete_link_targets: bool)
        -> Result<bool, StoreError>;
}
