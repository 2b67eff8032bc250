//! In-memory atom store.
//!
//! Atom storage lives in a [`HandleTrie`] behind `atoms`; the pattern and
//! incoming-set indexes live behind `indexes`. Writes that touch both
//! (every link insert and delete) take the locks in the order `atoms`
//! then `indexes`, so a partially indexed link is never observable.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use das_common::constants::WILDCARD_STRING;
use das_common::{hasher, Assignment, Handle};
use das_trie::{HandleTrie, TrieValue};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::api::{AtomStore, HandleList, HandleSet};
use crate::atom::{Atom, HandleDecoder, Link, Node};
use crate::error::StoreError;
use crate::schema::LinkSchema;

/// Trie value wrapping a stored atom. On duplicate insertion the
/// pre-existing atom stands.
#[derive(Clone)]
struct AtomValue(Arc<Atom>);

impl TrieValue for AtomValue {
    fn merge(&mut self, _other: Self) {}
}

#[derive(Default)]
struct IndexTables {
    pattern_index: FxHashMap<Handle, HandleSet>,
    incoming_sets: FxHashMap<Handle, HandleSet>,
}

/// Pattern-schema priority map: higher priority wins; each entry is a
/// token matrix mixing `_` (current target), `*` (wildcard) and variable
/// labels bound by the schema match.
#[derive(Default)]
struct PatternSchemas {
    map: BTreeMap<i32, (Vec<String>, Vec<Vec<String>>)>,
    next_priority: i32,
}

/// Resolves handles directly against an already-locked atom trie, so
/// operations holding the store mutexes can still run schema matches.
struct TrieDecoder<'a>(&'a HandleTrie<AtomValue>);

impl HandleDecoder for TrieDecoder<'_> {
    fn get_atom(&self, handle: &Handle) -> Option<Arc<Atom>> {
        self.0
            .lookup(handle.as_str())
            .ok()
            .flatten()
            .map(|value| value.0)
    }
}

pub struct InMemoryStore {
    context: String,
    atoms: Mutex<HandleTrie<AtomValue>>,
    indexes: Mutex<IndexTables>,
    pattern_schemas: Mutex<PatternSchemas>,
}

impl InMemoryStore {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            atoms: Mutex::new(HandleTrie::new()),
            indexes: Mutex::new(IndexTables::default()),
            pattern_schemas: Mutex::new(PatternSchemas::default()),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    // ---------------------------------------------------------------------
    // Insertion

    pub fn add_node(&self, node: Node, throw_if_exists: bool) -> Result<Handle, StoreError> {
        let handle = node.handle();
        debug!(context = %self.context, %handle, "adding node");
        let atoms = lock(&self.atoms);
        if atoms.lookup(handle.as_str())?.is_some() {
            if throw_if_exists {
                return Err(StoreError::AlreadyExists(handle));
            }
            return Ok(handle);
        }
        atoms.insert(handle.as_str(), AtomValue(Arc::new(Atom::Node(node))))?;
        Ok(handle)
    }

    pub fn add_link(&self, link: Link, throw_if_exists: bool) -> Result<Handle, StoreError> {
        let handles = self.add_links(vec![link], throw_if_exists)?;
        handles
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::InvalidInput("empty link batch".to_owned()))
    }

    pub fn add_nodes(
        &self,
        nodes: Vec<Node>,
        throw_if_exists: bool,
    ) -> Result<Vec<Handle>, StoreError> {
        nodes
            .into_iter()
            .map(|node| self.add_node(node, throw_if_exists))
            .collect()
    }

    /// Inserts a batch of links, updating the incoming-set and pattern
    /// indexes atomically with respect to concurrent readers.
    pub fn add_links(
        &self,
        links: Vec<Link>,
        throw_if_exists: bool,
    ) -> Result<Vec<Handle>, StoreError> {
        let atoms = lock(&self.atoms);
        let mut indexes = lock(&self.indexes);
        if throw_if_exists {
            for link in &links {
                if atoms.lookup(link.handle().as_str())?.is_some() {
                    return Err(StoreError::AlreadyExists(link.handle()));
                }
            }
        }
        let mut handles = Vec::with_capacity(links.len());
        for link in links {
            let handle = link.handle();
            debug!(context = %self.context, %handle, "adding link");
            handles.push(handle);
            if atoms.lookup(handle.as_str())?.is_some() {
                continue;
            }
            atoms.insert(
                handle.as_str(),
                AtomValue(Arc::new(Atom::Link(link.clone()))),
            )?;
            for target in link.targets() {
                indexes
                    .incoming_sets
                    .entry(*target)
                    .or_default()
                    .insert(handle);
            }
            let pattern_handles =
                self.match_pattern_index_schema(&link, &TrieDecoder(&atoms))?;
            for pattern in pattern_handles {
                indexes
                    .pattern_index
                    .entry(pattern)
                    .or_default()
                    .insert(handle);
            }
        }
        Ok(handles)
    }

    pub fn add_atoms(
        &self,
        atoms: Vec<Atom>,
        throw_if_exists: bool,
    ) -> Result<Vec<Handle>, StoreError> {
        let mut nodes = Vec::new();
        let mut links = Vec::new();
        for atom in atoms {
            match atom {
                Atom::Node(node) => nodes.push(node),
                Atom::Link(link) => links.push(link),
                other => {
                    return Err(StoreError::InvalidInput(format!(
                        "Only nodes and links can be stored, got {other}"
                    )))
                }
            }
        }
        let mut handles = self.add_nodes(nodes, throw_if_exists)?;
        handles.extend(self.add_links(links, throw_if_exists)?);
        Ok(handles)
    }

    // ---------------------------------------------------------------------
    // Lookup

    pub fn node_exists(&self, handle: &Handle) -> bool {
        matches!(self.get_atom(handle).as_deref(), Some(Atom::Node(_)))
    }

    pub fn link_exists(&self, handle: &Handle) -> bool {
        matches!(self.get_atom(handle).as_deref(), Some(Atom::Link(_)))
    }

    /// The subset of `handles` currently stored, checked under a single
    /// acquisition of the storage lock.
    pub fn atoms_exist(&self, handles: &[Handle]) -> HandleSet {
        self.existing(handles, |_| true)
    }

    pub fn nodes_exist(&self, handles: &[Handle]) -> HandleSet {
        self.existing(handles, |atom| matches!(atom, Atom::Node(_)))
    }

    pub fn links_exist(&self, handles: &[Handle]) -> HandleSet {
        self.existing(handles, |atom| matches!(atom, Atom::Link(_)))
    }

    fn existing(&self, handles: &[Handle], keep: impl Fn(&Atom) -> bool) -> HandleSet {
        let atoms = lock(&self.atoms);
        let mut existing = HandleSet::default();
        for handle in handles {
            if let Ok(Some(AtomValue(atom))) = atoms.lookup(handle.as_str()) {
                if keep(&atom) {
                    existing.insert(*handle);
                }
            }
        }
        existing
    }

    /// Visits every stored atom in handle order. Returning true from
    /// `visit` stops the walk. Callers use this to snapshot the volatile
    /// store externally.
    pub fn for_each_atom<F>(&self, mut visit: F)
    where
        F: FnMut(&Atom) -> bool,
    {
        let atoms = lock(&self.atoms);
        atoms.traverse(false, |_, value| visit(&value.0));
    }

    // ---------------------------------------------------------------------
    // Deletion

    pub fn delete_atoms(
        &self,
        handles: &[Handle],
        delete_link_targets: bool,
    ) -> Result<usize, StoreError> {
        let mut deleted = 0;
        for handle in handles {
            if self.delete_atom(handle, delete_link_targets)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn delete_atom_locked(
        &self,
        atoms: &HandleTrie<AtomValue>,
        indexes: &mut IndexTables,
        handle: &Handle,
        delete_link_targets: bool,
    ) -> Result<bool, StoreError> {
        let Some(AtomValue(atom)) = atoms.lookup(handle.as_str())? else {
            return Ok(false);
        };
        match atom.as_ref() {
            Atom::Node(_) => {
                self.delete_node_locked(atoms, indexes, handle, delete_link_targets)
            }
            Atom::Link(link) => {
                let link = link.clone();
                self.delete_link_locked(atoms, indexes, &link, delete_link_targets)
            }
            _ => Ok(false),
        }
    }

    fn delete_node_locked(
        &self,
        atoms: &HandleTrie<AtomValue>,
        indexes: &mut IndexTables,
        handle: &Handle,
        delete_link_targets: bool,
    ) -> Result<bool, StoreError> {
        let referring: Vec<Handle> = indexes
            .incoming_sets
            .get(handle)
            .map(|incoming| incoming.iter().copied().collect())
            .unwrap_or_default();
        if !referring.is_empty() {
            if !delete_link_targets {
                return Err(StoreError::InUse(*handle));
            }
            for link_handle in referring {
                let Some(AtomValue(atom)) = atoms.lookup(link_handle.as_str())? else {
                    continue;
                };
                if let Atom::Link(link) = atom.as_ref() {
                    let link = link.clone();
                    self.delete_link_locked(atoms, indexes, &link, delete_link_targets)?;
                }
            }
        }
        atoms.remove(handle.as_str())?;
        indexes.incoming_sets.remove(handle);
        Ok(true)
    }

    fn delete_link_locked(
        &self,
        atoms: &HandleTrie<AtomValue>,
        indexes: &mut IndexTables,
        link: &Link,
        delete_link_targets: bool,
    ) -> Result<bool, StoreError> {
        let handle = link.handle();
        if atoms.lookup(handle.as_str())?.is_none() {
            return Ok(false);
        }

        // Drop every pattern entry derived from this link.
        let pattern_handles = self.match_pattern_index_schema(link, &TrieDecoder(atoms))?;
        for pattern in pattern_handles {
            if let Some(entries) = indexes.pattern_index.get_mut(&pattern) {
                entries.remove(&handle);
                if entries.is_empty() {
                    indexes.pattern_index.remove(&pattern);
                }
            }
        }

        // Decrement every target's incoming set.
        for target in link.targets() {
            if let Some(incoming) = indexes.incoming_sets.get_mut(target) {
                incoming.remove(&handle);
                if incoming.is_empty() {
                    indexes.incoming_sets.remove(target);
                }
            }
        }

        atoms.remove(handle.as_str())?;

        if delete_link_targets {
            for target in link.targets() {
                let orphaned = indexes
                    .incoming_sets
                    .get(target)
                    .map_or(true, |incoming| incoming.is_empty());
                if orphaned {
                    self.delete_atom_locked(atoms, indexes, target, delete_link_targets)?;
                }
            }
        }
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Pattern-schema priority map

    /// Registers a pattern-index schema at the next priority. Later
    /// registrations win over earlier ones.
    pub fn add_pattern_index_schema(
        &self,
        tokens: &str,
        index_entries: Vec<Vec<String>>,
    ) -> Result<(), StoreError> {
        let token_vector: Vec<String> = tokens.split(' ').map(str::to_owned).collect();
        // Validate the schema definition up front.
        LinkSchema::from_tokens(&token_vector)?;
        let mut schemas = lock(&self.pattern_schemas);
        schemas.next_priority += 1;
        let priority = schemas.next_priority;
        schemas.map.insert(priority, (token_vector, index_entries));
        Ok(())
    }

    /// Computes the pattern-index keys for a link: the highest-priority
    /// matching schema selects the entries matrix; its tokens are
    /// substituted with concrete target handles (`_`), the wildcard
    /// string (`*`) or the value bound to a variable label.
    fn match_pattern_index_schema(
        &self,
        link: &Link,
        decoder: &dyn HandleDecoder,
    ) -> Result<Vec<Handle>, StoreError> {
        let schemas: Vec<(Vec<String>, Vec<Vec<String>>)> = {
            let table = lock(&self.pattern_schemas);
            if table.map.is_empty() {
                vec![default_index_schema(link.arity())?]
            } else {
                table.map.values().rev().cloned().collect()
            }
        };

        for (tokens, entries) in schemas {
            let schema = LinkSchema::from_tokens(&tokens)?;
            let mut assignment = Assignment::new();
            if !schema.match_link(link, &mut assignment, decoder) {
                continue;
            }
            let mut pattern_handles = Vec::with_capacity(entries.len());
            for entry in &entries {
                let mut elements: Vec<String> = Vec::with_capacity(entry.len());
                for (index, token) in entry.iter().enumerate() {
                    match token.as_str() {
                        "_" => {
                            let target = link.targets().get(index).ok_or_else(|| {
                                StoreError::InvalidInput(format!(
                                    "Index entry position {index} out of link arity"
                                ))
                            })?;
                            elements.push(target.as_str().to_owned());
                        }
                        WILDCARD_STRING => elements.push(WILDCARD_STRING.to_owned()),
                        label => {
                            let value = assignment.get(label).ok_or_else(|| {
                                StoreError::InvalidInput(format!(
                                    "LinkSchema assignments don't have variable: {label}"
                                ))
                            })?;
                            elements.push(value.as_str().to_owned());
                        }
                    }
                }
                pattern_handles.push(hasher::link_handle(link.named_type(), &elements)?);
            }
            return Ok(pattern_handles);
        }
        Ok(Vec::new())
    }

    /// Rebuilds the pattern index for every stored link, optionally
    /// flushing it first. Used when the schema priority map changes.
    pub fn re_index_patterns(&self, flush: bool) -> Result<(), StoreError> {
        info!(context = %self.context, flush, "re-indexing patterns");
        let atoms = lock(&self.atoms);
        let mut indexes = lock(&self.indexes);
        if flush {
            indexes.pattern_index.clear();
        }
        let mut links: Vec<Arc<Atom>> = Vec::new();
        atoms.traverse(false, |_, value| {
            if value.0.is_link() {
                links.push(Arc::clone(&value.0));
            }
            false
        });
        for atom in links {
            if let Atom::Link(link) = atom.as_ref() {
                let pattern_handles =
                    self.match_pattern_index_schema(link, &TrieDecoder(&atoms))?;
                for pattern in pattern_handles {
                    indexes
                        .pattern_index
                        .entry(pattern)
                        .or_default()
                        .insert(link.handle());
                }
            }
        }
        Ok(())
    }
}

impl HandleDecoder for InMemoryStore {
    fn get_atom(&self, handle: &Handle) -> Option<Arc<Atom>> {
        let atoms = lock(&self.atoms);
        atoms
            .lookup(handle.as_str())
            .ok()
            .flatten()
            .map(|value| value.0)
    }
}

impl AtomStore for InMemoryStore {
    fn atom_exists(&self, handle: &Handle) -> bool {
        self.get_atom(handle).is_some()
    }

    fn query_for_pattern(&self, schema: &LinkSchema) -> HandleSet {
        // Two-phase read: snapshot the candidate set under the index lock,
        // then re-validate each candidate against the live atom. Atoms are
        // immutable once stored, so the only hazard is an in-flight delete,
        // which re-validation filters out.
        let candidates: Vec<Handle> = {
            let indexes = lock(&self.indexes);
            indexes
                .pattern_index
                .get(&schema.handle())
                .map(|entries| entries.iter().copied().collect())
                .unwrap_or_default()
        };
        let mut result = HandleSet::default();
        for candidate in candidates {
            let Some(atom) = self.get_atom(&candidate) else {
                continue;
            };
            if let Atom::Link(link) = atom.as_ref() {
                let mut assignment = Assignment::new();
                if schema.match_link(link, &mut assignment, self) {
                    result.insert(candidate);
                }
            }
        }
        result
    }

    fn query_for_targets(&self, handle: &Handle) -> Option<HandleList> {
        match self.get_atom(handle)?.as_ref() {
            Atom::Link(link) => Some(link.targets().to_vec()),
            _ => None,
        }
    }

    fn query_for_incoming_set(&self, handle: &Handle) -> HandleSet {
        let indexes = lock(&self.indexes);
        indexes
            .incoming_sets
            .get(handle)
            .cloned()
            .unwrap_or_default()
    }

    fn add_atom(&self, atom: Atom, throw_if_exists: bool) -> Result<Handle, StoreError> {
        match atom {
            Atom::Node(node) => self.add_node(node, throw_if_exists),
            Atom::Link(link) => self.add_link(link, throw_if_exists),
            other => Err(StoreError::InvalidInput(format!(
                "Only nodes and links can be stored, got {other}"
            ))),
        }
    }

    fn delete_atom(
        &self,
        handle: &Handle,
        delete_link_targets: bool,
    ) -> Result<bool, StoreError> {
        let atoms = lock(&self.atoms);
        let mut indexes = lock(&self.indexes);
        self.delete_atom_locked(&atoms, &mut indexes, handle, delete_link_targets)
    }
}

/// All-variables schema of the given arity with the full 2^arity
/// wildcard-subset expansion.
fn default_index_schema(arity: usize) -> Result<(Vec<String>, Vec<Vec<String>>), StoreError> {
    let mut tokens = vec![
        "LINK_TEMPLATE".to_owned(),
        WILDCARD_STRING.to_owned(),
        arity.to_string(),
    ];
    for i in 0..arity {
        tokens.push("VARIABLE".to_owned());
        tokens.push(format!("v{}", i + 1));
    }
    Ok((tokens, index_entries_combinations(arity)))
}

/// Every combination of `vN` and `*` for the given arity: bit `i` of the
/// mask set means position `i` becomes the wildcard.
fn index_entries_combinations(arity: usize) -> Vec<Vec<String>> {
    let total = 1usize << arity;
    let mut combinations = Vec::with_capacity(total);
    for mask in 0..total {
        let mut entry = Vec::with_capacity(arity);
        for i in 0..arity {
            if mask & (1 << i) != 0 {
                entry.push(WILDCARD_STRING.to_owned());
            } else {
                entry.push(format!("v{}", i + 1));
            }
        }
        combinations.push(entry);
    }
    combinations
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
