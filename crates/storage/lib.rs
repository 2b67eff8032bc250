pub mod api;
pub mod atom;
pub mod error;
pub mod schema;
pub mod store;

pub use api::{AtomStore, HandleList, HandleSet};
pub use atom::{Atom, HandleDecoder, Link, Node, SchemaElement, UntypedVariable};
pub use error::StoreError;
pub use schema::{LinkSchema, LinkSchemaBuilder, SchemaTarget};
pub use store::InMemoryStore;

use das_common::{hasher, Handle};
use lazy_static::lazy_static;

lazy_static! {
    /// Handle reserved for the wildcard string.
    pub static ref WILDCARD_HANDLE: Handle = hasher::compute_hash(das_common::constants::WILDCARD_STRING);
    /// Handle of the type assigned to untyped variables.
    pub static ref UNDEFINED_TYPE_HANDLE: Handle = hasher::type_handle(das_common::constants::UNDEFINED_TYPE);
}
