//! Content-address derivation for types, nodes, links and composites.
//!
//! Handles are MD5 digests of canonical strings built by joining the hashed
//! elements with [`JOINING_CHAR`]. Two atoms share a handle iff their
//! canonical content is byte-identical.

use md5::{Digest, Md5};

use crate::constants::{JOINING_CHAR, MAX_HASHABLE_STRING_SIZE, MAX_LITERAL_OR_SYMBOL_SIZE};
use crate::error::CommonError;
use crate::handle::Handle;

/// Hashes an arbitrary canonical string.
pub fn compute_hash(input: &str) -> Handle {
    let digest = Md5::digest(input.as_bytes());
    Handle::from_digest(digest.into())
}

/// Handle of a named type: `md5(type_name)`.
pub fn type_handle(type_name: &str) -> Handle {
    compute_hash(type_name)
}

/// Handle of a node: `md5(type_name ' ' name)`.
///
/// The type component is the type *name*, not its handle.
pub fn node_handle(type_name: &str, name: &str) -> Result<Handle, CommonError> {
    let total = type_name.len() + name.len() + 1;
    if total >= MAX_HASHABLE_STRING_SIZE {
        return Err(CommonError::InputTooLarge(total));
    }
    let mut hashable = String::with_capacity(total);
    hashable.push_str(type_name);
    hashable.push(JOINING_CHAR);
    hashable.push_str(name);
    Ok(compute_hash(&hashable))
}

/// Handle of a composite: `md5(e0 ' ' e1 ' ' … en)`.
///
/// Elements are usually handles, but reserved literals such as the wildcard
/// string are accepted as well.
pub fn composite_handle<I, S>(elements: I) -> Result<Handle, CommonError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hashable = String::new();
    for element in elements {
        let element = element.as_ref();
        if element.len() > MAX_LITERAL_OR_SYMBOL_SIZE {
            return Err(CommonError::InputTooLarge(element.len()));
        }
        if !hashable.is_empty() {
            hashable.push(JOINING_CHAR);
        }
        hashable.push_str(element);
        if hashable.len() >= MAX_HASHABLE_STRING_SIZE {
            return Err(CommonError::InputTooLarge(hashable.len()));
        }
    }
    Ok(compute_hash(&hashable))
}

/// Handle of a link: composite over the type handle followed by the targets.
pub fn link_handle<I, S>(type_name: &str, targets: I) -> Result<Handle, CommonError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let head = type_handle(type_name);
    let elements = std::iter::once(head.as_str().to_owned())
        .chain(targets.into_iter().map(|t| t.as_ref().to_owned()));
    composite_handle(elements)
}
