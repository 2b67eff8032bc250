//! Shared limits and reserved symbols of the atomspace handle scheme.

/// Number of hex characters in a handle (128-bit MD5 digest).
pub const HANDLE_HASH_SIZE: usize = 32;

/// Upper bound for the whole string fed to the hasher.
pub const MAX_HASHABLE_STRING_SIZE: usize = 100_000;

/// Upper bound for a single literal or symbol inside a composite hash.
pub const MAX_LITERAL_OR_SYMBOL_SIZE: usize = 10_000;

/// Character used to join hashable elements.
pub const JOINING_CHAR: char = ' ';

/// Reserved string matching any atom in schemas and pattern keys.
pub const WILDCARD_STRING: &str = "*";

/// Type assigned to variables, which have no proper type of their own.
pub const UNDEFINED_TYPE: &str = "__UNDEFINED_TYPE__";

/// Maximum number of clauses (handles) in a single query answer.
pub const MAX_NUMBER_OF_OPERATION_CLAUSES: usize = 100;

/// Maximum number of variables bound in a single query.
pub const MAX_NUMBER_OF_VARIABLES_IN_QUERY: usize = 100;

/// Maximum length of a variable label.
pub const MAX_VARIABLE_NAME_SIZE: usize = 100;
