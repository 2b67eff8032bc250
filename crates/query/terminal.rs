//! Terminals: the leaves of a query tree.

use das_common::{hasher, Handle};
use das_storage::{SchemaElement, SchemaTarget, UntypedVariable};

use crate::error::QueryError;

/// A node, link or variable placed inside a link template (or standing
/// alone as a one-shot source).
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Node {
        named_type: String,
        name: String,
        handle: Handle,
    },
    /// A concrete atom referenced by handle, including inline links whose
    /// targets are all concrete.
    Atom { handle: Handle },
    Variable { name: String },
}

impl Terminal {
    pub fn node(named_type: impl Into<String>, name: impl Into<String>) -> Result<Self, QueryError> {
        let named_type = named_type.into();
        let name = name.into();
        let handle = hasher::node_handle(&named_type, &name)
            .map_err(|err| QueryError::InvalidInput(err.to_string()))?;
        Ok(Terminal::Node {
            named_type,
            name,
            handle,
        })
    }

    pub fn atom(handle: Handle) -> Self {
        Terminal::Atom { handle }
    }

    /// An inline link over concrete target handles. Variables are not
    /// allowed here; use a link template for patterns.
    pub fn link(named_type: &str, targets: Vec<Handle>) -> Result<Self, QueryError> {
        if targets.is_empty() {
            return Err(QueryError::InvalidInput(
                "Invalid Link definition: no targets".to_owned(),
            ));
        }
        let handle = hasher::link_handle(named_type, targets.iter().map(Handle::as_str))
            .map_err(|err| QueryError::InvalidInput(err.to_string()))?;
        Ok(Terminal::Atom { handle })
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Terminal::Variable { name: name.into() }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Terminal::Variable { .. })
    }

    /// The element this terminal contributes to the enclosing schema.
    pub fn schema_element(&self) -> SchemaElement {
        match self {
            Terminal::Node { handle, .. } | Terminal::Atom { handle } => {
                SchemaElement::Concrete(*handle)
            }
            Terminal::Variable { .. } => SchemaElement::Wildcard,
        }
    }

    /// The schema target this terminal contributes.
    pub fn schema_target(&self) -> Result<SchemaTarget, QueryError> {
        match self {
            Terminal::Node { handle, .. } | Terminal::Atom { handle } => {
                Ok(SchemaTarget::Atom(*handle))
            }
            Terminal::Variable { name } => {
                let variable = UntypedVariable::new(name.clone())
                    .map_err(|err| QueryError::InvalidInput(err.to_string()))?;
                Ok(SchemaTarget::Variable(variable))
            }
        }
    }
}
