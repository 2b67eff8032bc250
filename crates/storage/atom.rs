//! Atom model: nodes, links and untyped variables.
//!
//! Atoms are immutable once constructed and always referenced by handle.
//! Handles are computed at construction time, so the accessors are
//! infallible and cheap.

use std::fmt;
use std::sync::Arc;

use das_common::constants::{UNDEFINED_TYPE, WILDCARD_STRING};
use das_common::{hasher, Assignment, Handle, Properties};

use crate::error::StoreError;
use crate::schema::LinkSchema;

/// Link type whose MeTTa rendering is a parenthesised expression.
pub const EXPRESSION_LINK_TYPE: &str = "Expression";

/// Resolves handles into actual atoms during match and rendering.
///
/// Implemented by the atom store; tests provide map-backed fixtures.
pub trait HandleDecoder {
    fn get_atom(&self, handle: &Handle) -> Option<Arc<Atom>>;
}

/// The handle an atom contributes when placed inside a schema: either a
/// concrete content address or the wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaElement {
    Concrete(Handle),
    Wildcard,
}

impl SchemaElement {
    /// The string fed to the hasher for this element.
    pub fn hashable(&self) -> &str {
        match self {
            SchemaElement::Concrete(handle) => handle.as_str(),
            SchemaElement::Wildcard => WILDCARD_STRING,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, SchemaElement::Wildcard)
    }
}

// -------------------------------------------------------------------------
// Node

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    named_type: String,
    name: String,
    custom_attributes: Properties,
    handle: Handle,
}

impl Node {
    pub fn new(named_type: impl Into<String>, name: impl Into<String>) -> Result<Self, StoreError> {
        Self::with_attributes(named_type, name, Properties::new())
    }

    pub fn with_attributes(
        named_type: impl Into<String>,
        name: impl Into<String>,
        custom_attributes: Properties,
    ) -> Result<Self, StoreError> {
        let named_type = named_type.into();
        let name = name.into();
        if named_type.is_empty() || named_type == UNDEFINED_TYPE {
            return Err(StoreError::InvalidInput(format!(
                "Invalid node type: {named_type:?}"
            )));
        }
        if name.is_empty() {
            return Err(StoreError::InvalidInput(
                "Node name can't be empty".to_owned(),
            ));
        }
        let handle = hasher::node_handle(&named_type, &name)?;
        Ok(Self {
            named_type,
            name,
            custom_attributes,
            handle,
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn named_type(&self) -> &str {
        &self.named_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn custom_attributes(&self) -> &Properties {
        &self.custom_attributes
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Node(type: '{}', name: '{}', custom_attributes: {})",
            self.named_type, self.name, self.custom_attributes
        )
    }
}

// -------------------------------------------------------------------------
// Link

#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    named_type: String,
    targets: Vec<Handle>,
    custom_attributes: Properties,
    handle: Handle,
}

impl Link {
    pub fn new(named_type: impl Into<String>, targets: Vec<Handle>) -> Result<Self, StoreError> {
        Self::with_attributes(named_type, targets, Properties::new())
    }

    pub fn with_attributes(
        named_type: impl Into<String>,
        targets: Vec<Handle>,
        custom_attributes: Properties,
    ) -> Result<Self, StoreError> {
        let named_type = named_type.into();
        if named_type.is_empty() || named_type == UNDEFINED_TYPE {
            return Err(StoreError::InvalidInput(format!(
                "Invalid link type: {named_type:?}"
            )));
        }
        if targets.is_empty() {
            return Err(StoreError::InvalidInput(
                "Link must have at least 1 target".to_owned(),
            ));
        }
        let handle = hasher::link_handle(&named_type, targets.iter().map(Handle::as_str))?;
        Ok(Self {
            named_type,
            targets,
            custom_attributes,
            handle,
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn named_type(&self) -> &str {
        &self.named_type
    }

    pub fn targets(&self) -> &[Handle] {
        &self.targets
    }

    pub fn arity(&self) -> usize {
        self.targets.len()
    }

    pub fn custom_attributes(&self) -> &Properties {
        &self.custom_attributes
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Link(type: '{}', targets: [", self.named_type)?;
        for (i, target) in self.targets.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{target}")?;
        }
        write!(f, "], custom_attributes: {})", self.custom_attributes)
    }
}

// -------------------------------------------------------------------------
// UntypedVariable

#[derive(Debug, Clone, PartialEq)]
pub struct UntypedVariable {
    name: String,
    handle: Handle,
}

impl UntypedVariable {
    pub fn new(name: impl Into<String>) -> Result<Self, StoreError> {
        let name = name.into();
        if name.is_empty() {
            return Err(StoreError::InvalidInput(
                "Invalid empty name for UntypedVariable".to_owned(),
            ));
        }
        let handle = hasher::node_handle(UNDEFINED_TYPE, &name)?;
        Ok(Self { name, handle })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for UntypedVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UntypedVariable(name: '{}')", self.name)
    }
}

// -------------------------------------------------------------------------
// Atom

/// Tagged union of everything that lives in the hypergraph.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Node(Node),
    Link(Link),
    Variable(UntypedVariable),
    Schema(LinkSchema),
}

impl Atom {
    pub fn handle(&self) -> Handle {
        match self {
            Atom::Node(node) => node.handle(),
            Atom::Link(link) => link.handle(),
            Atom::Variable(variable) => variable.handle(),
            Atom::Schema(schema) => schema.handle(),
        }
    }

    /// The handle this atom contributes when inserted into a schema.
    pub fn schema_element(&self) -> SchemaElement {
        match self {
            Atom::Node(node) => SchemaElement::Concrete(node.handle()),
            Atom::Link(link) => SchemaElement::Concrete(link.handle()),
            Atom::Variable(_) | Atom::Schema(_) => SchemaElement::Wildcard,
        }
    }

    pub fn named_type(&self) -> &str {
        match self {
            Atom::Node(node) => node.named_type(),
            Atom::Link(link) => link.named_type(),
            Atom::Variable(_) => UNDEFINED_TYPE,
            Atom::Schema(schema) => schema.named_type(),
        }
    }

    pub fn named_type_hash(&self) -> Handle {
        hasher::type_handle(self.named_type())
    }

    pub fn arity(&self) -> usize {
        match self {
            Atom::Node(_) | Atom::Variable(_) => 0,
            Atom::Link(link) => link.arity(),
            Atom::Schema(schema) => schema.arity(),
        }
    }

    pub fn is_node(&self) -> bool {
        self.arity() == 0
    }

    pub fn is_link(&self) -> bool {
        self.arity() > 0
    }

    pub fn custom_attributes(&self) -> Option<&Properties> {
        match self {
            Atom::Node(node) => Some(node.custom_attributes()),
            Atom::Link(link) => Some(link.custom_attributes()),
            Atom::Variable(_) => None,
            Atom::Schema(schema) => Some(schema.custom_attributes()),
        }
    }

    /// Matches this atom against the atom behind `other`, extending
    /// `assignment` by side effect when variables are bound.
    pub fn match_handle(
        &self,
        other: Handle,
        assignment: &mut Assignment,
        decoder: &dyn HandleDecoder,
    ) -> bool {
        match self {
            Atom::Node(node) => node.handle() == other,
            Atom::Link(link) => link.handle() == other,
            Atom::Variable(variable) => assignment.assign(variable.name(), other),
            Atom::Schema(schema) => schema.match_handle(other, assignment, decoder),
        }
    }

    /// MeTTa expression representing this atom.
    pub fn metta_representation(&self, decoder: &dyn HandleDecoder) -> Result<String, StoreError> {
        match self {
            Atom::Node(node) => Ok(node.name().to_owned()),
            Atom::Variable(variable) => Ok(format!("${}", variable.name())),
            Atom::Schema(schema) => Ok(schema.metta_representation().to_owned()),
            Atom::Link(link) => {
                if link.named_type() != EXPRESSION_LINK_TYPE {
                    return Err(StoreError::InvalidInput(format!(
                        "Can't compute metta expression of link whose type ({}) is not {}",
                        link.named_type(),
                        EXPRESSION_LINK_TYPE
                    )));
                }
                let mut metta = String::from("(");
                for (i, target) in link.targets().iter().enumerate() {
                    let atom = decoder
                        .get_atom(target)
                        .ok_or(StoreError::NotFound(*target))?;
                    if i > 0 {
                        metta.push(' ');
                    }
                    metta.push_str(&atom.metta_representation(decoder)?);
                }
                metta.push(')');
                Ok(metta)
            }
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Node(node) => node.fmt(f),
            Atom::Link(link) => link.fmt(f),
            Atom::Variable(variable) => variable.fmt(f),
            Atom::Schema(schema) => schema.fmt(f),
        }
    }
}

impl From<Node> for Atom {
    fn from(node: Node) -> Self {
        Atom::Node(node)
    }
}

impl From<Link> for Atom {
    fn from(link: Link) -> Self {
        Atom::Link(link)
    }
}

impl From<UntypedVariable> for Atom {
    fn from(variable: UntypedVariable) -> Self {
        Atom::Variable(variable)
    }
}

impl From<LinkSchema> for Atom {
    fn from(schema: LinkSchema) -> Self {
        Atom::Schema(schema)
    }
}
