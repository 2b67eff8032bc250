//! Link schemas: patterns describing families of links.
//!
//! A schema fixes a link type (or the wildcard) and an ordered list of
//! targets, each either a concrete atom handle, an untyped variable or a
//! nested schema. Schemas are built through a stack protocol and frozen
//! once built; the builder is consumed by [`LinkSchemaBuilder::build`].

use std::fmt;

use das_common::constants::{UNDEFINED_TYPE, WILDCARD_STRING};
use das_common::{hasher, Assignment, Handle, Properties};

use crate::atom::{Atom, HandleDecoder, Link, SchemaElement, UntypedVariable};
use crate::error::StoreError;
use crate::UNDEFINED_TYPE_HANDLE;

/// One target position of a schema.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaTarget {
    /// Concrete atom, matched by handle equality.
    Atom(Handle),
    /// Variable binding whatever sits at this position.
    Variable(UntypedVariable),
    /// Nested schema, matched recursively through the decoder.
    Schema(LinkSchema),
}

impl SchemaTarget {
    pub fn element(&self) -> SchemaElement {
        match self {
            SchemaTarget::Atom(handle) => SchemaElement::Concrete(*handle),
            SchemaTarget::Variable(_) | SchemaTarget::Schema(_) => SchemaElement::Wildcard,
        }
    }
}

/// A frozen link schema.
#[derive(Debug, Clone)]
pub struct LinkSchema {
    named_type: String,
    targets: Vec<SchemaTarget>,
    elements: Vec<SchemaElement>,
    custom_attributes: Properties,
    handle: Handle,
    composite_type: Vec<Handle>,
    composite_type_hash: Handle,
    metta: String,
}

impl LinkSchema {
    /// Builds a schema directly from its targets.
    pub fn new(
        named_type: impl Into<String>,
        targets: Vec<SchemaTarget>,
        custom_attributes: Properties,
    ) -> Result<Self, StoreError> {
        let named_type = named_type.into();
        let parts = targets.into_iter().map(StackEntry::from_target).collect();
        Self::from_parts(named_type, parts, custom_attributes)
    }

    fn from_parts(
        named_type: String,
        parts: Vec<StackEntry>,
        custom_attributes: Properties,
    ) -> Result<Self, StoreError> {
        if named_type.is_empty() || named_type == UNDEFINED_TYPE {
            return Err(StoreError::InvalidInput(format!(
                "Invalid link schema type: {named_type:?}"
            )));
        }
        if parts.is_empty() {
            return Err(StoreError::InvalidInput(
                "LinkSchema must have at least 1 target".to_owned(),
            ));
        }
        if parts.iter().all(|part| !part.element.is_wildcard()) {
            return Err(StoreError::InvalidInput(
                "Invalid LinkSchema with no variables and no nested link schemas".to_owned(),
            ));
        }

        let mut targets = Vec::with_capacity(parts.len());
        let mut elements = Vec::with_capacity(parts.len());
        let mut composite_type = Vec::with_capacity(parts.len() + 1);
        let mut metta = String::from("(");
        composite_type.push(hasher::type_handle(&named_type));
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                metta.push(' ');
            }
            metta.push_str(&part.metta);
            elements.push(part.element);
            composite_type.push(part.type_hash);
            targets.push(part.target);
        }
        metta.push(')');

        let handle = schema_handle(&named_type, &elements)?;
        let composite_type_hash =
            hasher::composite_handle(composite_type.iter().map(Handle::as_str))?;
        Ok(Self {
            named_type,
            targets,
            elements,
            custom_attributes,
            handle,
            composite_type,
            composite_type_hash,
            metta,
        })
    }

    /// Parses a flat token stream such as
    /// `LINK_TEMPLATE Expression 3 NODE Symbol Similarity NODE Symbol
    /// "human" VARIABLE v1`.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Self, StoreError> {
        let tokens: Vec<&str> = tokens.iter().map(AsRef::as_ref).collect();
        let mut cursor = 0usize;
        let (named_type, arity) = parse_link_header(&tokens, &mut cursor, "LINK_TEMPLATE")?;
        let mut builder = LinkSchemaBuilder::new(named_type, arity);
        for _ in 0..arity {
            parse_target(&tokens, &mut cursor, &mut builder)?;
        }
        if cursor != tokens.len() {
            return Err(StoreError::InvalidInput(format!(
                "Trailing tokens after link schema definition: {:?}",
                &tokens[cursor..]
            )));
        }
        builder.build()
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn named_type(&self) -> &str {
        &self.named_type
    }

    pub fn arity(&self) -> usize {
        self.targets.len()
    }

    pub fn targets(&self) -> &[SchemaTarget] {
        &self.targets
    }

    /// Per-position schema elements (concrete handle or wildcard).
    pub fn elements(&self) -> &[SchemaElement] {
        &self.elements
    }

    pub fn composite_type(&self) -> &[Handle] {
        &self.composite_type
    }

    pub fn composite_type_hash(&self) -> Handle {
        self.composite_type_hash
    }

    pub fn metta_representation(&self) -> &str {
        &self.metta
    }

    pub fn custom_attributes(&self) -> &Properties {
        &self.custom_attributes
    }

    /// Matches this schema against the link behind `other`.
    pub fn match_handle(
        &self,
        other: Handle,
        assignment: &mut Assignment,
        decoder: &dyn HandleDecoder,
    ) -> bool {
        let Some(atom) = decoder.get_atom(&other) else {
            return false;
        };
        match atom.as_ref() {
            Atom::Link(link) => self.match_link(link, assignment, decoder),
            _ => false,
        }
    }

    /// Matches this schema against a link the caller already holds.
    ///
    /// Concrete positions require byte equality of handles; wildcard
    /// positions recurse into the embedded sub-atom, propagating variable
    /// assignments. A conflicting assignment fails the whole match.
    pub fn match_link(
        &self,
        link: &Link,
        assignment: &mut Assignment,
        decoder: &dyn HandleDecoder,
    ) -> bool {
        if self.named_type != WILDCARD_STRING && self.named_type != link.named_type() {
            return false;
        }
        if self.arity() != link.arity() {
            return false;
        }
        for (target, &link_target) in self.targets.iter().zip(link.targets()) {
            let matched = match target {
                SchemaTarget::Atom(handle) => *handle == link_target,
                SchemaTarget::Variable(variable) => {
                    assignment.assign(variable.name(), link_target)
                }
                SchemaTarget::Schema(nested) => {
                    nested.match_handle(link_target, assignment, decoder)
                }
            };
            if !matched {
                return false;
            }
        }
        true
    }
}

// Content addressing makes handle equality equivalent to deep equality.
impl PartialEq for LinkSchema {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for LinkSchema {}

impl fmt::Display for LinkSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkSchema(type: '{}', targets: [", self.named_type)?;
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", element.hashable())?;
        }
        write!(f, "], custom_attributes: {})", self.custom_attributes)
    }
}

fn schema_handle(named_type: &str, elements: &[SchemaElement]) -> Result<Handle, StoreError> {
    // A wildcard type contributes the wildcard string itself, so that
    // schemas and link templates over "any type" share the same address.
    let head: String = if named_type == WILDCARD_STRING {
        WILDCARD_STRING.to_owned()
    } else {
        hasher::type_handle(named_type).as_str().to_owned()
    };
    let parts =
        std::iter::once(head).chain(elements.iter().map(|e| e.hashable().to_owned()));
    Ok(hasher::composite_handle(parts)?)
}

// -------------------------------------------------------------------------
// Stack-based construction protocol

struct StackEntry {
    target: SchemaTarget,
    element: SchemaElement,
    type_hash: Handle,
    metta: String,
}

impl StackEntry {
    fn from_target(target: SchemaTarget) -> Self {
        match target {
            SchemaTarget::Atom(handle) => StackEntry {
                element: SchemaElement::Concrete(handle),
                type_hash: handle,
                metta: handle.to_string(),
                target: SchemaTarget::Atom(handle),
            },
            SchemaTarget::Variable(variable) => StackEntry {
                element: SchemaElement::Wildcard,
                type_hash: *UNDEFINED_TYPE_HANDLE,
                metta: format!("${}", variable.name()),
                target: SchemaTarget::Variable(variable),
            },
            SchemaTarget::Schema(schema) => StackEntry {
                element: SchemaElement::Wildcard,
                type_hash: schema.composite_type_hash(),
                metta: schema.metta_representation().to_owned(),
                target: SchemaTarget::Schema(schema),
            },
        }
    }
}

/// Builds a [`LinkSchema`] by pushing terminals and folding with
/// [`LinkSchemaBuilder::stack_link`].
pub struct LinkSchemaBuilder {
    named_type: String,
    arity: usize,
    custom_attributes: Properties,
    stack: Vec<StackEntry>,
}

impl LinkSchemaBuilder {
    pub fn new(named_type: impl Into<String>, arity: usize) -> Self {
        Self::with_attributes(named_type, arity, Properties::new())
    }

    pub fn with_attributes(
        named_type: impl Into<String>,
        arity: usize,
        custom_attributes: Properties,
    ) -> Self {
        Self {
            named_type: named_type.into(),
            arity,
            custom_attributes,
            stack: Vec::new(),
        }
    }

    /// Pushes a concrete node terminal.
    pub fn stack_node(&mut self, named_type: &str, name: &str) -> Result<(), StoreError> {
        let handle = hasher::node_handle(named_type, name)?;
        self.stack.push(StackEntry {
            target: SchemaTarget::Atom(handle),
            element: SchemaElement::Concrete(handle),
            type_hash: hasher::type_handle(named_type),
            metta: name.to_owned(),
        });
        Ok(())
    }

    /// Pushes an untyped variable.
    pub fn stack_untyped_variable(&mut self, name: &str) -> Result<(), StoreError> {
        let variable = UntypedVariable::new(name)?;
        self.stack
            .push(StackEntry::from_target(SchemaTarget::Variable(variable)));
        Ok(())
    }

    /// Pushes a reference to an existing atom by handle.
    pub fn stack_atom(&mut self, handle: Handle) {
        self.stack
            .push(StackEntry::from_target(SchemaTarget::Atom(handle)));
    }

    /// Pops `link_arity` entries and pushes their composite: a concrete
    /// link handle when every popped entry is concrete, a nested schema
    /// otherwise.
    pub fn stack_link(&mut self, named_type: &str, link_arity: usize) -> Result<(), StoreError> {
        if self.stack.len() < link_arity {
            return Err(StoreError::InvalidInput(format!(
                "Couldn't stack link. Link arity: {link_arity} stack size: {}",
                self.stack.len()
            )));
        }
        let popped: Vec<StackEntry> = self.stack.split_off(self.stack.len() - link_arity);
        if popped.iter().all(|entry| !entry.element.is_wildcard()) {
            // All-concrete composite folds into a plain link handle.
            let handle = hasher::link_handle(
                named_type,
                popped.iter().map(|entry| entry.element.hashable()),
            )?;
            let mut composite_type = Vec::with_capacity(link_arity + 1);
            composite_type.push(hasher::type_handle(named_type));
            let mut metta = String::from("(");
            for (i, entry) in popped.iter().enumerate() {
                composite_type.push(entry.type_hash);
                if i > 0 {
                    metta.push(' ');
                }
                metta.push_str(&entry.metta);
            }
            metta.push(')');
            let composite_type_hash =
                hasher::composite_handle(composite_type.iter().map(Handle::as_str))?;
            self.stack.push(StackEntry {
                target: SchemaTarget::Atom(handle),
                element: SchemaElement::Concrete(handle),
                type_hash: composite_type_hash,
                metta,
            });
        } else {
            let nested =
                LinkSchema::from_parts(named_type.to_owned(), popped, Properties::new())?;
            self.stack
                .push(StackEntry::from_target(SchemaTarget::Schema(nested)));
        }
        Ok(())
    }

    /// Freezes the schema. The stack must hold exactly the declared arity.
    pub fn build(self) -> Result<LinkSchema, StoreError> {
        if self.stack.len() != self.arity {
            return Err(StoreError::InvalidInput(format!(
                "Can't build LinkSchema of arity {} out of a stack with {} atoms",
                self.arity,
                self.stack.len()
            )));
        }
        LinkSchema::from_parts(self.named_type, self.stack, self.custom_attributes)
    }
}

// -------------------------------------------------------------------------
// Token-stream parsing

fn parse_link_header<'a>(
    tokens: &[&'a str],
    cursor: &mut usize,
    expected: &str,
) -> Result<(&'a str, usize), StoreError> {
    let tag = next_token(tokens, cursor)?;
    if tag != expected {
        return Err(StoreError::InvalidInput(format!(
            "Expected {expected}, found {tag:?}"
        )));
    }
    let named_type = next_token(tokens, cursor)?;
    let arity: usize = next_token(tokens, cursor)?
        .parse()
        .map_err(|_| StoreError::InvalidInput("Invalid link arity".to_owned()))?;
    Ok((named_type, arity))
}

fn parse_target(
    tokens: &[&str],
    cursor: &mut usize,
    builder: &mut LinkSchemaBuilder,
) -> Result<(), StoreError> {
    match next_token(tokens, cursor)? {
        "NODE" => {
            let named_type = next_token(tokens, cursor)?.to_owned();
            let name = next_token(tokens, cursor)?.to_owned();
            builder.stack_node(&named_type, &name)
        }
        "VARIABLE" => {
            let name = next_token(tokens, cursor)?.to_owned();
            builder.stack_untyped_variable(&name)
        }
        "ATOM" => {
            let handle = Handle::parse(next_token(tokens, cursor)?)?;
            builder.stack_atom(handle);
            Ok(())
        }
        tag @ ("LINK" | "LINK_TEMPLATE") => {
            let named_type = next_token(tokens, cursor)?.to_owned();
            let arity: usize = next_token(tokens, cursor)?
                .parse()
                .map_err(|_| StoreError::InvalidInput(format!("Invalid {tag} arity")))?;
            for _ in 0..arity {
                parse_target(tokens, cursor, builder)?;
            }
            builder.stack_link(&named_type, arity)
        }
        other => Err(StoreError::InvalidInput(format!(
            "Unexpected token in link schema: {other:?}"
        ))),
    }
}

fn next_token<'a>(tokens: &[&'a str], cursor: &mut usize) -> Result<&'a str, StoreError> {
    let token = tokens
        .get(*cursor)
        .ok_or_else(|| StoreError::InvalidInput("Truncated token stream".to_owned()))?;
    *cursor += 1;
    Ok(token)
}
