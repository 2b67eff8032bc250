//! Query answers and their wire token format.

use std::collections::BTreeMap;
use std::fmt;

use das_common::constants::{
    HANDLE_HASH_SIZE, MAX_NUMBER_OF_OPERATION_CLAUSES, MAX_NUMBER_OF_VARIABLES_IN_QUERY,
    MAX_VARIABLE_NAME_SIZE,
};
use das_common::{Assignment, Handle};

use crate::error::QueryError;

/// Addresses one element of an answer: a handle by position or a
/// variable binding by label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryAnswerElement {
    Handle(usize),
    Variable(String),
}

/// One answer flowing through the query pipeline: the matched link
/// handles, the variable assignment that produced the match, the
/// attention scores and an optional MeTTa rendering per handle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryAnswer {
    pub handles: Vec<Handle>,
    pub assignment: Assignment,
    pub importance: f64,
    pub strength: f64,
    pub metta_expression: BTreeMap<Handle, String>,
}

impl QueryAnswer {
    pub fn new(importance: f64) -> Self {
        Self {
            importance,
            ..Self::default()
        }
    }

    pub fn with_handle(handle: Handle, importance: f64) -> Self {
        let mut answer = Self::new(importance);
        answer.handles.push(handle);
        answer
    }

    pub fn add_handle(&mut self, handle: Handle) {
        self.handles.push(handle);
    }

    /// Resolves an element key against this answer. Used by the agents
    /// sitting above the query engine to pull concrete handles out of an
    /// answer.
    pub fn get(&self, element: &QueryAnswerElement) -> Result<Handle, QueryError> {
        match element {
            QueryAnswerElement::Handle(index) => {
                self.handles.get(*index).copied().ok_or_else(|| {
                    QueryError::InvalidInput(format!("Invalid handle index: {index}"))
                })
            }
            QueryAnswerElement::Variable(label) => {
                self.assignment.get(label).ok_or_else(|| {
                    QueryError::InvalidInput(format!("Invalid variable name: {label}"))
                })
            }
        }
    }

    /// Renders a MeTTa expression for every handle in this answer,
    /// resolving atoms through the decoder. Handles that fail to render
    /// (unknown, or not expression-shaped) are skipped.
    pub fn render_metta_expressions(&mut self, decoder: &dyn das_storage::HandleDecoder) {
        for handle in &self.handles {
            let Some(atom) = decoder.get_atom(handle) else {
                continue;
            };
            if let Ok(metta) = atom.metta_representation(decoder) {
                self.metta_expression.insert(*handle, metta);
            }
        }
    }

    /// Merges `other` into this answer iff the assignments are
    /// compatible. With `merge_handles` the handle lists union (keeping
    /// order, skipping duplicates), importance becomes the maximum and
    /// strength the product.
    pub fn merge(&mut self, other: &QueryAnswer, merge_handles: bool) -> bool {
        if !self.assignment.is_compatible(&other.assignment) {
            return false;
        }
        self.assignment.add_assignments(&other.assignment);
        if merge_handles {
            self.importance = self.importance.max(other.importance);
            self.strength *= other.strength;
            for handle in &other.handles {
                if !self.handles.contains(handle) {
                    self.handles.push(*handle);
                }
            }
        }
        true
    }

    // ---------------------------------------------------------------------
    // Token format

    /// Renders the answer as a single space-delimited token string:
    ///
    /// `<strength> <importance> <N> <h1> … <hN> <M> <l1> <v1> … <K>
    /// [<hi> <metta_i>]*K ` with strength and importance at exactly ten
    /// fractional digits and a space after every token.
    pub fn tokenize(&self) -> String {
        let mut tokens = String::new();
        tokens.push_str(&format!("{:.10} ", self.strength));
        tokens.push_str(&format!("{:.10} ", self.importance));
        tokens.push_str(&format!("{} ", self.handles.len()));
        for handle in &self.handles {
            tokens.push_str(handle.as_str());
            tokens.push(' ');
        }
        tokens.push_str(&format!("{} ", self.assignment.variable_count()));
        for (label, value) in self.assignment.iter() {
            tokens.push_str(label);
            tokens.push(' ');
            tokens.push_str(value.as_str());
            tokens.push(' ');
        }
        tokens.push_str(&format!("{} ", self.metta_expression.len()));
        for (handle, metta) in &self.metta_expression {
            tokens.push_str(handle.as_str());
            tokens.push(' ');
            tokens.push_str(metta);
            tokens.push(' ');
        }
        tokens
    }

    /// Parses a token string produced by [`QueryAnswer::tokenize`].
    pub fn untokenize(tokens: &str) -> Result<Self, QueryError> {
        let mut cursor = TokenCursor::new(tokens);
        let mut answer = QueryAnswer::default();

        answer.strength = cursor.read_float()?;
        answer.importance = cursor.read_float()?;

        let handles_size = cursor.read_count()?;
        if handles_size > MAX_NUMBER_OF_OPERATION_CLAUSES {
            return Err(QueryError::InvalidTokenString(format!(
                "Invalid handles_size: {handles_size}"
            )));
        }
        for _ in 0..handles_size {
            answer.handles.push(cursor.read_handle()?);
        }

        let assignment_size = cursor.read_count()?;
        if assignment_size > MAX_NUMBER_OF_VARIABLES_IN_QUERY {
            return Err(QueryError::InvalidTokenString(format!(
                "Invalid number of assignments: {assignment_size}"
            )));
        }
        for _ in 0..assignment_size {
            let label = cursor.read_token(MAX_VARIABLE_NAME_SIZE)?.to_owned();
            let value = cursor.read_handle()?;
            if !answer.assignment.assign(&label, value) {
                return Err(QueryError::InvalidTokenString(format!(
                    "Conflicting assignment for variable {label}"
                )));
            }
        }

        let metta_size = cursor.read_count()?;
        for _ in 0..metta_size {
            let handle = cursor.read_handle()?;
            let metta = cursor.read_metta_expression()?;
            answer.metta_expression.insert(handle, metta);
        }

        if !cursor.at_end() {
            return Err(QueryError::InvalidTokenString(
                "invalid text after QueryAnswer definition".to_owned(),
            ));
        }
        Ok(answer)
    }
}

impl fmt::Display for QueryAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueryAnswer<{},{}> [",
            self.handles.len(),
            self.assignment.variable_count()
        )?;
        for (i, handle) in self.handles.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{handle}")?;
        }
        write!(
            f,
            "] {} ({}, {})",
            self.assignment, self.strength, self.importance
        )
    }
}

struct TokenCursor<'a> {
    bytes: &'a [u8],
    text: &'a str,
    pos: usize,
}

impl<'a> TokenCursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            text,
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos == self.bytes.len()
    }

    /// Reads up to the next space, consuming it.
    fn read_token(&mut self, max_size: usize) -> Result<&'a str, QueryError> {
        let start = self.pos;
        loop {
            match self.bytes.get(self.pos) {
                Some(b' ') => break,
                Some(_) => {
                    if self.pos - start == max_size {
                        return Err(QueryError::InvalidTokenString(
                            "oversized token".to_owned(),
                        ));
                    }
                    self.pos += 1;
                }
                None => {
                    return Err(QueryError::InvalidTokenString(
                        "truncated token string".to_owned(),
                    ))
                }
            }
        }
        let token = &self.text[start..self.pos];
        self.pos += 1;
        Ok(token)
    }

    fn read_float(&mut self) -> Result<f64, QueryError> {
        self.read_token(32)?
            .parse()
            .map_err(|_| QueryError::InvalidTokenString("invalid float token".to_owned()))
    }

    fn read_count(&mut self) -> Result<usize, QueryError> {
        self.read_token(3)?
            .parse()
            .map_err(|_| QueryError::InvalidTokenString("invalid count token".to_owned()))
    }

    fn read_handle(&mut self) -> Result<Handle, QueryError> {
        let token = self.read_token(HANDLE_HASH_SIZE)?;
        Handle::parse(token)
            .map_err(|err| QueryError::InvalidTokenString(err.to_string()))
    }

    /// Reads a MeTTa expression: a balanced parenthesised S-expression, a
    /// double-quoted string or a bare symbol, with backslash escapes.
    fn read_metta_expression(&mut self) -> Result<String, QueryError> {
        let start = self.pos;
        let (open, close) = match self.bytes.get(start) {
            Some(b'(') => (b'(', b')'),
            Some(b'"') => (b'"', b'"'),
            Some(_) => (b' ', b' '),
            None => {
                return Err(QueryError::InvalidTokenString(
                    "truncated metta expression".to_owned(),
                ))
            }
        };
        let mut unmatched = 1u32;
        loop {
            self.pos += 1;
            let Some(&byte) = self.bytes.get(self.pos) else {
                return Err(QueryError::InvalidTokenString(
                    "invalid metta expression string".to_owned(),
                ));
            };
            let escaped = self.bytes[self.pos - 1] == b'\\';
            if byte == close && !escaped {
                unmatched -= 1;
            } else if byte == open && !escaped {
                unmatched += 1;
            }
            if unmatched == 0 {
                break;
            }
        }
        if close != b' ' {
            self.pos += 1;
        }
        let end = self.pos;
        // Consume the delimiting space.
        self.pos += 1;
        if self.pos > self.bytes.len() {
            return Err(QueryError::InvalidTokenString(
                "truncated metta expression".to_owned(),
            ));
        }
        Ok(self.text[start..end].to_owned())
    }
}
