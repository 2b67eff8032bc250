//! Parser for the flat query token stream.
//!
//! Grammar (prefix notation):
//!
//! ```text
//! NODE <type> <name>
//! LINK <type> <arity> <target_tokens...>
//! ATOM <handle>
//! VARIABLE <name>
//! LINK_TEMPLATE <type> <arity> <target_tokens...>
//! AND <k> <k child trees...>
//! OR <k> <k child trees...>
//! NOT <child>            (documented, not supported)
//! ```

use das_common::constants::MAX_VARIABLE_NAME_SIZE;
use das_common::Handle;

use crate::error::QueryError;
use crate::link_template::{LinkTemplate, TemplateTarget};
use crate::terminal::Terminal;

/// Parsed query tree: sources at the leaves, operators above them.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOperation {
    Terminal(Terminal),
    Template(LinkTemplate),
    And(Vec<QueryOperation>),
    Or(Vec<QueryOperation>),
}

/// Parses a query token stream into an operation tree. The context
/// string is attached to every link template for importance ranking.
pub fn parse_query<S: AsRef<str>>(
    tokens: &[S],
    context: &str,
) -> Result<QueryOperation, QueryError> {
    let tokens: Vec<&str> = tokens.iter().map(AsRef::as_ref).collect();
    let mut cursor = 0usize;
    let operation = parse_operation(&tokens, &mut cursor, context)?;
    if cursor != tokens.len() {
        return Err(QueryError::InvalidInput(format!(
            "Trailing tokens after query definition: {:?}",
            &tokens[cursor..]
        )));
    }
    Ok(operation)
}

fn parse_operation(
    tokens: &[&str],
    cursor: &mut usize,
    context: &str,
) -> Result<QueryOperation, QueryError> {
    match peek(tokens, *cursor)? {
        "AND" => {
            *cursor += 1;
            let clause_count = parse_count(tokens, cursor, "AND")?;
            let clauses = parse_clauses(tokens, cursor, context, clause_count)?;
            Ok(QueryOperation::And(clauses))
        }
        "OR" => {
            *cursor += 1;
            let clause_count = parse_count(tokens, cursor, "OR")?;
            let clauses = parse_clauses(tokens, cursor, context, clause_count)?;
            Ok(QueryOperation::Or(clauses))
        }
        "NOT" => Err(QueryError::InvalidInput(
            "Negation is not supported".to_owned(),
        )),
        "LINK_TEMPLATE" => Ok(QueryOperation::Template(parse_template(
            tokens, cursor, context,
        )?)),
        "NODE" | "LINK" | "ATOM" => Ok(QueryOperation::Terminal(parse_terminal(tokens, cursor)?)),
        other => Err(QueryError::InvalidInput(format!(
            "Unexpected query token: {other:?}"
        ))),
    }
}

fn parse_clauses(
    tokens: &[&str],
    cursor: &mut usize,
    context: &str,
    clause_count: usize,
) -> Result<Vec<QueryOperation>, QueryError> {
    let mut clauses = Vec::with_capacity(clause_count);
    for _ in 0..clause_count {
        clauses.push(parse_operation(tokens, cursor, context)?);
    }
    if clauses.is_empty() {
        return Err(QueryError::InvalidInput(
            "Operators require at least one clause".to_owned(),
        ));
    }
    Ok(clauses)
}

fn parse_template(
    tokens: &[&str],
    cursor: &mut usize,
    context: &str,
) -> Result<LinkTemplate, QueryError> {
    expect(tokens, cursor, "LINK_TEMPLATE")?;
    let named_type = next(tokens, cursor)?.to_owned();
    let arity = parse_count(tokens, cursor, "LINK_TEMPLATE")?;
    let mut targets = Vec::with_capacity(arity);
    for _ in 0..arity {
        if peek(tokens, *cursor)? == "LINK_TEMPLATE" {
            targets.push(TemplateTarget::Template(parse_template(
                tokens, cursor, context,
            )?));
        } else {
            targets.push(TemplateTarget::Terminal(parse_terminal(tokens, cursor)?));
        }
    }
    LinkTemplate::new(named_type, targets, context)
}

fn parse_terminal(tokens: &[&str], cursor: &mut usize) -> Result<Terminal, QueryError> {
    match next(tokens, cursor)? {
        "NODE" => {
            let named_type = next(tokens, cursor)?.to_owned();
            let name = next(tokens, cursor)?.to_owned();
            Terminal::node(named_type, name)
        }
        "VARIABLE" => {
            let name = next(tokens, cursor)?;
            if name.len() > MAX_VARIABLE_NAME_SIZE {
                return Err(QueryError::InvalidInput(format!(
                    "Variable name too long: {name:?}"
                )));
            }
            Ok(Terminal::variable(name))
        }
        "ATOM" => {
            let handle = Handle::parse(next(tokens, cursor)?)
                .map_err(|err| QueryError::InvalidInput(err.to_string()))?;
            Ok(Terminal::atom(handle))
        }
        "LINK" => {
            let named_type = next(tokens, cursor)?.to_owned();
            let arity = parse_count(tokens, cursor, "LINK")?;
            let mut target_handles = Vec::with_capacity(arity);
            for _ in 0..arity {
                // Inline links nest only concrete terminals; a pattern at
                // any depth calls for a link template instead.
                match parse_terminal(tokens, cursor)? {
                    Terminal::Node { handle, .. } | Terminal::Atom { handle } => {
                        target_handles.push(handle);
                    }
                    Terminal::Variable { .. } => {
                        return Err(QueryError::InvalidInput(
                            "Invalid Link definition: variable target".to_owned(),
                        ));
                    }
                }
            }
            Terminal::link(&named_type, target_handles)
        }
        other => Err(QueryError::InvalidInput(format!(
            "Unexpected terminal token: {other:?}"
        ))),
    }
}

fn parse_count(tokens: &[&str], cursor: &mut usize, what: &str) -> Result<usize, QueryError> {
    next(tokens, cursor)?
        .parse()
        .map_err(|_| QueryError::InvalidInput(format!("Invalid {what} arity")))
}

fn peek<'a>(tokens: &[&'a str], cursor: usize) -> Result<&'a str, QueryError> {
    tokens
        .get(cursor)
        .copied()
        .ok_or_else(|| QueryError::InvalidInput("Truncated query token stream".to_owned()))
}

fn next<'a>(tokens: &[&'a str], cursor: &mut usize) -> Result<&'a str, QueryError> {
    let token = peek(tokens, *cursor)?;
    *cursor += 1;
    Ok(token)
}

fn expect(tokens: &[&str], cursor: &mut usize, expected: &str) -> Result<(), QueryError> {
    let token = next(tokens, cursor)?;
    if token != expected {
        return Err(QueryError::InvalidInput(format!(
            "Expected {expected}, found {token:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn tokens(stream: &str) -> Vec<&str> {
        stream.split(' ').collect()
    }

    #[test]
    fn parses_a_flat_template() {
        let query = tokens(
            "LINK_TEMPLATE Expression 3 NODE Symbol Similarity NODE Symbol \"human\" VARIABLE v1",
        );
        let operation = parse_query(&query, "").expect("parse");
        let QueryOperation::Template(template) = operation else {
            panic!("expected a template");
        };
        assert_eq!(template.named_type(), "Expression");
        assert_eq!(template.targets().len(), 3);
        assert!(matches!(
            template.targets()[2],
            TemplateTarget::Terminal(Terminal::Variable { .. })
        ));
    }

    #[test]
    fn parses_nested_operators() {
        let query = tokens(
            "AND 2 \
             LINK_TEMPLATE Expression 3 NODE Symbol Similarity VARIABLE v1 NODE Symbol \"human\" \
             LINK_TEMPLATE Expression 3 NODE Symbol Inheritance VARIABLE v1 NODE Symbol \"plant\"",
        );
        let operation = parse_query(&query, "ctx").expect("parse");
        let QueryOperation::And(clauses) = operation else {
            panic!("expected AND");
        };
        assert_eq!(clauses.len(), 2);
        for clause in &clauses {
            assert!(matches!(clause, QueryOperation::Template(_)));
        }
    }

    #[test]
    fn parses_nested_templates() {
        let query = tokens(
            "LINK_TEMPLATE Expression 2 NODE Symbol OddLink \
             LINK_TEMPLATE Expression 3 NODE Symbol Similarity VARIABLE v1 VARIABLE v2",
        );
        let operation = parse_query(&query, "").expect("parse");
        let QueryOperation::Template(template) = operation else {
            panic!("expected a template");
        };
        assert!(matches!(
            template.targets()[1],
            TemplateTarget::Template(_)
        ));
    }

    #[test]
    fn not_is_rejected() {
        let query = tokens("NOT LINK_TEMPLATE Expression 1 VARIABLE v1");
        assert!(parse_query(&query, "").is_err());
    }

    #[test]
    fn malformed_streams_are_rejected() {
        assert!(parse_query(&tokens("LINK_TEMPLATE Expression"), "").is_err());
        assert!(parse_query(&tokens("LINK_TEMPLATE Expression x VARIABLE v1"), "").is_err());
        assert!(parse_query(&tokens("AND 2 LINK_TEMPLATE Expression 1 VARIABLE v1"), "").is_err());
        let trailing =
            tokens("LINK_TEMPLATE Expression 1 VARIABLE v1 junk");
        assert!(parse_query(&trailing, "").is_err());
    }

    #[test]
    fn inline_links_refuse_variables() {
        let query = tokens("LINK_TEMPLATE Expression 2 LINK Expression 1 VARIABLE v1 VARIABLE v2");
        assert!(parse_query(&query, "").is_err());
    }
}
