use chumsky::Parser;
use chumsky::primitive::{any, end, filter, none_of, one_of};

use crate::common::error::{AcctqError, invalid_argument};
use crate::common::parser::CharParser;
use crate::common::strutils::split_comma_list;

/// Comparison operator of a `KEY[op]value` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOp {
    Eq,
    Lt,
    Gt,
}

/// One parsed admin option token. A bare token (no operator) carries no key
/// and is interpreted as a value for the verb's primary key. Comma-separated
/// values are already expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub key: Option<String>,
    pub op: TokenOp,
    pub values: Vec<String>,
}

fn parse_token_inner() -> impl CharParser<Token> {
    let key = filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_')
        .repeated()
        .at_least(1)
        .collect::<String>()
        .labelled("key");
    let op = one_of("=<>").map(|c| match c {
        '<' => TokenOp::Lt,
        '>' => TokenOp::Gt,
        _ => TokenOp::Eq,
    });
    let value = any().repeated().collect::<String>();

    let keyed = key.then(op).then(value).map(|((key, op), value)| Token {
        key: Some(key),
        op,
        values: split_comma_list(&value),
    });
    let bare = none_of("=<>")
        .repeated()
        .at_least(1)
        .collect::<String>()
        .map(|value| Token {
            key: None,
            op: TokenOp::Eq,
            values: split_comma_list(&value),
        });

    keyed.or(bare).then_ignore(end())
}

pub fn parse_token(input: &str) -> crate::Result<Token> {
    parse_token_inner()
        .parse_text(input)
        .map_err(|e| AcctqError::InvalidArgument(e.to_string()))
}

/// The two clauses an admin verb works with: `Where` selects records,
/// `Set` describes the mutation. They may appear in either order on the
/// command line; tokens before either clause word belong to the condition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clauses {
    pub condition: Vec<Token>,
    pub modification: Vec<Token>,
}

pub fn split_clauses(args: &[String]) -> crate::Result<Clauses> {
    enum Side {
        Condition,
        Modification,
    }

    let mut clauses = Clauses::default();
    let mut side = Side::Condition;
    let mut saw_where = false;
    let mut saw_set = false;
    for arg in args {
        if arg.eq_ignore_ascii_case("where") {
            side = Side::Condition;
            saw_where = true;
            continue;
        }
        if arg.eq_ignore_ascii_case("set") {
            side = Side::Modification;
            saw_set = true;
            continue;
        }
        let token = parse_token(arg)?;
        match side {
            Side::Condition => clauses.condition.push(token),
            Side::Modification => clauses.modification.push(token),
        }
    }
    if saw_where && clauses.condition.is_empty() {
        return invalid_argument("`Where` must be followed by a condition".to_string());
    }
    if saw_set && clauses.modification.is_empty() {
        return invalid_argument("`Set` must be followed by a value".to_string());
    }
    Ok(clauses)
}

/// Resolves a user-typed key against a verb's key table by
/// shortest-unambiguous case-insensitive prefix. An exact match always wins
/// (`Name` is not ambiguous despite `Names`).
pub fn match_key<T: Copy>(input: &str, keys: &[(&str, T)]) -> crate::Result<T> {
    for (name, field) in keys {
        if name.eq_ignore_ascii_case(input) {
            return Ok(*field);
        }
    }
    let needle = input.to_ascii_lowercase();
    let candidates: Vec<&(&str, T)> = keys
        .iter()
        .filter(|(name, _)| name.to_ascii_lowercase().starts_with(&needle))
        .collect();
    match candidates.as_slice() {
        [] => invalid_argument(format!("Unknown field `{input}`")),
        [(_, field)] => Ok(*field),
        _ => {
            let names: Vec<&str> = candidates.iter().map(|(name, _)| *name).collect();
            invalid_argument(format!(
                "Ambiguous field `{input}`: matches {}",
                names.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_keyed_token() {
        let token = parse_token("Name=c1").unwrap();
        assert_eq!(token.key.as_deref(), Some("Name"));
        assert_eq!(token.op, TokenOp::Eq);
        assert_eq!(token.values, vec!["c1"]);
    }

    #[test]
    fn test_parse_comparison_ops() {
        assert_eq!(parse_token("MaxJobs<10").unwrap().op, TokenOp::Lt);
        assert_eq!(parse_token("MaxJobs>10").unwrap().op, TokenOp::Gt);
    }

    #[test]
    fn test_parse_bare_token() {
        let token = parse_token("c1,c2").unwrap();
        assert!(token.key.is_none());
        assert_eq!(token.values, vec!["c1", "c2"]);
    }

    #[test]
    fn test_parse_comma_list_values() {
        let token = parse_token("Names=c1,c2,c3").unwrap();
        assert_eq!(token.values, vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn test_parse_empty_value() {
        let token = parse_token("Name=").unwrap();
        assert_eq!(token.key.as_deref(), Some("Name"));
        assert!(token.values.is_empty());
    }

    #[test]
    fn test_split_clauses_default_condition() {
        let clauses = split_clauses(&args(&["c1", "Set", "FairShare=5"])).unwrap();
        assert_eq!(clauses.condition.len(), 1);
        assert_eq!(clauses.modification.len(), 1);
    }

    #[test]
    fn test_split_clauses_either_order() {
        let a = split_clauses(&args(&["Where", "Names=c1", "Set", "FairShare=5"])).unwrap();
        let b = split_clauses(&args(&["Set", "FairShare=5", "Where", "Names=c1"])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_split_clauses_clause_words_ignore_case() {
        let clauses = split_clauses(&args(&["WHERE", "Names=c1", "set", "MaxJobs=2"])).unwrap();
        assert_eq!(clauses.condition.len(), 1);
        assert_eq!(clauses.modification.len(), 1);
    }

    #[test]
    fn test_empty_where_is_hard_error() {
        assert!(matches!(
            split_clauses(&args(&["Where"])),
            Err(AcctqError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_empty_set_is_hard_error() {
        assert!(matches!(
            split_clauses(&args(&["Where", "Names=c1", "Set"])),
            Err(AcctqError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_match_key_prefix() {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        enum F {
            Name,
            Fairshare,
            MaxJobs,
            MaxNodes,
        }
        let keys: &[(&str, F)] = &[
            ("Name", F::Name),
            ("Names", F::Name),
            ("Fairshare", F::Fairshare),
            ("MaxJobs", F::MaxJobs),
            ("MaxNodes", F::MaxNodes),
        ];

        // Unambiguous prefixes
        assert_eq!(match_key("f", keys).unwrap(), F::Fairshare);
        assert_eq!(match_key("maxj", keys).unwrap(), F::MaxJobs);
        // Case-insensitive
        assert_eq!(match_key("FAIRSH", keys).unwrap(), F::Fairshare);
        // Exact match wins over prefix ambiguity
        assert_eq!(match_key("name", keys).unwrap(), F::Name);
        // Ambiguous prefix
        assert!(matches!(
            match_key("max", keys),
            Err(AcctqError::InvalidArgument(_))
        ));
        // Unknown key
        assert!(matches!(
            match_key("walltime", keys),
            Err(AcctqError::InvalidArgument(_))
        ));
    }
}
