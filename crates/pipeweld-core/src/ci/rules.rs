//! The `rules:` expression language and filtering semantics.
//!
//! Jobs and workflows carry ordered rule lists. Each rule optionally has
//! an `if:` expression evaluated against the pipeline's variable
//! context; the first matching rule decides the outcome via its `when:`.
//! A rule without `if:` always matches. If rules are present and none
//! match, the subject is dropped.
//!
//! The expression grammar is deliberately small:
//!
//! ```text
//! expr       := or
//! or         := and ("||" and)*
//! and        := term ("&&" term)*
//! term       := "(" expr ")" | variable comparison?
//! comparison := ("==" | "!=") (string | "null")
//! variable   := "$" NAME
//! ```
//!
//! A bare `$VAR` is true when the variable is defined and non-empty.
//! Comparing against `null` tests definedness.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// When a matched rule lets its subject run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum When {
    /// Run when earlier stages succeed.
    #[default]
    OnSuccess,
    /// Run regardless of earlier outcomes.
    Always,
    /// Do not run; the subject is removed from the pipeline.
    Never,
}

impl When {
    /// Returns the string representation of this value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OnSuccess => "on_success",
            Self::Always => "always",
            Self::Never => "never",
        }
    }
}

impl std::fmt::Display for When {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of a `rules:` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    /// Condition expression; a rule without one always matches.
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub if_expr: Option<String>,

    /// Outcome when this rule is the first match.
    #[serde(default)]
    pub when: When,
}

impl Rule {
    /// Creates an unconditional rule with the given outcome.
    #[must_use]
    pub fn unconditional(when: When) -> Self {
        Self {
            if_expr: None,
            when,
        }
    }

    /// Creates a conditional rule.
    #[must_use]
    pub fn when_matches(expr: impl Into<String>, when: When) -> Self {
        Self {
            if_expr: Some(expr.into()),
            when,
        }
    }
}

/// Errors from parsing or evaluating a rules expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RulesError {
    /// The expression contained an unexpected character.
    #[error("invalid rules expression '{expression}': unexpected character at offset {offset}")]
    UnexpectedCharacter {
        /// The full expression text.
        expression: String,
        /// Byte offset of the offending character.
        offset: usize,
    },

    /// The expression ended prematurely or had trailing tokens.
    #[error("invalid rules expression '{expression}': {reason}")]
    Malformed {
        /// The full expression text.
        expression: String,
        /// What the parser expected.
        reason: String,
    },
}

/// Result of evaluating a rule list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    /// A rule matched and the subject runs with the given `when`.
    Keep(When),
    /// The subject is removed: a `when: never` rule matched, or no rule
    /// matched at all.
    Drop,
}

impl RuleOutcome {
    /// Returns `true` when the subject stays in the pipeline.
    #[must_use]
    pub const fn is_kept(self) -> bool {
        matches!(self, Self::Keep(_))
    }
}

/// Evaluates an ordered rule list against a variable context.
///
/// An empty list keeps the subject with the default `when`.
///
/// # Errors
///
/// Returns [`RulesError`] if any reachable `if:` expression is
/// malformed. Expressions after the first match are not evaluated.
pub fn evaluate_rules(
    rules: &[Rule],
    variables: &BTreeMap<String, String>,
) -> Result<RuleOutcome, RulesError> {
    if rules.is_empty() {
        return Ok(RuleOutcome::Keep(When::default()));
    }
    for rule in rules {
        let matched = match &rule.if_expr {
            None => true,
            Some(expr) => evaluate_expression(expr, variables)?,
        };
        if matched {
            return Ok(match rule.when {
                When::Never => RuleOutcome::Drop,
                other => RuleOutcome::Keep(other),
            });
        }
    }
    Ok(RuleOutcome::Drop)
}

/// Parses an expression without evaluating it, for early validation.
///
/// # Errors
///
/// Returns [`RulesError`] if the expression is malformed.
pub fn check_expression(expression: &str) -> Result<(), RulesError> {
    evaluate_expression(expression, &BTreeMap::new()).map(|_| ())
}

/// Evaluates a single `if:` expression against a variable context.
///
/// # Errors
///
/// Returns [`RulesError`] if the expression is malformed.
pub fn evaluate_expression(
    expression: &str,
    variables: &BTreeMap<String, String>,
) -> Result<bool, RulesError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        expression,
        tokens: &tokens,
        pos: 0,
        variables,
    };
    let value = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(RulesError::Malformed {
            expression: expression.to_string(),
            reason: "trailing tokens after expression".to_string(),
        });
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Variable(String),
    StringLit(String),
    Null,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    LParen,
    RParen,
}

fn tokenize(expression: &str) -> Result<Vec<Token>, RulesError> {
    let bytes = expression.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' => i += 1,
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            b'$' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len()
                    && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                if end == start {
                    return Err(RulesError::UnexpectedCharacter {
                        expression: expression.to_string(),
                        offset: i,
                    });
                }
                tokens.push(Token::Variable(expression[start..end].to_string()));
                i = end;
            }
            b'"' | b'\'' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end] != quote {
                    end += 1;
                }
                if end >= bytes.len() {
                    return Err(RulesError::Malformed {
                        expression: expression.to_string(),
                        reason: "unterminated string literal".to_string(),
                    });
                }
                tokens.push(Token::StringLit(expression[start..end].to_string()));
                i = end + 1;
            }
            b'=' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(Token::EqEq);
                i += 2;
            }
            b'!' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            b'&' if bytes.get(i + 1) == Some(&b'&') => {
                tokens.push(Token::AndAnd);
                i += 2;
            }
            b'|' if bytes.get(i + 1) == Some(&b'|') => {
                tokens.push(Token::OrOr);
                i += 2;
            }
            b'n' if expression[i..].starts_with("null")
                && !bytes
                    .get(i + 4)
                    .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_') =>
            {
                tokens.push(Token::Null);
                i += 4;
            }
            _ => {
                return Err(RulesError::UnexpectedCharacter {
                    expression: expression.to_string(),
                    offset: i,
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    expression: &'a str,
    tokens: &'a [Token],
    pos: usize,
    variables: &'a BTreeMap<String, String>,
}

impl Parser<'_> {
    fn malformed(&self, reason: &str) -> RulesError {
        RulesError::Malformed {
            expression: self.expression.to_string(),
            reason: reason.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn parse_or(&mut self) -> Result<bool, RulesError> {
        let mut value = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn parse_and(&mut self) -> Result<bool, RulesError> {
        let mut value = self.parse_term()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.pos += 1;
            let rhs = self.parse_term()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn parse_term(&mut self) -> Result<bool, RulesError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let value = self.parse_or()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(self.malformed("expected closing parenthesis"));
                }
                self.pos += 1;
                Ok(value)
            }
            Some(Token::Variable(name)) => {
                let name = name.clone();
                self.pos += 1;
                match self.peek() {
                    Some(Token::EqEq) => {
                        self.pos += 1;
                        let rhs = self.parse_value()?;
                        Ok(self.compare(&name, rhs.as_deref(), true))
                    }
                    Some(Token::NotEq) => {
                        self.pos += 1;
                        let rhs = self.parse_value()?;
                        Ok(self.compare(&name, rhs.as_deref(), false))
                    }
                    _ => {
                        // Bare variable: defined and non-empty.
                        Ok(self
                            .variables
                            .get(&name)
                            .is_some_and(|value| !value.is_empty()))
                    }
                }
            }
            _ => Err(self.malformed("expected '(' or a variable reference")),
        }
    }

    /// Parses a comparison right-hand side: a string literal or `null`.
    fn parse_value(&mut self) -> Result<Option<String>, RulesError> {
        match self.peek() {
            Some(Token::StringLit(text)) => {
                let text = text.clone();
                self.pos += 1;
                Ok(Some(text))
            }
            Some(Token::Null) => {
                self.pos += 1;
                Ok(None)
            }
            _ => Err(self.malformed("expected a string literal or null after comparison")),
        }
    }

    fn compare(&self, name: &str, rhs: Option<&str>, equality: bool) -> bool {
        let lhs = self.variables.get(name).map(String::as_str);
        let equal = match rhs {
            // `$VAR == null` is true when the variable is undefined.
            None => lhs.is_none(),
            Some(expected) => lhs == Some(expected),
        };
        if equality { equal } else { !equal }
    }
}
