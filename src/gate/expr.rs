// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Condition expressions
//!
//! A small boolean language for `when.if`:
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | compare
//! compare := primary ( ( "==" | "!=" ) primary )?
//! primary := "(" expr ")" | 'string' | true | false | ident | ident "(" args ")"
//! ```
//!
//! Identifiers name trigger facts (`event`, `ref`, `branch`); calls read
//! upstream outcomes (`success()`, `failure()`, `skipped()`, `always()`,
//! `outcome('stage')`) or test strings (`matches`, `contains`,
//! `startsWith`, `endsWith`).

use std::fmt;

use super::{BranchPattern, GateContext, UpstreamOutcome};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    True,
    False,
    LParen,
    RParen,
    Comma,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{}", s),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Not => write!(f, "!"),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | ',' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    _ => Token::Comma,
                });
            }
            '!' => {
                chars.next();
                if chars.next_if(|&(_, c)| c == '=').is_some() {
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '=' | '&' | '|' => {
                chars.next();
                if chars.next_if(|&(_, next)| next == c).is_none() {
                    return Err(format!("expected '{}{}' at position {}", c, c, pos));
                }
                tokens.push(match c {
                    '=' => Token::Eq,
                    '&' => Token::And,
                    _ => Token::Or,
                });
            }
            '\'' | '"' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                for (_, ch) in chars.by_ref() {
                    if ch == c {
                        closed = true;
                        break;
                    }
                    value.push(ch);
                }
                if !closed {
                    return Err(format!("unterminated string starting at position {}", pos));
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some((_, ch)) =
                    chars.next_if(|&(_, ch)| ch.is_ascii_alphanumeric() || ch == '_')
                {
                    ident.push(ch);
                }
                tokens.push(match ident.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Ident(ident),
                });
            }
            other => {
                return Err(format!("unexpected character '{}' at position {}", other, pos));
            }
        }
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Bool(bool),
    Str(String),
    Fact(String),
    Call { name: String, args: Vec<Expr> },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        let found = self.advance();
        if found == expected {
            Ok(())
        } else {
            Err(format!("expected {} but found {}", expected, found))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while *self.peek() == Token::Or {
            self.advance();
            left = Expr::Or(Box::new(left), Box::new(self.parse_and()?));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        while *self.peek() == Token::And {
            self.advance();
            left = Expr::And(Box::new(left), Box::new(self.parse_unary()?));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if *self.peek() == Token::Not {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, String> {
        let left = self.parse_primary()?;
        match self.peek() {
            Token::Eq => {
                self.advance();
                Ok(Expr::Eq(Box::new(left), Box::new(self.parse_primary()?)))
            }
            Token::Ne => {
                self.advance();
                Ok(Expr::Ne(Box::new(left), Box::new(self.parse_primary()?)))
            }
            _ => Ok(left),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Ident(name) if *self.peek() == Token::LParen => {
                self.advance();
                let mut args = Vec::new();
                if *self.peek() != Token::RParen {
                    args.push(self.parse_or()?);
                    while *self.peek() == Token::Comma {
                        self.advance();
                        args.push(self.parse_or()?);
                    }
                }
                self.expect(Token::RParen)?;
                Ok(Expr::Call { name, args })
            }
            Token::Ident(name) => Ok(Expr::Fact(name)),
            other => Err(format!("unexpected {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Bool(bool),
    Str(String),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
        }
    }

    fn into_string(self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Str(s) => s,
        }
    }
}

/// A parsed `when.if` condition
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    root: Expr,
}

impl Expression {
    /// Parse a condition, reporting the first syntax problem
    pub fn parse(source: &str) -> Result<Self, String> {
        let tokens = tokenize(source)?;
        if tokens.len() == 1 {
            return Err("condition is empty".to_string());
        }

        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.parse_or()?;
        if *parser.peek() != Token::Eof {
            return Err(format!("unexpected {} after end of condition", parser.peek()));
        }

        check(&root)?;
        Ok(Self { root })
    }

    /// Evaluate against the facts of one gate decision
    pub fn evaluate(&self, ctx: &GateContext<'_>) -> Result<bool, String> {
        Ok(eval(&self.root, ctx)?.truthy())
    }
}

const FACTS: [&str; 3] = ["event", "ref", "branch"];

fn function_arity(name: &str) -> Option<usize> {
    match name {
        "always" | "success" | "failure" | "skipped" => Some(0),
        "outcome" => Some(1),
        "matches" | "contains" | "startsWith" | "endsWith" => Some(2),
        _ => None,
    }
}

fn unknown_identifier(name: &str) -> String {
    format!("unknown identifier '{}' (expected event, ref or branch)", name)
}

/// Reject unknown names and wrong argument counts anywhere in the tree,
/// including operands that `&&` and `||` never reach
fn check(expr: &Expr) -> Result<(), String> {
    match expr {
        Expr::Bool(_) | Expr::Str(_) => Ok(()),
        Expr::Fact(name) if FACTS.contains(&name.as_str()) => Ok(()),
        Expr::Fact(name) => Err(unknown_identifier(name)),
        Expr::Not(inner) => check(inner),
        Expr::And(left, right)
        | Expr::Or(left, right)
        | Expr::Eq(left, right)
        | Expr::Ne(left, right) => {
            check(left)?;
            check(right)
        }
        Expr::Call { name, args } => match function_arity(name) {
            None => Err(format!("unknown function '{}'", name)),
            Some(expected) if expected != args.len() => Err(format!(
                "{}() takes {} argument(s), got {}",
                name,
                expected,
                args.len()
            )),
            Some(_) => args.iter().try_for_each(check),
        },
    }
}

fn eval(expr: &Expr, ctx: &GateContext<'_>) -> Result<Value, String> {
    match expr {
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Fact(name) => match name.as_str() {
            "event" => Ok(Value::Str(ctx.trigger.event.as_str().to_string())),
            "ref" => Ok(Value::Str(ctx.trigger.git_ref.clone())),
            "branch" => Ok(Value::Str(ctx.trigger.branch().to_string())),
            other => Err(unknown_identifier(other)),
        },
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, ctx)?.truthy())),
        Expr::And(left, right) => {
            let result = eval(left, ctx)?.truthy() && eval(right, ctx)?.truthy();
            Ok(Value::Bool(result))
        }
        Expr::Or(left, right) => {
            let result = eval(left, ctx)?.truthy() || eval(right, ctx)?.truthy();
            Ok(Value::Bool(result))
        }
        Expr::Eq(left, right) => Ok(Value::Bool(eval(left, ctx)? == eval(right, ctx)?)),
        Expr::Ne(left, right) => Ok(Value::Bool(eval(left, ctx)? != eval(right, ctx)?)),
        Expr::Call { name, args } => call(name, args, ctx),
    }
}

fn call(name: &str, args: &[Expr], ctx: &GateContext<'_>) -> Result<Value, String> {
    let arity = |expected: usize| -> Result<(), String> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(format!(
                "{}() takes {} argument(s), got {}",
                name,
                expected,
                args.len()
            ))
        }
    };
    let string_arg =
        |i: usize| -> Result<String, String> { Ok(eval(&args[i], ctx)?.into_string()) };

    match name {
        "always" => {
            arity(0)?;
            Ok(Value::Bool(true))
        }
        "success" => {
            arity(0)?;
            Ok(Value::Bool(ctx.upstream.iter().all(|(_, o)| o.satisfies())))
        }
        "failure" => {
            arity(0)?;
            Ok(Value::Bool(
                ctx.upstream
                    .iter()
                    .any(|(_, o)| matches!(o, UpstreamOutcome::Failed { optional: false })),
            ))
        }
        "skipped" => {
            arity(0)?;
            Ok(Value::Bool(
                ctx.upstream
                    .iter()
                    .any(|(_, o)| *o == UpstreamOutcome::Skipped),
            ))
        }
        "outcome" => {
            arity(1)?;
            let stage = string_arg(0)?;
            ctx.upstream
                .iter()
                .find(|(name, _)| *name == stage)
                .map(|(_, o)| Value::Str(o.as_str().to_string()))
                .ok_or_else(|| format!("outcome('{}') does not name a direct dependency", stage))
        }
        "matches" => {
            arity(2)?;
            let value = string_arg(0)?;
            let pattern = BranchPattern::new(&string_arg(1)?).map_err(|e| e.to_string())?;
            Ok(Value::Bool(pattern.matches(&value)))
        }
        "contains" => {
            arity(2)?;
            Ok(Value::Bool(string_arg(0)?.contains(&string_arg(1)?)))
        }
        "startsWith" => {
            arity(2)?;
            Ok(Value::Bool(string_arg(0)?.starts_with(&string_arg(1)?)))
        }
        "endsWith" => {
            arity(2)?;
            Ok(Value::Bool(string_arg(0)?.ends_with(&string_arg(1)?)))
        }
        other => Err(format!("unknown function '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Trigger;
    use crate::pipeline::EventKind;

    fn eval_with(source: &str, upstream: &[(&str, UpstreamOutcome)]) -> Result<bool, String> {
        let trigger = Trigger::new(EventKind::Push, "refs/heads/release/v2");
        let ctx = GateContext {
            trigger: &trigger,
            upstream,
        };
        Expression::parse(source)?.evaluate(&ctx)
    }

    #[test]
    fn test_facts_and_comparison() {
        assert!(eval_with("event == 'push'", &[]).unwrap());
        assert!(eval_with("branch == \"release/v2\"", &[]).unwrap());
        assert!(eval_with("ref != 'refs/heads/main'", &[]).unwrap());
        assert!(!eval_with("event == 'schedule'", &[]).unwrap());
    }

    #[test]
    fn test_precedence() {
        // && binds tighter than ||
        assert!(eval_with("true || false && false", &[]).unwrap());
        assert!(!eval_with("(true || false) && false", &[]).unwrap());
        assert!(eval_with("!false && !(event == 'schedule')", &[]).unwrap());
    }

    #[test]
    fn test_status_functions() {
        let upstream = [
            ("lint", UpstreamOutcome::Succeeded),
            ("test", UpstreamOutcome::Failed { optional: false }),
        ];
        assert!(!eval_with("success()", &upstream).unwrap());
        assert!(eval_with("failure()", &upstream).unwrap());
        assert!(!eval_with("skipped()", &upstream).unwrap());
        assert!(eval_with("always()", &upstream).unwrap());
        assert!(eval_with("outcome('test') == 'failure'", &upstream).unwrap());
    }

    #[test]
    fn test_optional_failures_count_as_success() {
        let upstream = [("audit", UpstreamOutcome::Failed { optional: true })];
        assert!(eval_with("success()", &upstream).unwrap());
        assert!(!eval_with("failure()", &upstream).unwrap());
    }

    #[test]
    fn test_string_functions() {
        assert!(eval_with("matches(branch, 'release/*')", &[]).unwrap());
        assert!(!eval_with("matches(branch, 'feature/**')", &[]).unwrap());
        assert!(eval_with("startsWith(ref, 'refs/heads/')", &[]).unwrap());
        assert!(eval_with("endsWith(branch, 'v2')", &[]).unwrap());
        assert!(eval_with("contains(branch, 'lease')", &[]).unwrap());
    }

    #[test]
    fn test_parse_errors() {
        assert!(Expression::parse("").is_err());
        assert!(Expression::parse("success(").is_err());
        assert!(Expression::parse("event = 'push'").is_err());
        assert!(Expression::parse("'unterminated").is_err());
        assert!(Expression::parse("success() success()").is_err());
        assert!(Expression::parse("event == $x").is_err());
    }

    #[test]
    fn test_unknown_names_are_rejected_before_evaluation() {
        // the right-hand side is never evaluated on a push
        let typo = Expression::parse("event == 'schedule' && brnach == 'main'");
        assert!(typo.unwrap_err().contains("brnach"));

        let typo = Expression::parse("always() || sucess()");
        assert!(typo.unwrap_err().contains("sucess"));

        assert!(Expression::parse("true || outcome()").is_err());
        assert!(Expression::parse("false && contains(branch, startsWith(ref))").is_err());
        assert!(Expression::parse("event == 'push' || matches(branch, 'release/*')").is_ok());
    }

    #[test]
    fn test_evaluation_errors() {
        assert!(eval_with("unknown()", &[]).is_err());
        assert!(eval_with("workflow == 'x'", &[]).is_err());
        assert!(eval_with("success(1)", &[]).is_err());
        assert!(eval_with("outcome('elsewhere') == 'success'", &[]).is_err());
    }
}
