//! Condition expressions for `condition` nodes.
//!
//! A deliberately tiny language: it can only see three variables and compare
//! text, so a flow author can never reach the host, the filesystem or the
//! network from an expression.
//!
//! ```text
//! expr     := or
//! or       := and (("or" | "||") and)*
//! and      := unary (("and" | "&&") unary)*
//! unary    := ("not" | "!") unary | primary
//! primary  := "(" expr ")" | "true" | "false" | operand OP operand
//! operand  := user_input | stage | previous_messages | "text" | 'text' | 123
//! OP       := contains | equals | == | != | startsWith | endsWith
//! ```
//!
//! Semantics are fixed:
//! - every comparison is case-sensitive;
//! - `text contains text` is a substring test, `previous_messages contains
//!   text` is true when any message contains the text;
//! - `equals`, `==`, `!=`, `startsWith` and `endsWith` need text on both sides;
//! - integer literals are plain text (`user_input equals 1` compares with `"1"`);
//!   there is no numeric comparison.

use thiserror::Error;

/// Longest expression accepted, in bytes.
pub const MAX_EXPRESSION_LEN: usize = 1024;
/// Deepest nesting of `not` / parentheses accepted.
pub const MAX_DEPTH: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("expression is empty")]
    Empty,

    #[error("expression is {0} bytes long (limit {MAX_EXPRESSION_LEN})")]
    TooLong(usize),

    #[error("expression nests deeper than {MAX_DEPTH} levels")]
    TooDeep,

    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("'{op}' cannot compare {left} with {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
}

/// The only values an expression can observe.
#[derive(Debug, Clone, Copy)]
pub struct Variables<'a> {
    pub user_input: &'a str,
    pub stage: &'a str,
    pub previous_messages: &'a [String],
}

/// Parse and evaluate `expression` in one go.
pub fn evaluate(expression: &str, vars: &Variables<'_>) -> Result<bool, EvalError> {
    parse(expression)?.evaluate(vars)
}

/// Parse `expression` without evaluating it. Flow validation uses this to
/// flag expressions that would always take the `false` branch.
pub fn parse(expression: &str) -> Result<Condition, EvalError> {
    if expression.len() > MAX_EXPRESSION_LEN {
        return Err(EvalError::TooLong(expression.len()));
    }
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(EvalError::Empty);
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.or()?;
    match parser.peek() {
        None => Ok(Condition { expr }),
        Some(tok) => Err(EvalError::UnexpectedToken(tok.to_string())),
    }
}

/// A parsed expression, ready to be evaluated against any number of contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    expr: Expr,
}

impl Condition {
    pub fn evaluate(&self, vars: &Variables<'_>) -> Result<bool, EvalError> {
        self.expr.eval(vars)
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Text(String),
    LParen,
    RParen,
    AndAnd,
    OrOr,
    Bang,
    EqEq,
    BangEq,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Word(w) => f.write_str(w),
            Self::Text(t) => write!(f, "\"{t}\""),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
            Self::AndAnd => f.write_str("&&"),
            Self::OrOr => f.write_str("||"),
            Self::Bang => f.write_str("!"),
            Self::EqEq => f.write_str("=="),
            Self::BangEq => f.write_str("!="),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' | '\'' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => text.push(escaped),
                            None => break,
                        },
                        c if c == ch => {
                            closed = true;
                            break;
                        }
                        c => text.push(c),
                    }
                }
                if !closed {
                    return Err(EvalError::UnterminatedString);
                }
                tokens.push(Token::Text(text));
            }
            '&' | '|' | '=' => {
                chars.next();
                match chars.next() {
                    Some((_, next)) if next == ch => tokens.push(match ch {
                        '&' => Token::AndAnd,
                        '|' => Token::OrOr,
                        _ => Token::EqEq,
                    }),
                    _ => return Err(EvalError::UnexpectedChar { ch, offset }),
                }
            }
            '!' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    tokens.push(Token::BangEq);
                } else {
                    tokens.push(Token::Bang);
                }
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                tokens.push(Token::Text(digits));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&(_, w)) = chars.peek() {
                    if !(w.is_ascii_alphanumeric() || w == '_') {
                        break;
                    }
                    word.push(w);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
            other => return Err(EvalError::UnexpectedChar { ch: other, offset }),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variable {
    UserInput,
    Stage,
    PreviousMessages,
}

impl Variable {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "user_input" => Some(Self::UserInput),
            "stage" => Some(Self::Stage),
            "previous_messages" => Some(Self::PreviousMessages),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Var(Variable),
    Literal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Contains,
    Equals,
    NotEquals,
    StartsWith,
    EndsWith,
}

impl CompareOp {
    fn symbol(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Equals => "equals",
            Self::NotEquals => "!=",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Bool(bool),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, EvalError> {
        let tok = self.tokens.get(self.pos).cloned().ok_or(EvalError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok)
    }

    fn peek_is_word(&self, words: &[&str]) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if words.contains(&w.as_str()))
    }

    fn descend(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EvalError::TooDeep);
        }
        Ok(())
    }

    fn or(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.and()?;
        while matches!(self.peek(), Some(Token::OrOr)) || self.peek_is_word(&["or"]) {
            self.pos += 1;
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.unary()?;
        while matches!(self.peek(), Some(Token::AndAnd)) || self.peek_is_word(&["and"]) {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        if matches!(self.peek(), Some(Token::Bang)) || self.peek_is_word(&["not"]) {
            self.pos += 1;
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.next()? {
            Token::LParen => {
                self.descend()?;
                let inner = self.or()?;
                self.depth -= 1;
                match self.next()? {
                    Token::RParen => Ok(inner),
                    other => Err(EvalError::UnexpectedToken(other.to_string())),
                }
            }
            Token::Word(w) if w == "true" => Ok(Expr::Bool(true)),
            Token::Word(w) if w == "false" => Ok(Expr::Bool(false)),
            tok => {
                let left = Self::operand(tok)?;
                let op = self.compare_op()?;
                let right = Self::operand(self.next()?)?;
                Ok(Expr::Compare { left, op, right })
            }
        }
    }

    fn operand(tok: Token) -> Result<Operand, EvalError> {
        match tok {
            Token::Text(text) => Ok(Operand::Literal(text)),
            Token::Word(word) => Variable::from_name(&word)
                .map(Operand::Var)
                .ok_or(EvalError::UnknownIdentifier(word)),
            other => Err(EvalError::UnexpectedToken(other.to_string())),
        }
    }

    fn compare_op(&mut self) -> Result<CompareOp, EvalError> {
        match self.next()? {
            Token::EqEq => Ok(CompareOp::Equals),
            Token::BangEq => Ok(CompareOp::NotEquals),
            Token::Word(w) => match w.as_str() {
                "contains" => Ok(CompareOp::Contains),
                "equals" => Ok(CompareOp::Equals),
                "startsWith" => Ok(CompareOp::StartsWith),
                "endsWith" => Ok(CompareOp::EndsWith),
                _ => Err(EvalError::UnexpectedToken(w)),
            },
            other => Err(EvalError::UnexpectedToken(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

enum Value<'a> {
    Text(&'a str),
    List(&'a [String]),
}

impl Value<'_> {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::List(_) => "a message list",
        }
    }
}

impl Operand {
    fn resolve<'a>(&'a self, vars: &Variables<'a>) -> Value<'a> {
        match self {
            Self::Literal(text) => Value::Text(text),
            Self::Var(Variable::UserInput) => Value::Text(vars.user_input),
            Self::Var(Variable::Stage) => Value::Text(vars.stage),
            Self::Var(Variable::PreviousMessages) => Value::List(vars.previous_messages),
        }
    }
}

impl Expr {
    fn eval(&self, vars: &Variables<'_>) -> Result<bool, EvalError> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Not(inner) => Ok(!inner.eval(vars)?),
            Self::And(a, b) => Ok(a.eval(vars)? && b.eval(vars)?),
            Self::Or(a, b) => Ok(a.eval(vars)? || b.eval(vars)?),
            Self::Compare { left, op, right } => {
                let (l, r) = (left.resolve(vars), right.resolve(vars));
                match (op, &l, &r) {
                    (CompareOp::Contains, Value::Text(h), Value::Text(n)) => Ok(h.contains(n)),
                    (CompareOp::Contains, Value::List(items), Value::Text(n)) => {
                        Ok(items.iter().any(|m| m.contains(n)))
                    }
                    (CompareOp::Equals, Value::Text(a), Value::Text(b)) => Ok(a == b),
                    (CompareOp::NotEquals, Value::Text(a), Value::Text(b)) => Ok(a != b),
                    (CompareOp::StartsWith, Value::Text(a), Value::Text(b)) => Ok(a.starts_with(b)),
                    (CompareOp::EndsWith, Value::Text(a), Value::Text(b)) => Ok(a.ends_with(b)),
                    _ => Err(EvalError::TypeMismatch {
                        op: op.symbol(),
                        left: l.type_name(),
                        right: r.type_name(),
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>(user_input: &'a str, stage: &'a str, previous: &'a [String]) -> Variables<'a> {
        Variables {
            user_input,
            stage,
            previous_messages: previous,
        }
    }

    #[test]
    fn contains_is_case_sensitive_substring() {
        let v = vars("yes please", "", &[]);
        assert_eq!(evaluate(r#"user_input contains "yes""#, &v), Ok(true));
        assert_eq!(evaluate(r#"user_input contains "YES""#, &v), Ok(false));
        assert_eq!(evaluate("user_input contains 'please'", &v), Ok(true));
    }

    #[test]
    fn previous_messages_contains_checks_every_message() {
        let history = vec!["bot: Hi".to_string(), "user: price list?".to_string()];
        let v = vars("", "", &history);
        assert_eq!(evaluate(r#"previous_messages contains "price""#, &v), Ok(true));
        assert_eq!(evaluate(r#"previous_messages contains "refund""#, &v), Ok(false));
    }

    #[test]
    fn connectives_and_precedence() {
        let v = vars("yes", "Qualified", &[]);
        assert_eq!(
            evaluate(r#"user_input equals "no" or stage == "Qualified" and not user_input startsWith "n""#, &v),
            Ok(true)
        );
        assert_eq!(
            evaluate(r#"(user_input equals "no" || stage != "Qualified") && true"#, &v),
            Ok(false)
        );
        assert_eq!(evaluate(r#"!(stage endsWith "fied")"#, &v), Ok(false));
    }

    #[test]
    fn integer_literals_compare_as_text() {
        let v = vars("1", "", &[]);
        assert_eq!(evaluate("user_input equals 1", &v), Ok(true));
        assert_eq!(evaluate("user_input == 01", &v), Ok(false));
    }

    #[test]
    fn escapes_inside_string_literals() {
        let v = vars(r#"say "hi""#, "", &[]);
        assert_eq!(evaluate(r#"user_input contains "\"hi\"""#, &v), Ok(true));
    }

    #[test]
    fn unknown_identifiers_are_rejected() {
        let v = vars("x", "", &[]);
        assert_eq!(
            evaluate(r#"process contains "x""#, &v),
            Err(EvalError::UnknownIdentifier("process".into()))
        );
        assert_eq!(
            evaluate(r#"user_input matches "x""#, &v),
            Err(EvalError::UnexpectedToken("matches".into()))
        );
    }

    #[test]
    fn type_mismatches_are_errors() {
        let v = vars("x", "", &[]);
        assert!(matches!(
            evaluate(r#"previous_messages equals "x""#, &v),
            Err(EvalError::TypeMismatch { op: "equals", .. })
        ));
        assert!(matches!(
            evaluate(r#""x" contains previous_messages"#, &v),
            Err(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn malformed_expressions_are_errors() {
        let v = vars("x", "", &[]);
        assert_eq!(evaluate("", &v), Err(EvalError::Empty));
        assert_eq!(evaluate(r#"user_input contains "x"#, &v), Err(EvalError::UnterminatedString));
        assert_eq!(evaluate("user_input contains", &v), Err(EvalError::UnexpectedEnd));
        assert!(matches!(
            evaluate(r#"user_input contains "x"; drop"#, &v),
            Err(EvalError::UnexpectedChar { ch: ';', .. })
        ));
        assert!(matches!(
            evaluate(r#"user_input = "x""#, &v),
            Err(EvalError::UnexpectedChar { ch: '=', .. })
        ));
        assert_eq!(
            evaluate(r#"true true"#, &v),
            Err(EvalError::UnexpectedToken("true".into()))
        );
    }

    #[test]
    fn nesting_and_length_are_bounded() {
        let v = vars("x", "", &[]);
        let deep = format!("{}true{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert_eq!(evaluate(&deep, &v), Err(EvalError::TooDeep));

        let ok = format!("{}true{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(evaluate(&ok, &v), Ok(true));

        let long = format!(r#"user_input contains "{}""#, "a".repeat(MAX_EXPRESSION_LEN));
        assert!(matches!(evaluate(&long, &v), Err(EvalError::TooLong(_))));
    }
}
