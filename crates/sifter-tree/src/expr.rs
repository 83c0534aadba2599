//! Sandboxed branch-condition language for expression rules.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or      := and (("or" | "||") and)*
//! and     := unary (("and" | "&&") unary)*
//! unary   := ("not" | "!") unary | primary
//! primary := "(" or ")" | "true" | "false" | compare
//! compare := operand (cmp operand)+
//! operand := "-"? (number | identifier)
//! cmp     := ">" | ">=" | "<" | "<=" | "==" | "!="
//! ```
//!
//! Chained comparisons read pairwise, so `0.1 < x <= 0.5` means
//! `0.1 < x and x <= 0.5`. Identifiers resolve only against the namespace
//! handed to [`Expression::eval`]; nothing else is reachable.

use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::ExprError;
use crate::rule::CompareOp;

/// Longest accepted condition, in characters.
pub const MAX_EXPRESSION_LEN: usize = 1024;

/// Deepest accepted nesting of parentheses and negations.
pub const MAX_EXPRESSION_DEPTH: usize = 64;

/// Name to value map a condition is evaluated against. `None` marks a known but absent metric.
pub type Namespace = BTreeMap<String, Option<f64>>;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    LParen,
    RParen,
    And,
    Or,
    Not,
    True,
    False,
    Minus,
    Cmp(CompareOp),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Ident(name) => format!("identifier {name}"),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::And => "'and'".to_string(),
            Token::Or => "'or'".to_string(),
            Token::Not => "'not'".to_string(),
            Token::True => "'true'".to_string(),
            Token::False => "'false'".to_string(),
            Token::Minus => "'-'".to_string(),
            Token::Cmp(op) => format!("'{op}'"),
        }
    }
}

// --- Tokenizer ---

struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if matches!(self.chars.peek(), Some(&(_, c)) if c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn tokenize(mut self) -> Result<Vec<(Token, usize)>, ExprError> {
        let mut tokens = Vec::new();
        while let Some(&(offset, ch)) = self.chars.peek() {
            if ch.is_whitespace() {
                self.chars.next();
                continue;
            }
            let token = match ch {
                '(' => {
                    self.chars.next();
                    Token::LParen
                }
                ')' => {
                    self.chars.next();
                    Token::RParen
                }
                '-' => {
                    self.chars.next();
                    Token::Minus
                }
                '>' | '<' => {
                    self.chars.next();
                    let inclusive = self.eat('=');
                    Token::Cmp(match (ch, inclusive) {
                        ('>', false) => CompareOp::Gt,
                        ('>', true) => CompareOp::Ge,
                        ('<', false) => CompareOp::Lt,
                        _ => CompareOp::Le,
                    })
                }
                '=' => {
                    self.chars.next();
                    if !self.eat('=') {
                        return Err(ExprError::UnexpectedChar { ch, offset });
                    }
                    Token::Cmp(CompareOp::Eq)
                }
                '!' => {
                    self.chars.next();
                    if self.eat('=') { Token::Cmp(CompareOp::Ne) } else { Token::Not }
                }
                '&' | '|' => {
                    self.chars.next();
                    if !self.eat(ch) {
                        return Err(ExprError::UnexpectedChar { ch, offset });
                    }
                    if ch == '&' { Token::And } else { Token::Or }
                }
                c if c.is_ascii_digit() || c == '.' => self.number(offset)?,
                c if c.is_ascii_alphabetic() || c == '_' => self.word(offset),
                _ => return Err(ExprError::UnexpectedChar { ch, offset }),
            };
            tokens.push((token, offset));
        }
        Ok(tokens)
    }

    fn take_while(&mut self, start: usize, pred: impl Fn(char) -> bool) -> usize {
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            end = i + c.len_utf8();
            self.chars.next();
        }
        end
    }

    fn number(&mut self, start: usize) -> Result<Token, ExprError> {
        let mut end = self.take_while(start, |c| c.is_ascii_digit() || c == '.');
        if matches!(self.chars.peek(), Some(&(_, 'e' | 'E'))) {
            self.chars.next();
            end += 1;
            if let Some(&(i, sign @ ('+' | '-'))) = self.chars.peek() {
                self.chars.next();
                end = i + sign.len_utf8();
            }
            end = self.take_while(end, |c| c.is_ascii_digit());
        }
        let raw = &self.source[start..end];
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Token::Number)
            .ok_or_else(|| ExprError::InvalidNumber { raw: raw.to_string() })
    }

    fn word(&mut self, start: usize) -> Token {
        let end = self.take_while(start, |c| c.is_ascii_alphanumeric() || c == '_');
        match &self.source[start..end] {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "true" | "True" => Token::True,
            "false" | "False" => Token::False,
            name => Token::Ident(name.to_string()),
        }
    }
}

// --- AST ---

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    Metric { name: String, negated: bool },
}

impl Operand {
    fn resolve(&self, namespace: &Namespace) -> Result<f64, ExprError> {
        match self {
            Operand::Number(n) => Ok(*n),
            Operand::Metric { name, negated } => match namespace.get(name) {
                None => Err(ExprError::UnknownMetric { name: name.clone() }),
                Some(None) => Err(ExprError::MissingValue { name: name.clone() }),
                Some(Some(v)) => Ok(if *negated { -v } else { *v }),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Ast {
    Bool(bool),
    Not(Box<Ast>),
    And(Vec<Ast>),
    Or(Vec<Ast>),
    Compare {
        first: Operand,
        rest: Vec<(CompareOp, Operand)>,
    },
}

impl Ast {
    fn eval(&self, namespace: &Namespace) -> Result<bool, ExprError> {
        match self {
            Ast::Bool(b) => Ok(*b),
            Ast::Not(inner) => Ok(!inner.eval(namespace)?),
            Ast::And(terms) => {
                for term in terms {
                    if !term.eval(namespace)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Ast::Or(terms) => {
                for term in terms {
                    if term.eval(namespace)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Ast::Compare { first, rest } => {
                let mut lhs = first.resolve(namespace)?;
                for (op, operand) in rest {
                    let rhs = operand.resolve(namespace)?;
                    if !op.apply(lhs, rhs) {
                        return Ok(false);
                    }
                    lhs = rhs;
                }
                Ok(true)
            }
        }
    }

    fn collect_identifiers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Ast::Bool(_) => {}
            Ast::Not(inner) => inner.collect_identifiers(out),
            Ast::And(terms) | Ast::Or(terms) => {
                terms.iter().for_each(|t| t.collect_identifiers(out));
            }
            Ast::Compare { first, rest } => {
                for operand in std::iter::once(first).chain(rest.iter().map(|(_, o)| o)) {
                    if let Operand::Metric { name, .. } = operand
                        && !out.contains(&name.as_str())
                    {
                        out.push(name);
                    }
                }
            }
        }
    }
}

// --- Parser ---

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self) -> ExprError {
        match self.tokens.get(self.pos) {
            Some((token, offset)) => ExprError::UnexpectedToken {
                found: token.describe(),
                offset: *offset,
            },
            None => ExprError::UnexpectedEnd,
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_EXPRESSION_DEPTH {
            return Err(ExprError::TooDeep { max: MAX_EXPRESSION_DEPTH });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_or(&mut self) -> Result<Ast, ExprError> {
        let first = self.parse_and()?;
        if self.peek() != Some(&Token::Or) {
            return Ok(first);
        }
        let mut terms = vec![first];
        while self.eat(&Token::Or) {
            terms.push(self.parse_and()?);
        }
        Ok(Ast::Or(terms))
    }

    fn parse_and(&mut self) -> Result<Ast, ExprError> {
        let first = self.parse_unary()?;
        if self.peek() != Some(&Token::And) {
            return Ok(first);
        }
        let mut terms = vec![first];
        while self.eat(&Token::And) {
            terms.push(self.parse_unary()?);
        }
        Ok(Ast::And(terms))
    }

    fn parse_unary(&mut self) -> Result<Ast, ExprError> {
        if self.eat(&Token::Not) {
            self.enter()?;
            let inner = self.parse_unary()?;
            self.leave();
            return Ok(Ast::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Ast, ExprError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                self.enter()?;
                let inner = self.parse_or()?;
                self.leave();
                if !self.eat(&Token::RParen) {
                    return Err(self.unexpected());
                }
                Ok(inner)
            }
            Some(Token::True) => {
                self.pos += 1;
                Ok(Ast::Bool(true))
            }
            Some(Token::False) => {
                self.pos += 1;
                Ok(Ast::Bool(false))
            }
            _ => self.parse_compare(),
        }
    }

    fn parse_compare(&mut self) -> Result<Ast, ExprError> {
        let first = self.parse_operand()?;
        let mut rest = Vec::new();
        while let Some(&Token::Cmp(op)) = self.peek() {
            self.pos += 1;
            rest.push((op, self.parse_operand()?));
        }
        if rest.is_empty() {
            return Err(self.unexpected());
        }
        Ok(Ast::Compare { first, rest })
    }

    fn parse_operand(&mut self) -> Result<Operand, ExprError> {
        let negated = self.eat(&Token::Minus);
        let operand = match self.peek() {
            Some(Token::Number(n)) => Operand::Number(if negated { -n } else { *n }),
            Some(Token::Ident(name)) => Operand::Metric {
                name: name.clone(),
                negated,
            },
            _ => return Err(self.unexpected()),
        };
        self.pos += 1;
        Ok(operand)
    }
}

/// A compiled branch condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    ast: Ast,
}

impl Expression {
    /// Compile a condition.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---------|------|
    /// | [`ExprError::Empty`] | the condition is blank |
    /// | [`ExprError::TooLong`] | longer than [`MAX_EXPRESSION_LEN`] characters |
    /// | [`ExprError::TooDeep`] | nested deeper than [`MAX_EXPRESSION_DEPTH`] |
    /// | [`ExprError::UnexpectedChar`] | a character outside the grammar |
    /// | [`ExprError::UnexpectedToken`] / [`ExprError::UnexpectedEnd`] | malformed syntax |
    /// | [`ExprError::InvalidNumber`] | an unparsable or non-finite literal |
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        let len = source.chars().count();
        if len > MAX_EXPRESSION_LEN {
            return Err(ExprError::TooLong { len, max: MAX_EXPRESSION_LEN });
        }
        let tokens = Lexer::new(source).tokenize()?;
        if tokens.is_empty() {
            return Err(ExprError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0, depth: 0 };
        let ast = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.unexpected());
        }
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    /// Evaluate against `namespace`.
    ///
    /// `and`/`or` short-circuit, so a failing operand on the untaken side is never read.
    ///
    /// # Errors
    ///
    /// Returns [`ExprError::UnknownMetric`] for a name outside the namespace and
    /// [`ExprError::MissingValue`] for a name whose value is `None`.
    pub fn eval(&self, namespace: &Namespace) -> Result<bool, ExprError> {
        self.ast.eval(namespace)
    }

    /// Metric names referenced, in first-appearance order.
    #[must_use]
    pub fn identifiers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.ast.collect_identifiers(&mut out);
        out
    }

    /// Return the condition text as written.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::{Expression, MAX_EXPRESSION_DEPTH, MAX_EXPRESSION_LEN, Namespace};
    use crate::error::ExprError;

    fn ns(pairs: &[(&str, Option<f64>)]) -> Namespace {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn eval(src: &str, namespace: &Namespace) -> Result<bool, ExprError> {
        Expression::compile(src)?.eval(namespace)
    }

    // --- Evaluation ---

    #[test]
    fn simple_comparison() {
        let n = ns(&[("score", Some(0.7))]);
        assert_eq!(eval("score > 0.5", &n), Ok(true));
        assert_eq!(eval("score <= 0.5", &n), Ok(false));
    }

    #[test]
    fn precedence_and_binds_tighter_than_or() {
        let n = ns(&[("a", Some(1.0)), ("b", Some(0.0)), ("c", Some(1.0))]);
        assert_eq!(eval("a > 0 or b > 0 and c > 5", &n), Ok(true));
        assert_eq!(eval("(a > 0 or b > 0) and c > 5", &n), Ok(false));
    }

    #[test]
    fn symbolic_operators() {
        let n = ns(&[("a", Some(1.0)), ("b", Some(2.0))]);
        assert_eq!(eval("a == 1 && !(b < 2)", &n), Ok(true));
        assert_eq!(eval("a != 1 || b >= 3", &n), Ok(false));
    }

    #[test]
    fn chained_comparison() {
        let n = ns(&[("x", Some(0.3))]);
        assert_eq!(eval("0.1 < x <= 0.5", &n), Ok(true));
        assert_eq!(eval("0.4 < x <= 0.5", &n), Ok(false));
    }

    #[test]
    fn negative_operands_and_exponents() {
        let n = ns(&[("d", Some(-0.5)), ("tiny", Some(1e-6))]);
        assert_eq!(eval("d < -0.25", &n), Ok(true));
        assert_eq!(eval("-d > 0.25", &n), Ok(true));
        assert_eq!(eval("tiny < 2e-5", &n), Ok(true));
    }

    #[test]
    fn boolean_literals() {
        assert_eq!(eval("true and not false", &ns(&[])), Ok(true));
    }

    #[test]
    fn short_circuit_skips_missing_metric() {
        let n = ns(&[("a", Some(1.0)), ("b", None)]);
        assert_eq!(eval("a > 0 or b > 0", &n), Ok(true));
        assert_eq!(eval("a < 0 and b > 0", &n), Ok(false));
    }

    #[test]
    fn missing_and_unknown_metrics_error() {
        let n = ns(&[("b", None)]);
        assert_eq!(
            eval("b > 0", &n),
            Err(ExprError::MissingValue { name: "b".into() })
        );
        assert_eq!(
            eval("z > 0", &n),
            Err(ExprError::UnknownMetric { name: "z".into() })
        );
    }

    // --- Sandbox ---

    #[test]
    fn rejects_calls_and_attribute_access() {
        assert!(matches!(
            Expression::compile("__import__('os').system('ls')"),
            Err(ExprError::UnexpectedToken { .. } | ExprError::UnexpectedChar { .. })
        ));
        assert!(matches!(
            Expression::compile("a.b > 1"),
            Err(ExprError::InvalidNumber { .. } | ExprError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn rejects_single_equals_and_ampersand() {
        assert!(matches!(Expression::compile("a = 1"), Err(ExprError::UnexpectedChar { ch: '=', .. })));
        assert!(matches!(Expression::compile("a > 1 & b > 1"), Err(ExprError::UnexpectedChar { ch: '&', .. })));
    }

    #[test]
    fn rejects_bare_identifier() {
        assert!(Expression::compile("a").is_err());
        assert!(Expression::compile("a > ").is_err());
    }

    #[test]
    fn rejects_empty_and_trailing_tokens() {
        assert_eq!(Expression::compile("   "), Err(ExprError::Empty));
        assert!(matches!(
            Expression::compile("a > 1 )"),
            Err(ExprError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn rejects_overlong_input() {
        let src = format!("a > {}", "1".repeat(MAX_EXPRESSION_LEN));
        assert!(matches!(Expression::compile(&src), Err(ExprError::TooLong { .. })));
    }

    #[test]
    fn rejects_deep_nesting() {
        let depth = MAX_EXPRESSION_DEPTH + 1;
        let src = format!("{}a > 1{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(
            Expression::compile(&src),
            Err(ExprError::TooDeep { max: MAX_EXPRESSION_DEPTH })
        );
        let ok = format!("{}a > 1{}", "(".repeat(10), ")".repeat(10));
        assert!(Expression::compile(&ok).is_ok());
    }

    // --- Introspection ---

    #[test]
    fn identifiers_in_first_appearance_order() {
        let expr = Expression::compile("b > 1 and (a < 2 or b == 3)").unwrap();
        assert_eq!(expr.identifiers(), vec!["b", "a"]);
        assert_eq!(expr.source(), "b > 1 and (a < 2 or b == 3)");
    }
}
