//! Built-in evaluator for a JSONata-like query subset.
//!
//! Supported syntax:
//!
//! - paths `a.b.c` with implicit mapping over arrays, backtick names `` `a b` ``
//! - `$` (current context), `$$` (input root) and `$name` variables, which are
//!   bound from `$`-prefixed keys of the input root; `$msg` is the document
//! - predicates `items[0]`, `items[-1]`, `items[active = true]`
//! - literals: numbers, `'single'`/`"double"` strings, `true`, `false`, `null`,
//!   array constructors `[1, 2]`
//! - operators `= != < <= > >=`, `and`, `or`, `+ - * / %`, `&` (concatenation)
//! - functions `$string $number $boolean $not $exists $count $length
//!   $lowercase $uppercase $trim $contains $sum`
//!
//! Path results follow sequence rules: an empty result is undefined (`null`),
//! a single result is unwrapped unless it is an array selected directly.

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, RuleError};
use crate::expression::{CompiledExpr, ExpressionEvaluator, DOCUMENT_BINDING};
use crate::value::{number_value, stringify};

/// Deterministic in-process [`ExpressionEvaluator`].
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryEvaluator;

impl QueryEvaluator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExpressionEvaluator for QueryEvaluator {
    fn compile(&self, expr: &str) -> Result<CompiledExpr> {
        let program = Parser::new(expr)
            .and_then(Parser::parse)
            .map_err(|message| RuleError::Compile {
                expr: expr.to_string(),
                message,
            })?;
        Ok(CompiledExpr::new(expr, program))
    }

    async fn evaluate(
        &self,
        compiled: &CompiledExpr,
        context: &Value,
        document: &Value,
    ) -> Result<Value> {
        let program = compiled.program::<Node>().ok_or_else(|| {
            RuleError::evaluation(format!(
                "expression {:?} was not compiled by the query evaluator",
                compiled.source()
            ))
        })?;
        let scope = Scope::new(context, document);
        let result = scope
            .eval(program, Some(context))
            .map_err(RuleError::Evaluation)?;
        Ok(result.unwrap_or(Value::Null))
    }
}

// ---------------------------------------------------------------------------
// lexer

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Name(String),
    /// `$name`; the empty name is `$`, `"$"` is `$$`.
    Var(String),
    Punct(&'static str),
    And,
    Or,
    True,
    False,
    Null,
}

const PUNCTUATION: [&str; 20] = [
    "==", "!=", "<=", ">=", ".", ",", "(", ")", "[", "]", "=", "<", ">", "+", "-", "*", "/", "%", "&",
    ":",
];

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        if ch.is_ascii_digit() {
            tokens.push(Token::Number(lex_number(&mut chars)?));
            continue;
        }
        if ch == '"' || ch == '\'' {
            chars.next();
            tokens.push(Token::Str(lex_quoted(&mut chars, ch)?));
            continue;
        }
        if ch == '`' {
            chars.next();
            tokens.push(Token::Name(lex_quoted(&mut chars, '`')?));
            continue;
        }
        if ch == '$' {
            chars.next();
            if chars.peek() == Some(&'$') {
                chars.next();
                tokens.push(Token::Var("$".to_string()));
            } else {
                tokens.push(Token::Var(lex_identifier(&mut chars)));
            }
            continue;
        }
        if ch.is_alphabetic() || ch == '_' {
            let word = lex_identifier(&mut chars);
            tokens.push(match word.as_str() {
                "and" => Token::And,
                "or" => Token::Or,
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                _ => Token::Name(word),
            });
            continue;
        }

        let rest: String = chars.clone().take(2).collect();
        let punct = PUNCTUATION
            .iter()
            .find(|candidate| rest.starts_with(**candidate))
            .ok_or_else(|| format!("unexpected character {ch:?}"))?;
        for _ in 0..punct.len() {
            chars.next();
        }
        tokens.push(Token::Punct(punct));
    }

    Ok(tokens)
}

fn lex_number(chars: &mut Peekable<Chars<'_>>) -> std::result::Result<f64, String> {
    let mut text = String::new();
    while let Some(&c) = chars.peek() {
        let exponent_sign = (c == '-' || c == '+') && text.ends_with(['e', 'E']);
        if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exponent_sign {
            // `items.0` style paths are not numbers: stop before a dot not followed by a digit
            if c == '.' {
                let mut lookahead = chars.clone();
                lookahead.next();
                if !lookahead.peek().is_some_and(|d| d.is_ascii_digit()) {
                    break;
                }
            }
            text.push(c);
            chars.next();
        } else {
            break;
        }
    }
    text.parse::<f64>()
        .map_err(|_| format!("invalid number literal {text:?}"))
}

fn lex_quoted(chars: &mut Peekable<Chars<'_>>, quote: char) -> std::result::Result<String, String> {
    let mut text = String::new();
    loop {
        match chars.next() {
            Some('\\') => match chars.next() {
                Some('n') => text.push('\n'),
                Some('t') => text.push('\t'),
                Some('r') => text.push('\r'),
                Some(other) => text.push(other),
                None => return Err("unterminated string literal".into()),
            },
            Some(c) if c == quote => return Ok(text),
            Some(c) => text.push(c),
            None => return Err("unterminated string literal".into()),
        }
    }
}

fn lex_identifier(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
            chars.next();
        } else {
            break;
        }
    }
    word
}

// ---------------------------------------------------------------------------
// parser

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(Value),
    Context,
    Root,
    Variable(String),
    Field(String),
    Step(Box<Node>, Box<Node>),
    Predicate(Box<Node>, Box<Node>),
    Call(String, Vec<Node>),
    Negate(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Array(Vec<Node>),
}

/// Deepest program a parse may build. Evaluation recurses once per level,
/// so this also bounds the evaluator's stack use.
const MAX_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    fn new(input: &str) -> std::result::Result<Self, String> {
        Ok(Self {
            tokens: tokenize(input)?,
            position: 0,
            depth: 0,
        })
    }

    /// Counts one more level of nesting for the node being built.
    fn descend(&mut self) -> std::result::Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(format!("expression nested more than {MAX_DEPTH} levels deep"));
        }
        Ok(())
    }

    fn parse(mut self) -> std::result::Result<Node, String> {
        if self.tokens.is_empty() {
            return Err("empty expression".into());
        }
        let node = self.parse_or()?;
        match self.peek() {
            None => Ok(node),
            Some(token) => Err(format!("unexpected token {token:?}")),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> std::result::Result<(), String> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(format!("expected '{punct}', found {:?}", self.peek()))
        }
    }

    fn parse_or(&mut self) -> std::result::Result<Node, String> {
        let depth = self.depth;
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.position += 1;
            self.descend()?;
            let rhs = self.parse_and()?;
            lhs = Node::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> std::result::Result<Node, String> {
        let depth = self.depth;
        let mut lhs = self.parse_comparison()?;
        while self.peek() == Some(&Token::And) {
            self.position += 1;
            self.descend()?;
            let rhs = self.parse_comparison()?;
            lhs = Node::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> std::result::Result<Node, String> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Punct("=" | "==")) => BinaryOp::Eq,
            Some(Token::Punct("!=")) => BinaryOp::Ne,
            Some(Token::Punct("<")) => BinaryOp::Lt,
            Some(Token::Punct("<=")) => BinaryOp::Le,
            Some(Token::Punct(">")) => BinaryOp::Gt,
            Some(Token::Punct(">=")) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.position += 1;
        let rhs = self.parse_additive()?;
        Ok(Node::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_additive(&mut self) -> std::result::Result<Node, String> {
        let depth = self.depth;
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Punct("+")) => BinaryOp::Add,
                Some(Token::Punct("-")) => BinaryOp::Sub,
                Some(Token::Punct("&")) => BinaryOp::Concat,
                _ => break,
            };
            self.position += 1;
            self.descend()?;
            let rhs = self.parse_multiplicative()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> std::result::Result<Node, String> {
        let depth = self.depth;
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Punct("*")) => BinaryOp::Mul,
                Some(Token::Punct("/")) => BinaryOp::Div,
                Some(Token::Punct("%")) => BinaryOp::Rem,
                _ => break,
            };
            self.position += 1;
            self.descend()?;
            let rhs = self.parse_unary()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> std::result::Result<Node, String> {
        let depth = self.depth;
        self.descend()?;
        let node = if self.eat_punct("-") {
            Node::Negate(Box::new(self.parse_unary()?))
        } else {
            self.parse_postfix()?
        };
        self.depth = depth;
        Ok(node)
    }

    fn parse_postfix(&mut self) -> std::result::Result<Node, String> {
        let depth = self.depth;
        let mut node = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                self.descend()?;
                let step = self.parse_primary()?;
                node = Node::Step(Box::new(node), Box::new(step));
            } else if self.eat_punct("[") {
                self.descend()?;
                let predicate = self.parse_or()?;
                self.expect_punct("]")?;
                node = Node::Predicate(Box::new(node), Box::new(predicate));
            } else {
                break;
            }
        }
        self.depth = depth;
        Ok(node)
    }

    fn parse_primary(&mut self) -> std::result::Result<Node, String> {
        match self.next() {
            Some(Token::Number(n)) => number_value(n)
                .map(Node::Literal)
                .ok_or_else(|| format!("number literal {n} out of range")),
            Some(Token::Str(text)) => Ok(Node::Literal(Value::String(text))),
            Some(Token::True) => Ok(Node::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Node::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Node::Literal(Value::Null)),
            Some(Token::Name(name)) => Ok(Node::Field(name)),
            Some(Token::Var(name)) if name.is_empty() => Ok(Node::Context),
            Some(Token::Var(name)) if name == "$" => Ok(Node::Root),
            Some(Token::Var(name)) => {
                if self.eat_punct("(") {
                    let args = self.parse_list(")")?;
                    Ok(Node::Call(name, args))
                } else {
                    Ok(Node::Variable(name))
                }
            }
            Some(Token::Punct("(")) => {
                let inner = self.parse_or()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Some(Token::Punct("[")) => Ok(Node::Array(self.parse_list("]")?)),
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn parse_list(&mut self, close: &str) -> std::result::Result<Vec<Node>, String> {
        let mut items = Vec::new();
        if self.eat_punct(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_or()?);
            if self.eat_punct(close) {
                return Ok(items);
            }
            self.expect_punct(",")?;
        }
    }
}

// ---------------------------------------------------------------------------
// evaluation

type Eval = std::result::Result<Option<Value>, String>;

struct Scope<'a> {
    root: &'a Value,
    bindings: HashMap<&'a str, &'a Value>,
}

impl<'a> Scope<'a> {
    fn new(root: &'a Value, document: &'a Value) -> Self {
        let mut bindings: HashMap<&'a str, &'a Value> = root
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(key, value)| key.strip_prefix('$').map(|name| (name, value)))
                    .collect()
            })
            .unwrap_or_default();
        let document_name = DOCUMENT_BINDING.trim_start_matches('$');
        bindings.insert(document_name, document);
        Self { root, bindings }
    }

    fn eval(&self, node: &Node, context: Option<&Value>) -> Eval {
        match node {
            Node::Literal(value) => Ok(Some(value.clone())),
            Node::Context => Ok(context.cloned()),
            Node::Root => Ok(Some(self.root.clone())),
            Node::Variable(name) => Ok(self.bindings.get(name.as_str()).map(|v| (*v).clone())),
            Node::Field(name) => Ok(context.and_then(|value| field(value, name))),
            Node::Step(lhs, rhs) => {
                let owned;
                let input = match self.bound(lhs) {
                    Some(Some(value)) => value,
                    Some(None) => return Ok(None),
                    None => match self.eval(lhs, context)? {
                        Some(value) => {
                            owned = value;
                            &owned
                        }
                        None => return Ok(None),
                    },
                };
                let mut results = Vec::new();
                for item in members(input) {
                    if let Some(value) = self.eval(rhs, Some(item))? {
                        results.push(value);
                    }
                }
                Ok(collapse(results))
            }
            Node::Predicate(lhs, predicate) => {
                let owned;
                let input = match self.bound(lhs) {
                    Some(Some(value)) => value,
                    Some(None) => return Ok(None),
                    None => match self.eval(lhs, context)? {
                        Some(value) => {
                            owned = value;
                            &owned
                        }
                        None => return Ok(None),
                    },
                };
                let items = members(input);
                let len = items.len() as i64;
                let mut kept = Vec::new();
                for (position, item) in items.into_iter().enumerate() {
                    let keep = match self.eval(predicate, Some(item))? {
                        Some(Value::Number(n)) => {
                            let index = n.as_f64().unwrap_or(f64::NAN).floor() as i64;
                            let index = if index < 0 { len + index } else { index };
                            index == position as i64
                        }
                        Some(other) => to_boolean(&other),
                        None => false,
                    };
                    if keep {
                        kept.push(item.clone());
                    }
                }
                Ok(sequence(kept))
            }
            Node::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match self.eval(item, context)? {
                        Some(Value::Array(nested)) if !matches!(item, Node::Array(_)) => {
                            out.extend(nested)
                        }
                        Some(value) => out.push(value),
                        None => {}
                    }
                }
                Ok(Some(Value::Array(out)))
            }
            Node::Negate(operand) => match self.eval(operand, context)? {
                None => Ok(None),
                Some(Value::Number(n)) => arithmetic_result(-n.as_f64().unwrap_or(f64::NAN)),
                Some(other) => Err(format!("cannot negate {}", stringify(&other))),
            },
            Node::Binary(op, lhs, rhs) => self.binary(*op, lhs, rhs, context),
            Node::Call(name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, context)?);
                }
                call(name, values)
            }
        }
    }

    /// Root and variables are navigated in place instead of being cloned.
    fn bound(&self, node: &Node) -> Option<Option<&'a Value>> {
        match node {
            Node::Root => Some(Some(self.root)),
            Node::Variable(name) => Some(self.bindings.get(name.as_str()).copied()),
            _ => None,
        }
    }

    fn binary(&self, op: BinaryOp, lhs: &Node, rhs: &Node, context: Option<&Value>) -> Eval {
        match op {
            BinaryOp::And => {
                let left = self.eval(lhs, context)?.is_some_and(|v| to_boolean(&v));
                if !left {
                    return Ok(Some(Value::Bool(false)));
                }
                let right = self.eval(rhs, context)?.is_some_and(|v| to_boolean(&v));
                Ok(Some(Value::Bool(right)))
            }
            BinaryOp::Or => {
                let left = self.eval(lhs, context)?.is_some_and(|v| to_boolean(&v));
                if left {
                    return Ok(Some(Value::Bool(true)));
                }
                let right = self.eval(rhs, context)?.is_some_and(|v| to_boolean(&v));
                Ok(Some(Value::Bool(right)))
            }
            _ => {
                let left = self.eval(lhs, context)?;
                let right = self.eval(rhs, context)?;
                apply_binary(op, left, right)
            }
        }
    }
}

fn apply_binary(op: BinaryOp, left: Option<Value>, right: Option<Value>) -> Eval {
    match op {
        BinaryOp::Concat => {
            let text = |value: Option<Value>| value.map(|v| stringify(&v)).unwrap_or_default();
            Ok(Some(Value::String(text(left) + &text(right))))
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            let (Some(left), Some(right)) = (left, right) else {
                return Ok(Some(Value::Bool(false)));
            };
            let equal = values_equal(&left, &right);
            Ok(Some(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal })))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let (Some(left), Some(right)) = (left, right) else {
                return Ok(Some(Value::Bool(false)));
            };
            let ordering = match (&left, &right) {
                (Value::Number(l), Value::Number(r)) => l
                    .as_f64()
                    .partial_cmp(&r.as_f64())
                    .ok_or_else(|| "cannot compare NaN".to_string())?,
                (Value::String(l), Value::String(r)) => l.cmp(r),
                _ => {
                    return Err(format!(
                        "cannot compare {} with {}",
                        stringify(&left),
                        stringify(&right)
                    ))
                }
            };
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Some(Value::Bool(result)))
        }
        _ => {
            let (Some(left), Some(right)) = (left, right) else {
                return Ok(None);
            };
            let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
                return Err(format!(
                    "arithmetic operands must be numbers, got {} and {}",
                    stringify(&left),
                    stringify(&right)
                ));
            };
            let result = match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => l / r,
                _ => l % r,
            };
            arithmetic_result(result)
        }
    }
}

fn arithmetic_result(result: f64) -> Eval {
    number_value(result)
        .map(Some)
        .ok_or_else(|| "number out of range".to_string())
}

const UNARY_FUNCTIONS: [&str; 8] = [
    "string", "boolean", "not", "number", "length", "lowercase", "uppercase", "trim",
];

fn check_arity(name: &str, expected: usize, args: &[Option<Value>]) -> std::result::Result<(), String> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(format!(
            "${name} expects {expected} argument(s), got {}",
            args.len()
        ))
    }
}

fn call(name: &str, mut args: Vec<Option<Value>>) -> Eval {
    match name {
        "exists" => {
            check_arity(name, 1, &args)?;
            Ok(Some(Value::Bool(args[0].is_some())))
        }
        "count" => {
            check_arity(name, 1, &args)?;
            let count = match &args[0] {
                None => 0,
                Some(Value::Array(items)) => items.len(),
                Some(_) => 1,
            };
            Ok(Some(Value::from(count)))
        }
        "sum" => {
            check_arity(name, 1, &args)?;
            let mut total = 0.0;
            for item in args[0].iter().flat_map(members) {
                total += item
                    .as_f64()
                    .ok_or_else(|| format!("$sum expects numbers, got {}", stringify(item)))?;
            }
            arithmetic_result(total)
        }
        "contains" => {
            check_arity(name, 2, &args)?;
            match (&args[0], &args[1]) {
                (None, _) => Ok(None),
                (Some(Value::String(text)), Some(Value::String(needle))) => {
                    Ok(Some(Value::Bool(text.contains(needle.as_str()))))
                }
                _ => Err("$contains expects string arguments".into()),
            }
        }
        _ if UNARY_FUNCTIONS.contains(&name) => {
            check_arity(name, 1, &args)?;
            let Some(arg) = args.pop().flatten() else {
                return Ok(None);
            };
            unary_function(name, arg)
        }
        _ => Err(format!("unknown function ${name}")),
    }
}

fn unary_function(name: &str, arg: Value) -> Eval {
    let text_only = |arg: &Value| {
        arg.as_str()
            .map(str::to_string)
            .ok_or_else(|| format!("${name} expects a string, got {}", stringify(arg)))
    };

    let value = match name {
        "string" => Value::String(stringify(&arg)),
        "boolean" => Value::Bool(to_boolean(&arg)),
        "not" => Value::Bool(!to_boolean(&arg)),
        "number" => match &arg {
            Value::Number(_) => arg.clone(),
            Value::Bool(flag) => Value::from(u8::from(*flag)),
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(number_value)
                .ok_or_else(|| format!("unable to cast {text:?} to a number"))?,
            other => return Err(format!("unable to cast {} to a number", stringify(other))),
        },
        "length" => Value::from(text_only(&arg)?.chars().count()),
        "lowercase" => Value::String(text_only(&arg)?.to_lowercase()),
        "uppercase" => Value::String(text_only(&arg)?.to_uppercase()),
        "trim" => Value::String(
            text_only(&arg)?
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        ),
        _ => return Err(format!("unknown function ${name}")),
    };
    Ok(Some(value))
}

fn field(value: &Value, name: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(name).cloned(),
        Value::Array(items) => collapse(items.iter().filter_map(|item| field(item, name)).collect()),
        _ => None,
    }
}

/// Items a step iterates over: array members, or the value itself.
fn members(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

/// Sequence rule for step results: a lone result is kept verbatim (so a
/// selected array stays an array), several results are flattened one level.
fn collapse(results: Vec<Value>) -> Option<Value> {
    if results.len() == 1 {
        return results.into_iter().next();
    }
    let mut flat = Vec::new();
    for value in results {
        match value {
            Value::Array(items) => flat.extend(items),
            other => flat.push(other),
        }
    }
    sequence(flat)
}

fn sequence(mut items: Vec<Value>) -> Option<Value> {
    match items.len() {
        0 => None,
        1 => items.pop(),
        _ => Some(Value::Array(items)),
    }
}

/// Boolean cast: empty containers and zero-like scalars are false; arrays are
/// true when any member is.
fn to_boolean(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => items.iter().any(to_boolean),
        Value::Object(map) => !map.is_empty(),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(lhs), Value::Number(rhs)) => lhs.as_f64() == rhs.as_f64(),
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn eval(expr: &str, context: Value) -> Result<Value> {
        let evaluator = QueryEvaluator::new();
        let compiled = evaluator.compile(expr)?;
        evaluator.evaluate(&compiled, &context, &context).await
    }

    fn items() -> Value {
        json!({"payload": {"items": [
            {"name": "alpha", "active": true, "qty": 2},
            {"name": "bravo", "active": false, "qty": 3},
            {"name": "NA", "active": true, "qty": 5}
        ]}})
    }

    #[tokio::test]
    async fn navigates_paths_and_maps_over_arrays() {
        assert_eq!(eval("payload.items.name", items()).await.unwrap(), json!(["alpha", "bravo", "NA"]));
        assert_eq!(eval("payload.items[1].name", items()).await.unwrap(), json!("bravo"));
        assert_eq!(eval("payload.items[-1].qty", items()).await.unwrap(), json!(5));
        assert_eq!(eval("payload.missing", items()).await.unwrap(), json!(null));
    }

    #[tokio::test]
    async fn single_item_arrays_stay_arrays() {
        let doc = json!({"payload": {"items": [{"id": 1}]}});
        assert_eq!(eval("payload.items", doc).await.unwrap(), json!([{"id": 1}]));
    }

    #[tokio::test]
    async fn filters_with_predicates() {
        assert_eq!(
            eval("payload.items[active = true].name", items()).await.unwrap(),
            json!(["alpha", "NA"])
        );
        assert_eq!(eval("$count(payload.items[qty > 2])", items()).await.unwrap(), json!(2));
        assert_eq!(eval("$sum(payload.items.qty)", items()).await.unwrap(), json!(10));
    }

    #[tokio::test]
    async fn comparisons_and_boolean_logic() {
        let row = json!({"active": true, "qty": 4, "name": "alpha"});
        assert_eq!(eval("active = true", row.clone()).await.unwrap(), json!(true));
        assert_eq!(eval("qty >= 4 and name != 'bravo'", row.clone()).await.unwrap(), json!(true));
        assert_eq!(eval("missing = null", row.clone()).await.unwrap(), json!(false));
        assert_eq!(eval("missing or qty < 1", row).await.unwrap(), json!(false));
    }

    #[tokio::test]
    async fn arithmetic_and_concatenation() {
        let row = json!({"a": 6, "b": 4, "first": "Ada", "last": "Lovelace"});
        assert_eq!(eval("a * b - 2", row.clone()).await.unwrap(), json!(22));
        assert_eq!(eval("a / b", row.clone()).await.unwrap(), json!(1.5));
        assert_eq!(eval("-(a % b)", row.clone()).await.unwrap(), json!(-2));
        assert_eq!(eval("first & ' ' & last", row).await.unwrap(), json!("Ada Lovelace"));
    }

    #[tokio::test]
    async fn variables_bind_the_document_and_dollar_keys() {
        let evaluator = QueryEvaluator::new();
        let row = json!({"id": 7, "$tag": "x"});
        let document = json!({"topic": "orders"});
        let compiled = evaluator.compile("$msg.topic & '-' & $string(id) & $tag").unwrap();
        let result = evaluator.evaluate(&compiled, &row, &document).await.unwrap();
        assert_eq!(result, json!("orders-7x"));

        assert_eq!(eval("$.id", row.clone()).await.unwrap(), json!(7));
        assert_eq!(eval("$$.id", row).await.unwrap(), json!(7));
    }

    #[tokio::test]
    async fn string_functions() {
        let row = json!({"name": "  Mixed   Case "});
        assert_eq!(eval("$trim(name)", row.clone()).await.unwrap(), json!("Mixed Case"));
        assert_eq!(eval("$uppercase($trim(name))", row.clone()).await.unwrap(), json!("MIXED CASE"));
        assert_eq!(eval("$length('abc')", row.clone()).await.unwrap(), json!(3));
        assert_eq!(eval("$contains(name, 'Case')", row.clone()).await.unwrap(), json!(true));
        assert_eq!(eval("$number('12.5')", row.clone()).await.unwrap(), json!(12.5));
        assert_eq!(eval("$exists(name) and $not($exists(other))", row).await.unwrap(), json!(true));
    }

    #[tokio::test]
    async fn array_constructor_and_backtick_names() {
        let row = json!({"first name": "Ada", "tags": ["x", "y"]});
        assert_eq!(eval("`first name`", row.clone()).await.unwrap(), json!("Ada"));
        assert_eq!(eval("[1, tags, 'z']", row).await.unwrap(), json!([1, "x", "y", "z"]));
    }

    #[test]
    fn syntax_errors_fail_at_compile_time() {
        let evaluator = QueryEvaluator::new();
        for bad in ["", "a.", "(a", "a ==", "'open", "a # b"] {
            let err = evaluator.compile(bad).unwrap_err();
            assert!(matches!(err, RuleError::Compile { .. }), "{bad:?} -> {err}");
        }
    }

    #[test]
    fn deeply_nested_programs_fail_at_compile_time() {
        let evaluator = QueryEvaluator::new();
        let nested = format!("{}1{}", "(".repeat(50_000), ")".repeat(50_000));
        let negated = format!("{}1", "-".repeat(50_000));
        let chained = vec!["a"; 50_000].join(".");
        let summed = vec!["1"; 50_000].join(" + ");
        for expr in [&nested, &negated, &chained, &summed] {
            match evaluator.compile(expr) {
                Err(RuleError::Compile { message, .. }) => assert!(message.contains("nested")),
                other => panic!("expected a compile error, got {other:?}"),
            }
        }

        let modest = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        assert!(evaluator.compile(&modest).is_ok());
    }

    #[tokio::test]
    async fn type_errors_fail_at_evaluation() {
        let row = json!({"name": "alpha", "qty": 2});
        assert!(matches!(eval("name + 1", row.clone()).await, Err(RuleError::Evaluation(_))));
        assert!(matches!(eval("name < qty", row.clone()).await, Err(RuleError::Evaluation(_))));
        assert!(matches!(eval("$nope(name)", row.clone()).await, Err(RuleError::Evaluation(_))));
        assert!(matches!(eval("qty / 0", row).await, Err(RuleError::Evaluation(_))));
    }
}
