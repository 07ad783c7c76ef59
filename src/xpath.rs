//! XPath 1.0 subset used to check expectations against validation reports.
//!
//! Expressions are compiled once (lexer, recursive-descent parser, prefix
//! resolution through a [`Namespaces`] context) and evaluated as boolean
//! tests over a [`Document`]. The surface covers what conformance
//! expectations actually use: location paths with child/attribute steps and
//! `//` shorthand, predicates, the core function library, and XPath 1.0
//! comparison semantics over node-sets.

use std::collections::HashSet;

use crate::dom::{Document, NodeId, NodeKind};
use crate::error::SpecError;
use crate::namespaces::Namespaces;

/// A node-set member: a tree node or an attribute of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Item {
    Node(NodeId),
    Attr { owner: NodeId, index: usize },
}

impl Item {
    fn order_key(self) -> (NodeId, usize) {
        match self {
            Item::Node(id) => (id, 0),
            Item::Attr { owner, index } => (owner, index + 1),
        }
    }
}

/// Result of evaluating an expression.
#[derive(Debug, Clone)]
pub enum Value {
    Nodes(Vec<Item>),
    Bool(bool),
    Num(f64),
    Str(String),
}

impl Value {
    pub fn boolean(&self) -> bool {
        match self {
            Value::Nodes(items) => !items.is_empty(),
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
        }
    }

    fn string(&self, doc: &Document) -> String {
        match self {
            Value::Nodes(items) => items
                .first()
                .map(|item| string_value(doc, *item))
                .unwrap_or_default(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => format_number(*n),
            Value::Str(s) => s.clone(),
        }
    }

    fn number(&self, doc: &Document) -> f64 {
        match self {
            Value::Num(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            other => parse_number(&other.string(doc)),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn parse_number(s: &str) -> f64 {
    s.trim().parse::<f64>().unwrap_or(f64::NAN)
}

fn string_value(doc: &Document, item: Item) -> String {
    match item {
        Item::Node(id) => match doc.kind(id) {
            NodeKind::Comment(text) => text.clone(),
            _ => doc.text_content(id),
        },
        Item::Attr { owner, index } => doc.attributes(owner)[index].value.clone(),
    }
}

// ---------------------------------------------------------------------------
// Lexer

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Literal(String),
    Name(String),
    PrefixWildcard(String),
    Star,
    Multiply,
    And,
    Or,
    Div,
    Mod,
    Slash,
    DoubleSlash,
    At,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Pipe,
    Dot,
    DotDot,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
}

/// True when the previous token can end an operand, which forces `*` and the
/// named operators into their operator reading (XPath 1.0 §3.7).
fn ends_operand(token: &Token) -> bool {
    matches!(
        token,
        Token::Number(_)
            | Token::Literal(_)
            | Token::Name(_)
            | Token::PrefixWildcard(_)
            | Token::Star
            | Token::RParen
            | Token::RBracket
            | Token::Dot
            | Token::DotDot
    )
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn lex(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    return Err("unexpected '!'".to_string());
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '/' => {
                if chars.get(i + 1) == Some(&'/') {
                    tokens.push(Token::DoubleSlash);
                    i += 2;
                } else {
                    tokens.push(Token::Slash);
                    i += 1;
                }
            }
            '.' => {
                if chars.get(i + 1) == Some(&'.') {
                    tokens.push(Token::DotDot);
                    i += 2;
                } else if chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
                    let start = i;
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    let text: String = chars[start..i].iter().collect();
                    tokens.push(Token::Number(text.parse().map_err(|_| "bad number")?));
                } else {
                    tokens.push(Token::Dot);
                    i += 1;
                }
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j] != quote {
                    j += 1;
                }
                if j == chars.len() {
                    return Err("unterminated string literal".to_string());
                }
                tokens.push(Token::Literal(chars[start..j].iter().collect()));
                i = j + 1;
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i < chars.len() && chars[i] == '.' {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Number(text.parse().map_err(|_| "bad number")?));
            }
            '*' => {
                if tokens.last().is_some_and(ends_operand) {
                    tokens.push(Token::Multiply);
                } else {
                    tokens.push(Token::Star);
                }
                i += 1;
            }
            c if is_name_start(c) => {
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                let mut name: String = chars[start..i].iter().collect();

                let operator_position = tokens.last().is_some_and(ends_operand);
                if operator_position {
                    match name.as_str() {
                        "and" => tokens.push(Token::And),
                        "or" => tokens.push(Token::Or),
                        "div" => tokens.push(Token::Div),
                        "mod" => tokens.push(Token::Mod),
                        _ => return Err(format!("unexpected name '{}' after operand", name)),
                    }
                    continue;
                }

                // QName or prefix wildcard
                if i < chars.len() && chars[i] == ':' {
                    if chars.get(i + 1) == Some(&'*') {
                        tokens.push(Token::PrefixWildcard(name));
                        i += 2;
                        continue;
                    }
                    if chars.get(i + 1).copied().is_some_and(is_name_start) {
                        i += 1;
                        let local_start = i;
                        while i < chars.len() && is_name_char(chars[i]) {
                            i += 1;
                        }
                        let local: String = chars[local_start..i].iter().collect();
                        name.push(':');
                        name.push_str(&local);
                    }
                }
                tokens.push(Token::Name(name));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// AST

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Attribute,
    SelfNode,
    Parent,
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    /// Any node of the axis principal type (`*`, `@*`)
    Any,
    /// `prefix:*`, prefix resolved to a URI at compile time
    AnyInNs(String),
    /// Name test with the namespace URI resolved at compile time
    Named { namespace: String, local: String },
    Text,
    AnyKind,
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NodeTest,
    /// Step was preceded by `//`
    descendant: bool,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone)]
struct PathExpr {
    absolute: bool,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Or,
    And,
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
    Mod,
}

#[derive(Debug, Clone)]
enum Expr {
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Path(PathExpr),
    Literal(String),
    Number(f64),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Count,
    Not,
    Boolean,
    True,
    False,
    String,
    Number,
    NormalizeSpace,
    Contains,
    StartsWith,
    StringLength,
    LocalName,
    Name,
    Last,
    Position,
}

impl Func {
    fn lookup(name: &str) -> Option<(Func, usize, usize)> {
        // (function, min arity, max arity)
        Some(match name {
            "count" => (Func::Count, 1, 1),
            "not" => (Func::Not, 1, 1),
            "boolean" => (Func::Boolean, 1, 1),
            "true" => (Func::True, 0, 0),
            "false" => (Func::False, 0, 0),
            "string" => (Func::String, 0, 1),
            "number" => (Func::Number, 0, 1),
            "normalize-space" => (Func::NormalizeSpace, 0, 1),
            "contains" => (Func::Contains, 2, 2),
            "starts-with" => (Func::StartsWith, 2, 2),
            "string-length" => (Func::StringLength, 0, 1),
            "local-name" => (Func::LocalName, 0, 1),
            "name" => (Func::Name, 0, 1),
            "last" => (Func::Last, 0, 0),
            "position" => (Func::Position, 0, 0),
            _ => return None,
        })
    }
}

// ---------------------------------------------------------------------------
// Parser

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    namespaces: &'a Namespaces,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> Result<(), String> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            other => Err(format!("expected {:?}, found {:?}", expected, other)),
        }
    }

    fn resolve_qname(&self, name: &str) -> Result<(String, String), String> {
        match name.split_once(':') {
            Some((prefix, local)) => {
                let uri = self.namespaces.resolve_uri(prefix);
                if uri.is_empty() {
                    return Err(format!("undeclared namespace prefix '{}'", prefix));
                }
                Ok((uri.to_string(), local.to_string()))
            }
            // Unprefixed name tests are in no namespace (XPath 1.0), the
            // default element namespace does not apply.
            None => Ok((String::new(), name.to_string())),
        }
    }

    fn parse(&mut self) -> Result<Expr, String> {
        let expr = self.parse_or()?;
        if let Some(t) = self.peek() {
            return Err(format!("trailing token {:?}", t));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_equality()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.parse_equality()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinOp::Eq,
                Some(Token::Ne) => BinOp::Ne,
                _ => break,
            };
            self.next();
            let right = self.parse_relational()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::Le) => BinOp::Le,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Ge) => BinOp::Ge,
                _ => break,
            };
            self.next();
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Multiply) => BinOp::Mul,
                Some(Token::Div) => BinOp::Div,
                Some(Token::Mod) => BinOp::Mod,
                _ => break,
            };
            self.next();
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Minus) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_union()
    }

    fn parse_union(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_path()?;
        while self.peek() == Some(&Token::Pipe) {
            self.next();
            let right = self.parse_path()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn starts_function_call(&self) -> bool {
        match (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
            (Some(Token::Name(name)), Some(Token::LParen)) => {
                !matches!(name.as_str(), "text" | "node")
            }
            _ => false,
        }
    }

    fn parse_path(&mut self) -> Result<Expr, String> {
        if self.starts_function_call() {
            return self.parse_call();
        }
        match self.peek() {
            Some(Token::Number(n)) => {
                let n = *n;
                self.next();
                Ok(Expr::Number(n))
            }
            Some(Token::Literal(_)) => {
                if let Some(Token::Literal(s)) = self.next() {
                    Ok(Expr::Literal(s))
                } else {
                    unreachable!()
                }
            }
            Some(Token::LParen) => {
                self.next();
                let inner = self.parse_or()?;
                self.eat(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Slash) | Some(Token::DoubleSlash) => {
                let descendant = self.peek() == Some(&Token::DoubleSlash);
                self.next();
                // A bare "/" selects the root
                if !descendant && !self.starts_step() {
                    return Ok(Expr::Path(PathExpr {
                        absolute: true,
                        steps: Vec::new(),
                    }));
                }
                let steps = self.parse_steps(descendant)?;
                Ok(Expr::Path(PathExpr {
                    absolute: true,
                    steps,
                }))
            }
            _ => {
                let steps = self.parse_steps(false)?;
                Ok(Expr::Path(PathExpr {
                    absolute: false,
                    steps,
                }))
            }
        }
    }

    fn parse_call(&mut self) -> Result<Expr, String> {
        let name = match self.next() {
            Some(Token::Name(name)) => name,
            other => return Err(format!("expected function name, found {:?}", other)),
        };
        let (func, min, max) =
            Func::lookup(&name).ok_or_else(|| format!("unknown function '{}'", name))?;
        self.eat(&Token::LParen)?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.peek() == Some(&Token::Comma) {
                    self.next();
                } else {
                    break;
                }
            }
        }
        self.eat(&Token::RParen)?;
        if args.len() < min || args.len() > max {
            return Err(format!(
                "function '{}' expects {}..={} arguments, got {}",
                name,
                min,
                max,
                args.len()
            ));
        }
        Ok(Expr::Call(func, args))
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Name(_))
                | Some(Token::PrefixWildcard(_))
                | Some(Token::Star)
                | Some(Token::At)
                | Some(Token::Dot)
                | Some(Token::DotDot)
        )
    }

    fn parse_steps(&mut self, mut descendant: bool) -> Result<Vec<Step>, String> {
        let mut steps = Vec::new();
        loop {
            steps.push(self.parse_step(descendant)?);
            match self.peek() {
                Some(Token::Slash) => {
                    self.next();
                    descendant = false;
                }
                Some(Token::DoubleSlash) => {
                    self.next();
                    descendant = true;
                }
                _ => break,
            }
        }
        Ok(steps)
    }

    fn parse_step(&mut self, descendant: bool) -> Result<Step, String> {
        let (axis, test) = match self.next() {
            Some(Token::Dot) => (Axis::SelfNode, NodeTest::AnyKind),
            Some(Token::DotDot) => (Axis::Parent, NodeTest::AnyKind),
            Some(Token::At) => (Axis::Attribute, self.parse_node_test()?),
            Some(_) => {
                self.pos -= 1;
                (Axis::Child, self.parse_node_test()?)
            }
            None => return Err("unexpected end of expression".to_string()),
        };

        let mut predicates = Vec::new();
        while self.peek() == Some(&Token::LBracket) {
            self.next();
            predicates.push(self.parse_or()?);
            self.eat(&Token::RBracket)?;
        }

        Ok(Step {
            axis,
            test,
            descendant,
            predicates,
        })
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, String> {
        match self.next() {
            Some(Token::Star) => Ok(NodeTest::Any),
            Some(Token::PrefixWildcard(prefix)) => {
                let uri = self.namespaces.resolve_uri(&prefix);
                if uri.is_empty() {
                    return Err(format!("undeclared namespace prefix '{}'", prefix));
                }
                Ok(NodeTest::AnyInNs(uri.to_string()))
            }
            Some(Token::Name(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    match name.as_str() {
                        "text" => {
                            self.next();
                            self.eat(&Token::RParen)?;
                            return Ok(NodeTest::Text);
                        }
                        "node" => {
                            self.next();
                            self.eat(&Token::RParen)?;
                            return Ok(NodeTest::AnyKind);
                        }
                        _ => {}
                    }
                }
                let (namespace, local) = self.resolve_qname(&name)?;
                Ok(NodeTest::Named { namespace, local })
            }
            other => Err(format!("expected node test, found {:?}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluator

struct Context<'a> {
    doc: &'a Document,
    item: Item,
    position: usize,
    size: usize,
}

fn eval(expr: &Expr, ctx: &Context<'_>) -> Result<Value, String> {
    match expr {
        Expr::Number(n) => Ok(Value::Num(*n)),
        Expr::Literal(s) => Ok(Value::Str(s.clone())),
        Expr::Neg(inner) => {
            let v = eval(inner, ctx)?;
            Ok(Value::Num(-v.number(ctx.doc)))
        }
        Expr::Union(left, right) => {
            let mut items = match eval(left, ctx)? {
                Value::Nodes(items) => items,
                _ => return Err("union operand is not a node-set".to_string()),
            };
            match eval(right, ctx)? {
                Value::Nodes(more) => items.extend(more),
                _ => return Err("union operand is not a node-set".to_string()),
            }
            let mut seen = HashSet::new();
            items.retain(|item| seen.insert(*item));
            items.sort_by_key(|item| item.order_key());
            Ok(Value::Nodes(items))
        }
        Expr::Path(path) => Ok(Value::Nodes(eval_path(path, ctx)?)),
        Expr::Call(func, args) => eval_call(*func, args, ctx),
        Expr::Binary(op, left, right) => {
            match op {
                BinOp::Or => {
                    return Ok(Value::Bool(
                        eval(left, ctx)?.boolean() || eval(right, ctx)?.boolean(),
                    ));
                }
                BinOp::And => {
                    return Ok(Value::Bool(
                        eval(left, ctx)?.boolean() && eval(right, ctx)?.boolean(),
                    ));
                }
                _ => {}
            }
            let lv = eval(left, ctx)?;
            let rv = eval(right, ctx)?;
            match op {
                BinOp::Eq => Ok(Value::Bool(compare_eq(&lv, &rv, ctx.doc, false))),
                BinOp::Ne => Ok(Value::Bool(compare_eq(&lv, &rv, ctx.doc, true))),
                BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                    Ok(Value::Bool(compare_rel(*op, &lv, &rv, ctx.doc)))
                }
                BinOp::Add => Ok(Value::Num(lv.number(ctx.doc) + rv.number(ctx.doc))),
                BinOp::Sub => Ok(Value::Num(lv.number(ctx.doc) - rv.number(ctx.doc))),
                BinOp::Mul => Ok(Value::Num(lv.number(ctx.doc) * rv.number(ctx.doc))),
                BinOp::Div => Ok(Value::Num(lv.number(ctx.doc) / rv.number(ctx.doc))),
                BinOp::Mod => Ok(Value::Num(lv.number(ctx.doc) % rv.number(ctx.doc))),
                BinOp::Or | BinOp::And => unreachable!(),
            }
        }
    }
}

fn numbers_of(value: &Value, doc: &Document) -> Vec<f64> {
    match value {
        Value::Nodes(items) => items
            .iter()
            .map(|item| parse_number(&string_value(doc, *item)))
            .collect(),
        other => vec![other.number(doc)],
    }
}

fn compare_eq(left: &Value, right: &Value, doc: &Document, negate: bool) -> bool {
    match (left, right) {
        (Value::Nodes(l), Value::Nodes(r)) => {
            let rs: Vec<String> = r.iter().map(|item| string_value(doc, *item)).collect();
            l.iter().any(|item| {
                let s = string_value(doc, *item);
                rs.iter().any(|other| (s == *other) != negate)
            })
        }
        (Value::Nodes(items), Value::Bool(b)) | (Value::Bool(b), Value::Nodes(items)) => {
            (!items.is_empty() == *b) != negate
        }
        (Value::Nodes(items), Value::Num(n)) | (Value::Num(n), Value::Nodes(items)) => items
            .iter()
            .any(|item| (parse_number(&string_value(doc, *item)) == *n) != negate),
        (Value::Nodes(items), Value::Str(s)) | (Value::Str(s), Value::Nodes(items)) => items
            .iter()
            .any(|item| (string_value(doc, *item) == *s) != negate),
        (Value::Bool(_), _) | (_, Value::Bool(_)) => (left.boolean() == right.boolean()) != negate,
        (Value::Num(_), _) | (_, Value::Num(_)) => {
            (left.number(doc) == right.number(doc)) != negate
        }
        _ => (left.string(doc) == right.string(doc)) != negate,
    }
}

fn compare_rel(op: BinOp, left: &Value, right: &Value, doc: &Document) -> bool {
    let ls = numbers_of(left, doc);
    let rs = numbers_of(right, doc);
    ls.iter().any(|l| {
        rs.iter().any(|r| match op {
            BinOp::Lt => l < r,
            BinOp::Le => l <= r,
            BinOp::Gt => l > r,
            BinOp::Ge => l >= r,
            _ => false,
        })
    })
}

fn eval_call(func: Func, args: &[Expr], ctx: &Context<'_>) -> Result<Value, String> {
    let arg_or_context = |index: usize| -> Result<Value, String> {
        match args.get(index) {
            Some(expr) => eval(expr, ctx),
            None => Ok(Value::Nodes(vec![ctx.item])),
        }
    };

    match func {
        Func::True => Ok(Value::Bool(true)),
        Func::False => Ok(Value::Bool(false)),
        Func::Not => Ok(Value::Bool(!eval(&args[0], ctx)?.boolean())),
        Func::Boolean => Ok(Value::Bool(eval(&args[0], ctx)?.boolean())),
        Func::Count => match eval(&args[0], ctx)? {
            Value::Nodes(items) => Ok(Value::Num(items.len() as f64)),
            _ => Err("count() requires a node-set".to_string()),
        },
        Func::String => Ok(Value::Str(arg_or_context(0)?.string(ctx.doc))),
        Func::Number => Ok(Value::Num(arg_or_context(0)?.number(ctx.doc))),
        Func::NormalizeSpace => {
            let s = arg_or_context(0)?.string(ctx.doc);
            Ok(Value::Str(s.split_whitespace().collect::<Vec<_>>().join(" ")))
        }
        Func::StringLength => {
            let s = arg_or_context(0)?.string(ctx.doc);
            Ok(Value::Num(s.chars().count() as f64))
        }
        Func::Contains => {
            let haystack = eval(&args[0], ctx)?.string(ctx.doc);
            let needle = eval(&args[1], ctx)?.string(ctx.doc);
            Ok(Value::Bool(haystack.contains(&needle)))
        }
        Func::StartsWith => {
            let haystack = eval(&args[0], ctx)?.string(ctx.doc);
            let needle = eval(&args[1], ctx)?.string(ctx.doc);
            Ok(Value::Bool(haystack.starts_with(&needle)))
        }
        Func::LocalName | Func::Name => {
            let items = match arg_or_context(0)? {
                Value::Nodes(items) => items,
                _ => return Err("name() requires a node-set".to_string()),
            };
            let name = items.first().map(|item| match item {
                Item::Node(id) => ctx
                    .doc
                    .element_name(*id)
                    .map(|n| {
                        if func == Func::Name {
                            n.lexical()
                        } else {
                            n.local.clone()
                        }
                    })
                    .unwrap_or_default(),
                Item::Attr { owner, index } => {
                    let attr = &ctx.doc.attributes(*owner)[*index];
                    if func == Func::Name {
                        attr.lexical()
                    } else {
                        attr.local.clone()
                    }
                }
            });
            Ok(Value::Str(name.unwrap_or_default()))
        }
        Func::Position => Ok(Value::Num(ctx.position as f64)),
        Func::Last => Ok(Value::Num(ctx.size as f64)),
    }
}

fn eval_path(path: &PathExpr, ctx: &Context<'_>) -> Result<Vec<Item>, String> {
    let mut items: Vec<Item> = if path.absolute {
        vec![Item::Node(0)]
    } else {
        vec![ctx.item]
    };

    for step in &path.steps {
        let mut result: Vec<Item> = Vec::new();
        let mut seen: HashSet<Item> = HashSet::new();
        for &item in &items {
            let bases: Vec<Item> = if step.descendant {
                descendant_or_self(ctx.doc, item)
            } else {
                vec![item]
            };
            for base in bases {
                let mut local = apply_axis(ctx.doc, base, step);
                for predicate in &step.predicates {
                    let size = local.len();
                    let mut kept = Vec::new();
                    for (index, candidate) in local.into_iter().enumerate() {
                        let sub = Context {
                            doc: ctx.doc,
                            item: candidate,
                            position: index + 1,
                            size,
                        };
                        let keep = match eval(predicate, &sub)? {
                            Value::Num(n) => (index + 1) as f64 == n,
                            value => value.boolean(),
                        };
                        if keep {
                            kept.push(candidate);
                        }
                    }
                    local = kept;
                }
                for candidate in local {
                    if seen.insert(candidate) {
                        result.push(candidate);
                    }
                }
            }
        }
        items = result;
    }

    items.sort_by_key(|item| item.order_key());
    Ok(items)
}

fn descendant_or_self(doc: &Document, item: Item) -> Vec<Item> {
    match item {
        Item::Node(id) => {
            let mut out = vec![item];
            out.extend(doc.descendants(id).into_iter().map(Item::Node));
            out
        }
        Item::Attr { .. } => vec![item],
    }
}

fn apply_axis(doc: &Document, base: Item, step: &Step) -> Vec<Item> {
    match step.axis {
        Axis::SelfNode => {
            if matches_test(doc, base, &step.test, step.axis) {
                vec![base]
            } else {
                Vec::new()
            }
        }
        Axis::Parent => {
            let parent = match base {
                Item::Node(id) => doc.parent(id).map(Item::Node),
                Item::Attr { owner, .. } => Some(Item::Node(owner)),
            };
            parent
                .filter(|p| matches_test(doc, *p, &step.test, step.axis))
                .into_iter()
                .collect()
        }
        Axis::Child => match base {
            Item::Node(id) => doc
                .children(id)
                .iter()
                .copied()
                .map(Item::Node)
                .filter(|c| matches_test(doc, *c, &step.test, step.axis))
                .collect(),
            Item::Attr { .. } => Vec::new(),
        },
        Axis::Attribute => match base {
            Item::Node(id) => doc
                .attributes(id)
                .iter()
                .enumerate()
                .filter(|(_, a)| !a.is_namespace_decl())
                .map(|(index, _)| Item::Attr { owner: id, index })
                .filter(|a| matches_test(doc, *a, &step.test, step.axis))
                .collect(),
            Item::Attr { .. } => Vec::new(),
        },
    }
}

fn matches_test(doc: &Document, item: Item, test: &NodeTest, axis: Axis) -> bool {
    match item {
        Item::Node(id) => match test {
            NodeTest::AnyKind => true,
            NodeTest::Text => matches!(doc.kind(id), NodeKind::Text(_)),
            NodeTest::Any => doc.element_name(id).is_some(),
            NodeTest::AnyInNs(uri) => doc
                .element_name(id)
                .is_some_and(|name| name.namespace == *uri),
            NodeTest::Named { namespace, local } => doc
                .element_name(id)
                .is_some_and(|name| name.namespace == *namespace && name.local == *local),
        },
        Item::Attr { owner, index } => {
            if axis != Axis::Attribute {
                return matches!(test, NodeTest::AnyKind);
            }
            let attr = &doc.attributes(owner)[index];
            match test {
                NodeTest::AnyKind | NodeTest::Any => true,
                NodeTest::Text => false,
                NodeTest::AnyInNs(uri) => attr.namespace == *uri,
                NodeTest::Named { namespace, local } => {
                    attr.namespace == *namespace && attr.local == *local
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Public API

/// A compiled expectation expression with its namespace bindings resolved.
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    ast: Expr,
}

impl XPath {
    pub fn compile(source: &str, namespaces: &Namespaces) -> Result<Self, SpecError> {
        let err = |details: String| SpecError::Expression {
            expression: source.to_string(),
            details,
        };
        let tokens = lex(source).map_err(err)?;
        if tokens.is_empty() {
            return Err(SpecError::Expression {
                expression: source.to_string(),
                details: "empty expression".to_string(),
            });
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            namespaces,
        };
        let ast = parser.parse().map_err(|details| SpecError::Expression {
            expression: source.to_string(),
            details,
        })?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with the document node as context, as the report checks do.
    pub fn evaluate(&self, doc: &Document) -> Result<Value, SpecError> {
        let ctx = Context {
            doc,
            item: Item::Node(0),
            position: 1,
            size: 1,
        };
        eval(&self.ast, &ctx).map_err(|details| SpecError::Expression {
            expression: self.source.clone(),
            details,
        })
    }

    /// Evaluate and convert to boolean.
    pub fn test(&self, doc: &Document) -> Result<bool, SpecError> {
        Ok(self.evaluate(doc)?.boolean())
    }
}
