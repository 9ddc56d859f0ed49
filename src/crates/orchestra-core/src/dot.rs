//! DOT-subset parser
//!
//! Parses the directed-graph dialect pipelines are written in: one
//! `digraph` block containing graph attribute statements, node statements
//! with `[key=value, ...]` blocks, and `a -> b` edge statements. Shape
//! tokens map to the [`Shape`] enum here; the engine never sees them.
//!
//! `node [...]`/`edge [...]` default statements apply to subsequently
//! declared nodes and edges. Undirected graphs and `--` edges are
//! rejected up front.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::error::{OrchestraError, Result};
use crate::model::{Edge, PipelineGraph, Shape, Stage};

/// Map a DOT shape token to the handler discriminator
pub fn shape_from_token(token: &str) -> Option<Shape> {
    match token {
        "Mdiamond" => Some(Shape::Start),
        "Msquare" => Some(Shape::Exit),
        "box" => Some(Shape::Codergen),
        "diamond" => Some(Shape::Conditional),
        "parallelogram" => Some(Shape::Tool),
        "hexagon" => Some(Shape::HumanGate),
        "component" => Some(Shape::ParallelFanOut),
        "tripleoctagon" => Some(Shape::ParallelFanIn),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Arrow,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Equals,
    Comma,
    Semicolon,
}

struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self { chars: source.chars().peekable(), line: 1 }
    }

    fn error(&self, msg: impl Into<String>) -> OrchestraError {
        OrchestraError::Parse(format!("line {}: {}", self.line, msg.into()))
    }

    fn scan(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(&c) = self.chars.peek() {
            match c {
                '\n' => {
                    self.line += 1;
                    self.chars.next();
                }
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '/' => {
                    self.chars.next();
                    match self.chars.peek() {
                        Some('/') => self.skip_line_comment(),
                        Some('*') => self.skip_block_comment()?,
                        _ => return Err(self.error("unexpected '/'")),
                    }
                }
                '#' => self.skip_line_comment(),
                '"' => tokens.push(Token::Str(self.scan_string()?)),
                '{' => {
                    self.chars.next();
                    tokens.push(Token::LBrace);
                }
                '}' => {
                    self.chars.next();
                    tokens.push(Token::RBrace);
                }
                '[' => {
                    self.chars.next();
                    tokens.push(Token::LBracket);
                }
                ']' => {
                    self.chars.next();
                    tokens.push(Token::RBracket);
                }
                '=' => {
                    self.chars.next();
                    tokens.push(Token::Equals);
                }
                ',' => {
                    self.chars.next();
                    tokens.push(Token::Comma);
                }
                ';' => {
                    self.chars.next();
                    tokens.push(Token::Semicolon);
                }
                '-' => {
                    self.chars.next();
                    match self.chars.next() {
                        Some('>') => tokens.push(Token::Arrow),
                        Some('-') => {
                            return Err(self.error(
                                "undirected edges (--) are not supported; use directed edges (->)",
                            ))
                        }
                        _ => return Err(self.error("unexpected '-'")),
                    }
                }
                c if c.is_alphanumeric() || c == '_' || c == '.' => {
                    tokens.push(Token::Ident(self.scan_ident()));
                }
                other => return Err(self.error(format!("unexpected character '{other}'"))),
            }
        }
        Ok(tokens)
    }

    fn skip_line_comment(&mut self) {
        for c in self.chars.by_ref() {
            if c == '\n' {
                self.line += 1;
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) -> Result<()> {
        self.chars.next(); // consume '*'
        let mut prev = '\0';
        for c in self.chars.by_ref() {
            if c == '\n' {
                self.line += 1;
            }
            if prev == '*' && c == '/' {
                return Ok(());
            }
            prev = c;
        }
        Err(OrchestraError::Parse(format!("line {}: unterminated comment", self.line)))
    }

    fn scan_string(&mut self) -> Result<String> {
        self.chars.next(); // opening quote
        let mut out = String::new();
        while let Some(c) = self.chars.next() {
            match c {
                '"' => return Ok(out),
                '\\' => match self.chars.next() {
                    Some('"') => out.push('"'),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('\\') => out.push('\\'),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => break,
                },
                '\n' => {
                    self.line += 1;
                    out.push('\n');
                }
                other => out.push(other),
            }
        }
        Err(OrchestraError::Parse(format!("line {}: unterminated string", self.line)))
    }

    fn scan_ident(&mut self) -> String {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                out.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        out
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    graph: PipelineGraph,
    node_defaults: BTreeMap<String, JsonValue>,
    edge_defaults: BTreeMap<String, JsonValue>,
}

impl Parser {
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

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(OrchestraError::Parse(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn parse(mut self) -> Result<PipelineGraph> {
        match self.next() {
            Some(Token::Ident(kw)) if kw == "digraph" => {}
            Some(Token::Ident(kw)) if kw == "graph" => {
                return Err(OrchestraError::Parse(
                    "undirected graphs are not supported; use 'digraph'".to_string(),
                ))
            }
            other => {
                return Err(OrchestraError::Parse(format!(
                    "expected 'digraph', found {other:?}"
                )))
            }
        }

        self.graph.name = match self.next() {
            Some(Token::Ident(name)) => name,
            Some(Token::Str(name)) => name,
            other => {
                return Err(OrchestraError::Parse(format!(
                    "expected graph name, found {other:?}"
                )))
            }
        };
        self.expect(Token::LBrace)?;

        loop {
            match self.peek() {
                None => return Err(OrchestraError::Parse("unexpected end of input".to_string())),
                Some(Token::RBrace) => {
                    self.next();
                    break;
                }
                Some(Token::Semicolon) => {
                    self.next();
                }
                _ => self.parse_statement()?,
            }
        }

        if self.peek().is_some() {
            return Err(OrchestraError::Parse(
                "multiple digraph blocks are not supported".to_string(),
            ));
        }

        Ok(self.graph)
    }

    fn parse_statement(&mut self) -> Result<()> {
        let name = match self.next() {
            Some(Token::Ident(name)) => name,
            Some(Token::Str(name)) => name,
            other => {
                return Err(OrchestraError::Parse(format!(
                    "expected identifier, found {other:?}"
                )))
            }
        };

        match self.peek() {
            // graph attribute: key = value
            Some(Token::Equals) => {
                self.next();
                let value = self.parse_value()?;
                self.graph.graph_attributes.insert(name, value);
                Ok(())
            }
            // edge statement: a -> b [-> c] [attrs]
            Some(Token::Arrow) => {
                let mut chain = vec![name];
                while matches!(self.peek(), Some(Token::Arrow)) {
                    self.next();
                    match self.next() {
                        Some(Token::Ident(id)) | Some(Token::Str(id)) => chain.push(id),
                        other => {
                            return Err(OrchestraError::Parse(format!(
                                "expected edge target, found {other:?}"
                            )))
                        }
                    }
                }
                let attrs = self.parse_optional_attr_block()?;
                self.add_edges(&chain, attrs)
            }
            // node statement or defaults statement
            _ => {
                let attrs = self.parse_optional_attr_block()?;
                match name.as_str() {
                    "node" => {
                        self.node_defaults.extend(attrs);
                        Ok(())
                    }
                    "edge" => {
                        self.edge_defaults.extend(attrs);
                        Ok(())
                    }
                    "graph" => {
                        self.graph.graph_attributes.extend(attrs);
                        Ok(())
                    }
                    _ => self.define_node(&name, Some(attrs)),
                }
            }
        }
    }

    fn parse_optional_attr_block(&mut self) -> Result<BTreeMap<String, JsonValue>> {
        let mut attrs = BTreeMap::new();
        if !matches!(self.peek(), Some(Token::LBracket)) {
            return Ok(attrs);
        }
        self.next();
        loop {
            match self.next() {
                Some(Token::RBracket) => break,
                Some(Token::Comma) => continue,
                Some(Token::Ident(key)) | Some(Token::Str(key)) => {
                    self.expect(Token::Equals)?;
                    let value = self.parse_value()?;
                    attrs.insert(key, value);
                }
                other => {
                    return Err(OrchestraError::Parse(format!(
                        "expected attribute, found {other:?}"
                    )))
                }
            }
        }
        Ok(attrs)
    }

    fn parse_value(&mut self) -> Result<JsonValue> {
        match self.next() {
            Some(Token::Str(s)) => Ok(JsonValue::String(s)),
            Some(Token::Ident(word)) => {
                if word == "true" {
                    Ok(JsonValue::Bool(true))
                } else if word == "false" {
                    Ok(JsonValue::Bool(false))
                } else if let Ok(n) = word.parse::<i64>() {
                    Ok(JsonValue::Number(n.into()))
                } else if let Ok(f) = word.parse::<f64>() {
                    Ok(serde_json::Number::from_f64(f)
                        .map(JsonValue::Number)
                        .unwrap_or(JsonValue::String(word)))
                } else {
                    Ok(JsonValue::String(word))
                }
            }
            other => Err(OrchestraError::Parse(format!(
                "expected value, found {other:?}"
            ))),
        }
    }

    fn define_node(&mut self, id: &str, explicit: Option<BTreeMap<String, JsonValue>>) -> Result<()> {
        if self.graph.stages.contains_key(id) && explicit.is_none() {
            return Ok(());
        }

        let mut merged = self.node_defaults.clone();
        if let Some(explicit) = explicit {
            merged.extend(explicit);
        }

        let shape_token = match merged.remove("shape") {
            Some(JsonValue::String(s)) => s,
            Some(other) => other.to_string(),
            None => "box".to_string(),
        };
        let shape = shape_from_token(&shape_token).ok_or_else(|| {
            OrchestraError::Parse(format!("node '{id}': unknown shape '{shape_token}'"))
        })?;

        let label = match merged.remove("label") {
            Some(JsonValue::String(s)) => s,
            Some(other) => other.to_string(),
            None => id.to_string(),
        };
        let prompt = match merged.remove("prompt") {
            Some(JsonValue::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let mut stage = Stage::new(id, shape).with_label(label).with_prompt(prompt);
        stage.attributes = merged;
        self.graph.add_stage(stage);
        Ok(())
    }

    fn add_edges(&mut self, chain: &[String], attrs: BTreeMap<String, JsonValue>) -> Result<()> {
        let mut merged = self.edge_defaults.clone();
        merged.extend(attrs);

        let label = match merged.remove("label") {
            Some(JsonValue::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let condition = match merged.remove("condition") {
            Some(JsonValue::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let weight = match merged.remove("weight") {
            Some(JsonValue::Number(n)) => n.as_u64().unwrap_or(0) as u32,
            Some(JsonValue::String(s)) => s.parse().unwrap_or(0),
            _ => 0,
        };

        for pair in chain.windows(2) {
            self.define_node(&pair[0], None)?;
            self.define_node(&pair[1], None)?;
            let mut edge = Edge::new(&pair[0], &pair[1])
                .with_label(&label)
                .with_condition(&condition)
                .with_weight(weight);
            edge.attributes = merged.clone();
            self.graph.add_edge(edge);
        }
        Ok(())
    }
}

/// Parse DOT source into a pipeline graph
pub fn parse_dot(source: &str) -> Result<PipelineGraph> {
    let tokens = Scanner::new(source).scan()?;
    let parser = Parser {
        tokens,
        pos: 0,
        graph: PipelineGraph::default(),
        node_defaults: BTreeMap::new(),
        edge_defaults: BTreeMap::new(),
    };
    parser.parse()
}

/// Blake3 hash of DOT source, recorded at run start and verified on resume
pub fn graph_hash(source: &[u8]) -> String {
    blake3::hash(source).to_hex().to_string()
}
