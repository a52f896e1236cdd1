//! Parameter assignments and Cypher literal evaluation.
//!
//! `:param` accepts `name => expression`, `name: expression`, or a map
//! `{a: 1, b: 'two'}`. Expressions that are plain literals are evaluated here;
//! anything else is handed back so the caller can evaluate it on the server.

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::classify::strip_comments;
use crate::driver::Params;

/// Deepest list or map nesting evaluated locally. Deeper literals are left
/// to the server.
const MAX_LITERAL_DEPTH: usize = 128;

/// Errors raised while reading parameter directives.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParamError {
    /// Nothing followed the directive.
    #[error("expected `name => value`, `name: value` or a map of parameters")]
    MissingAssignment,
    /// The parameter name is empty or malformed.
    #[error("invalid parameter name '{0}'")]
    InvalidName(String),
    /// The value side is empty.
    #[error("parameter '{0}' has no value")]
    MissingValue(String),
    /// A map assignment did not evaluate to a map.
    #[error("expected a map of parameters, got {0}")]
    NotAMap(String),
}

/// Parsed `:param` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamAssignment {
    /// One named parameter.
    Single {
        /// Parameter name, unquoted.
        name: String,
        /// Value expression as typed.
        expression: String,
    },
    /// A map expression whose entries become parameters.
    Map {
        /// Map expression as typed.
        expression: String,
    },
}

impl ParamAssignment {
    /// Parses the text following `:param`.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError`] when the text is empty, the name is malformed, or
    /// the value is missing.
    pub fn parse(input: &str) -> Result<Self, ParamError> {
        let input = strip_comments(input);
        let input = input.as_str();
        if input.is_empty() {
            return Err(ParamError::MissingAssignment);
        }
        if input.starts_with('{') {
            return Ok(Self::Map {
                expression: input.to_owned(),
            });
        }

        let (name, expression) = split_assignment(input).ok_or(ParamError::MissingAssignment)?;
        let name = unquote_name(name.trim())?;
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(ParamError::MissingValue(name));
        }
        Ok(Self::Single {
            name,
            expression: expression.to_owned(),
        })
    }

    /// Evaluates the assignment locally when its value is a plain literal.
    ///
    /// Returns `Ok(None)` when server-side evaluation is needed.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::NotAMap`] when a map assignment holds some other
    /// literal.
    pub fn evaluate_locally(&self) -> Result<Option<Params>, ParamError> {
        match self {
            Self::Single { name, expression } => Ok(parse_literal(expression).map(|value| {
                let mut params = Params::new();
                params.insert(name.clone(), value);
                params
            })),
            Self::Map { expression } => match parse_literal(expression) {
                Some(Value::Object(map)) => Ok(Some(map)),
                Some(other) => Err(ParamError::NotAMap(other.to_string())),
                None => Ok(None),
            },
        }
    }

    /// Statement that evaluates the assignment on the server, plus the column
    /// holding the result.
    #[must_use]
    pub fn server_statement(&self) -> (String, String) {
        match self {
            Self::Single { name, expression } => {
                let column = quote_identifier(name);
                (format!("RETURN {expression} AS {column}"), name.clone())
            }
            Self::Map { expression } => (format!("RETURN {expression} AS params"), "params".to_owned()),
        }
    }
}

fn split_assignment(input: &str) -> Option<(&str, &str)> {
    // `=>` wins over `:` so that `a => {b: 1}` keeps its map intact.
    if let Some(position) = input.find("=>") {
        let name = input.get(..position)?;
        if !name.contains(':') || name.trim_start().starts_with('`') {
            return Some((name, input.get(position + 2..)?));
        }
    }
    if let Some(rest) = input.strip_prefix('`') {
        let close = rest.find('`')?;
        let after = rest.get(close + 1..)?.trim_start();
        let value = after.strip_prefix(':').or_else(|| after.strip_prefix("=>"))?;
        return Some((input.get(..close + 2)?, value));
    }
    input.split_once(':')
}

fn unquote_name(name: &str) -> Result<String, ParamError> {
    let unquoted = name
        .strip_prefix('`')
        .and_then(|inner| inner.strip_suffix('`'))
        .map(|inner| inner.replace("``", "`"));
    match unquoted {
        Some(inner) if !inner.is_empty() => Ok(inner),
        Some(_) => Err(ParamError::InvalidName(name.to_owned())),
        None if is_identifier(name) => Ok(name.to_owned()),
        None => Err(ParamError::InvalidName(name.to_owned())),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn quote_identifier(name: &str) -> String {
    if is_identifier(name) {
        name.to_owned()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

/// Parses a Cypher literal: numbers, strings, booleans, `null`, lists and
/// maps. Returns `None` for anything else, including trailing input and
/// nesting deeper than 128 levels.
#[must_use]
pub fn parse_literal(input: &str) -> Option<Value> {
    let mut parser = LiteralParser::new(input);
    let value = parser.value()?;
    parser.skip_whitespace();
    parser.at_end().then_some(value)
}

struct LiteralParser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    depth: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            depth: 0,
        }
    }

    fn at_end(&mut self) -> bool {
        self.chars.peek().is_none()
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_whitespace();
        self.chars.next_if_eq(&expected).is_some()
    }

    fn value(&mut self) -> Option<Value> {
        self.skip_whitespace();
        match *self.chars.peek()? {
            '\'' | '"' => self.string().map(Value::String),
            '[' => self.nested(Self::list),
            '{' => self.nested(Self::map),
            c if c == '-' || c.is_ascii_digit() || c == '.' => self.number(),
            c if c.is_alphabetic() => self.keyword(),
            _ => None,
        }
    }

    fn nested(&mut self, parse: fn(&mut Self) -> Option<Value>) -> Option<Value> {
        if self.depth >= MAX_LITERAL_DEPTH {
            return None;
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn keyword(&mut self) -> Option<Value> {
        let word = self.word();
        match word.to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            "null" => Some(Value::Null),
            _ => None,
        }
    }

    fn word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.chars.next_if(|c| c.is_alphanumeric() || *c == '_') {
            word.push(c);
        }
        word
    }

    fn number(&mut self) -> Option<Value> {
        let mut text = String::new();
        while let Some(c) = self
            .chars
            .next_if(|c| c.is_ascii_digit() || matches!(*c, '-' | '+' | '.' | 'e' | 'E'))
        {
            text.push(c);
        }
        if let Ok(integer) = text.parse::<i64>() {
            return Some(Value::Number(integer.into()));
        }
        let float = text.parse::<f64>().ok()?;
        Number::from_f64(float).map(Value::Number)
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.chars.next()?;
        let mut output = String::new();
        loop {
            match self.chars.next()? {
                c if c == quote => return Some(output),
                '\\' => output.push(self.escape()?),
                c => output.push(c),
            }
        }
    }

    fn escape(&mut self) -> Option<char> {
        Some(match self.chars.next()? {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'b' => '\u{0008}',
            'f' => '\u{000C}',
            'u' => {
                let hex: String = (0..4).filter_map(|_| self.chars.next()).collect();
                char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?
            }
            other => other,
        })
    }

    fn list(&mut self) -> Option<Value> {
        self.chars.next();
        let mut items = Vec::new();
        if self.eat(']') {
            return Some(Value::Array(items));
        }
        loop {
            items.push(self.value()?);
            if self.eat(']') {
                return Some(Value::Array(items));
            }
            if !self.eat(',') {
                return None;
            }
        }
    }

    fn map(&mut self) -> Option<Value> {
        self.chars.next();
        let mut entries = Map::new();
        if self.eat('}') {
            return Some(Value::Object(entries));
        }
        loop {
            let key = self.key()?;
            if !self.eat(':') {
                return None;
            }
            let value = self.value()?;
            entries.insert(key, value);
            if self.eat('}') {
                return Some(Value::Object(entries));
            }
            if !self.eat(',') {
                return None;
            }
        }
    }

    fn key(&mut self) -> Option<String> {
        self.skip_whitespace();
        match *self.chars.peek()? {
            '\'' | '"' => self.string(),
            '`' => {
                self.chars.next();
                let mut key = String::new();
                loop {
                    match self.chars.next()? {
                        '`' if self.chars.next_if_eq(&'`').is_some() => key.push('`'),
                        '`' => return Some(key),
                        c => key.push(c),
                    }
                }
            }
            c if c.is_alphabetic() || c == '_' => Some(self.word()),
            _ => None,
        }
    }
}
