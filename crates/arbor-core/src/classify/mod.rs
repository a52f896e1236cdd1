//! Turns raw input into typed, executable statements.
//!
//! Input whose first meaningful character (after whitespace and comments) is
//! the configured prefix becomes a client directive; anything else is a query
//! for the server. When multi-statement mode is on, input is split on the
//! statement terminator, but only after a cheap pre-check suggests there is
//! more than one statement, and never for `:style` or `:config` input, whose
//! payload may legitimately contain terminators.

mod lexer;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::errors::{ErrorKind, ErrorPayload};
use crate::ids::RequestId;

pub(crate) use lexer::{strip_comments, strip_leading_comments};

/// Tracing target for classification.
pub(crate) const CLASSIFY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::classify");

/// Directives that may run inside a multi-statement script.
pub const SCRIPT_DIRECTIVE_ALLOWLIST: &[&str] = &["param", "params", "use", "auto"];

/// Directives whose payload is never split.
const UNSPLITTABLE_DIRECTIVES: &[&str] = &["style", "config"];

/// What kind of unit a statement is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// Interpreted by the engine itself.
    ClientDirective,
    /// Forwarded to the server.
    Query,
}

/// One executable unit produced by [`classify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    /// Identifier of the request that will track this statement.
    pub id: RequestId,
    /// Script this statement belongs to.
    pub parent_id: Option<RequestId>,
    /// Cleaned statement text.
    pub text: String,
    /// Directive or query.
    pub kind: StatementKind,
    /// Dropped because the directive may not run inside a script.
    pub ignored: bool,
}

impl Statement {
    fn new(segment: &str, prefix: char, parent_id: Option<RequestId>) -> Self {
        let head = strip_leading_comments(segment);
        let (text, kind) = if head.starts_with(prefix) {
            (head.trim_end().to_owned(), StatementKind::ClientDirective)
        } else {
            (strip_comments(segment), StatementKind::Query)
        };
        let ignored = parent_id.is_some()
            && kind == StatementKind::ClientDirective
            && directive_name(&text, prefix)
                .is_none_or(|name| !SCRIPT_DIRECTIVE_ALLOWLIST.contains(&name.as_str()));

        Self {
            id: RequestId::new(),
            parent_id,
            text,
            kind,
            ignored,
        }
    }

    /// Lower-cased directive name, for directives.
    #[must_use]
    pub fn directive_name(&self, prefix: char) -> Option<String> {
        match self.kind {
            StatementKind::ClientDirective => directive_name(&self.text, prefix),
            StatementKind::Query => None,
        }
    }
}

/// Splits and classifies raw input.
///
/// Returns an empty vector when the input holds nothing but whitespace and
/// comments. Statements of a script share a freshly generated `parent_id`.
#[must_use]
pub fn classify(text: &str, prefix: char, multi_statement: bool) -> Vec<Statement> {
    if strip_comments(text).is_empty() {
        return Vec::new();
    }

    let head = strip_leading_comments(text);
    let unsplittable = head.starts_with(prefix)
        && directive_name(head, prefix)
            .is_some_and(|name| UNSPLITTABLE_DIRECTIVES.contains(&name.as_str()));

    if !multi_statement || unsplittable || !lexer::has_multiple_segments(text) {
        return vec![Statement::new(text, prefix, None)];
    }

    let segments = lexer::split_statements(text);
    if segments.len() < 2 {
        return segments
            .into_iter()
            .map(|segment| Statement::new(segment, prefix, None))
            .collect();
    }

    let parent = RequestId::new();
    let statements: Vec<Statement> = segments
        .into_iter()
        .map(|segment| Statement::new(segment, prefix, Some(parent)))
        .collect();
    debug!(
        target: CLASSIFY_TARGET,
        script = %parent,
        statements = statements.len(),
        ignored = statements.iter().filter(|statement| statement.ignored).count(),
        "split input into script"
    );
    statements
}

/// Lower-cased name of the directive in `text`, which must start with
/// `prefix` (leading comments already removed).
#[must_use]
pub fn directive_name(text: &str, prefix: char) -> Option<String> {
    let body = text.strip_prefix(prefix)?;
    let name: String = body
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '{')
        .collect();
    (!name.is_empty()).then(|| name.to_ascii_lowercase())
}

/// Everything after the directive name, trimmed.
#[must_use]
pub fn directive_arguments(text: &str, prefix: char) -> &str {
    let Some(body) = text.strip_prefix(prefix) else {
        return "";
    };
    let name_end = body
        .find(|c: char| c.is_whitespace() || c == '{')
        .unwrap_or(body.len());
    body.get(name_end..).unwrap_or_default().trim()
}

/// Input that classified but cannot be mapped to something runnable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassifyError {
    /// No handler is registered under the directive name.
    #[error("unknown command '{name}'")]
    UnknownDirective {
        /// Directive name as typed.
        name: String,
    },
    /// The directive was dropped from a multi-statement script.
    #[error("'{name}' cannot run inside a multi-statement script")]
    NotAllowedInScript {
        /// Directive name as typed.
        name: String,
    },
}

impl ClassifyError {
    /// Converts the failure into a display payload.
    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload::new(ErrorKind::Classification, self.to_string())
    }
}
