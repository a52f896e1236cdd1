//! Comment-, literal- and terminator-aware scanning of raw input.
//!
//! All delimiters are ASCII, so byte offsets produced here always fall on
//! UTF-8 character boundaries.

/// Classification of a scanned span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// Plain statement text.
    Code,
    /// A quoted string or backtick-quoted identifier.
    Literal,
    /// `// ...` up to, but excluding, the newline.
    LineComment,
    /// `/* ... */`, or everything after an unterminated opener.
    BlockComment,
    /// The statement terminator `;`.
    Terminator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) start: usize,
    pub(crate) end: usize,
}

pub(crate) fn tokenize(text: &str) -> Vec<Token> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut index = 0usize;
    let mut code_start = 0usize;

    while let Some(&byte) = bytes.get(index) {
        let next = bytes.get(index + 1).copied();
        let special = match (byte, next) {
            (b'/', Some(b'/')) => Some((TokenKind::LineComment, line_comment_end(bytes, index))),
            (b'/', Some(b'*')) => Some((TokenKind::BlockComment, block_comment_end(bytes, index))),
            (b'\'' | b'"' | b'`', _) => Some((TokenKind::Literal, literal_end(bytes, index, byte))),
            (b';', _) => Some((TokenKind::Terminator, index + 1)),
            _ => None,
        };

        match special {
            Some((kind, end)) => {
                push_code(&mut tokens, code_start, index);
                tokens.push(Token {
                    kind,
                    start: index,
                    end,
                });
                index = end;
                code_start = end;
            }
            None => index += 1,
        }
    }

    push_code(&mut tokens, code_start, bytes.len());
    tokens
}

fn push_code(tokens: &mut Vec<Token>, start: usize, end: usize) {
    if end > start {
        tokens.push(Token {
            kind: TokenKind::Code,
            start,
            end,
        });
    }
}

fn line_comment_end(bytes: &[u8], start: usize) -> usize {
    bytes
        .iter()
        .skip(start)
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |offset| start + offset)
}

fn block_comment_end(bytes: &[u8], start: usize) -> usize {
    let body = start + 2;
    bytes
        .get(body..)
        .and_then(|rest| rest.windows(2).position(|pair| pair == b"*/"))
        .map_or(bytes.len(), |offset| body + offset + 2)
}

fn literal_end(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut index = start + 1;
    while let Some(&byte) = bytes.get(index) {
        if byte == b'\\' && quote != b'`' {
            index += 2;
            continue;
        }
        if byte == quote {
            // A doubled backtick escapes itself inside an identifier.
            if quote == b'`' && bytes.get(index + 1) == Some(&b'`') {
                index += 2;
                continue;
            }
            return index + 1;
        }
        index += 1;
    }
    bytes.len()
}

/// Removes every comment outside literals and trims the result.
pub(crate) fn strip_comments(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    for token in tokenize(text) {
        let span = text.get(token.start..token.end).unwrap_or_default();
        match token.kind {
            TokenKind::LineComment => {}
            TokenKind::BlockComment => {
                let joins_words = output.chars().last().is_some_and(|c| !c.is_whitespace())
                    && text
                        .get(token.end..)
                        .and_then(|rest| rest.chars().next())
                        .is_some_and(|c| !c.is_whitespace());
                if joins_words {
                    output.push(' ');
                }
            }
            TokenKind::Code | TokenKind::Literal | TokenKind::Terminator => output.push_str(span),
        }
    }
    output.trim().to_owned()
}

/// Skips leading whitespace and comments.
pub(crate) fn strip_leading_comments(text: &str) -> &str {
    let mut rest = text.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("//") {
            rest = after
                .find('\n')
                .and_then(|offset| after.get(offset + 1..))
                .unwrap_or_default()
                .trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after
                .find("*/")
                .and_then(|offset| after.get(offset + 2..))
                .unwrap_or_default()
                .trim_start();
        } else {
            return rest;
        }
    }
}

/// Cheap pre-check: at least two non-blank pieces around a `;`.
///
/// Literal and comment boundaries are ignored here; a positive answer only
/// means the full split is worth running.
pub(crate) fn has_multiple_segments(text: &str) -> bool {
    text.contains(';')
        && text
            .split(';')
            .filter(|segment| !segment.trim().is_empty())
            .take(2)
            .count()
            > 1
}

/// Splits on terminators outside literals and comments, dropping segments
/// that hold nothing but whitespace and comments.
pub(crate) fn split_statements(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0usize;
    for token in tokenize(text) {
        if token.kind == TokenKind::Terminator {
            segments.push(text.get(start..token.start).unwrap_or_default());
            start = token.end;
        }
    }
    segments.push(text.get(start..).unwrap_or_default());
    segments
        .into_iter()
        .filter(|segment| !strip_comments(segment).is_empty())
        .collect()
}
