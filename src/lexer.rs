//! Splits template source into raw text and tag tokens.

use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Raw,
    Output,
    Logic,
    Comment,
    OutputWsPre,  // {{- ... }}
    OutputWsPost, // {{ ... -}}
    OutputWsBoth, // {{- ... -}}
    LogicWsPre,   // {%- ... %}
    LogicWsPost,  // {% ... -%}
    LogicWsBoth,  // {%- ... -%}
}

impl TokenKind {
    pub fn is_output(self) -> bool {
        matches!(
            self,
            TokenKind::Output
                | TokenKind::OutputWsPre
                | TokenKind::OutputWsPost
                | TokenKind::OutputWsBoth
        )
    }

    pub fn is_logic(self) -> bool {
        matches!(
            self,
            TokenKind::Logic | TokenKind::LogicWsPre | TokenKind::LogicWsPost | TokenKind::LogicWsBoth
        )
    }

    /// Strips trailing whitespace from the text before it.
    pub fn trims_before(self) -> bool {
        matches!(
            self,
            TokenKind::OutputWsPre
                | TokenKind::OutputWsBoth
                | TokenKind::LogicWsPre
                | TokenKind::LogicWsBoth
        )
    }

    /// Strips leading whitespace from the text after it.
    pub fn trims_after(self) -> bool {
        matches!(
            self,
            TokenKind::OutputWsPost
                | TokenKind::OutputWsBoth
                | TokenKind::LogicWsPost
                | TokenKind::LogicWsBoth
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    /// Byte offset of the token in the source.
    pub offset: usize,
}

struct Delimiter {
    kind: TokenKind,
    open: &'static str,
    close: &'static str,
}

// Most specific first. Raw blocks must win over the plain logic tag.
const DELIMITERS: &[Delimiter] = &[
    Delimiter { kind: TokenKind::Raw, open: "{% raw %}", close: "{% endraw %}" },
    Delimiter { kind: TokenKind::Raw, open: "{% verbatim %}", close: "{% endverbatim %}" },
    Delimiter { kind: TokenKind::OutputWsPre, open: "{{-", close: "}}" },
    Delimiter { kind: TokenKind::OutputWsPost, open: "{{", close: "-}}" },
    Delimiter { kind: TokenKind::OutputWsBoth, open: "{{-", close: "-}}" },
    Delimiter { kind: TokenKind::LogicWsPre, open: "{%-", close: "%}" },
    Delimiter { kind: TokenKind::LogicWsPost, open: "{%", close: "-%}" },
    Delimiter { kind: TokenKind::LogicWsBoth, open: "{%-", close: "-%}" },
    Delimiter { kind: TokenKind::Output, open: "{{", close: "}}" },
    Delimiter { kind: TokenKind::Logic, open: "{%", close: "%}" },
    Delimiter { kind: TokenKind::Comment, open: "{#", close: "#}" },
];

#[derive(Clone)]
pub struct Tokenizer<'a> {
    input: &'a str,
    cursor: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, cursor: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.cursor..]
    }

    fn advance(&mut self, n: usize) {
        self.cursor += n;
    }

    /// Earliest delimiter in `rest`. Ties go to the longer opener, then to
    /// the closer that appears first.
    fn find_start(rest: &str) -> Option<(usize, &'static Delimiter)> {
        let mut found: Option<(usize, &'static Delimiter)> = None;
        let mut found_close: Option<usize> = None;

        for def in DELIMITERS {
            let Some(pos) = rest.find(def.open) else {
                continue;
            };
            let close = rest.find(def.close);

            // A mismatched pair whose closer is absent cannot match.
            if def.open.len() != def.close.len() && close.is_none() {
                continue;
            }

            match found {
                None => {
                    found = Some((pos, def));
                    found_close = close;
                }
                Some((best, _)) if pos < best => {
                    found = Some((pos, def));
                    found_close = close;
                }
                Some((best, current)) if pos == best => {
                    let closes_sooner = matches!((close, found_close), (Some(c), Some(f)) if c < f);
                    if def.open.len() > current.open.len()
                        || (def.open.len() == current.open.len() && closes_sooner)
                    {
                        found = Some((pos, def));
                        found_close = close;
                    }
                }
                _ => {}
            }
        }

        found
    }

    /// Position of the closing delimiter in `rest`, skipping over quoted
    /// strings (comments and raw blocks take the first closer verbatim).
    fn find_end(rest: &str, def: &Delimiter, opened_at: usize) -> Result<usize> {
        let mut offset = 0;
        loop {
            let pos = rest[offset..]
                .find(def.close)
                .map(|p| p + offset)
                .ok_or_else(|| {
                    Error::new(ErrorKind::UnclosedDelimiter {
                        close: def.close.to_string(),
                        offset: opened_at,
                    })
                })?;

            if matches!(def.kind, TokenKind::Comment | TokenKind::Raw) {
                return Ok(pos);
            }

            let Some(quote_at) = rest[offset..pos].find(|c: char| c == '"' || c == '\'').map(|p| p + offset) else {
                return Ok(pos);
            };
            let quote = &rest[quote_at..quote_at + 1];

            // Skip to the matching unescaped quote and search again after it.
            let mut search = quote_at + 1;
            loop {
                let end = rest[search..]
                    .find(quote)
                    .map(|p| p + search)
                    .ok_or_else(|| Error::new(ErrorKind::UnclosedString))?;
                if escaped(&rest[..end]) {
                    search = end + 1;
                } else {
                    offset = end + 1;
                    break;
                }
            }
        }
    }

    pub fn next_token(&mut self) -> Option<Result<Token>> {
        let rest = self.remaining();
        if rest.is_empty() {
            return None;
        }

        let Some((pos, def)) = Self::find_start(rest) else {
            // No more tags
            let token = Token {
                kind: TokenKind::Raw,
                value: rest.to_string(),
                offset: self.cursor,
            };
            self.advance(rest.len());
            return Some(Ok(token));
        };

        if pos > 0 {
            // Text before the tag
            let token = Token {
                kind: TokenKind::Raw,
                value: rest[..pos].to_string(),
                offset: self.cursor,
            };
            self.advance(pos);
            return Some(Ok(token));
        }

        let opened_at = self.cursor;
        self.advance(def.open.len());
        let body = self.remaining();
        let end = match Self::find_end(body, def, opened_at) {
            Ok(end) => end,
            Err(err) => {
                self.cursor = self.input.len();
                return Some(Err(err));
            }
        };

        let token = Token {
            kind: def.kind,
            value: body[..end].trim().to_string(),
            offset: opened_at,
        };
        self.advance(end + def.close.len());

        // One newline after a logic tag belongs to the tag.
        if def.kind.is_logic() {
            let after = self.remaining();
            if after.starts_with('\n') {
                self.advance(1);
            } else if after.starts_with("\r\n") {
                self.advance(2);
            }
        }

        tracing::trace!(kind = ?token.kind, offset = token.offset, "token");
        Some(Ok(token))
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

/// Tokenize a whole template.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Tokenizer::new(source).collect()
}

/// Whether a quote right after `before` is escaped: an odd run of
/// backslashes precedes it.
fn escaped(before: &str) -> bool {
    before.bytes().rev().take_while(|&b| b == b'\\').count() % 2 == 1
}
