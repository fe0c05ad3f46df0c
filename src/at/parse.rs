//! Response tokenizer.
//!
//! Turns a raw ESP-AT response into lines of `preamble:token,token,...`.
//!
//! ```text
//! +CIPSTATUS:0,"TCP","192.168.5.114",48706,333,1
//! └─preamble┘ └─────────────── tokens ──────────────┘
//! ```
//!
//! Everything is bounded. Oversized content is truncated and flagged,
//! surplus lines and tokens are dropped and counted. Nothing here fails
//! the whole document: a line with broken quoting is discarded on its own.

use heapless::{String, Vec};

/// Maximum bytes of preamble or token content.
pub const TOKEN_LEN: usize = 24;

/// Maximum tokens kept per line.
pub const MAX_TOKENS: usize = 15;

/// Maximum lines kept per document.
pub const MAX_LINES: usize = 10;

/// Bounded token or preamble text.
pub type TokenText = String<TOKEN_LEN>;

/// How a token was written on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// Bare value, e.g. `48706`.
    Integer,
    /// Double-quoted value, e.g. `"TCP"`.
    String,
}

/// One comma-separated value of a response line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    content: TokenText,
    kind: TokenKind,
    truncated: bool,
}

impl Token {
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Content with quotes stripped and escapes resolved.
    pub fn as_str(&self) -> &str {
        &self.content
    }

    /// Numeric value of an Integer token.
    pub fn as_int(&self) -> Option<i32> {
        match self.kind {
            TokenKind::Integer => self.content.parse().ok(),
            TokenKind::String => None,
        }
    }

    /// Content was longer than [`TOKEN_LEN`].
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// One informative line of a response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseLine {
    preamble: TokenText,
    tokens: Vec<Token, MAX_TOKENS>,
    truncated: bool,
}

impl ResponseLine {
    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn token(&self, index: usize) -> Option<&Token> {
        self.tokens.get(index)
    }

    /// Shorthand for `token(index)?.as_int()`.
    pub fn int(&self, index: usize) -> Option<i32> {
        self.token(index)?.as_int()
    }

    /// Shorthand for `token(index)?.as_str()`, any kind.
    pub fn text(&self, index: usize) -> Option<&str> {
        self.token(index).map(Token::as_str)
    }

    /// Preamble or a token was cut, or tokens past [`MAX_TOKENS`] were dropped.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// A parsed response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseDocument {
    lines: Vec<ResponseLine, MAX_LINES>,
    dropped: usize,
    malformed: usize,
}

impl ResponseDocument {
    pub fn lines(&self) -> &[ResponseLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// First line whose preamble matches exactly.
    pub fn get_property(&self, preamble: &str) -> Option<&ResponseLine> {
        self.lines.iter().find(|l| l.preamble() == preamble)
    }

    /// Every line whose preamble matches, in arrival order.
    pub fn lines_with<'a>(&'a self, preamble: &'a str) -> impl Iterator<Item = &'a ResponseLine> + 'a {
        self.lines.iter().filter(move |l| l.preamble() == preamble)
    }

    /// Lines past [`MAX_LINES`] that were discarded.
    pub fn dropped_lines(&self) -> usize {
        self.dropped
    }

    /// Lines discarded for broken quoting.
    pub fn malformed_lines(&self) -> usize {
        self.malformed
    }
}

/// Free-function form of [`ResponseDocument::get_property`].
pub fn get_property<'a>(doc: &'a ResponseDocument, preamble: &str) -> Option<&'a ResponseLine> {
    doc.get_property(preamble)
}

/// Parse a raw response.
pub fn tokenize(raw: &[u8]) -> ResponseDocument {
    let mut doc = ResponseDocument::default();

    for line in Lines::new(raw) {
        match tokenize_line(line) {
            LineOutcome::Line(parsed) => {
                if doc.lines.push(parsed).is_err() {
                    doc.dropped += 1;
                }
            }
            LineOutcome::Malformed => doc.malformed += 1,
            LineOutcome::Noise => {}
        }
    }

    doc
}

enum LineOutcome {
    Line(ResponseLine),
    /// No colon or no tokens: terminators, echoes, blank lines.
    Noise,
    /// Unterminated quote or garbage after a closing quote.
    Malformed,
}

fn tokenize_line(line: &[u8]) -> LineOutcome {
    if line.trim_ascii().is_empty() {
        return LineOutcome::Noise;
    }

    // Last two colons outside quotes
    let mut in_quote = false;
    let mut escaped = false;
    let mut last = None;
    let mut prev = None;
    for (i, &b) in line.iter().enumerate() {
        if in_quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_quote = false;
            }
            continue;
        }
        match b {
            b'"' => in_quote = true,
            b':' => {
                prev = last;
                last = Some(i);
            }
            _ => {}
        }
    }

    if in_quote {
        return LineOutcome::Malformed;
    }
    let Some(split) = last else {
        return LineOutcome::Noise;
    };

    let start = prev.map_or(0, |p| p + 1);
    let (preamble, mut truncated) = bounded_text(&line[start..split]);
    let mut tokens = Vec::new();

    for field in Fields::new(&line[split + 1..]) {
        let field = field.trim_ascii();
        if field.is_empty() {
            continue;
        }
        let Some(token) = parse_token(field) else {
            return LineOutcome::Malformed;
        };
        truncated |= token.truncated;
        if tokens.push(token).is_err() {
            truncated = true;
        }
    }

    if tokens.is_empty() {
        return LineOutcome::Noise;
    }

    LineOutcome::Line(ResponseLine {
        preamble,
        tokens,
        truncated,
    })
}

fn parse_token(field: &[u8]) -> Option<Token> {
    if field[0] != b'"' {
        let (content, truncated) = bounded_text(field);
        return Some(Token {
            content,
            kind: TokenKind::Integer,
            truncated,
        });
    }

    let mut raw: Vec<u8, TOKEN_LEN> = Vec::new();
    let mut overflow = false;
    let mut escaped = false;
    let mut closed_at = None;

    for (i, &b) in field.iter().enumerate().skip(1) {
        if !escaped {
            match b {
                b'\\' => {
                    escaped = true;
                    continue;
                }
                b'"' => {
                    closed_at = Some(i);
                    break;
                }
                _ => {}
            }
        }
        escaped = false;
        overflow |= raw.push(b).is_err();
    }

    // Closing quote must end the field
    let end = closed_at?;
    if end + 1 != field.len() {
        return None;
    }

    let (content, cut) = bounded_text(&raw);
    Some(Token {
        content,
        kind: TokenKind::String,
        truncated: overflow || cut,
    })
}

/// Copy at most [`TOKEN_LEN`] bytes, stopping at the last whole UTF-8 char.
fn bounded_text(bytes: &[u8]) -> (TokenText, bool) {
    let take = bytes.len().min(TOKEN_LEN);
    let mut truncated = take < bytes.len();

    let valid = match core::str::from_utf8(&bytes[..take]) {
        Ok(s) => s,
        Err(e) => {
            truncated = true;
            core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or("")
        }
    };

    let mut text = TokenText::new();
    // Fits: `valid` is at most TOKEN_LEN bytes
    let _ = text.push_str(valid);
    (text, truncated)
}

/// Line splitter. `\r\n` is one break, a lone `\r` or `\n` is one break.
struct Lines<'a> {
    rest: &'a [u8],
}

impl<'a> Lines<'a> {
    fn new(raw: &'a [u8]) -> Self {
        Self { rest: raw }
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.rest.is_empty() {
            return None;
        }
        match self.rest.iter().position(|&b| b == b'\r' || b == b'\n') {
            Some(i) => {
                let line = &self.rest[..i];
                let crlf = self.rest[i] == b'\r' && self.rest.get(i + 1) == Some(&b'\n');
                self.rest = &self.rest[i + if crlf { 2 } else { 1 }..];
                Some(line)
            }
            None => {
                let line = self.rest;
                self.rest = &[];
                Some(line)
            }
        }
    }
}

/// Comma splitter that ignores commas inside quotes.
struct Fields<'a> {
    rest: Option<&'a [u8]>,
}

impl<'a> Fields<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self {
            rest: Some(payload),
        }
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let rest = self.rest?;
        let mut in_quote = false;
        let mut escaped = false;

        for (i, &b) in rest.iter().enumerate() {
            if in_quote {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_quote = false;
                }
            } else if b == b'"' {
                in_quote = true;
            } else if b == b',' {
                self.rest = Some(&rest[i + 1..]);
                return Some(&rest[..i]);
            }
        }

        self.rest = None;
        Some(rest)
    }
}
