//! Streaming JSON tokenizer.
//!
//! Tokens are produced straight from a [`ByteSource`] with one byte of
//! lookahead. No container stack is kept: a string immediately followed
//! by `:` is reported as a key, commas and whitespace are separators.

use std::fmt;

use crate::error::{Error, Result};
use crate::io::ByteSource;

/// Strings and numbers longer than this are truncated.
pub const MAX_TOKEN_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    ObjectStart,
    ObjectEnd,
    ArrayStart,
    ArrayEnd,
    Key(String),
    String(String),
    /// Raw number text, e.g. `-12.5e3`.
    Number(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    ObjectStart,
    ObjectEnd,
    ArrayStart,
    ArrayEnd,
    Key,
    String,
    Number,
    Bool,
    Null,
}

impl Token {
    pub fn kind(&self) -> TokenKind {
        match self {
            Token::ObjectStart => TokenKind::ObjectStart,
            Token::ObjectEnd => TokenKind::ObjectEnd,
            Token::ArrayStart => TokenKind::ArrayStart,
            Token::ArrayEnd => TokenKind::ArrayEnd,
            Token::Key(_) => TokenKind::Key,
            Token::String(_) => TokenKind::String,
            Token::Number(_) => TokenKind::Number,
            Token::Bool(_) => TokenKind::Bool,
            Token::Null => TokenKind::Null,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Token::Number(text) => text
                .parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().map(|f| f as i64)),
            _ => None,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::ObjectStart => "'{'",
            TokenKind::ObjectEnd => "'}'",
            TokenKind::ArrayStart => "'['",
            TokenKind::ArrayEnd => "']'",
            TokenKind::Key => "key",
            TokenKind::String => "string",
            TokenKind::Number => "number",
            TokenKind::Bool => "bool",
            TokenKind::Null => "null",
        };
        f.write_str(name)
    }
}

pub struct Tokenizer<S> {
    source: S,
}

impl<S: ByteSource> Tokenizer<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    /// Next token, `None` at end of input.
    pub async fn next_token(&mut self) -> Result<Option<Token>> {
        let Some(b) = self.skip_separators().await? else {
            return Ok(None);
        };

        let token = match b {
            b'{' => Token::ObjectStart,
            b'}' => Token::ObjectEnd,
            b'[' => Token::ArrayStart,
            b']' => Token::ArrayEnd,
            b'"' => {
                let text = self.read_string().await?;
                if self.skip_whitespace().await? == Some(b':') {
                    self.source.get_byte().await?;
                    Token::Key(text)
                } else {
                    Token::String(text)
                }
            }
            b'-' | b'0'..=b'9' => Token::Number(self.read_number(b).await?),
            b't' => {
                self.read_literal(b"rue").await?;
                Token::Bool(true)
            }
            b'f' => {
                self.read_literal(b"alse").await?;
                Token::Bool(false)
            }
            b'n' => {
                self.read_literal(b"ull").await?;
                Token::Null
            }
            other => {
                return Err(Error::Syntax(format!(
                    "unexpected byte {:?}",
                    char::from(other)
                )));
            }
        };
        Ok(Some(token))
    }

    /// Consumes whitespace and commas, returns the first other byte.
    async fn skip_separators(&mut self) -> Result<Option<u8>> {
        loop {
            match self.source.get_byte().await? {
                Some(b' ' | b'\t' | b'\r' | b'\n' | b',') => continue,
                other => return Ok(other),
            }
        }
    }

    /// Consumes whitespace and peeks at the next byte.
    async fn skip_whitespace(&mut self) -> Result<Option<u8>> {
        loop {
            match self.source.peek_byte().await? {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.source.get_byte().await?;
                }
                other => return Ok(other),
            }
        }
    }

    async fn byte(&mut self) -> Result<u8> {
        self.source.get_byte().await?.ok_or(Error::UnexpectedEof)
    }

    async fn read_literal(&mut self, rest: &[u8]) -> Result<()> {
        for &expected in rest {
            let b = self.byte().await?;
            if b != expected {
                return Err(Error::Syntax(format!(
                    "bad literal, expected {:?} got {:?}",
                    char::from(expected),
                    char::from(b)
                )));
            }
        }
        Ok(())
    }

    async fn read_number(&mut self, first: u8) -> Result<String> {
        let mut text = String::new();
        text.push(char::from(first));
        while let Some(b) = self.source.peek_byte().await? {
            if !matches!(b, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') {
                break;
            }
            self.source.get_byte().await?;
            if text.len() < MAX_TOKEN_LEN {
                text.push(char::from(b));
            }
        }
        Ok(text)
    }

    /// Reads a string body after the opening quote, decoding escapes.
    async fn read_string(&mut self) -> Result<String> {
        let mut raw: Vec<u8> = Vec::new();
        let mut full = false;
        loop {
            let b = self.byte().await?;
            match b {
                b'"' => break,
                b'\\' => {
                    let esc = self.byte().await?;
                    let decoded = match esc {
                        b'"' => '"',
                        b'\\' => '\\',
                        b'/' => '/',
                        b'b' => '\u{8}',
                        b'f' => '\u{c}',
                        b'n' => '\n',
                        b'r' => '\r',
                        b't' => '\t',
                        b'u' => self.read_unicode_escape().await?,
                        other => {
                            return Err(Error::Syntax(format!(
                                "invalid escape \\{}",
                                char::from(other)
                            )));
                        }
                    };
                    let mut utf8 = [0u8; 4];
                    push_capped(&mut raw, &mut full, decoded.encode_utf8(&mut utf8).as_bytes());
                }
                _ => push_capped(&mut raw, &mut full, &[b]),
            }
        }
        drop_split_char(&mut raw);
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    async fn read_hex4(&mut self) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..4 {
            let b = self.byte().await?;
            let digit = char::from(b)
                .to_digit(16)
                .ok_or_else(|| Error::Syntax(format!("bad hex digit {:?}", char::from(b))))?;
            value = value * 16 + digit;
        }
        Ok(value)
    }

    async fn read_unicode_escape(&mut self) -> Result<char> {
        let high = self.read_hex4().await?;
        if !(0xD800..0xDC00).contains(&high) {
            return Ok(char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER));
        }

        // High surrogate, a low one should follow as another \u escape.
        if self.source.peek_byte().await? != Some(b'\\') {
            return Ok(char::REPLACEMENT_CHARACTER);
        }
        self.source.get_byte().await?;
        if self.byte().await? != b'u' {
            return Err(Error::Syntax("expected low surrogate escape".to_string()));
        }
        let low = self.read_hex4().await?;
        if !(0xDC00..0xE000).contains(&low) {
            return Ok(char::REPLACEMENT_CHARACTER);
        }
        let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
        Ok(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
    }
}

/// Appends until the first piece that does not fit; everything after it
/// is dropped too.
fn push_capped(buf: &mut Vec<u8>, full: &mut bool, bytes: &[u8]) {
    if *full {
        return;
    }
    if buf.len() + bytes.len() <= MAX_TOKEN_LEN {
        buf.extend_from_slice(bytes);
    } else {
        *full = true;
    }
}

/// Removes a multi-byte character the cap cut in half.
fn drop_split_char(buf: &mut Vec<u8>) {
    if let Err(e) = std::str::from_utf8(buf) {
        if e.error_len().is_none() {
            buf.truncate(e.valid_up_to());
        }
    }
}
