//! Projection helpers over the token stream.
//!
//! Nothing here builds a document tree. A caller walks an object with
//! [`JsonReader::find_names`], reads the values it asked for and lets
//! everything else be skipped as it streams past.

use tracing::warn;

use crate::error::{Error, Result};
use crate::io::ByteSource;
use crate::json::token::{Token, TokenKind, Tokenizer};

/// Most names a single [`Fields`] set can track.
pub const MAX_FIELDS: usize = 64;

/// Names of interest for one object scan.
///
/// Remembers which names were already reported so an index is handed out
/// at most once per scan, even if the document repeats a key.
#[derive(Debug, Clone)]
pub struct Fields<'a> {
    names: &'a [&'a str],
    seen: u64,
}

impl<'a> Fields<'a> {
    /// Names past [`MAX_FIELDS`] are dropped and never reported.
    pub fn new(names: &'a [&'a str]) -> Self {
        let names = match names.get(..MAX_FIELDS) {
            Some(head) if names.len() > MAX_FIELDS => {
                warn!(given = names.len(), kept = MAX_FIELDS, "too many field names");
                head
            }
            _ => names,
        };
        Self { names, seen: 0 }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&'a str> {
        self.names.get(index).copied()
    }

    /// Forget reported names, for scanning the next object.
    pub fn reset(&mut self) {
        self.seen = 0;
    }

    fn lookup(&mut self, key: &str) -> Lookup {
        match self.names.iter().position(|n| *n == key) {
            Some(i) if self.seen & (1 << i) != 0 => Lookup::Repeated,
            Some(i) => {
                self.seen |= 1 << i;
                Lookup::Found(i)
            }
            None => Lookup::Other,
        }
    }
}

enum Lookup {
    Found(usize),
    Repeated,
    Other,
}

pub struct JsonReader<S> {
    tokens: Tokenizer<S>,
}

impl<S: ByteSource> JsonReader<S> {
    pub fn new(source: S) -> Self {
        Self {
            tokens: Tokenizer::new(source),
        }
    }

    pub fn into_inner(self) -> S {
        self.tokens.into_inner()
    }

    pub async fn next(&mut self) -> Result<Option<Token>> {
        self.tokens.next_token().await
    }

    /// Consumes the next token and returns it if it has the expected kind.
    ///
    /// On a mismatch the token is gone all the same; `None` means "value
    /// absent, cursor already past it".
    pub async fn expect(&mut self, kind: TokenKind) -> Result<Option<Token>> {
        match self.next().await? {
            Some(token) if token.kind() == kind => Ok(Some(token)),
            Some(token) => {
                warn!(expected = %kind, found = %token.kind(), "unexpected json token");
                Ok(None)
            }
            None => {
                warn!(expected = %kind, "json input ended");
                Ok(None)
            }
        }
    }

    /// Like [`expect`](Self::expect), but a mismatched value is consumed
    /// whole: if it was an object or array, the cursor ends up past its
    /// closing token.
    pub async fn expect_value(&mut self, kind: TokenKind) -> Result<Option<Token>> {
        match self.next().await? {
            Some(token) if token.kind() == kind => Ok(Some(token)),
            Some(token) => {
                warn!(expected = %kind, found = %token.kind(), "unexpected json value");
                self.skip_rest(token).await?;
                Ok(None)
            }
            None => {
                warn!(expected = %kind, "json input ended");
                Ok(None)
            }
        }
    }

    pub async fn expect_string(&mut self) -> Result<Option<String>> {
        match self.expect_value(TokenKind::String).await? {
            Some(Token::String(s)) => Ok(Some(s)),
            _ => Ok(None),
        }
    }

    pub async fn expect_i64(&mut self) -> Result<Option<i64>> {
        Ok(self
            .expect_value(TokenKind::Number)
            .await?
            .and_then(|t| t.as_i64()))
    }

    pub async fn expect_bool(&mut self) -> Result<Option<bool>> {
        match self.expect_value(TokenKind::Bool).await? {
            Some(Token::Bool(b)) => Ok(Some(b)),
            _ => Ok(None),
        }
    }

    /// Consumes exactly one value, however deeply nested.
    pub async fn skip(&mut self) -> Result<()> {
        let first = self.next().await?.ok_or(Error::UnexpectedEof)?;
        self.skip_rest(first).await
    }

    /// Finishes skipping a value whose first token was already read.
    pub async fn skip_rest(&mut self, first: Token) -> Result<()> {
        let (mut objects, mut arrays) = match first {
            Token::ObjectStart => (1u32, 0u32),
            Token::ArrayStart => (0, 1),
            _ => return Ok(()),
        };

        while objects > 0 || arrays > 0 {
            match self.next().await?.ok_or(Error::UnexpectedEof)? {
                Token::ObjectStart => objects += 1,
                Token::ObjectEnd => objects = objects.saturating_sub(1),
                Token::ArrayStart => arrays += 1,
                Token::ArrayEnd => arrays = arrays.saturating_sub(1),
                _ => {}
            }
        }
        Ok(())
    }

    /// Scans the current object for the next key in `fields`.
    ///
    /// Returns the index of the matching name with the cursor on its
    /// value, which the caller must read or skip. Values of other keys are
    /// skipped. `None` once the object's closing brace is consumed.
    pub async fn find_names(&mut self, fields: &mut Fields<'_>) -> Result<Option<usize>> {
        loop {
            match self.next().await?.ok_or(Error::UnexpectedEof)? {
                Token::ObjectEnd => return Ok(None),
                Token::Key(key) => match fields.lookup(&key) {
                    Lookup::Found(i) => return Ok(Some(i)),
                    Lookup::Repeated => {
                        warn!(key = %key, "duplicate json key, ignoring");
                        self.skip().await?;
                    }
                    Lookup::Other => self.skip().await?,
                },
                other => {
                    warn!(found = %other.kind(), "expected object key");
                    self.skip_rest(other).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SliceSource;

    fn reader(input: &'static str) -> JsonReader<SliceSource> {
        JsonReader::new(SliceSource::new(input.as_bytes()))
    }

    #[tokio::test]
    async fn expect_mismatch_consumes_the_token() {
        let mut r = reader(r#"[1, "two"]"#);

        assert!(r.expect(TokenKind::ArrayStart).await.unwrap().is_some());
        assert!(r.expect(TokenKind::String).await.unwrap().is_none());
        assert_eq!(r.expect_string().await.unwrap(), Some("two".to_string()));
    }

    #[tokio::test]
    async fn typed_mismatch_consumes_whole_container() {
        let mut r = reader(r#"{"a": {"x": [1, {"y": 2}]}, "b": [true], "c": "ok"}"#);
        let mut fields = Fields::new(&["a", "b", "c"]);

        r.expect(TokenKind::ObjectStart).await.unwrap();
        assert_eq!(r.find_names(&mut fields).await.unwrap(), Some(0));
        assert_eq!(r.expect_string().await.unwrap(), None);
        assert_eq!(r.find_names(&mut fields).await.unwrap(), Some(1));
        assert_eq!(r.expect_bool().await.unwrap(), None);
        assert_eq!(r.find_names(&mut fields).await.unwrap(), Some(2));
        assert_eq!(r.expect_string().await.unwrap(), Some("ok".to_string()));
        assert_eq!(r.find_names(&mut fields).await.unwrap(), None);
        assert_eq!(r.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn fields_past_the_limit_are_never_reported() {
        let owned: Vec<String> = (0..MAX_FIELDS + 1).map(|i| format!("k{i}")).collect();
        let names: Vec<&str> = owned.iter().map(String::as_str).collect();
        let mut fields = Fields::new(&names);
        assert_eq!(fields.len(), MAX_FIELDS);

        let mut r = reader(r#"{"k64": 1, "k63": 2}"#);
        r.expect(TokenKind::ObjectStart).await.unwrap();
        assert_eq!(r.find_names(&mut fields).await.unwrap(), Some(63));
        assert_eq!(r.expect_i64().await.unwrap(), Some(2));
        assert_eq!(r.find_names(&mut fields).await.unwrap(), None);
    }

    #[tokio::test]
    async fn skip_scalar_consumes_one_token() {
        let mut r = reader(r#"42 "next""#);

        r.skip().await.unwrap();
        assert_eq!(r.expect_string().await.unwrap(), Some("next".to_string()));
    }

    #[tokio::test]
    async fn skip_truncated_object_is_eof() {
        let mut r = reader(r#"{"a": [1, 2"#);

        assert!(matches!(r.skip().await, Err(Error::UnexpectedEof)));
    }

    #[tokio::test]
    async fn fields_reset_allows_next_object() {
        let mut r = reader(r#"[{"id": 1}, {"id": 2}]"#);
        let mut fields = Fields::new(&["id"]);
        let mut ids = Vec::new();

        r.expect(TokenKind::ArrayStart).await.unwrap();
        while r.expect(TokenKind::ObjectStart).await.unwrap().is_some() {
            fields.reset();
            while r.find_names(&mut fields).await.unwrap().is_some() {
                ids.push(r.expect_i64().await.unwrap().unwrap());
            }
        }

        assert_eq!(ids, vec![1, 2]);
    }
}
