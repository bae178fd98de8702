//! Streaming JSON codec end to end.

use trickle::Error;
use trickle::io::SliceSource;
use trickle::json::{Fields, JsonReader, JsonWriter, Token, TokenKind};

fn reader(input: &'static str) -> JsonReader<SliceSource> {
    JsonReader::new(SliceSource::new(input.as_bytes()))
}

#[tokio::test]
async fn test_writer_object_members() {
    let mut w = JsonWriter::new(String::new());

    w.begin_object(None).await.unwrap();
    w.write_str(Some("a"), Some("b")).await.unwrap();
    w.write_int(Some("a"), 12345).await.unwrap();
    w.end_object().await.unwrap();

    assert_eq!(w.into_inner(), r#"{"a":"b","a":12345}"#);
}

#[tokio::test]
async fn test_writer_array_of_bools() {
    let mut w = JsonWriter::new(Vec::new());

    w.begin_array(None).await.unwrap();
    w.write_bool(None, false).await.unwrap();
    w.write_bool(None, true).await.unwrap();
    w.end_array().await.unwrap();

    assert_eq!(w.into_inner(), b"[false,true]");
}

#[tokio::test]
async fn test_writer_file_sink() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");

    let sink = trickle::json::FileSink::create(&path).await.unwrap();
    let mut w = JsonWriter::new(sink);
    w.begin_object(None).await.unwrap();
    w.write_int(Some("n"), -7).await.unwrap();
    w.end_object().await.unwrap();
    w.into_inner().close().await.unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"n":-7}"#);
}

#[tokio::test]
async fn test_tokenizer_distinguishes_keys_from_strings() {
    let mut r = reader(r#"{"k" : "v", "list": ["x", null, -1.5e3]}"#);
    let mut tokens = Vec::new();
    while let Some(t) = r.next().await.unwrap() {
        tokens.push(t);
    }

    assert_eq!(
        tokens,
        vec![
            Token::ObjectStart,
            Token::Key("k".into()),
            Token::String("v".into()),
            Token::Key("list".into()),
            Token::ArrayStart,
            Token::String("x".into()),
            Token::Null,
            Token::Number("-1.5e3".into()),
            Token::ArrayEnd,
            Token::ObjectEnd,
        ]
    );
}

#[tokio::test]
async fn test_string_escapes_are_decoded() {
    let mut r = reader(r#""tab\there \"q\" é 😀""#);

    assert_eq!(
        r.expect_string().await.unwrap().as_deref(),
        Some("tab\there \"q\" é 😀")
    );
}

#[tokio::test]
async fn test_bad_literal_is_a_syntax_error() {
    let mut r = reader("[tru]");
    r.next().await.unwrap();

    assert!(matches!(r.next().await, Err(Error::Syntax(_))));
}

#[tokio::test]
async fn test_find_names_in_document_order() {
    let mut r = reader(
        r#"{"skip": {"deep": [[1], {"a": 2}]}, "b": "two", "other": 3, "a": 1, "c": true}"#,
    );
    let names = ["a", "b"];
    let mut fields = Fields::new(&names);

    r.expect(TokenKind::ObjectStart).await.unwrap().unwrap();

    assert_eq!(r.find_names(&mut fields).await.unwrap(), Some(1));
    assert_eq!(r.expect_string().await.unwrap().as_deref(), Some("two"));
    assert_eq!(r.find_names(&mut fields).await.unwrap(), Some(0));
    assert_eq!(r.expect_i64().await.unwrap(), Some(1));
    assert_eq!(r.find_names(&mut fields).await.unwrap(), None);
    assert_eq!(r.next().await.unwrap(), None);
}

#[tokio::test]
async fn test_find_names_reports_each_index_once() {
    let mut r = reader(r#"{"a": 1, "a": 2, "b": 3}"#);
    let names = ["a", "b"];
    let mut fields = Fields::new(&names);
    let mut found = Vec::new();

    r.expect(TokenKind::ObjectStart).await.unwrap();
    while let Some(i) = r.find_names(&mut fields).await.unwrap() {
        found.push((fields.name(i).unwrap(), r.expect_i64().await.unwrap().unwrap()));
    }

    assert_eq!(found, vec![("a", 1), ("b", 3)]);
}

#[tokio::test]
async fn test_skip_leaves_cursor_after_value() {
    let mut r = reader(r#"[{"x": [1, {"y": []}]}, "after"]"#);

    r.expect(TokenKind::ArrayStart).await.unwrap();
    r.skip().await.unwrap();

    assert_eq!(r.expect_string().await.unwrap().as_deref(), Some("after"));
    assert!(r.expect(TokenKind::ArrayEnd).await.unwrap().is_some());
}

#[tokio::test]
async fn test_find_names_on_truncated_object() {
    let mut r = reader(r#"{"x": 1"#);
    let names = ["a"];
    let mut fields = Fields::new(&names);

    r.expect(TokenKind::ObjectStart).await.unwrap();

    assert!(matches!(
        r.find_names(&mut fields).await,
        Err(Error::UnexpectedEof)
    ));
}

#[tokio::test]
async fn test_written_document_reads_back() {
    let mut w = JsonWriter::new(Vec::new());
    w.begin_object(None).await.unwrap();
    w.begin_array(Some("ids")).await.unwrap();
    w.write_int(None, 4).await.unwrap();
    w.write_int(None, 5).await.unwrap();
    w.end_array().await.unwrap();
    w.write_str(Some("name"), Some("board")).await.unwrap();
    w.end_object().await.unwrap();

    let mut r = JsonReader::new(SliceSource::new(w.into_inner()));
    let names = ["name"];
    let mut fields = Fields::new(&names);
    r.expect(TokenKind::ObjectStart).await.unwrap();

    assert_eq!(r.find_names(&mut fields).await.unwrap(), Some(0));
    assert_eq!(r.expect_string().await.unwrap().as_deref(), Some("board"));
}

/// One writer call in a generated document.
enum Op {
    Begin { object: bool, name: Option<String> },
    End { object: bool },
    Int { name: Option<String>, value: i64 },
    Str { name: Option<String>, value: String },
    Bool { name: Option<String>, value: bool },
}

/// xorshift; documents must be the same on every run.
struct Rng(u64);

impl Rng {
    fn below(&mut self, n: u64) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0 % n
    }
}

/// Appends one value at `depth` (number of open containers) and returns
/// how many commas the writer should emit inside it.
fn generate(rng: &mut Rng, depth: usize, name: Option<String>, ops: &mut Vec<Op>) -> usize {
    let roll = rng.below(if depth < 8 { 5 } else { 3 });
    match roll {
        0 => {
            ops.push(Op::Int { name, value: rng.below(1000) as i64 - 500 });
            0
        }
        1 => {
            ops.push(Op::Str { name, value: format!("s{}", rng.below(100)) });
            0
        }
        2 => {
            ops.push(Op::Bool { name, value: rng.below(2) == 1 });
            0
        }
        _ => {
            let object = roll == 3;
            ops.push(Op::Begin { object, name });
            let children = rng.below(4) as usize;
            let mut commas = children.saturating_sub(1);
            for i in 0..children {
                let child = object.then(|| format!("k{i}"));
                commas += generate(rng, depth + 1, child, ops);
            }
            ops.push(Op::End { object });
            commas
        }
    }
}

fn expected_tokens(ops: &[Op]) -> Vec<Token> {
    let mut out = Vec::new();
    for op in ops {
        let name = match op {
            Op::Begin { name, .. } | Op::Int { name, .. } | Op::Str { name, .. } | Op::Bool { name, .. } => name,
            Op::End { .. } => &None,
        };
        if let Some(name) = name {
            out.push(Token::Key(name.clone()));
        }
        out.push(match op {
            Op::Begin { object: true, .. } => Token::ObjectStart,
            Op::Begin { object: false, .. } => Token::ArrayStart,
            Op::End { object: true } => Token::ObjectEnd,
            Op::End { object: false } => Token::ArrayEnd,
            Op::Int { value, .. } => Token::Number(value.to_string()),
            Op::Str { value, .. } => Token::String(value.clone()),
            Op::Bool { value, .. } => Token::Bool(*value),
        });
    }
    out
}

#[tokio::test]
async fn test_writer_commas_in_generated_documents() {
    let mut rng = Rng(0x9e37_79b9_7f4a_7c15);

    for _ in 0..200 {
        let mut ops = Vec::new();
        let object = rng.below(2) == 0;
        ops.push(Op::Begin { object, name: None });
        let children = rng.below(5) as usize;
        let mut commas = children.saturating_sub(1);
        for i in 0..children {
            commas += generate(&mut rng, 1, object.then(|| format!("k{i}")), &mut ops);
        }
        ops.push(Op::End { object });

        let mut w = JsonWriter::new(String::new());
        for op in &ops {
            match op {
                Op::Begin { object: true, name } => w.begin_object(name.as_deref()).await.unwrap(),
                Op::Begin { object: false, name } => w.begin_array(name.as_deref()).await.unwrap(),
                Op::End { object: true } => w.end_object().await.unwrap(),
                Op::End { object: false } => w.end_array().await.unwrap(),
                Op::Int { name, value } => w.write_int(name.as_deref(), *value).await.unwrap(),
                Op::Str { name, value } => w.write_str(name.as_deref(), Some(value)).await.unwrap(),
                Op::Bool { name, value } => w.write_bool(name.as_deref(), *value).await.unwrap(),
            }
        }
        assert_eq!(w.depth(), 0);
        let text = w.into_inner();

        assert_eq!(text.matches(',').count(), commas, "{text}");
        for bad in [",,", "[,", "{,", ",]", ",}"] {
            assert!(!text.contains(bad), "{bad} in {text}");
        }

        let mut r = JsonReader::new(SliceSource::new(text.clone().into_bytes()));
        let mut tokens = Vec::new();
        while let Some(t) = r.next().await.unwrap() {
            tokens.push(t);
        }
        assert_eq!(tokens, expected_tokens(&ops), "{text}");
    }
}
