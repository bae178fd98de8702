use crate::http::request::{Method, RequestFlags, RequestHead, split_target};

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    Incomplete,
}

/// Parses a request head from the start of `buf`.
///
/// Returns the head and the number of bytes it occupied; anything after
/// that belongs to the body. Only the headers the server acts on are kept.
pub fn parse_request_head(buf: &[u8]) -> Result<(RequestHead, usize), ParseError> {
    // Look for header/body separator
    let headers_end = find_headers_end(buf).ok_or(ParseError::Incomplete)?;
    let header_bytes = &buf[..headers_end];

    let headers_str =
        std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let target = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;

    // Headers
    let mut content_length = 0;
    let mut flags = RequestFlags::default();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        let key = key.trim();
        let value = value.trim();

        if key.eq_ignore_ascii_case("Content-Length") {
            content_length = value
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidContentLength)?;
        } else if key.eq_ignore_ascii_case("Accept-Encoding") {
            flags.accepts_gzip = value
                .split(',')
                .any(|enc| enc.split(';').next().unwrap_or("").trim().eq_ignore_ascii_case("gzip"));
        }
    }

    let (path, query) = split_target(target);

    let head = RequestHead {
        method,
        path,
        query,
        version: version.to_string(),
        content_length,
        flags,
    };

    Ok((head, headers_end + 4))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";

        let (parsed, consumed) = parse_request_head(req).unwrap();

        assert_eq!(parsed.path, "/");
        assert_eq!(parsed.query, None);
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn body_bytes_are_not_consumed() {
        let req = b"POST /settings HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}";

        let (parsed, consumed) = parse_request_head(req).unwrap();

        assert_eq!(parsed.content_length, 2);
        assert_eq!(&req[consumed..], b"{}");
    }
}
