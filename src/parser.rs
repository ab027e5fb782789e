//! Incremental request parsing over byte offsets.
//!
//! The splitter never mutates the buffer: a line is reported as a range
//! below the returned cursor, and header matching is case-insensitive on
//! the byte slices in place.

use crate::http::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// A full CRLF-terminated line ends at the returned cursor.
    Ok,
    /// Stray CR or LF.
    Bad,
    /// The terminator has not arrived yet.
    Open,
}

/// Scan `buf[scanned..filled]` for a CRLF.
///
/// On `Ok` the new cursor sits one past the LF and the line body is
/// `buf[line_start..cursor - 2]`. On `Open` the cursor marks where the
/// next scan should resume. Only CRLF terminates a line; a bare CR or a
/// bare LF is `Bad`.
pub fn split_line(buf: &[u8], scanned: usize, filled: usize) -> (LineStatus, usize) {
    let mut i = scanned;
    while i < filled {
        match buf[i] {
            b'\r' => {
                if i + 1 == filled {
                    return (LineStatus::Open, i);
                }
                if buf[i + 1] == b'\n' {
                    return (LineStatus::Ok, i + 2);
                }
                return (LineStatus::Bad, i);
            }
            b'\n' => return (LineStatus::Bad, i),
            _ => i += 1,
        }
    }
    (LineStatus::Open, filled)
}

#[derive(Debug, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub target: String,
}

fn skip_ws(line: &[u8], mut i: usize) -> usize {
    while i < line.len() && (line[i] == b' ' || line[i] == b'\t') {
        i += 1;
    }
    i
}

fn next_ws(line: &[u8], mut i: usize) -> Option<usize> {
    while i < line.len() {
        if line[i] == b' ' || line[i] == b'\t' {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn starts_with_ignore_case(hay: &[u8], prefix: &[u8]) -> bool {
    hay.len() >= prefix.len() && hay[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Parse `METHOD target HTTP/1.1`.
///
/// Absolute-form targets get their scheme and authority stripped; a bare
/// `/` is rewritten to `/judge.html`.
pub fn parse_request_line(line: &[u8]) -> Option<RequestLine> {
    let method_end = next_ws(line, 0)?;
    let method = Method::from_bytes(&line[..method_end])?;

    let target_start = skip_ws(line, method_end);
    let target_end = next_ws(line, target_start)?;
    let mut target = &line[target_start..target_end];

    let version_start = skip_ws(line, target_end);
    let version = &line[version_start..];
    if !version.eq_ignore_ascii_case(b"HTTP/1.1") {
        return None;
    }

    if starts_with_ignore_case(target, b"http://") {
        target = &target[7..];
        let slash = target.iter().position(|&b| b == b'/')?;
        target = &target[slash..];
    } else if starts_with_ignore_case(target, b"https://") {
        target = &target[8..];
        let slash = target.iter().position(|&b| b == b'/')?;
        target = &target[slash..];
    }

    if target.first() != Some(&b'/') {
        return None;
    }
    let target = if target == b"/" {
        "/judge.html".to_string()
    } else {
        String::from_utf8(target.to_vec()).ok()?
    };

    Some(RequestLine { method, target })
}

#[derive(Debug, PartialEq, Eq)]
pub enum HeaderField {
    /// The blank line that ends the header section.
    End,
    KeepAlive(bool),
    ContentLength(usize),
    Host(String),
    /// Anything else: logged and ignored.
    Other,
}

pub fn parse_header(line: &[u8]) -> HeaderField {
    if line.is_empty() {
        return HeaderField::End;
    }
    if starts_with_ignore_case(line, b"Connection:") {
        let value = &line[skip_ws(line, 11)..];
        return HeaderField::KeepAlive(value.eq_ignore_ascii_case(b"keep-alive"));
    }
    if starts_with_ignore_case(line, b"Content-Length:") {
        let value = &line[skip_ws(line, 15)..];
        let parsed = std::str::from_utf8(value)
            .ok()
            .and_then(|s| s.trim_end().parse::<usize>().ok());
        return match parsed {
            Some(n) => HeaderField::ContentLength(n),
            None => HeaderField::Other,
        };
    }
    if starts_with_ignore_case(line, b"Host:") {
        let value = &line[skip_ws(line, 5)..];
        return HeaderField::Host(String::from_utf8_lossy(value).into_owned());
    }
    HeaderField::Other
}

/// Pull `user` and `password` out of `user=NAME&password=PW`.
///
/// No percent-decoding; both fields are capped at 99 bytes. The password
/// runs to the end of the body.
pub fn parse_form(body: &[u8]) -> Option<(String, String)> {
    let body = std::str::from_utf8(body).ok()?;
    let rest = body.strip_prefix("user=")?;
    let amp = rest.find('&')?;
    let user = &rest[..amp];
    let password = rest[amp + 1..].strip_prefix("password=")?;
    if user.len() > 99 || password.len() > 99 {
        return None;
    }
    Some((user.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_line_finds_crlf() {
        let buf = b"GET / HTTP/1.1\r\nHost: h\r\n";
        let (status, cursor) = split_line(buf, 0, buf.len());
        assert_eq!(status, LineStatus::Ok);
        assert_eq!(&buf[..cursor - 2], b"GET / HTTP/1.1");
        let (status, cursor2) = split_line(buf, cursor, buf.len());
        assert_eq!(status, LineStatus::Ok);
        assert_eq!(&buf[cursor..cursor2 - 2], b"Host: h");
    }

    #[test]
    fn split_line_open_without_terminator() {
        let buf = b"GET / HT";
        assert_eq!(split_line(buf, 0, buf.len()), (LineStatus::Open, buf.len()));
        // CR at the very end of the data: wait for the LF.
        let buf = b"abc\r";
        assert_eq!(split_line(buf, 0, buf.len()), (LineStatus::Open, 3));
    }

    #[test]
    fn split_line_rejects_stray_terminators() {
        assert_eq!(split_line(b"abc\rx", 0, 5).0, LineStatus::Bad);
        assert_eq!(split_line(b"abc\nx", 0, 5).0, LineStatus::Bad);
    }

    #[test]
    fn split_line_chunked_feed_yields_same_lines() {
        // The same byte stream, fed at every possible split point, must
        // produce the same sequence of lines.
        let stream = b"alpha\r\nbeta\r\n\r\ngamma delta\r\n";
        let full = collect_lines(stream, stream.len());
        for cut in 0..stream.len() {
            let mut lines = Vec::new();
            let mut scanned = 0;
            let mut line_start = 0;
            for filled in [cut, stream.len()] {
                loop {
                    let (status, cursor) = split_line(stream, scanned, filled);
                    scanned = cursor;
                    match status {
                        LineStatus::Ok => {
                            lines.push(stream[line_start..cursor - 2].to_vec());
                            line_start = cursor;
                        }
                        LineStatus::Open => break,
                        LineStatus::Bad => panic!("clean stream reported bad"),
                    }
                }
            }
            assert_eq!(lines, full, "diverged at cut {}", cut);
        }
    }

    fn collect_lines(buf: &[u8], filled: usize) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        let mut scanned = 0;
        let mut line_start = 0;
        loop {
            let (status, cursor) = split_line(buf, scanned, filled);
            scanned = cursor;
            match status {
                LineStatus::Ok => {
                    lines.push(buf[line_start..cursor - 2].to_vec());
                    line_start = cursor;
                }
                _ => return lines,
            }
        }
    }

    #[test]
    fn request_line_get() {
        let r = parse_request_line(b"GET /index.html HTTP/1.1").unwrap();
        assert_eq!(r.method, Method::Get);
        assert_eq!(r.target, "/index.html");
    }

    #[test]
    fn request_line_root_rewrite() {
        let r = parse_request_line(b"GET / HTTP/1.1").unwrap();
        assert_eq!(r.target, "/judge.html");
    }

    #[test]
    fn request_line_strips_scheme_and_authority() {
        let r = parse_request_line(b"GET http://example.com/a.html HTTP/1.1").unwrap();
        assert_eq!(r.target, "/a.html");
        let r = parse_request_line(b"GET https://example.com:8080/b HTTP/1.1").unwrap();
        assert_eq!(r.target, "/b");
    }

    #[test]
    fn request_line_rejects_bad_input() {
        assert!(parse_request_line(b"PUT /x HTTP/1.1").is_none());
        assert!(parse_request_line(b"GET /x HTTP/1.0").is_none());
        assert!(parse_request_line(b"GET noslash HTTP/1.1").is_none());
        assert!(parse_request_line(b"GET").is_none());
    }

    #[test]
    fn post_is_case_insensitive() {
        let r = parse_request_line(b"post /2CGISQL.cgi HTTP/1.1").unwrap();
        assert_eq!(r.method, Method::Post);
    }

    #[test]
    fn headers() {
        assert_eq!(parse_header(b""), HeaderField::End);
        assert_eq!(parse_header(b"Connection: keep-alive"), HeaderField::KeepAlive(true));
        assert_eq!(parse_header(b"connection: close"), HeaderField::KeepAlive(false));
        assert_eq!(parse_header(b"Content-Length: 23"), HeaderField::ContentLength(23));
        assert_eq!(
            parse_header(b"Host: example.com"),
            HeaderField::Host("example.com".to_string())
        );
        assert_eq!(parse_header(b"X-Custom: y"), HeaderField::Other);
    }

    #[test]
    fn form_parsing() {
        assert_eq!(
            parse_form(b"user=alice&password=pw"),
            Some(("alice".to_string(), "pw".to_string()))
        );
        // Password runs to end of string, ampersands included.
        assert_eq!(
            parse_form(b"user=a&password=p&w"),
            Some(("a".to_string(), "p&w".to_string()))
        );
        assert_eq!(parse_form(b"nouser=x"), None);
        let long = format!("user={}&password=p", "a".repeat(100));
        assert_eq!(parse_form(long.as_bytes()), None);
    }
}
