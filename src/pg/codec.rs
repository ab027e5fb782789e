//! Frontend message encoders and backend decoders.
//!
//! Frontend messages are `tag (1) | length (4, includes itself) | body`;
//! the startup message has no tag. Lengths and integers are big-endian.

/// Column metadata out of RowDescription; only the name matters here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDesc {
    pub name: String,
}

fn put_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_i16(buf: &mut Vec<u8>, v: i16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_cstring(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

/// Patch the length placeholder at `at` to cover everything after it.
fn fix_len(buf: &mut Vec<u8>, at: usize) {
    let len = (buf.len() - at) as i32;
    buf[at..at + 4].copy_from_slice(&len.to_be_bytes());
}

pub fn encode_startup(user: &str, database: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    put_i32(&mut buf, 0); // length placeholder
    put_i32(&mut buf, 196608); // protocol 3.0
    put_cstring(&mut buf, "user");
    put_cstring(&mut buf, user);
    put_cstring(&mut buf, "database");
    put_cstring(&mut buf, database);
    buf.push(0);
    fix_len(&mut buf, 0);
    buf
}

pub fn encode_password(password: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(password.len() + 8);
    buf.push(b'p');
    put_i32(&mut buf, 0);
    put_cstring(&mut buf, password);
    fix_len(&mut buf, 1);
    buf
}

pub fn encode_query(sql: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(sql.len() + 8);
    buf.push(b'Q');
    put_i32(&mut buf, 0);
    put_cstring(&mut buf, sql);
    fix_len(&mut buf, 1);
    buf
}

/// Parse with the unnamed statement and no declared parameter types.
pub fn encode_parse(sql: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(sql.len() + 16);
    buf.push(b'P');
    put_i32(&mut buf, 0);
    put_cstring(&mut buf, ""); // unnamed statement
    put_cstring(&mut buf, sql);
    put_i16(&mut buf, 0);
    fix_len(&mut buf, 1);
    buf
}

/// Bind the unnamed portal to the unnamed statement, all parameters and
/// results in text format.
pub fn encode_bind(params: &[&str]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.push(b'B');
    put_i32(&mut buf, 0);
    put_cstring(&mut buf, ""); // unnamed portal
    put_cstring(&mut buf, ""); // unnamed statement
    put_i16(&mut buf, 0); // parameter format codes: default text
    put_i16(&mut buf, params.len() as i16);
    for p in params {
        put_i32(&mut buf, p.len() as i32);
        buf.extend_from_slice(p.as_bytes());
    }
    put_i16(&mut buf, 0); // result format codes: default text
    fix_len(&mut buf, 1);
    buf
}

pub fn encode_execute() -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.push(b'E');
    put_i32(&mut buf, 0);
    put_cstring(&mut buf, ""); // unnamed portal
    put_i32(&mut buf, 0); // no row limit
    fix_len(&mut buf, 1);
    buf
}

pub fn encode_sync() -> Vec<u8> {
    vec![b'S', 0, 0, 0, 4]
}

pub fn encode_terminate() -> Vec<u8> {
    vec![b'X', 0, 0, 0, 4]
}

/// Total size of the first complete backend message in `buf`, if any.
pub fn message_complete(buf: &[u8]) -> Option<usize> {
    if buf.len() < 5 {
        return None;
    }
    let len = read_i32(buf, 1) as usize;
    let total = 1 + len;
    if buf.len() >= total {
        Some(total)
    } else {
        None
    }
}

pub fn read_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub fn read_i16(buf: &[u8], at: usize) -> i16 {
    i16::from_be_bytes([buf[at], buf[at + 1]])
}

/// Read a NUL-terminated string; returns it plus the offset past the NUL.
pub fn read_cstring(buf: &[u8], at: usize) -> (String, usize) {
    let end = buf[at..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| at + p)
        .unwrap_or(buf.len());
    (String::from_utf8_lossy(&buf[at..end]).into_owned(), end + 1)
}

pub fn parse_row_description(body: &[u8]) -> Vec<ColumnDesc> {
    let count = read_i16(body, 0) as usize;
    let mut columns = Vec::with_capacity(count);
    let mut at = 2;
    for _ in 0..count {
        let (name, next) = read_cstring(body, at);
        // Skip table oid (4), attnum (2), type oid (4), typlen (2),
        // atttypmod (4), format code (2).
        at = next + 18;
        columns.push(ColumnDesc { name });
    }
    columns
}

pub fn parse_data_row(body: &[u8]) -> Vec<Option<Vec<u8>>> {
    let count = read_i16(body, 0) as usize;
    let mut values = Vec::with_capacity(count);
    let mut at = 2;
    for _ in 0..count {
        let len = read_i32(body, at);
        at += 4;
        if len < 0 {
            values.push(None);
        } else {
            let len = len as usize;
            values.push(Some(body[at..at + len].to_vec()));
            at += len;
        }
    }
    values
}

/// ErrorResponse fields: `(type byte, value)` pairs until a NUL byte.
pub fn parse_error_fields(body: &[u8]) -> Vec<(u8, String)> {
    let mut fields = Vec::new();
    let mut at = 0;
    while at < body.len() && body[at] != 0 {
        let field_type = body[at];
        let (value, next) = read_cstring(body, at + 1);
        fields.push((field_type, value));
        at = next;
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_frames_correctly() {
        let msg = encode_startup("alice", "site");
        assert_eq!(read_i32(&msg, 0) as usize, msg.len());
        assert_eq!(read_i32(&msg, 4), 196608);
        assert!(msg.ends_with(&[b's', b'i', b't', b'e', 0, 0]));
    }

    #[test]
    fn query_frames_correctly() {
        let msg = encode_query("SELECT 1");
        assert_eq!(msg[0], b'Q');
        assert_eq!(read_i32(&msg, 1) as usize, msg.len() - 1);
        assert_eq!(&msg[5..msg.len() - 1], b"SELECT 1");
        assert_eq!(*msg.last().unwrap(), 0);
    }

    #[test]
    fn bind_carries_text_params() {
        let msg = encode_bind(&["bob", "pw"]);
        assert_eq!(msg[0], b'B');
        assert_eq!(read_i32(&msg, 1) as usize, msg.len() - 1);
        // portal "" + statement "" -> two NULs after the header
        assert_eq!(&msg[5..7], &[0, 0]);
        assert_eq!(read_i16(&msg, 7), 0);
        assert_eq!(read_i16(&msg, 9), 2);
        assert_eq!(read_i32(&msg, 11), 3);
        assert_eq!(&msg[15..18], b"bob");
    }

    #[test]
    fn message_complete_waits_for_full_frame() {
        let mut frame = vec![b'Z', 0, 0, 0, 5, b'I'];
        assert_eq!(message_complete(&frame), Some(6));
        frame.pop();
        assert_eq!(message_complete(&frame), None);
        assert_eq!(message_complete(&frame[..3]), None);
    }

    #[test]
    fn data_row_round_trip() {
        // Hand-built DataRow body: 2 columns, "ann" and NULL.
        let mut body = Vec::new();
        body.extend_from_slice(&2i16.to_be_bytes());
        body.extend_from_slice(&3i32.to_be_bytes());
        body.extend_from_slice(b"ann");
        body.extend_from_slice(&(-1i32).to_be_bytes());
        let values = parse_data_row(&body);
        assert_eq!(values, vec![Some(b"ann".to_vec()), None]);
    }

    #[test]
    fn error_fields_parse() {
        let body = b"SERROR\0C42P01\0Mrelation missing\0\0";
        let fields = parse_error_fields(body);
        assert_eq!(fields[0], (b'S', "ERROR".to_string()));
        assert_eq!(fields[1], (b'C', "42P01".to_string()));
        assert_eq!(fields[2], (b'M', "relation missing".to_string()));
    }
}
