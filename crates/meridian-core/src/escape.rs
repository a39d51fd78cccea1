//! Filename escaping for catalog metadata keys.
//!
//! Table names are stored both as on-disk metadata files and as child nodes
//! under the group's `metadata/` directory. Both namespaces get the same
//! escaping so the set of legal characters matches: anything outside
//! `[A-Za-z0-9_]` is encoded as `%XX` (uppercase hex of the byte).

/// Escapes a name so it is safe to use as a filename or node name.
#[must_use]
pub fn escape_for_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push(char::from_digit(u32::from(byte >> 4), 16).unwrap_or('0').to_ascii_uppercase());
            out.push(char::from_digit(u32::from(byte & 0xF), 16).unwrap_or('0').to_ascii_uppercase());
        }
    }
    out
}

/// Reverses [`escape_for_file_name`].
///
/// Tolerant of malformed input: a `%` not followed by two hex digits is kept
/// literally, so unescaping never fails.
#[must_use]
pub fn unescape_for_file_name(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(decoded) = bytes.get(i + 1..i + 3).and_then(decode_hex_pair) {
                out.push(decoded);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn decode_hex_pair(pair: &[u8]) -> Option<u8> {
    let hi = (pair[0] as char).to_digit(16)?;
    let lo = (pair[1] as char).to_digit(16)?;
    u8::try_from((hi << 4) | lo).ok()
}
