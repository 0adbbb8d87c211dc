// Response parsing primitives.
//
// Everything in this module is a pure function over a byte window that
// has already been read from the transport. Given identical input the
// results are identical, which makes these the main unit-test surface
// of the protocol engine.

use crate::error::{Error, Result};

/// Longest run of bytes scanned for a single decimal field.
const MAX_INT_SCAN: usize = 20;

/// Parse a decimal field terminated by `delim`.
///
/// Returns the value and the number of bytes consumed including the
/// delimiter. Fails when no digit precedes the delimiter or the scan
/// limit is hit before one is found.
pub fn decimal_field(buf: &[u8], delim: u8) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    let mut digits = 0;
    for (i, &b) in buf.iter().enumerate() {
        if i >= MAX_INT_SCAN {
            break;
        }
        if b == delim {
            if digits == 0 {
                return Err(Error::MalformedResponse(format!(
                    "no digits before delimiter {:#04x}",
                    delim
                )));
            }
            return Ok((value, i + 1));
        }
        if b.is_ascii_digit() {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(u64::from(b - b'0')))
                .ok_or_else(|| {
                    Error::MalformedResponse("integer field overflow".into())
                })?;
            digits += 1;
        } else {
            return Err(Error::MalformedResponse(format!(
                "unexpected byte {:#04x} in integer field",
                b
            )));
        }
    }
    Err(Error::MalformedResponse(
        "integer field missing delimiter".into(),
    ))
}

/// Offset of the first `\r\n\r\n` in `buf`, or `None`.
///
/// Used to split the header block from the body when both arrive
/// concatenated in one raw dump.
pub fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Case-sensitive lookup of `"<key>: "` at a line start within a header
/// block. Returns the value up to the next line terminator.
pub fn header_value<'a>(headers: &'a [u8], key: &str) -> Option<&'a str> {
    let mut at_line_start = true;
    let key = key.as_bytes();
    let mut i = 0;
    while i < headers.len() {
        if at_line_start
            && headers[i..].starts_with(key)
            && headers[i + key.len()..].starts_with(b": ")
        {
            let start = i + key.len() + 2;
            let rest = &headers[start..];
            let end = rest
                .iter()
                .position(|&b| b == b'\r' || b == b'\n')
                .unwrap_or(rest.len());
            return std::str::from_utf8(&rest[..end]).ok();
        }
        at_line_start = headers[i] == b'\n';
        i += 1;
    }
    None
}

/// Parse the `<result>,<status>,<length>` tail of a result line, e.g.
/// the remainder of `+QHTTPGET: 0,200,1124`.
pub fn parse_result_triple(line: &[u8]) -> Result<(u32, u16, u64)> {
    let (result, used) = decimal_field(line, b',')?;
    let rest = &line[used..];
    let (status, used) = decimal_field(rest, b',')?;
    let rest = &rest[used..];
    // The length field runs to the end of the line.
    let mut terminated = Vec::with_capacity(rest.len() + 1);
    let end = rest
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(rest.len());
    terminated.extend_from_slice(&rest[..end]);
    terminated.push(b'\r');
    let (length, _) = decimal_field(&terminated, b'\r')?;

    let result = u32::try_from(result)
        .map_err(|_| Error::MalformedResponse("result code out of range".into()))?;
    let status = u16::try_from(status)
        .map_err(|_| Error::MalformedResponse("status code out of range".into()))?;
    Ok((result, status, length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decimal_field_parses_and_consumes() {
        let (v, used) = decimal_field(b"1124,rest", b',').unwrap();
        assert_eq!(v, 1124);
        assert_eq!(used, 5);
    }

    #[test]
    fn decimal_field_rejects_empty() {
        assert!(matches!(
            decimal_field(b",200", b','),
            Err(crate::Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn decimal_field_rejects_garbage() {
        assert!(decimal_field(b"12x4,", b',').is_err());
    }

    #[test]
    fn decimal_field_respects_scan_limit() {
        let long = vec![b'9'; 64];
        assert!(decimal_field(&long, b',').is_err());
    }

    #[test]
    fn double_crlf_absent() {
        assert_eq!(find_double_crlf(b""), None);
        assert_eq!(find_double_crlf(b"\r\n\r"), None);
        assert_eq!(find_double_crlf(b"Content-Length: 10\r\n"), None);
    }

    #[test]
    fn double_crlf_offset() {
        assert_eq!(find_double_crlf(b"\r\n\r\nbody"), Some(0));
        assert_eq!(find_double_crlf(b"HTTP/1.1 200 OK\r\n\r\nbody"), Some(15));
        // First occurrence wins.
        assert_eq!(find_double_crlf(b"a\r\n\r\nb\r\n\r\n"), Some(1));
    }

    #[test]
    fn header_value_found() {
        let h = b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nX-Firmware-Version: 1.2.7\r\n";
        assert_eq!(
            header_value(h, "Content-Type"),
            Some("application/octet-stream")
        );
        assert_eq!(header_value(h, "X-Firmware-Version"), Some("1.2.7"));
    }

    #[test]
    fn header_value_is_case_sensitive_and_anchored() {
        let h = b"X-My-Content-Type: zip\r\ncontent-type: gz\r\n";
        assert_eq!(header_value(h, "Content-Type"), None);
        // Mid-line matches do not count.
        assert_eq!(header_value(h, "My-Content-Type"), None);
    }

    #[test]
    fn header_value_without_trailing_terminator() {
        assert_eq!(header_value(b"X-Firmware-Version: 2.0.0", "X-Firmware-Version"), Some("2.0.0"));
    }

    #[test]
    fn result_triple_parses() {
        let (r, s, l) = parse_result_triple(b"0,200,1124\r\n").unwrap();
        assert_eq!((r, s, l), (0, 200, 1124));
    }

    #[test]
    fn result_triple_without_cr() {
        let (r, s, l) = parse_result_triple(b"0,404,0").unwrap();
        assert_eq!((r, s, l), (0, 404, 0));
    }

    #[test]
    fn result_triple_rejects_missing_fields() {
        assert!(parse_result_triple(b"0,200").is_err());
        assert!(parse_result_triple(b"").is_err());
        assert!(parse_result_triple(b"0,,10\r").is_err());
    }

    proptest! {
        // Round-trip: any valid triple encoded per the wire format is
        // recovered exactly.
        #[test]
        fn result_triple_round_trip(r in 0u32..1000, s in 0u16..1000, l in 0u64..u64::MAX / 2) {
            let line = format!("{},{},{}\r", r, s, l);
            let parsed = parse_result_triple(line.as_bytes()).unwrap();
            prop_assert_eq!(parsed, (r, s, l));
        }

        // A buffer without the four-byte sequence never matches.
        #[test]
        fn double_crlf_never_false_positive(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            match find_double_crlf(&data) {
                Some(off) => prop_assert_eq!(&data[off..off + 4], b"\r\n\r\n"),
                None => prop_assert!(!data.windows(4).any(|w| w == b"\r\n\r\n")),
            }
        }
    }
}
