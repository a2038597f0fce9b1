//! Zero-allocation frame scanning primitives.
//!
//! Every venue parser works directly over the raw frame bytes:
//! locate a field by its key pattern, skip the separator, read
//! the value in place. Nothing here builds a JSON tree, and the
//! only heap the hot path touches is the thread-local level
//! scratch and whatever the emitted record itself owns.
//!
//! These helpers must never panic on peer input; every
//! malformed shape maps to a `ParseError`.

use std::cell::RefCell;

use crate::error::ParseError;
use crate::fixed::Fixed8;
use crate::schema::BookLevel;

/// Hard cap on levels collected per book side. Deeper venue
/// frames keep scanning (the array end must still be found) but
/// stop emitting levels.
pub const MAX_LEVELS_PER_SIDE: usize = 100;

const SCRATCH_CAPACITY: usize = 128;

// ------------------------------------------------------------
// Discriminator hashing
// ------------------------------------------------------------

/// Rolling hash used to classify frames without materializing
/// the discriminator: `h = 31*h + byte`.
///
/// `const` so every venue's discriminator set is precomputed at
/// build time and checked collision-free with `const` asserts.
pub const fn disc_hash(s: &str) -> i64 {
    let bytes = s.as_bytes();
    let mut h: i64 = 0;
    let mut i = 0;
    while i < bytes.len() {
        h = h.wrapping_mul(31).wrapping_add(bytes[i] as i64);
        i += 1;
    }
    h
}

/// Runtime counterpart of [`disc_hash`] over a byte range.
#[inline]
pub fn hash_range(buf: &[u8], start: usize, end: usize) -> i64 {
    let mut h: i64 = 0;
    let mut i = start;
    while i < end {
        h = h.wrapping_mul(31).wrapping_add(buf[i] as i64);
        i += 1;
    }
    h
}

// ------------------------------------------------------------
// Field location
// ------------------------------------------------------------

/// Finds `pattern` in `buf` starting at `from` and returns the
/// index just past it. Patterns include the surrounding JSON
/// syntax, e.g. `b"\"instId\":"`.
#[inline]
pub fn find(buf: &[u8], pattern: &[u8], from: usize) -> Option<usize> {
    if from > buf.len() || pattern.is_empty() {
        return None;
    }
    buf[from..]
        .windows(pattern.len())
        .position(|w| w == pattern)
        .map(|i| from + i + pattern.len())
}

/// True when the key pattern occurs anywhere in the frame. Used
/// for cheap acknowledgement / control detection before
/// classification is attempted.
#[inline]
pub fn contains(buf: &[u8], pattern: &[u8]) -> bool {
    find(buf, pattern, 0).is_some()
}

#[inline]
fn skip_spaces(buf: &[u8], mut pos: usize) -> usize {
    while buf.get(pos) == Some(&b' ') {
        pos += 1;
    }
    pos
}

// ------------------------------------------------------------
// Value readers
// ------------------------------------------------------------

/// Reads a quoted string as a `(start, end)` range into `buf`.
///
/// The fields read this way (symbols, ids, side tokens,
/// discriminators) never contain escapes on any supported
/// venue; a backslash is treated as a structural mismatch.
pub fn quoted_range(
    buf: &[u8],
    pos: usize,
    field: &'static str,
) -> Result<(usize, usize), ParseError> {
    let pos = skip_spaces(buf, pos);
    if buf.get(pos) != Some(&b'"') {
        return Err(ParseError::Structure(field));
    }
    let start = pos + 1;
    let mut end = start;
    loop {
        match buf.get(end) {
            Some(b'"') => return Ok((start, end)),
            Some(b'\\') | None => return Err(ParseError::Structure(field)),
            Some(_) => end += 1,
        }
    }
}

/// Quoted decimal parsed straight into fixed-point, no
/// intermediate string.
#[inline]
pub fn read_quoted_fixed(buf: &[u8], pos: usize, field: &'static str) -> Result<Fixed8, ParseError> {
    let (start, end) = quoted_range(buf, pos, field)?;
    Fixed8::parse_bytes(&buf[start..end], field)
}

/// Quoted integer (OKX quotes its millisecond timestamps).
pub fn read_quoted_i64(buf: &[u8], pos: usize, field: &'static str) -> Result<i64, ParseError> {
    let (start, end) = quoted_range(buf, pos, field)?;
    parse_i64_digits(&buf[start..end], field)
}

/// Bare integer read with a hand-rolled digit loop, stopping at
/// the first non-digit.
pub fn read_bare_i64(buf: &[u8], pos: usize, field: &'static str) -> Result<i64, ParseError> {
    let mut pos = skip_spaces(buf, pos);
    let negative = if buf.get(pos) == Some(&b'-') {
        pos += 1;
        true
    } else {
        false
    };

    let mut value: i64 = 0;
    let mut seen = false;
    while let Some(&b @ b'0'..=b'9') = buf.get(pos) {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as i64))
            .ok_or(ParseError::BadNumber(field))?;
        seen = true;
        pos += 1;
    }
    if !seen {
        return Err(ParseError::BadNumber(field));
    }
    Ok(if negative { -value } else { value })
}

fn parse_i64_digits(digits: &[u8], field: &'static str) -> Result<i64, ParseError> {
    if digits.is_empty() {
        return Err(ParseError::BadNumber(field));
    }
    let (negative, digits) = match digits[0] {
        b'-' => (true, &digits[1..]),
        _ => (false, digits),
    };
    let mut value: i64 = 0;
    let mut seen = false;
    for &b in digits {
        match b {
            b'0'..=b'9' => {
                value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add((b - b'0') as i64))
                    .ok_or(ParseError::BadNumber(field))?;
                seen = true;
            }
            _ => return Err(ParseError::BadNumber(field)),
        }
    }
    if !seen {
        return Err(ParseError::BadNumber(field));
    }
    Ok(if negative { -value } else { value })
}

/// Bare JSON boolean.
pub fn read_bool(buf: &[u8], pos: usize, field: &'static str) -> Result<bool, ParseError> {
    let pos = skip_spaces(buf, pos);
    if buf[pos..].starts_with(b"true") {
        Ok(true)
    } else if buf[pos..].starts_with(b"false") {
        Ok(false)
    } else {
        Err(ParseError::Structure(field))
    }
}

// ------------------------------------------------------------
// Level arrays
// ------------------------------------------------------------

/// Depth-tracked scan over a `[["price","qty",…],…]` array.
///
/// Enters on the outer `[`, reads two consecutive quoted
/// decimals per inner array, skips venue-specific trailing
/// elements to the closing `]`, and returns the index just past
/// the outer `]`. At most [`MAX_LEVELS_PER_SIDE`] levels are
/// emitted; deeper frames are scanned to the end but truncated.
pub fn parse_levels(
    buf: &[u8],
    pos: usize,
    out: &mut Vec<BookLevel>,
    field: &'static str,
) -> Result<usize, ParseError> {
    let mut pos = skip_spaces(buf, pos);
    if buf.get(pos) != Some(&b'[') {
        return Err(ParseError::Structure(field));
    }
    pos += 1;

    loop {
        pos = skip_spaces(buf, pos);
        match buf.get(pos) {
            Some(b',') => pos += 1,
            Some(b']') => return Ok(pos + 1),
            Some(b'[') => {
                pos += 1;

                let (price_start, price_end) = quoted_range(buf, pos, field)?;
                let price = Fixed8::parse_bytes(&buf[price_start..price_end], field)?;
                pos = skip_spaces(buf, price_end + 1);
                if buf.get(pos) != Some(&b',') {
                    return Err(ParseError::Structure(field));
                }
                pos += 1;

                let (qty_start, qty_end) = quoted_range(buf, pos, field)?;
                let quantity = Fixed8::parse_bytes(&buf[qty_start..qty_end], field)?;
                pos = qty_end + 1;

                if out.len() < MAX_LEVELS_PER_SIDE {
                    out.push(BookLevel { price, quantity });
                }

                // Skip extra per-level elements (order counts and
                // the like) until this level closes.
                loop {
                    match buf.get(pos) {
                        Some(b']') => {
                            pos += 1;
                            break;
                        }
                        Some(b'"') => {
                            let (_, end) = quoted_range(buf, pos, field)?;
                            pos = end + 1;
                        }
                        Some(_) => pos += 1,
                        None => return Err(ParseError::Structure(field)),
                    }
                }
            }
            _ => return Err(ParseError::Structure(field)),
        }
    }
}

// ------------------------------------------------------------
// Thread-local level scratch
// ------------------------------------------------------------
//
// One pair of level buffers per thread, cleared at parse entry
// and logically copied into the emitted record before the frame
// handler returns. The scratch never crosses threads.
//

pub struct LevelScratch {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

thread_local! {
    static LEVEL_SCRATCH: RefCell<LevelScratch> = RefCell::new(LevelScratch {
        bids: Vec::with_capacity(SCRATCH_CAPACITY),
        asks: Vec::with_capacity(SCRATCH_CAPACITY),
    });
}

/// Runs `f` with this thread's cleared level scratch.
pub fn with_level_scratch<R>(f: impl FnOnce(&mut LevelScratch) -> R) -> R {
    LEVEL_SCRATCH.with(|cell| {
        let mut scratch = cell.borrow_mut();
        scratch.bids.clear();
        scratch.asks.clear();
        f(&mut scratch)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_returns_index_past_pattern() {
        let buf = br#"{"e":"trade","s":"BTCUSDT"}"#;
        let pos = find(buf, b"\"s\":", 0).unwrap();
        assert_eq!(&buf[pos..pos + 9], br#""BTCUSDT""#);
        assert_eq!(find(buf, b"\"missing\":", 0), None);
    }

    #[test]
    fn quoted_range_reads_in_place() {
        let buf = br#"{"s":"BTCUSDT"}"#;
        let pos = find(buf, b"\"s\":", 0).unwrap();
        let (start, end) = quoted_range(buf, pos, "s").unwrap();
        assert_eq!(&buf[start..end], b"BTCUSDT");
    }

    #[test]
    fn quoted_range_rejects_escapes_and_unterminated() {
        assert!(quoted_range(br#""a\"b""#, 0, "f").is_err());
        assert!(quoted_range(br#""abc"#, 0, "f").is_err());
        assert!(quoted_range(b"123", 0, "f").is_err());
    }

    #[test]
    fn reads_quoted_fixed_and_integers() {
        let buf = br#"{"p":"43250.50","T":1704067200000,"ts":"1704067200123"}"#;
        let p = find(buf, b"\"p\":", 0).unwrap();
        assert_eq!(read_quoted_fixed(buf, p, "p").unwrap().raw(), 4_325_050_000_000);
        let t = find(buf, b"\"T\":", 0).unwrap();
        assert_eq!(read_bare_i64(buf, t, "T").unwrap(), 1_704_067_200_000);
        let ts = find(buf, b"\"ts\":", 0).unwrap();
        assert_eq!(read_quoted_i64(buf, ts, "ts").unwrap(), 1_704_067_200_123);
    }

    #[test]
    fn reads_booleans() {
        let buf = br#"{"m":true,"x":false}"#;
        let m = find(buf, b"\"m\":", 0).unwrap();
        assert!(read_bool(buf, m, "m").unwrap());
        let x = find(buf, b"\"x\":", 0).unwrap();
        assert!(!read_bool(buf, x, "x").unwrap());
        assert!(read_bool(b"null", 0, "f").is_err());
    }

    #[test]
    fn parses_level_arrays_in_order() {
        let buf = br#"[["43250.00","1.5"],["43249.00","2.0"]]"#;
        let mut out = Vec::new();
        let end = parse_levels(buf, 0, &mut out, "b").unwrap();
        assert_eq!(end, buf.len());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].price.to_string(), "43250");
        assert_eq!(out[0].quantity.to_string(), "1.5");
        assert_eq!(out[1].price.to_string(), "43249");
        assert_eq!(out[1].quantity.to_string(), "2");
    }

    #[test]
    fn level_scan_skips_trailing_elements() {
        // OKX publishes four elements per level.
        let buf = br#"[["8476.98","415","0","13"],["8477","7","0","2"]]"#;
        let mut out = Vec::new();
        parse_levels(buf, 0, &mut out, "asks").unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].price.to_string(), "8477");
        assert_eq!(out[1].quantity.to_string(), "7");
    }

    #[test]
    fn empty_level_array_is_fine() {
        let mut out = Vec::new();
        let end = parse_levels(b"[]", 0, &mut out, "b").unwrap();
        assert_eq!(end, 2);
        assert!(out.is_empty());
    }

    #[test]
    fn level_scan_rejects_structural_garbage() {
        let mut out = Vec::new();
        assert!(parse_levels(br#"{"a":1}"#, 0, &mut out, "b").is_err());
        assert!(parse_levels(br#"[["1.0"]]"#, 0, &mut out, "b").is_err());
        assert!(parse_levels(br#"[[1.0,2.0]]"#, 0, &mut out, "b").is_err());
        assert!(parse_levels(br#"[["1.0","2.0""#, 0, &mut out, "b").is_err());
    }

    #[test]
    fn level_scan_truncates_past_cap() {
        let mut frame = String::from("[");
        for i in 0..150 {
            if i > 0 {
                frame.push(',');
            }
            frame.push_str(&format!(r#"["{}.0","1.0"]"#, i));
        }
        frame.push(']');
        let mut out = Vec::new();
        let end = parse_levels(frame.as_bytes(), 0, &mut out, "b").unwrap();
        assert_eq!(end, frame.len());
        assert_eq!(out.len(), MAX_LEVELS_PER_SIDE);
    }

    #[test]
    fn disc_hash_matches_runtime_hash() {
        let buf = br#""24hrTicker""#;
        let (start, end) = quoted_range(buf, 0, "e").unwrap();
        assert_eq!(hash_range(buf, start, end), disc_hash("24hrTicker"));
    }

    #[test]
    fn scratch_is_cleared_between_uses() {
        with_level_scratch(|s| {
            s.bids.push(BookLevel {
                price: Fixed8::from_raw(1),
                quantity: Fixed8::from_raw(1),
            });
        });
        with_level_scratch(|s| {
            assert!(s.bids.is_empty());
            assert!(s.asks.is_empty());
        });
    }
}
