use crate::error::ParseError;

/// Scale factor of the fixed-point representation: 8 fractional
/// digits, matching the binary wire format.
pub const SCALE: i64 = 100_000_000;

const MAX_FRACTION_DIGITS: u32 = 8;

// ------------------------------------------------------------
// Fixed8
// ------------------------------------------------------------
//
// Fixed-point decimal stored as `value * 10^8` in an i64.
//
// Kept fixed-point end to end: the parsers produce it straight
// from the frame bytes, the wire codec writes the raw i64, and
// nothing in between touches floating point. Inputs with more
// than 8 fractional digits are rejected, never truncated.
//
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Fixed8(i64);

impl Fixed8 {
    pub const ZERO: Fixed8 = Fixed8(0);

    /// Wraps an already-scaled raw value.
    #[inline]
    pub const fn from_raw(raw: i64) -> Fixed8 {
        Fixed8(raw)
    }

    /// The scaled i64, exactly as it goes on the wire.
    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Parses a decimal literal from a raw byte range.
    ///
    /// Accepts `[-]digits[.digits]`. No exponent form: none of
    /// the supported venues emit one, and a frame that does is
    /// malformed input, not data.
    pub fn parse_bytes(bytes: &[u8], field: &'static str) -> Result<Fixed8, ParseError> {
        let (negative, digits) = match bytes.first() {
            Some(b'-') => (true, &bytes[1..]),
            Some(_) => (false, bytes),
            None => return Err(ParseError::BadNumber(field)),
        };
        if digits.is_empty() {
            return Err(ParseError::BadNumber(field));
        }

        let mut value: i64 = 0;
        let mut fraction_digits: u32 = 0;
        let mut seen_dot = false;
        let mut seen_digit = false;

        for &b in digits {
            match b {
                b'0'..=b'9' => {
                    if seen_dot {
                        fraction_digits += 1;
                        if fraction_digits > MAX_FRACTION_DIGITS {
                            return Err(ParseError::TooManyFractionDigits(field));
                        }
                    }
                    value = value
                        .checked_mul(10)
                        .and_then(|v| v.checked_add((b - b'0') as i64))
                        .ok_or(ParseError::BadNumber(field))?;
                    seen_digit = true;
                }
                b'.' if !seen_dot => seen_dot = true,
                _ => return Err(ParseError::BadNumber(field)),
            }
        }
        if !seen_digit {
            return Err(ParseError::BadNumber(field));
        }

        // Scale up to exactly 8 fractional digits.
        for _ in fraction_digits..MAX_FRACTION_DIGITS {
            value = value.checked_mul(10).ok_or(ParseError::BadNumber(field))?;
        }

        Ok(Fixed8(if negative { -value } else { value }))
    }

    /// Lossy conversion for diagnostics and tests; never used on
    /// the hot path.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }
}

impl std::fmt::Display for Fixed8 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / SCALE as u64;
        let frac = abs % SCALE as u64;
        if frac == 0 {
            write!(f, "{sign}{whole}")
        } else {
            let mut frac_str = format!("{frac:08}");
            while frac_str.ends_with('0') {
                frac_str.pop();
            }
            write!(f, "{sign}{whole}.{frac_str}")
        }
    }
}

impl std::str::FromStr for Fixed8 {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Fixed8, ParseError> {
        Fixed8::parse_bytes(s.as_bytes(), "literal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<Fixed8, ParseError> {
        Fixed8::parse_bytes(s.as_bytes(), "test")
    }

    #[test]
    fn parses_plain_decimals() {
        assert_eq!(parse("43250.50").unwrap().raw(), 4_325_050_000_000);
        assert_eq!(parse("0.58").unwrap().raw(), 58_000_000);
        assert_eq!(parse("1.5").unwrap().raw(), 150_000_000);
        assert_eq!(parse("12345").unwrap().raw(), 1_234_500_000_000);
        assert_eq!(parse("0").unwrap().raw(), 0);
    }

    #[test]
    fn parses_negative_decimals() {
        assert_eq!(parse("-250.50").unwrap().raw(), -25_050_000_000);
        assert_eq!(parse("-0.00000001").unwrap().raw(), -1);
    }

    #[test]
    fn eight_fraction_digits_are_exact() {
        assert_eq!(parse("0.00000001").unwrap().raw(), 1);
        assert_eq!(parse("0.12345678").unwrap().raw(), 12_345_678);
        assert_eq!(parse("99999.99999999").unwrap().raw(), 9_999_999_999_999);
    }

    #[test]
    fn rejects_more_than_eight_fraction_digits() {
        assert!(matches!(
            parse("0.000000001"),
            Err(ParseError::TooManyFractionDigits(_))
        ));
        // Trailing zeros past digit 8 are still a rejection, not
        // a silent truncation.
        assert!(matches!(
            parse("1.500000000"),
            Err(ParseError::TooManyFractionDigits(_))
        ));
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in ["", "-", ".", "-.", "1.2.3", "1e8", "abc", "--1", "1,5"] {
            assert!(parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn rejects_overflow() {
        assert!(parse("99999999999999999999").is_err());
        assert!(parse("922337203685.47758079").is_err());
    }

    #[test]
    fn display_round_trips() {
        for s in ["43250.5", "0.58", "-250.5", "0", "12345.67", "0.00000001"] {
            let v = parse(s).unwrap();
            assert_eq!(v.to_string(), s);
            assert_eq!(s.parse::<Fixed8>().unwrap(), v);
        }
    }

    #[test]
    fn raw_round_trips_through_scale() {
        // decimal -> i64 * 10^8 -> decimal is exact for <= 8
        // fractional digits.
        for s in ["43250.50", "1.5", "2.0", "12345.67", "250.50", "0.58"] {
            let v = parse(s).unwrap();
            assert_eq!(Fixed8::from_raw(v.raw()), v);
            let reconstructed = v.raw() as f64 / SCALE as f64;
            assert!((reconstructed - s.parse::<f64>().unwrap()).abs() < 1e-9);
        }
    }
}
