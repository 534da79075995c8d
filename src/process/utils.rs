use once_cell::sync::Lazy;
use regex::Regex;

static FIVE_DIGITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{5}$").expect("county FIPS pattern should be valid"));

/// 1) Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// 2) BEA files are Latin-1; every byte maps straight to a code point.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// 3) Five digits and not a state/nation total (`SS000`).
pub fn is_county_fips(s: &str) -> bool {
    FIVE_DIGITS.is_match(s) && !s.ends_with("000")
}

/// Why a source cell does not hold a usable amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MissingKind {
    /// Blank cell or no cell at all.
    Empty,
    /// A suppression / not-available code such as `(NA)` or `(D)`.
    Marker,
    /// Any other text that does not parse as a number.
    NonNumeric,
    /// A negative placeholder value.
    Negative,
    /// `NaN` or infinite.
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Amount {
    Value(f64),
    Missing(MissingKind),
}

/// 4) Parse one source amount. Anything that is not a finite, non-negative
/// number is missing; zero stays zero.
pub fn parse_amount(raw: &str) -> Amount {
    let s = clean_str(raw);
    if s.is_empty() {
        return Amount::Missing(MissingKind::Empty);
    }
    if s.starts_with('(') && s.ends_with(')') {
        return Amount::Missing(MissingKind::Marker);
    }
    match s.parse::<f64>() {
        Ok(v) if !v.is_finite() => Amount::Missing(MissingKind::NonFinite),
        Ok(v) if v < 0.0 => Amount::Missing(MissingKind::Negative),
        // normalise -0.0
        Ok(v) => Amount::Value(v + 0.0),
        Err(_) => Amount::Missing(MissingKind::NonNumeric),
    }
}
