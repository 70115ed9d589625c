//! Amount parsing, matching and display helpers.

/// Maximum fraction digits shown for a KAS amount
const DISPLAY_FRACTION_DIGITS: usize = 4;

/// Parse a merchant-supplied amount in KAS.
///
/// Reads the longest numeric prefix, so `"10 KAS"` yields `10.0`. Absent,
/// non-numeric, negative and non-finite inputs yield `0.0`.
pub fn parse_amount(raw: Option<&str>) -> f64 {
    let Some(raw) = raw else {
        return 0.0;
    };
    let trimmed = raw.trim();
    let candidate: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | 'e' | 'E'))
        .collect();

    // shrink until the prefix parses ("1.5e" -> "1.5")
    let mut end = candidate.len();
    while end > 0 {
        if let Ok(value) = candidate[..end].parse::<f64>() {
            return if value.is_finite() && value > 0.0 { value } else { 0.0 };
        }
        end -= 1;
    }
    0.0
}

/// Whether `actual` lies within `tolerance` sompi of `expected`, inclusive.
#[inline]
pub fn within_tolerance(actual: u64, expected: u64, tolerance: u64) -> bool {
    actual.abs_diff(expected) <= tolerance
}

/// Format a KAS amount for display: up to four fraction digits, trailing
/// zeros dropped, thousands grouped with commas.
pub fn format_kas(amount: f64) -> String {
    let amount = if amount.is_finite() { amount } else { 0.0 };
    let fixed = format!("{:.*}", DISPLAY_FRACTION_DIGITS, amount.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let frac_part = frac_part.trim_end_matches('0');

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let negative = amount < 0.0 && (grouped != "0" || !frac_part.is_empty());
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(frac_part);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(Some("10")), 10.0);
        assert_eq!(parse_amount(Some(" 2.5 ")), 2.5);
        assert_eq!(parse_amount(Some("10 KAS")), 10.0);
        assert_eq!(parse_amount(Some("1.5e")), 1.5);
        assert_eq!(parse_amount(Some("abc")), 0.0);
        assert_eq!(parse_amount(Some("")), 0.0);
        assert_eq!(parse_amount(Some("-4")), 0.0);
        assert_eq!(parse_amount(None), 0.0);
    }

    #[test]
    fn test_tolerance_boundary() {
        let expected = 1_000_000_000;
        assert!(within_tolerance(1_000_009_999, expected, 10_000));
        assert!(within_tolerance(1_000_010_000, expected, 10_000));
        assert!(!within_tolerance(1_000_010_001, expected, 10_000));
        assert!(within_tolerance(999_990_000, expected, 10_000));
        assert!(!within_tolerance(999_989_999, expected, 10_000));
    }

    #[test]
    fn test_format_kas() {
        assert_eq!(format_kas(10.0), "10");
        assert_eq!(format_kas(0.5), "0.5");
        assert_eq!(format_kas(1234.5), "1,234.5");
        assert_eq!(format_kas(1_000_000.0), "1,000,000");
        assert_eq!(format_kas(0.123456), "0.1235");
        assert_eq!(format_kas(0.00001), "0");
        assert_eq!(format_kas(f64::NAN), "0");
    }

    proptest! {
        #[test]
        fn tolerance_is_symmetric(expected in 0u64..u64::MAX / 2, delta in 0u64..50_000) {
            let above = expected + delta;
            prop_assert_eq!(
                within_tolerance(above, expected, 10_000),
                within_tolerance(expected, above, 10_000)
            );
            prop_assert_eq!(within_tolerance(above, expected, 10_000), delta <= 10_000);
        }
    }
}
