//! Readable number formatting for optimizer trace output.
//!
//! Row counts and costs span many orders of magnitude; the trace prints
//! them as short decimal numerals ("123456", "0.00123") when they fit, and
//! in engineering notation ("12.3e+6") otherwise.

/// The maximal number of digits we use in decimal numbers (e.g. "123456" or
/// "0.00123").
const PLAIN_NUMBER_LENGTH: i32 = 6;

/// The maximal number of digits in engineering format mantissas, e.g.
/// "12.3e+6".
const MANTISSA_LENGTH: i32 = 3;

/// The smallest number (absolute value) that we do not format as "0".
const MIN_NONZERO_NUMBER: f64 = 1.0e-12;

/// For decimal numbers, include enough decimals to ensure that any rounding
/// error is less than `<number>·10^LOG_PRECISION` (i.e. less than 1%).
const LOG_PRECISION: i32 = -2;

/// Find the number of integer digits (those before the decimal point) in
/// `d` when represented as a decimal number.
fn integer_digits(d: f64) -> i32 {
    if d == 0.0 {
        1
    } else {
        (1 + d.abs().log10().floor() as i32).max(1)
    }
}

/// Format `d` as a decimal number with enough decimals to get a rounding
/// error less than `d·10^log_precision`, without trailing fractional zeros.
fn decimal_format(d: f64, log_precision: i32) -> String {
    debug_assert!(d != 0.0);

    // The position of the first nonzero digit, relative to the decimal point.
    let first_nonzero_digit_pos = d.abs().log10().floor() as i32;

    // The number of decimals needed for the required precision.
    let decimals = (-log_precision - first_nonzero_digit_pos).max(0) as usize;

    let formatted = format!("{d:.decimals$}");
    if formatted.contains('.') {
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_owned()
    } else {
        formatted
    }
}

/// Format `d` in engineering format, i.e. `<mantissa>e<sign><exponent>`
/// where 1.0 <= |mantissa| < 1000.0 and the exponent is a multiple of 3.
fn engineering_format(d: f64) -> String {
    debug_assert!(d != 0.0);
    let exp = ((d.abs().log10() / 3.0).floor() * 3.0) as i32;
    let mantissa = d / 10f64.powi(exp);

    if mantissa.abs() + 0.5 * 10f64.powi(3 - MANTISSA_LENGTH) < 1000.0 {
        format!("{}e{:+}", decimal_format(mantissa, 1 - MANTISSA_LENGTH), exp)
    } else {
        // Cover the case where the mantissa will be rounded up to give an
        // extra digit. For example, if d = 999500000, we want "1e+9" rather
        // than "1000e+6".
        format!(
            "{}e{:+}",
            decimal_format(mantissa / 1000.0, 1 - MANTISSA_LENGTH),
            exp + 3
        )
    }
}

/// The smallest number (absolute value) that we format as decimal (rather
/// than engineering format).
fn min_plain_format_number() -> f64 {
    10f64.powi(1 - PLAIN_NUMBER_LENGTH - LOG_PRECISION)
}

/// Formats a floating-point number so that it is both short and precise
/// enough, for trace purposes. Deterministic across platforms.
pub fn format_number_readably(d: f64) -> String {
    if d.abs() < MIN_NONZERO_NUMBER {
        "0".to_owned()
    } else if d.abs() < min_plain_format_number()
        || integer_digits(d.abs() + 0.5) > PLAIN_NUMBER_LENGTH
    {
        engineering_format(d)
    } else {
        decimal_format(d, LOG_PRECISION)
    }
}

/// Like [`format_number_readably`], for counters.
pub fn format_count_readably(l: u64) -> String {
    const LIMIT: u64 = 10u64.pow(PLAIN_NUMBER_LENGTH as u32);
    if l >= LIMIT {
        engineering_format(l as f64)
    } else {
        l.to_string()
    }
}
