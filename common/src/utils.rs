// Display formatting helpers.

use crate::amount::Amount;

/// Formats an integer amount of `decimals` fractional digits as a decimal
/// string for display.
///
/// Trailing zeros are trimmed. Magnitudes below 10^-3 switch to exponent
/// notation so dust amounts stay readable ("2.1e-8" rather than
/// "0.000000021").
pub fn format_units(amount: Amount, decimals: u8) -> String {
    if amount.is_zero() {
        return "0".to_owned();
    }

    let raw = amount.to_string();
    if decimals == 0 {
        return raw;
    }

    let decimals = decimals as usize;
    let padded = if raw.len() <= decimals {
        format!("{}{}", "0".repeat(decimals - raw.len() + 1), raw)
    } else {
        raw
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
    let frac_trimmed = frac_part.trim_end_matches('0');

    // Below 10^-3 the plain form is all leading zeros; use exponent notation
    if int_part == "0" && frac_part.len() >= 3 && frac_part[..3].bytes().all(|b| b == b'0') {
        let leading_zeros = frac_part.len() - frac_part.trim_start_matches('0').len();
        let digits = frac_trimmed.trim_start_matches('0');
        let exponent = leading_zeros + 1;
        let mantissa = if digits.len() == 1 {
            digits.to_owned()
        } else {
            format!("{}.{}", &digits[..1], &digits[1..])
        };
        return format!("{}e-{}", mantissa, exponent);
    }

    if frac_trimmed.is_empty() {
        int_part.to_owned()
    } else {
        format!("{}.{}", int_part, frac_trimmed)
    }
}
