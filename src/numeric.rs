//! Reply value parsing and command value formatting.
//!
//! Instruments configured for a European locale answer `3,14` where others answer
//! `3.14`. The reply rules here accept either decimal separator and never consult the
//! host locale. Outgoing values are always rendered with `.`.

/// SCPI representation of "not a number".
const SCPI_NAN: &str = "9.91E37";
/// SCPI representation of positive infinity.
const SCPI_INFINITY: &str = "9.9E37";

/// Parse a trimmed reply as a base-10 `i32` with an optional sign.
pub fn parse_int(reply: &str) -> Option<i32> {
    let text = reply.trim();
    if text.is_empty() {
        return None;
    }
    text.parse::<i32>().ok()
}

/// Parse a reply as `f64`, accepting `.` or `,` as the decimal separator.
///
/// A reply that mixes both separators (`1,234.5`) is rejected instead of guessing
/// which one groups thousands. Textual specials such as `inf` or `NaN` are not
/// accepted; SCPI instruments report those as `9.9E37` and `9.91E37`.
pub fn parse_double(reply: &str) -> Option<f64> {
    let text = reply.trim();
    if text.is_empty() {
        return None;
    }

    let mut has_digit = false;
    let mut dots = 0;
    let mut commas = 0;
    for ch in text.chars() {
        match ch {
            '0'..='9' => has_digit = true,
            '.' => dots += 1,
            ',' => commas += 1,
            '+' | '-' | 'e' | 'E' => {}
            _ => return None,
        }
    }
    if !has_digit || dots + commas > 1 {
        return None;
    }

    let normalized = if commas == 1 {
        text.replace(',', ".")
    } else {
        text.to_string()
    };
    normalized.parse::<f64>().ok()
}

/// Parse an SCPI boolean reply: `1`/`ON` or `0`/`OFF`, case-insensitive.
pub fn parse_bool(reply: &str) -> Option<bool> {
    match reply.trim().to_ascii_uppercase().as_str() {
        "1" | "ON" => Some(true),
        "0" | "OFF" => Some(false),
        _ => None,
    }
}

/// Render a value for use as a command argument.
///
/// # Example
/// ```
/// use scpi_exchange::numeric::format_value;
///
/// assert_eq!(format!("VOLT {};", format_value(12.5)), "VOLT 12.5;");
/// ```
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        SCPI_NAN.to_string()
    } else if value.is_infinite() {
        if value > 0.0 {
            SCPI_INFINITY.to_string()
        } else {
            format!("-{SCPI_INFINITY}")
        }
    } else {
        value.to_string()
    }
}
