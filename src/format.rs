//! Human-readable sizes and costs for log output.

use rust_decimal::{Decimal, RoundingStrategy};

const UNITS: [&str; 6] = ["KB", "MB", "GB", "TB", "PB", "EB"];

/// Format a byte count with 1024-based units.
///
/// Values under 1 KB are printed as plain bytes; larger values get one
/// decimal place, dropped when it is zero (`"1 KB"`, `"1.5 MB"`).
pub fn human_readable_bytes(bytes: i64) -> String {
    let abs = bytes.unsigned_abs();
    if abs < 1024 {
        return format!("{bytes} bytes");
    }

    let mut value = abs as f64 / 1024.0;
    let mut unit = 0;
    // 1023.95 would print as "1024.0", so move up a unit first
    while value >= 1023.95 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let formatted = format!("{value:.1}");
    let number = formatted.strip_suffix(".0").unwrap_or(&formatted);
    let sign = if bytes < 0 { "-" } else { "" };

    format!("{sign}{number} {}", UNITS[unit])
}

/// Format a USD amount with two decimals and thousands separators.
///
/// Rounds half to even, e.g. `$1,234.56`.
pub fn human_readable_cost(cost: Decimal) -> String {
    let rounded = cost.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };

    let text = format!("{:.2}", rounded.abs());
    let (integer, fraction) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    format!("{sign}${grouped}.{fraction}")
}
