use arrow::{array::Array, util::display::array_value_to_string};

/// Canonical join key for one cell, or `None` when the cell carries no
/// identifier (null or blank).
pub fn normalize_cell(array: &dyn Array, row: usize) -> Option<String> {
    if array.is_null(row) {
        return None;
    }
    let rendered = array_value_to_string(array, row).ok()?;
    normalize_id(&rendered)
}

/// Trim, and collapse numeric spellings of the same integer (`"0042"`,
/// `42`, `42.0`, `" 42 "`) to one form. Anything else is kept verbatim
/// after trimming.
pub fn normalize_id(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(i.to_string());
    }
    if let Ok(f) = s.parse::<f64>() {
        // Integral floats inside the exactly representable range.
        if f.is_finite() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
            return Some((f as i64).to_string());
        }
    }
    Some(s.to_string())
}
