//! Comma-separated list helpers shared by configuration loaders.

/// Parse a comma-separated value.
///
/// - Trims whitespace
/// - Drops empty entries
/// - Missing input yields an empty list
pub fn parse_comma_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or("")
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Parse a boolean flag the way operators write them in env files.
/// Unrecognized values are `None` so callers can reject them.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
