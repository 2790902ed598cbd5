//! Phone number checks

use regex::Regex;
use std::sync::OnceLock;

static E164: OnceLock<Regex> = OnceLock::new();

/// Check a number is in E.164 form: `+`, then 2-15 digits, first non-zero
pub fn is_e164(number: &str) -> bool {
    E164.get_or_init(|| Regex::new(r"^\+[1-9]\d{1,14}$").expect("valid E.164 pattern"))
        .is_match(number)
}
