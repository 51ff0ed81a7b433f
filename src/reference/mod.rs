pub mod jisc;
pub mod providers;

use std::sync::LazyLock;

use regex::Regex;

static PUBLICATION_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{7}").unwrap());

/// All 7-digit publication codes appearing in `s`, left to right.
pub fn publication_codes_in(s: &str) -> Vec<&str> {
    PUBLICATION_CODE_RE.find_iter(s).map(|m| m.as_str()).collect()
}

/// The publication code in `s` when there is exactly one.
pub fn single_publication_code(s: &str) -> Option<String> {
    match publication_codes_in(s).as_slice() {
        [code] => Some(code.to_string()),
        _ => None,
    }
}
