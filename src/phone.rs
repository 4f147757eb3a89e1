//! Phone number normalization.
//!
//! Every outbound address goes through here: user-entered numbers arrive with
//! spaces, dashes, parens, a leading trunk `0` or a `+`, and leave as a plain
//! digit string starting with the country calling code.

use std::sync::LazyLock;

use regex::Regex;

use crate::session::SessionError;

static NON_DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\D").expect("static regex"));

/// Suffix the transport uses for one-to-one chat addresses.
const CHAT_SUFFIX: &str = "@c.us";

/// Normalize a raw phone string into its canonical international form.
///
/// `"0532 123 45 67"` with country code `"90"` becomes `"905321234567"`.
pub fn normalize(raw: &str, country_code: &str) -> Result<String, SessionError> {
    let digits = NON_DIGIT.replace_all(raw, "");
    if digits.is_empty() {
        return Err(SessionError::InvalidInput(format!(
            "phone number has no digits: {raw:?}"
        )));
    }

    let digits = match digits.strip_prefix('0') {
        Some(rest) => format!("{country_code}{rest}"),
        None => digits.into_owned(),
    };

    if digits.starts_with(country_code) {
        Ok(digits)
    } else {
        Ok(format!("{country_code}{digits}"))
    }
}

/// Build the transport's chat address for a canonical number.
pub fn chat_id(canonical: &str) -> String {
    format!("{canonical}{CHAT_SUFFIX}")
}

/// Strip the chat suffix (if any) to recover the bare number.
pub fn number_of(chat_id: &str) -> &str {
    chat_id.split('@').next().unwrap_or(chat_id)
}
