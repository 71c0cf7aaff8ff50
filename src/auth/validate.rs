//! Input sanitization and field shape validation.
//!
//! Every user-supplied string passes through [`sanitize`] before validation,
//! and identity fields are normalized (username/email lowered, enrollment id
//! uppered) so uniqueness checks and storage always see canonical values.

use regex::Regex;

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 30;
pub const PASSWORD_MIN: usize = 8;
pub const PASSWORD_MAX: usize = 128;
pub const FULL_NAME_MIN: usize = 3;
pub const FULL_NAME_MAX: usize = 100;

/// Strip markup, script blocks, and control characters from a raw field.
#[must_use]
pub fn sanitize(input: &str) -> String {
    let mut cleaned = input.trim().to_string();
    if let Ok(script) = Regex::new(r"(?is)<script\b[^>]*>.*?</script>") {
        cleaned = script.replace_all(&cleaned, "").into_owned();
    }
    if let Ok(tag) = Regex::new(r"<[^>]+>") {
        cleaned = tag.replace_all(&cleaned, "").into_owned();
    }
    cleaned
        .chars()
        .filter(|c| !c.is_control() && *c != '<' && *c != '>')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Username check on already-lowered input: letters, digits, underscore.
#[must_use]
pub fn valid_username(username_normalized: &str) -> bool {
    Regex::new(r"^[a-z0-9_]{3,30}$").is_ok_and(|regex| regex.is_match(username_normalized))
}

/// Enrollment id check on already-uppered input: `BRG` + five digits.
#[must_use]
pub fn valid_record_id(record_id_normalized: &str) -> bool {
    Regex::new(r"^BRG\d{5}$").is_ok_and(|regex| regex.is_match(record_id_normalized))
}

#[must_use]
pub fn valid_password(password: &str) -> bool {
    let len = password.chars().count();
    (PASSWORD_MIN..=PASSWORD_MAX).contains(&len)
}

/// Full name check: bounded length and at least a name plus a surname.
#[must_use]
pub fn valid_full_name(name: &str) -> bool {
    let len = name.chars().count();
    if !(FULL_NAME_MIN..=FULL_NAME_MAX).contains(&len) {
        return false;
    }
    name.split_whitespace().count() >= 2
}

/// Shape check for a submitted verification code: exactly four ASCII digits,
/// no trimming. Whitespace or leading-zero normalization never happens here.
#[must_use]
pub fn valid_code_shape(code: &str) -> bool {
    code.len() == 4 && code.bytes().all(|b| b.is_ascii_digit())
}
