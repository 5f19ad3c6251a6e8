//! Reversible at-rest obscuring for the deep-link payload.
//!
//! Base64 with `=` → `^` and `+` → `$`. Not encryption; it only keeps the
//! raw JSON from being readable at a glance.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

#[must_use]
pub fn mask(plain: &str) -> String {
    STANDARD
        .encode(plain.as_bytes())
        .replace('=', "^")
        .replace('+', "$")
}

/// `None` if `masked` is not a valid masked UTF-8 string.
#[must_use]
pub fn unmask(masked: &str) -> Option<String> {
    let b64 = masked.replace('^', "=").replace('$', "+");
    let bytes = STANDARD.decode(b64).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_text_hides_json_and_reverses() {
        let plain = r#"{"deep_link_value":"winter>>"}"#;
        let masked = mask(plain);
        assert!(!masked.contains("deep_link_value"));
        assert!(!masked.contains('='));
        assert!(!masked.contains('+'));
        assert_eq!(unmask(&masked).as_deref(), Some(plain));
    }

    #[test]
    fn unmask_rejects_garbage() {
        assert_eq!(unmask("%%%"), None);
    }
}
