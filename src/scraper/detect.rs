//! Login-form symptom detection.
//!
//! The portal has no status endpoint; a page that still carries its login
//! form means the session is not (or no longer) authenticated. Everything
//! that depends on this heuristic goes through [`looks_like_login_page`].

use regex::Regex;
use std::sync::LazyLock;

static LOGIN_FORM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)(?:<form[^>]+action=["']?login\.php["']?[^>]*>)|(?:<input[^>]+type=["']?password["']?[^>]*>)"#,
    )
    .expect("valid login form regex")
});

/// True if `body` contains a form posting to `login.php` or a password input.
pub fn looks_like_login_page(body: &str) -> bool {
    LOGIN_FORM_RE.is_match(body)
}
