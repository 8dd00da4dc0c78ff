use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static SCRIPT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|iframe|object)\b[^>]*>.*?</(script|style|iframe|object)\s*>")
        .expect("static regex")
});
static TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)</?[A-Za-z][A-Za-z0-9-]*(\s[^>]*)?/?>").expect("static regex"));
static MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^A-Za-z0-9_@])@([A-Za-z0-9_]{2,30})").expect("static regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub sanitized: String,
    pub mentions: Vec<String>,
}

/// Strips markup, escapes what is left and collects `@username` mentions.
pub fn sanitize(original: &str) -> Sanitized {
    let without_blocks = SCRIPT_BLOCK.replace_all(original, "");
    let stripped = TAG.replace_all(&without_blocks, "");
    let mentions = extract_mentions(&stripped);

    Sanitized {
        sanitized: escape_html(stripped.trim()),
        mentions,
    }
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Case preserved, first occurrence wins.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut mentions: Vec<String> = Vec::new();
    for cap in MENTION.captures_iter(text) {
        let name = &cap[1];
        if !mentions.iter().any(|m| m == name) {
            mentions.push(name.to_string());
        }
    }
    mentions
}

/// Salted SHA-256 digest; raw ip / user-agent values are never stored.
pub fn hash_identifier(salt: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html_significant_characters() {
        let s = sanitize("5 > 3 & \"quotes\" 'single'");
        assert_eq!(
            s.sanitized,
            "5 &gt; 3 &amp; &quot;quotes&quot; &#x27;single&#x27;"
        );
    }

    #[test]
    fn strips_tags_and_drops_script_bodies() {
        let s = sanitize("hi <b>there</b><script>alert('x')</script> <img src=x onerror=y>");
        assert_eq!(s.sanitized, "hi there");
    }

    #[test]
    fn keeps_lone_angle_brackets_escaped() {
        assert_eq!(sanitize("a < b").sanitized, "a &lt; b");
    }

    #[test]
    fn mentions_are_deduplicated_and_case_preserved() {
        let s = sanitize("@Alice thanks! cc @bob_99, @Alice and mail me at x@example.com");
        assert_eq!(s.mentions, vec!["Alice".to_string(), "bob_99".to_string()]);
    }

    #[test]
    fn never_fails_on_arbitrary_text() {
        let weird = "<<<>>>@@@ \u{0}\u{202e} <a href=\"";
        let s = sanitize(weird);
        assert!(!s.sanitized.contains('<'));
    }

    #[test]
    fn hashing_is_salted_and_stable() {
        let a = hash_identifier("salt", "127.0.0.1");
        assert_eq!(a, hash_identifier("salt", "127.0.0.1"));
        assert_ne!(a, hash_identifier("other", "127.0.0.1"));
        assert_eq!(a.len(), 64);
    }
}
