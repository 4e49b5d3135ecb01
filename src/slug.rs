use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;

pub const FALLBACK_SLUG: &str = "untitled-project";

const MAX_SLUG_CHARS: usize = 50;
const MAX_ENCODED_CHARS: usize = 20;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static HYPHEN_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").expect("valid regex"));
static HAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{Han}").expect("valid regex"));

/// Derives a directory name from a display name.
///
/// Deterministic but not injective: distinct names may collide, so callers
/// still check for an existing directory before using the result.
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|ch| ch.is_alphanumeric() || ch.is_whitespace() || *ch == '-' || *ch == '_')
        .collect();
    let hyphenated = WHITESPACE_RUN.replace_all(&kept, "-");
    let collapsed = HYPHEN_RUN.replace_all(&hyphenated, "-");
    let truncated: String = collapsed.trim_matches('-').chars().take(MAX_SLUG_CHARS).collect();
    let mut slug = truncated.trim_end_matches('-').to_string();

    // Ideographic names become unreadable but safe tokens.
    if HAN.is_match(&slug) {
        slug = URL_SAFE_NO_PAD
            .encode(name.as_bytes())
            .chars()
            .take(MAX_ENCODED_CHARS)
            .collect();
    }

    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_hyphenates() {
        assert_eq!(slugify("My World!"), "my-world");
        assert_eq!(slugify("The   Long    Night"), "the-long-night");
    }

    #[test]
    fn strips_path_unsafe_characters() {
        assert_eq!(slugify(r#"a<b>c:d"e/f\g|h?i*j"#), "abcdefghij");
    }

    #[test]
    fn collapses_repeated_hyphens() {
        assert_eq!(slugify("north -- south"), "north-south");
        assert_eq!(slugify("--edge--"), "edge");
    }

    #[test]
    fn truncates_to_fifty_characters() {
        let slug = slugify(&"a".repeat(80));
        assert_eq!(slug.chars().count(), 50);
    }

    #[test]
    fn ideographic_names_encode_the_original() {
        let slug = slugify("世界");
        assert!(!slug.is_empty());
        assert!(slug.chars().count() <= 20);
        assert!(slug
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'));
        assert_eq!(slug, slugify("世界"));

        let long = slugify("这是一个非常非常长的世界名称用于测试");
        assert_eq!(long.chars().count(), 20);
    }

    #[test]
    fn blank_names_fall_back() {
        assert_eq!(slugify("   "), FALLBACK_SLUG);
        assert_eq!(slugify(""), FALLBACK_SLUG);
        assert_eq!(slugify("???"), FALLBACK_SLUG);
    }
}
