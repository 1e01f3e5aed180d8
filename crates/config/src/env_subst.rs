//! `${VAR}` and `${VAR:-default}` placeholders in raw config text.

use std::{borrow::Cow, sync::LazyLock};

use regex::{Captures, Regex};

#[allow(clippy::unwrap_used)]
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").unwrap());

/// Substitute placeholders from the process environment.
///
/// A set variable wins, then the `:-` default. A placeholder with neither is
/// left untouched so the parse error (or the server) shows what was missing.
pub fn substitute_env(input: &str) -> Cow<'_, str> {
    substitute_with(input, |name| std::env::var(name).ok())
}

/// Substitute placeholders using `lookup` for variable values.
pub fn substitute_with<F>(input: &str, lookup: F) -> Cow<'_, str>
where
    F: Fn(&str) -> Option<String>,
{
    PLACEHOLDER.replace_all(input, |caps: &Captures<'_>| {
        lookup(&caps[1])
            .or_else(|| caps.get(2).map(|d| d.as_str().to_string()))
            .unwrap_or_else(|| caps[0].to_string())
    })
}

/// Names referenced by placeholders that have no default, in order of
/// appearance.
pub fn required_vars(input: &str) -> Vec<&str> {
    PLACEHOLDER
        .captures_iter(input)
        .filter(|caps| caps.get(2).is_none())
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn fake_env(name: &str) -> Option<String> {
        match name {
            "TOKEN" => Some("sk-123".into()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[rstest]
    #[case::known("key = \"${TOKEN}\"", "key = \"sk-123\"")]
    #[case::set_but_empty("x${EMPTY}y", "xy")]
    #[case::default_used("url = \"${BASE_URL:-http://127.0.0.1:8080}\"", "url = \"http://127.0.0.1:8080\"")]
    #[case::set_beats_default("${TOKEN:-fallback}", "sk-123")]
    #[case::empty_default("[${MISSING:-}]", "[]")]
    #[case::unknown_kept("${MISSING}", "${MISSING}")]
    #[case::unterminated("cmd ${OPEN", "cmd ${OPEN")]
    #[case::not_an_identifier("${1ABC} $HOME", "${1ABC} $HOME")]
    fn substitution(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(substitute_with(input, fake_env), expected);
    }

    #[test]
    fn plain_text_is_borrowed() {
        assert!(matches!(substitute_with("plain", fake_env), Cow::Borrowed(_)));
    }

    #[test]
    fn required_vars_skip_defaults() {
        assert_eq!(
            required_vars("${A} ${B:-x} ${C}"),
            ["A", "C"]
        );
    }
}
