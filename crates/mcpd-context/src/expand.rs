//! `${VAR}` expansion for execution-context values.

/// Expand `${NAME}` references in `input` using `lookup`.
///
/// A reference whose variable is undefined expands to the empty string.
/// Only the braced form is recognized; a bare `$`, a `$` not followed by
/// `{`, and an unterminated `${` are all left literal. Variable names
/// follow the usual shell rules: a leading ASCII letter or underscore,
/// then letters, digits, and underscores.
pub fn expand_str(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        let (head, tail) = rest.split_at(start);
        out.push_str(head);

        let body = &tail[2..];
        match body.find('}') {
            Some(end) if is_valid_name(&body[..end]) => {
                let name = &body[..end];
                if let Some(value) = lookup(name) {
                    out.push_str(&value);
                }
                rest = &body[end..][1..];
            }
            _ => {
                // Not a well-formed reference; keep the `${` literal and
                // continue scanning after it.
                out.push_str("${");
                rest = body;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Expand every string in an argument list.
pub fn expand_args(args: &[String], lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    args.iter().map(|a| expand_str(a, &lookup)).collect()
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Lookup backed by the process environment.
#[must_use]
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/user".to_string()),
            "TOKEN" => Some("s3cr3t".to_string()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn test_expands_defined_variable() {
        assert_eq!(expand_str("${HOME}/bin", fixed), "/home/user/bin");
    }

    #[test]
    fn test_undefined_variable_expands_to_empty() {
        assert_eq!(expand_str("prefix-${MISSING}-suffix", fixed), "prefix--suffix");
    }

    #[test]
    fn test_multiple_references() {
        assert_eq!(
            expand_str("${HOME}:${TOKEN}:${HOME}", fixed),
            "/home/user:s3cr3t:/home/user"
        );
    }

    #[test]
    fn test_bare_dollar_is_literal() {
        assert_eq!(expand_str("cost is $5", fixed), "cost is $5");
        assert_eq!(expand_str("$HOME", fixed), "$HOME");
    }

    #[test]
    fn test_unterminated_reference_is_literal() {
        assert_eq!(expand_str("${HOME", fixed), "${HOME");
    }

    #[test]
    fn test_invalid_name_is_literal() {
        assert_eq!(expand_str("${1BAD}", fixed), "${1BAD}");
        assert_eq!(expand_str("${}", fixed), "${}");
    }

    #[test]
    fn test_empty_value_expands_to_empty() {
        assert_eq!(expand_str("[${EMPTY}]", fixed), "[]");
    }

    #[test]
    fn test_expand_args() {
        let args = vec!["--home".to_string(), "${HOME}".to_string()];
        assert_eq!(expand_args(&args, fixed), vec!["--home", "/home/user"]);
    }
}
