//! Shell escaping and quoting utilities.

/// Characters that require quoting.
const SHELL_META: &[char] = &[
    ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}', '<',
    '>', '|', '&', ';', '#', '~',
];

/// Escape a value for use inside single quotes.
/// Replaces `'` with `'\''` (end quote, escaped quote, start quote).
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Quote a single argument for shell execution.
/// - Empty strings become `''`
/// - Strings with shell metacharacters are wrapped in single quotes
/// - Embedded single quotes are escaped
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }

    if !arg.contains(SHELL_META) {
        return arg.to_string();
    }

    format!("'{}'", escape_single_quote_content(arg))
}

/// Quote and join multiple arguments for shell execution.
pub fn quote_args<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| quote_arg(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build a command line from a program (left as written) and quoted arguments.
pub fn command_line<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    if args.is_empty() {
        return program.to_string();
    }
    format!("{} {}", program, quote_args(args))
}

/// Quote a path for shell execution (always quotes).
pub fn quote_path(path: &str) -> String {
    format!("'{}'", escape_single_quote_content(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_arg_simple() {
        assert_eq!(quote_arg("deploy"), "deploy");
        assert_eq!(quote_arg("MyApp-dev"), "MyApp-dev");
    }

    #[test]
    fn quote_arg_with_spaces() {
        assert_eq!(quote_arg("MyApp-dev 2"), "'MyApp-dev 2'");
    }

    #[test]
    fn quote_arg_with_glob() {
        assert_eq!(quote_arg("MyApp-prod/*"), "'MyApp-prod/*'");
    }

    #[test]
    fn quote_arg_with_single_quote() {
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
    }

    #[test]
    fn quote_arg_empty() {
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn quote_args_mixed() {
        let args = vec!["deploy".to_string(), "MyApp-prod/*".to_string()];
        assert_eq!(quote_args(&args), "deploy 'MyApp-prod/*'");
    }

    #[test]
    fn command_line_keeps_program() {
        assert_eq!(
            command_line("npx cdk", &["diff", "MyApp-dev"]),
            "npx cdk diff MyApp-dev"
        );
        assert_eq!(command_line::<&str>("npm ci", &[]), "npm ci");
    }

    #[test]
    fn quote_path_with_quote() {
        assert_eq!(quote_path("/tmp/it's"), "'/tmp/it'\\''s'");
    }
}
