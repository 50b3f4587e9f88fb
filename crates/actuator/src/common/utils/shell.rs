use std::borrow::Cow;

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '_' | '-' | '.' | '/' | '=' | ':' | ',' | '+' | '@' | '%'
        )
}

/// Quotes `value` so that a POSIX shell reads it back as a single word.
///
/// Values that consist only of safe characters are returned unchanged.
pub fn shell_escape(value: &str) -> Cow<'_, str> {
    if !value.is_empty() && value.chars().all(is_shell_safe) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('\'');
    for c in value.chars() {
        if c == '\'' {
            escaped.push_str("'\\''");
        } else {
            escaped.push(c);
        }
    }
    escaped.push('\'');
    Cow::Owned(escaped)
}

/// Escapes each argument and joins them with a space.
pub fn shell_join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| shell_escape(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
