//! Filename sanitization helpers.

/// Replace every run of characters outside `[A-Za-z0-9._-]` with a single `_`
/// and trim leading/trailing underscores.
///
/// Dots are kept so file extensions survive for content-type sniffing.
pub fn safe_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }

    out.trim_matches('_').to_string()
}

/// Sanitize a `/`-separated relative path segment by segment.
///
/// Empty, `.` and `..` segments are dropped so the result can never escape
/// the directory it is joined onto.
pub fn safe_relative_path(path: &str) -> Vec<String> {
    path.split(['/', '\\'])
        .map(safe_name)
        .filter(|s| !s.is_empty() && s != "." && s != "..")
        .collect()
}
