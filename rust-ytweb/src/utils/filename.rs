//! Filename sanitization utilities.
//!
//! Output templates come straight from clients and end up joined under the
//! per-job download directory, so anything that could escape that directory
//! or is invalid on common filesystems is replaced before use.

/// Characters replaced in client-supplied names.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Output template used when the supplied one sanitizes to nothing.
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

fn replace_invalid(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_control() || INVALID_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Sanitize a yt-dlp output template into a single path component.
///
/// Path separators and characters invalid on Windows are replaced with `_`.
/// Templates that are empty or made only of dots fall back to
/// [`DEFAULT_OUTPUT_TEMPLATE`].
///
/// ```
/// use rust_ytweb::utils::filename::sanitize_output_template;
///
/// assert_eq!(sanitize_output_template("../%(title)s.%(ext)s"), ".._%(title)s.%(ext)s");
/// assert_eq!(sanitize_output_template(".."), "%(title)s.%(ext)s");
/// ```
pub fn sanitize_output_template(template: &str) -> String {
    let sanitized = replace_invalid(template.trim());
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        return DEFAULT_OUTPUT_TEMPLATE.to_string();
    }
    sanitized
}

/// Sanitize a file name for use in a `Content-Disposition` header.
///
/// Returns "download" if nothing usable is left.
pub fn sanitize_filename(input: &str) -> String {
    let sanitized = replace_invalid(input);
    let trimmed = sanitized.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "download".to_string();
    }
    trimmed.to_string()
}

/// `Content-Disposition` value that forces a download of `file_name`.
///
/// Non-ASCII names get an ASCII `filename` fallback plus an RFC 5987
/// `filename*` parameter.
pub fn content_disposition(file_name: &str) -> String {
    let name = sanitize_filename(file_name);
    if name.is_ascii() {
        return format!("attachment; filename=\"{name}\"");
    }

    let fallback: String = name
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    let mut encoded = String::with_capacity(name.len() * 3);
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
