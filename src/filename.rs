//! Turning provider titles into safe file names and download headers.

/// Longest file name most filesystems accept, in bytes.
const MAX_NAME_BYTES: usize = 255;
/// Budget for the title part of a scratch file name; the rest is reserved
/// for the random component and the extension.
const SCRATCH_TITLE_BYTES: usize = 180;
const FALLBACK_STEM: &str = "download";

const RESERVED_WINDOWS_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Strips path separators, characters that are invalid on common
/// filesystems, control characters, trailing dots/spaces, and reserved
/// names, then truncates to `max_bytes` on a character boundary.
pub fn sanitize(name: &str, max_bytes: usize) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '?' | '<' | '>' | ':' | '*' | '|' | '"'))
        .filter(|c| !c.is_control())
        .collect();

    if cleaned == "." || cleaned == ".." {
        return String::new();
    }

    let stem_upper = cleaned
        .split('.')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if RESERVED_WINDOWS_NAMES.contains(&stem_upper.as_str()) {
        return String::new();
    }

    let trimmed = cleaned.trim_end_matches(['.', ' ']);
    truncate_bytes(trimmed, max_bytes).to_owned()
}

fn truncate_bytes(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// The name a client sees for a downloaded title, e.g. `Example Video.mp3`.
pub fn logical_file_name(title: &str, extension: &str) -> String {
    let budget = MAX_NAME_BYTES.saturating_sub(extension.len() + 1);
    let stem = sanitize(title, budget);
    let stem = if stem.is_empty() { FALLBACK_STEM } else { stem.as_str() };
    format!("{stem}.{extension}")
}

/// Suffix appended after the random component of a scratch file name.
pub fn scratch_suffix(title: &str, extension: &str) -> String {
    let stem = sanitize(title, SCRATCH_TITLE_BYTES);
    if stem.is_empty() {
        format!(".{extension}")
    } else {
        format!("-{stem}.{extension}")
    }
}

/// Builds an RFC 6266 `attachment` disposition. Names that are not plain
/// printable ASCII get an ASCII fallback plus an RFC 5987 `filename*`.
pub fn content_disposition(file_name: &str) -> String {
    let is_plain = file_name.chars().all(|c| c.is_ascii() && !c.is_ascii_control());
    let fallback: String = file_name
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect();
    let quoted = quote(&fallback);

    if is_plain {
        format!("attachment; filename={quoted}")
    } else {
        format!(
            "attachment; filename={quoted}; filename*=UTF-8''{}",
            encode_ext_value(file_name)
        )
    }
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn encode_ext_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        let attr_char = byte.is_ascii_alphanumeric()
            || matches!(
                byte,
                b'!' | b'#' | b'$' | b'&' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
            );
        if attr_char {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
