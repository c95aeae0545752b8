use sha2::{Digest, Sha256};

const MAX_STEM_LEN: usize = 40;
const MAX_EXTENSION_LEN: usize = 8;

/// Upper bound on names produced by [`version_entry_name`].
pub const MAX_ENTRY_NAME_LEN: usize = 80;

/// Filesystem-safe, deterministic name for version `ordinal` of the resource at `url`:
/// `{ordinal:05}-{last_path_segment}-{short_hash(url)}{.ext}`.
///
/// The extension of the URL path is kept so that cached files open with the
/// right program; query strings and fragments never reach the name.
pub fn version_entry_name(url: &str, ordinal: usize) -> String {
    let (stem, extension) = split_last_segment(url);
    let stem = match sanitize_component(stem, MAX_STEM_LEN) {
        s if s.is_empty() => "index".to_string(),
        s => s,
    };
    let hash = short_hash(url);
    match extension {
        Some(ext) => format!("{ordinal:05}-{stem}-{hash}.{ext}"),
        None => format!("{ordinal:05}-{stem}-{hash}"),
    }
}

/// Deterministic positive resource id for `url`.
pub fn resource_id_for_url(url: &str) -> i64 {
    let digest = Sha256::digest(url.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) & i64::MAX as u64) as i64
}

/// Replaces characters that are unsafe in file names with `_`, collapses runs of
/// `_`, trims separators and truncates to `max_len` bytes. Returns an empty
/// string when nothing usable is left.
pub fn sanitize_component(input: &str, max_len: usize) -> String {
    let mut compacted = String::with_capacity(input.len().min(max_len));
    let mut prev_underscore = false;
    for c in input.chars() {
        let c = if is_forbidden(c) { '_' } else { c };
        if c == '_' {
            if !prev_underscore {
                compacted.push(c);
            }
            prev_underscore = true;
        } else {
            compacted.push(c);
            prev_underscore = false;
        }
    }
    let mut cleaned = compacted.trim_matches(&['_', '.', '-'][..]).to_string();
    if cleaned.len() > max_len {
        cleaned.truncate(max_len);
        cleaned = cleaned.trim_end_matches(&['_', '.', '-'][..]).to_string();
    }
    if is_reserved_windows_name(&cleaned) {
        cleaned.push('_');
    }
    cleaned
}

/// [`sanitize_component`] of `input` suffixed with a short hash of the raw
/// input, so inputs that sanitize alike still get distinct names.
pub fn hashed_component(input: &str, max_len: usize) -> String {
    let hash = short_hash(input);
    match sanitize_component(input, max_len) {
        stem if stem.is_empty() => hash,
        stem => format!("{stem}-{hash}"),
    }
}

fn split_last_segment(url: &str) -> (&str, Option<&str>) {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let path = without_fragment
        .split('?')
        .next()
        .unwrap_or(without_fragment);
    let path = path
        .split_once("://")
        .map(|(_, rest)| rest.split_once('/').map(|(_, p)| p).unwrap_or(""))
        .unwrap_or(path);
    let segment = path.rsplit('/').next().unwrap_or("");

    match segment.rsplit_once('.') {
        Some((stem, ext)) if is_plain_extension(ext) => (stem, Some(ext)),
        _ => (segment, None),
    }
}

fn is_plain_extension(ext: &str) -> bool {
    !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

// Non-ASCII is replaced too, so byte length equals character count.
fn is_forbidden(c: char) -> bool {
    !c.is_ascii()
        || c.is_ascii_whitespace()
        || matches!(c,
            '\\' | '/' | ':' | ';' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}' | '\u{7F}'
        )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}
