//! Path model: canonical drive paths and the transforms to and from backend-native forms.
//!
//! Canonical form:
//! - NFC-normalized UTF-8, '/' as the only separator
//! - always starts with '/', root is "/"
//! - no empty or '.' segments, '..' resolved and clamped at root
//! - directory paths end with '/'
//!
//! Every function here is total: malformed input is normalized, never rejected.

use unicode_normalization::UnicodeNormalization;

pub const SEPARATOR: char = '/';
pub const ROOT: &str = "/";

/// Normalize a UTF-8 string to NFC.
pub fn normalize_nfc(input: &str) -> String {
    input.nfc().collect::<String>()
}

/// Canonicalize any caller or backend path. Idempotent.
pub fn normalize(path: &str) -> String {
    let nfc = normalize_nfc(path);
    let slashed = nfc.replace('\\', "/");
    let (_, body) = split_drive_letter(&slashed);
    let trailing = body.ends_with(SEPARATOR);

    let mut segs: Vec<&str> = Vec::new();
    for seg in body.split(SEPARATOR) {
        match seg {
            "" | "." => {}
            ".." => { segs.pop(); }
            s => segs.push(s),
        }
    }
    if segs.is_empty() {
        return ROOT.to_string();
    }
    let mut out = String::with_capacity(body.len() + 2);
    for s in &segs {
        out.push(SEPARATOR);
        out.push_str(s);
    }
    if trailing { out.push(SEPARATOR); }
    out
}

/// Canonical directory form: normalized and ending with '/'.
pub fn to_directory(path: &str) -> String {
    add_trailing(&normalize(path))
}

/// Canonical file form: normalized without the trailing '/'. Root stays "/".
pub fn to_file(path: &str) -> String {
    let n = normalize(path);
    if is_root(&n) { n } else { remove_trailing(&n).to_string() }
}

pub fn add_leading(path: &str) -> String {
    if path.starts_with(SEPARATOR) { path.to_string() } else { format!("{}{}", SEPARATOR, path) }
}

pub fn remove_leading(path: &str) -> &str {
    path.strip_prefix(SEPARATOR).unwrap_or(path)
}

pub fn add_trailing(path: &str) -> String {
    if path.ends_with(SEPARATOR) { path.to_string() } else { format!("{}{}", path, SEPARATOR) }
}

pub fn remove_trailing(path: &str) -> &str {
    path.strip_suffix(SEPARATOR).unwrap_or(path)
}

pub fn is_root(path: &str) -> bool {
    normalize(path) == ROOT
}

/// True when the path is in directory form (ends with '/').
pub fn is_directory_path(path: &str) -> bool {
    path.ends_with(SEPARATOR)
}

/// Parent directory (with trailing '/'). The parent of root is root.
pub fn parent(path: &str) -> String {
    let n = normalize(path);
    if n == ROOT { return n; }
    let trimmed = remove_trailing(&n);
    match trimmed.rfind(SEPARATOR) {
        Some(idx) => trimmed[..=idx].to_string(),
        None => ROOT.to_string(),
    }
}

/// Final path segment without separators; empty for root.
pub fn name(path: &str) -> String {
    let n = normalize(path);
    let trimmed = remove_trailing(&n);
    match trimmed.rfind(SEPARATOR) {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Join a child (file or directory, relative or absolute) onto a base directory.
pub fn join(base: &str, child: &str) -> String {
    let dir = to_directory(base);
    normalize(&format!("{}{}", dir, remove_leading(child)))
}

/// Path of `path` relative to directory `dir`, or None when it is not strictly below it.
pub fn relative_to<'a>(dir: &str, path: &'a str) -> Option<&'a str> {
    let dir = add_trailing(dir);
    let rest = path.strip_prefix(dir.as_str())?;
    if rest.is_empty() { None } else { Some(rest) }
}

/// True when `path` lies strictly below directory `dir`.
pub fn is_descendant(dir: &str, path: &str) -> bool {
    relative_to(dir, path).is_some()
}

// ---- Backend boundary transforms -------------------------------------------------

/// Object-store key for a canonical path: no leading separator; root maps to "".
pub fn to_object_key(path: &str) -> String {
    let n = normalize(path);
    remove_leading(&n).to_string()
}

/// Canonical path for an object-store key.
pub fn from_object_key(key: &str) -> String {
    normalize(&add_leading(key))
}

/// Split a leading drive letter ("C:") off a native path.
pub fn split_drive_letter(path: &str) -> (Option<char>, &str) {
    let b = path.as_bytes();
    let has_letter = b.len() >= 2
        && b[0].is_ascii_alphabetic()
        && b[1] == b':'
        && (b.len() == 2 || b[2] == b'/' || b[2] == b'\\');
    if has_letter {
        (Some((b[0] as char).to_ascii_uppercase()), &path[2..])
    } else {
        (None, path)
    }
}

/// Native path for a hierarchical backend: canonical path, optional drive letter prefix,
/// then the backend's separator.
pub fn to_native(path: &str, drive_letter: Option<char>, separator: char) -> String {
    let n = normalize(path);
    let body: String = n.chars().map(|c| if c == SEPARATOR { separator } else { c }).collect();
    match drive_letter {
        Some(l) => format!("{}:{}", l.to_ascii_uppercase(), body),
        None => body,
    }
}

/// Canonical path for a native hierarchical path; the drive letter is stripped.
pub fn from_native(native: &str) -> String {
    normalize(native)
}
