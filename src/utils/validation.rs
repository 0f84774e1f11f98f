use anyhow::{Result, anyhow};
use std::path::Path;

/// Longest extension token accepted by the blocklist
pub const MAX_EXTENSION_LEN: usize = 20;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Lower-cased text after the last '.' of the final path component.
/// Returns an empty string when there is no extension.
pub fn extract_extension(filename: &str) -> String {
    let trimmed = filename.trim();
    // Treat both separators as path boundaries regardless of platform
    let name = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed);

    match name.rfind('.') {
        Some(idx) => name[idx + 1..].trim().to_lowercase(),
        None => String::new(),
    }
}

/// Trim, drop one leading dot, lower-case
pub fn normalize_extension(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('.')
        .unwrap_or(trimmed)
        .to_lowercase()
}

/// Validates an extension token for the blocklist and returns its normalized form
pub fn validate_extension_token(raw: &str) -> Result<String> {
    let normalized = normalize_extension(raw);

    if normalized.is_empty() {
        return Err(anyhow!(ValidationError {
            code: "EMPTY_EXTENSION",
            message: "Extension cannot be empty".to_string(),
        }));
    }

    if normalized.chars().count() > MAX_EXTENSION_LEN {
        return Err(anyhow!(ValidationError {
            code: "EXTENSION_TOO_LONG",
            message: format!(
                "Extension '{}' exceeds {} characters",
                normalized, MAX_EXTENSION_LEN
            ),
        }));
    }

    if !normalized
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-'))
    {
        return Err(anyhow!(ValidationError {
            code: "INVALID_EXTENSION",
            message: format!("Extension '{}' contains unsupported characters", normalized),
        }));
    }

    Ok(normalized)
}

/// Final path component of an archive entry or upload name
pub fn file_name_of(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

/// Checks if content starts with a native executable header
pub fn is_executable_content(header: &[u8]) -> bool {
    if header.len() < 4 {
        return false;
    }

    // ELF binary (Linux, also shared objects)
    if header.starts_with(&[0x7F, 0x45, 0x4C, 0x46]) {
        return true;
    }

    // PE/COFF (Windows .exe, .dll, .scr, .cpl)
    if header.starts_with(&[0x4D, 0x5A]) {
        return true;
    }

    // Mach-O (macOS), 32/64-bit both byte orders
    if header.starts_with(&[0xFE, 0xED, 0xFA, 0xCE])
        || header.starts_with(&[0xFE, 0xED, 0xFA, 0xCF])
        || header.starts_with(&[0xCE, 0xFA, 0xED, 0xFE])
        || header.starts_with(&[0xCF, 0xFA, 0xED, 0xFE])
    {
        return true;
    }

    // Mach-O universal binary; Java class files share the magic but carry
    // a version number >= 45 where fat headers carry a small arch count
    if header.starts_with(&[0xCA, 0xFE, 0xBA, 0xBE]) && header.len() >= 8 {
        let nfat_arch = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        return nfat_arch > 0 && nfat_arch < 20;
    }

    false
}

/// Heuristic text check over the first 512 bytes: no NUL and valid UTF-8
/// (a multi-byte sequence cut at the window edge is tolerated)
pub fn looks_like_text(sample: &[u8]) -> bool {
    let window = &sample[..sample.len().min(512)];
    if window.contains(&0) {
        return false;
    }
    match std::str::from_utf8(window) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}
