//! Second defense stage: classify content by signature, independent of the
//! filename, and refuse native executables or content that matches a
//! category the workspace blocks.

use crate::error::{Rejection, RejectionKind};
use crate::models::BlockSet;
use crate::services::archive_inspector::ArchiveFormat;
use crate::utils::validation::{extract_extension, is_executable_content, looks_like_text};
use std::io::{self, Read};
use std::sync::Arc;

/// Bytes of an upload examined for its signature
pub const SIGNATURE_PREFIX_LEN: usize = 8 * 1024;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// MIME types of native binaries, refused regardless of the blocklist
const EXECUTABLE_MIME_TYPES: &[&str] = &[
    "application/x-msdownload",
    "application/x-executable",
    "application/x-dosexec",
    "application/x-mach-binary",
    "application/x-sharedlib",
    "application/vnd.microsoft.portable-executable",
    "application/x-elf",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptFamily {
    Shell,
    Batch,
    PowerShell,
    Php,
    Python,
    Perl,
    Ruby,
    JavaScript,
    VbScript,
}

/// Vendor variants reported for each script family; the first is canonical
const SCRIPT_MIME_FAMILIES: &[(ScriptFamily, &[&str])] = &[
    (
        ScriptFamily::Shell,
        &[
            "application/x-sh",
            "text/x-shellscript",
            "application/x-shellscript",
            "text/x-sh",
            "application/x-bash",
            "application/x-csh",
            "text/x-script.sh",
        ],
    ),
    (
        ScriptFamily::Batch,
        &[
            "application/x-bat",
            "application/bat",
            "application/x-batch",
            "text/x-batch",
            "text/x-msdos-batch",
        ],
    ),
    (
        ScriptFamily::PowerShell,
        &["application/x-powershell", "text/x-powershell"],
    ),
    (
        ScriptFamily::Php,
        &[
            "application/x-httpd-php",
            "text/x-php",
            "application/x-php",
            "application/php",
            "text/php",
        ],
    ),
    (
        ScriptFamily::Python,
        &[
            "text/x-python",
            "application/x-python",
            "text/x-python-script",
            "text/x-script.python",
            "application/x-python-code",
        ],
    ),
    (
        ScriptFamily::Perl,
        &["text/x-perl", "application/x-perl", "text/x-script.perl"],
    ),
    (
        ScriptFamily::Ruby,
        &["text/x-ruby", "application/x-ruby", "text/x-script.ruby"],
    ),
    (
        ScriptFamily::JavaScript,
        &[
            "application/javascript",
            "text/javascript",
            "application/x-javascript",
            "application/ecmascript",
            "text/ecmascript",
        ],
    ),
    (
        ScriptFamily::VbScript,
        &["text/vbscript", "application/x-vbscript", "text/x-vbscript"],
    ),
];

const MARKUP_MIME_TYPES: &[&str] = &["text/html", "application/xhtml+xml", "image/svg+xml"];

/// Expected MIME type of a file judged by its extension alone
const EXTENSION_MIME_TYPES: &[(&str, &str)] = &[
    // Native executables
    ("exe", "application/x-msdownload"),
    ("dll", "application/x-msdownload"),
    ("com", "application/x-msdownload"),
    ("scr", "application/x-msdownload"),
    ("cpl", "application/x-msdownload"),
    ("sys", "application/x-msdownload"),
    ("ocx", "application/x-msdownload"),
    ("elf", "application/x-executable"),
    ("so", "application/x-sharedlib"),
    ("dylib", "application/x-mach-binary"),
    // Scripts
    ("sh", "application/x-sh"),
    ("bash", "application/x-sh"),
    ("zsh", "application/x-sh"),
    ("ksh", "application/x-sh"),
    ("csh", "application/x-csh"),
    ("bat", "application/x-bat"),
    ("cmd", "application/x-bat"),
    ("ps1", "application/x-powershell"),
    ("psm1", "application/x-powershell"),
    ("php", "application/x-httpd-php"),
    ("phtml", "application/x-httpd-php"),
    ("php3", "application/x-httpd-php"),
    ("php4", "application/x-httpd-php"),
    ("php5", "application/x-httpd-php"),
    ("phar", "application/x-httpd-php"),
    ("py", "text/x-python"),
    ("pyw", "text/x-python"),
    ("pl", "text/x-perl"),
    ("pm", "text/x-perl"),
    ("rb", "text/x-ruby"),
    ("js", "application/javascript"),
    ("mjs", "application/javascript"),
    ("cjs", "application/javascript"),
    ("vbs", "text/vbscript"),
    ("vbe", "text/vbscript"),
    // Markup
    ("html", "text/html"),
    ("htm", "text/html"),
    ("xhtml", "application/xhtml+xml"),
    ("svg", "image/svg+xml"),
    // Text
    ("txt", "text/plain"),
    ("log", "text/plain"),
    ("csv", "text/csv"),
    ("tsv", "text/tab-separated-values"),
    ("md", "text/markdown"),
    ("css", "text/css"),
    ("xml", "text/xml"),
    ("json", "application/json"),
    ("yaml", "application/yaml"),
    ("yml", "application/yaml"),
    // Documents
    ("pdf", "application/pdf"),
    ("rtf", "application/rtf"),
    ("doc", "application/msword"),
    ("xls", "application/vnd.ms-excel"),
    ("ppt", "application/vnd.ms-powerpoint"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    (
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
    // Images
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("ico", "image/vnd.microsoft.icon"),
    // Audio / video
    ("mp3", "audio/mpeg"),
    ("wav", "audio/x-wav"),
    ("ogg", "audio/ogg"),
    ("flac", "audio/x-flac"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("mov", "video/quicktime"),
    ("avi", "video/x-msvideo"),
    ("mkv", "video/x-matroska"),
    // Archives
    ("zip", "application/zip"),
    ("jar", "application/java-archive"),
    ("tar", "application/x-tar"),
    ("gz", "application/gzip"),
    ("tgz", "application/gzip"),
    ("7z", "application/x-7z-compressed"),
    ("rar", "application/vnd.rar"),
    ("bz2", "application/x-bzip2"),
];

/// Canonical category two MIME types are compared by
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentCategory {
    NativeExecutable,
    Script(ScriptFamily),
    Markup,
    Archive(ArchiveFormat),
    /// Any other `text/*`
    Text,
    Exact(String),
    /// Carries no signal; never equivalent to anything
    Unknown,
}

impl ContentCategory {
    pub fn of(mime: &str) -> Self {
        let mime = normalize_mime(mime);

        if mime.is_empty() || mime == OCTET_STREAM {
            return ContentCategory::Unknown;
        }
        if EXECUTABLE_MIME_TYPES.contains(&mime.as_str()) {
            return ContentCategory::NativeExecutable;
        }
        if let Some((family, _)) = SCRIPT_MIME_FAMILIES
            .iter()
            .find(|(_, variants)| variants.contains(&mime.as_str()))
        {
            return ContentCategory::Script(*family);
        }
        if MARKUP_MIME_TYPES.contains(&mime.as_str()) {
            return ContentCategory::Markup;
        }
        match ArchiveFormat::from_mime(&mime) {
            ArchiveFormat::Unknown => {}
            format => return ContentCategory::Archive(format),
        }
        if mime.starts_with("text/") {
            return ContentCategory::Text;
        }
        ContentCategory::Exact(mime)
    }

    pub fn is_equivalent(&self, other: &ContentCategory) -> bool {
        *self != ContentCategory::Unknown && self == other
    }
}

fn normalize_mime(mime: &str) -> String {
    mime.split(';').next().unwrap_or("").trim().to_lowercase()
}

fn canonical_script_mime(family: ScriptFamily) -> &'static str {
    SCRIPT_MIME_FAMILIES
        .iter()
        .find(|(f, _)| *f == family)
        .and_then(|(_, variants)| variants.first().copied())
        .unwrap_or(OCTET_STREAM)
}

/// Result of classifying an upload or archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedType {
    pub mime: String,
    pub category: ContentCategory,
}

impl DetectedType {
    pub fn new(mime: impl Into<String>) -> Self {
        let mime = mime.into();
        let category = ContentCategory::of(&mime);
        Self { mime, category }
    }

    pub fn is_native_executable(&self) -> bool {
        self.category == ContentCategory::NativeExecutable
    }
}

/// Content classifier used by the signature gate and the archive inspector
pub trait SignatureDetector: Send + Sync {
    /// MIME type of `prefix`; `filename` may only refine generic text
    fn detect(&self, prefix: &[u8], filename: &str) -> String;

    /// MIME type a file is expected to have judging by its extension alone
    fn expected_for_extension(&self, extension: &str) -> Option<String>;
}

/// Magic-number detection via `infer`, plus script sniffing
#[derive(Debug, Default, Clone)]
pub struct InferDetector;

impl InferDetector {
    pub fn new() -> Self {
        Self
    }
}

impl SignatureDetector for InferDetector {
    fn detect(&self, prefix: &[u8], filename: &str) -> String {
        if prefix.is_empty() {
            return OCTET_STREAM.to_string();
        }

        let sniffed = infer::get(prefix).map(|kind| kind.mime_type().to_string());

        // Binary magic wins; a PHP payload inside an image is still PHP
        if let Some(mime) = sniffed.as_deref()
            && !mime.starts_with("text/")
        {
            if mime.starts_with("image/") && contains_php_tag(prefix) {
                return canonical_script_mime(ScriptFamily::Php).to_string();
            }
            return mime.to_string();
        }

        if let Some(family) = sniff_script(prefix) {
            return canonical_script_mime(family).to_string();
        }

        if let Some(mime) = sniffed {
            return mime;
        }

        if looks_like_text(prefix) {
            let hint = self.expected_for_extension(&extract_extension(filename));
            return match hint {
                Some(mime) if mime.starts_with("text/") => mime,
                _ => "text/plain".to_string(),
            };
        }

        OCTET_STREAM.to_string()
    }

    fn expected_for_extension(&self, extension: &str) -> Option<String> {
        let extension = extension.trim().to_lowercase();
        EXTENSION_MIME_TYPES
            .iter()
            .find(|(ext, _)| *ext == extension)
            .map(|(_, mime)| mime.to_string())
    }
}

fn strip_bom(prefix: &[u8]) -> &[u8] {
    prefix.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(prefix)
}

fn contains_php_tag(prefix: &[u8]) -> bool {
    prefix
        .windows(5)
        .any(|w| w.eq_ignore_ascii_case(b"<?php"))
}

fn sniff_script(prefix: &[u8]) -> Option<ScriptFamily> {
    let content = strip_bom(prefix);

    if let Some(rest) = content.strip_prefix(b"#!") {
        return Some(shebang_family(rest));
    }

    if contains_php_tag(content) {
        return Some(ScriptFamily::Php);
    }

    let first_line = content
        .split(|&b| b == b'\n')
        .map(|line| line.trim_ascii())
        .find(|line| !line.is_empty())?;
    let lowered = first_line.to_ascii_lowercase();
    if lowered.starts_with(b"@echo off") || lowered.starts_with(b"@echo on") {
        return Some(ScriptFamily::Batch);
    }

    None
}

/// Interpreter named by a shebang line (`#!` already stripped)
fn shebang_family(line: &[u8]) -> ScriptFamily {
    let line = line.split(|&b| b == b'\n').next().unwrap_or(line);
    let line = String::from_utf8_lossy(line);
    let mut tokens = line.split_whitespace();

    let mut interpreter = tokens
        .next()
        .map(|path| path.rsplit('/').next().unwrap_or(path))
        .unwrap_or("");
    if interpreter == "env" {
        interpreter = tokens.find(|t| !t.starts_with('-')).unwrap_or("");
    }

    let name: String = interpreter
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_lowercase();

    match name.as_str() {
        "python" => ScriptFamily::Python,
        "perl" => ScriptFamily::Perl,
        "ruby" => ScriptFamily::Ruby,
        "node" | "nodejs" | "deno" | "bun" => ScriptFamily::JavaScript,
        "php" => ScriptFamily::Php,
        "pwsh" | "powershell" => ScriptFamily::PowerShell,
        _ => ScriptFamily::Shell,
    }
}

/// Read at most [`SIGNATURE_PREFIX_LEN`] bytes from the start of `reader`
pub fn read_prefix<R: Read>(reader: R) -> io::Result<Vec<u8>> {
    let mut prefix = Vec::with_capacity(SIGNATURE_PREFIX_LEN);
    reader
        .take(SIGNATURE_PREFIX_LEN as u64)
        .read_to_end(&mut prefix)?;
    Ok(prefix)
}

pub struct ContentSignatureGate {
    detector: Arc<dyn SignatureDetector>,
}

impl Default for ContentSignatureGate {
    fn default() -> Self {
        Self::new(Arc::new(InferDetector::new()))
    }
}

impl ContentSignatureGate {
    pub fn new(detector: Arc<dyn SignatureDetector>) -> Self {
        Self { detector }
    }

    /// Classify `prefix` and decide whether it may be stored under
    /// `declared_extension` given the workspace block set.
    pub fn check(
        &self,
        prefix: &[u8],
        declared_extension: &str,
        filename: &str,
        blocked: &BlockSet,
    ) -> Result<DetectedType, Rejection> {
        let detected = DetectedType::new(self.detector.detect(prefix, filename));
        tracing::debug!(
            "Signature of '{}' (.{}): {} ({:?})",
            filename,
            declared_extension,
            detected.mime,
            detected.category
        );

        if detected.is_native_executable() || is_executable_content(prefix) {
            return Err(Rejection::new(
                RejectionKind::ExecutableDetected,
                format!(
                    "File contains executable content which is not allowed (detected: {})",
                    detected.mime
                ),
            )
            .with_offending(filename));
        }

        // Sorted so the reported extension is stable
        let mut candidates: Vec<&String> = blocked.iter().collect();
        candidates.sort();

        for blocked_ext in candidates {
            let Some(expected) = self.detector.expected_for_extension(blocked_ext) else {
                continue;
            };
            if ContentCategory::of(&expected).is_equivalent(&detected.category) {
                return Err(Rejection::new(
                    RejectionKind::DisguisedExtension,
                    format!(
                        "'{}' is declared as .{} but its content matches blocked .{} ({})",
                        filename, declared_extension, blocked_ext, detected.mime
                    ),
                )
                .with_offending(blocked_ext.as_str()));
            }
        }

        Ok(detected)
    }

    /// Entry-level executable check used inside archives
    pub fn is_native_executable(&self, sample: &[u8], name: &str) -> bool {
        is_executable_content(sample)
            || DetectedType::new(self.detector.detect(sample, name)).is_native_executable()
    }
}
