//! First defense stage: filename extension and declared size.

use crate::error::{Rejection, RejectionKind};
use crate::models::BlockSet;
use crate::utils::validation::extract_extension;

/// Returns the normalized extension of `filename` when the upload may proceed.
///
/// Empty uploads are refused first. A name without an extension is always
/// refused; otherwise the blocklist is consulted before the declared size.
pub fn check(
    filename: &str,
    declared_size: u64,
    blocked: &BlockSet,
    max_size: u64,
) -> Result<String, Rejection> {
    if declared_size == 0 {
        return Err(Rejection::new(
            RejectionKind::EmptyFile,
            format!("'{}' is empty", filename.trim()),
        )
        .with_offending(filename.trim()));
    }

    let extension = extract_extension(filename);

    if extension.is_empty() {
        return Err(Rejection::new(
            RejectionKind::ExtensionBlocked,
            format!("'{}' has no file extension", filename.trim()),
        )
        .with_offending(filename.trim()));
    }

    if blocked.contains(&extension) {
        return Err(Rejection::new(
            RejectionKind::ExtensionBlocked,
            format!("'{}' files are blocked in this workspace", extension),
        )
        .with_offending(extension));
    }

    if declared_size > max_size {
        return Err(Rejection::new(
            RejectionKind::SizeExceeded,
            format!(
                "File size {} bytes exceeds maximum allowed {} bytes ({} MB)",
                declared_size,
                max_size,
                max_size / 1024 / 1024
            ),
        ));
    }

    Ok(extension)
}
