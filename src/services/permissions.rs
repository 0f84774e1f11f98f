//! Fourth defense stage: stored uploads are never executable.

use std::io;
use std::path::Path;

/// rw-r--r--
pub const STORED_FILE_MODE: u32 = 0o644;

/// Set the stored file's mode to [`STORED_FILE_MODE`]. Idempotent.
pub async fn harden(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(STORED_FILE_MODE))
            .await?;
        tracing::debug!("Hardened {} to {:o}", path.display(), STORED_FILE_MODE);
    }

    #[cfg(not(unix))]
    {
        // Still surface a missing file on platforms without mode bits
        tokio::fs::metadata(path).await?;
        tracing::debug!(
            "Permission hardening is a no-op on this platform: {}",
            path.display()
        );
    }

    Ok(())
}
