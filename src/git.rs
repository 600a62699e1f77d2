use crate::errors::BlogError;
use std::path::Path;
use std::sync::atomic::AtomicBool;

/// Bare mirror clone of a remote repository into the local store.
///
/// Blocking: callers on the async runtime must move this onto a blocking
/// thread.
pub fn mirror_clone(remote_url: &str, local_path: &Path) -> Result<(), BlogError> {
    if let Some(parent) = local_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut prepared = gix::prepare_clone_bare(remote_url, local_path)
        .map_err(|e| BlogError::Git(format!("clone of {} failed: {}", remote_url, e)))?;

    let interrupt = AtomicBool::new(false);
    prepared
        .fetch_only(gix::progress::Discard, &interrupt)
        .map_err(|e| BlogError::Git(format!("fetch from {} failed: {}", remote_url, e)))?;

    Ok(())
}
