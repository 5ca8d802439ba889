use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::File;
use std::path::Path;
use tempfile::Builder;

/// Copy `source` to `destination` so that readers of `destination` only
/// ever see the old file or the complete new one.
///
/// The bytes go to a uniquely named sibling of `destination` first, which
/// is then renamed over it. A symlink at `destination` is replaced, not
/// followed. On failure the temporary file is removed and `destination` is
/// left untouched.
pub async fn publish(source: &Path, destination: &Path) -> Result<()> {
    let (source, target) = (source.to_path_buf(), destination.to_path_buf());
    tokio::task::spawn_blocking(move || publish_blocking(&source, &target))
        .await
        .or_raise(|| copy_failed(destination, "publishing task did not complete"))?
}

fn copy_failed(destination: &Path, reason: impl ToString) -> ErrorKind {
    ErrorKind::CopyFailed { destination: destination.to_path_buf(), reason: reason.to_string() }
}

fn publish_blocking(source: &Path, destination: &Path) -> Result<()> {
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => exn::bail!(copy_failed(destination, "destination has no parent directory")),
    };
    std::fs::create_dir_all(parent).map_err(|e| copy_failed(destination, e))?;

    let mut input = File::open(source).map_err(|e| copy_failed(destination, e))?;
    // Dropping `temp` on any early return deletes it.
    let mut temp = Builder::new()
        .prefix(".compile_commands.")
        .suffix(".json.tmp")
        .tempfile_in(parent)
        .map_err(|e| copy_failed(destination, e))?;
    std::io::copy(&mut input, temp.as_file_mut()).map_err(|e| copy_failed(destination, e))?;
    temp.as_file().sync_all().map_err(|e| copy_failed(destination, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .map_err(|e| copy_failed(destination, e))?;
    }

    let temp_path = temp.path().to_path_buf();
    temp.persist(destination).map_err(|e| copy_failed(destination, e.error))?;
    tracing::debug!(from = %temp_path.display(), to = %destination.display(), "Renamed database into place");
    Ok(())
}
