use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};

/// Remove a file or directory. Failures are logged and swallowed: by the time
/// this runs the client already has its response.
pub async fn remove_path(path: &Path) {
    let result = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => debug!("Removed {:?}", path),
        Err(e) if e.kind() == ErrorKind::NotFound => debug!("Already gone: {:?}", path),
        Err(e) => warn!("Cleanup failed for {:?}: {}", path, e),
    }
}

/// Remove every file in `dir` whose name starts with `<prefix>.`, except `keep`.
pub async fn remove_with_prefix(dir: &Path, prefix: &str, keep: Option<&Path>) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot scan {:?} for leftovers: {}", dir, e);
            return;
        }
    };
    let stem = format!("{prefix}.");

    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                let matches = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(&stem));
                if matches && keep != Some(path.as_path()) {
                    remove_path(&path).await;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Error while scanning {:?}: {}", dir, e);
                break;
            }
        }
    }
}
