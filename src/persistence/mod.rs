// On-disk side of the bot: the per-session snapshot files, the change
// marker, and the request inbox a dashboard writes into.

pub mod inbox;
pub mod notifier;
pub mod store;

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

// Writes `bytes` to a hidden temp file next to `path`, syncs it, then renames
// it over `path`. A concurrent reader sees either the old file or the new one.
//
// The temp name is derived from the target name, so two writers of the same
// target must not run at the same time.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = temp_path(path);

    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}
