use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{PatchError, PatchResult};

pub(crate) fn read_text(path: &Path) -> PatchResult<String> {
    fs::read_to_string(path).map_err(|err| PatchError::io("read", path, err))
}

/// Replace `path` with `content` in full. A scratch file in the same
/// directory is renamed over the target, so readers never see a half-written
/// header. The target's permissions carry over.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> PatchResult<()> {
    let permissions = match fs::metadata(path) {
        Ok(metadata) => Some(metadata.permissions()),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => return Err(PatchError::io("inspect", path, err)),
    };

    let temp_path = temporary_path(path)?;
    let mut file = fs::File::create(&temp_path)
        .map_err(|err| PatchError::io("create", &temp_path, err))?;

    let written = file
        .write_all(content)
        .and_then(|()| file.sync_all())
        .map_err(|err| PatchError::io("write", &temp_path, err));
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    if let Some(permissions) = permissions {
        fs::set_permissions(&temp_path, permissions)
            .map_err(|err| PatchError::io("set permissions on", &temp_path, err))?;
    }

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            fs::remove_file(path).map_err(|del_err| PatchError::io("delete", path, del_err))?;
            fs::rename(&temp_path, path)
                .map_err(|rename_err| PatchError::io("rename", path, rename_err))
        }
        Err(err) => {
            let _ = fs::remove_file(&temp_path);
            Err(PatchError::io("rename", path, err))
        }
    }
}

fn temporary_path(target: &Path) -> PatchResult<PathBuf> {
    let parent = target
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = target
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("patchguard");
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| PatchError::io("timestamp", target, std::io::Error::other(err)))?
        .as_nanos();
    let pid = std::process::id();
    Ok(parent.join(format!(".{file_name}.{pid}.{timestamp}.tmp")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrites_in_full_and_leaves_no_scratch_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("SD.h");
        fs::write(&target, "a much longer original body\n")?;

        write_atomic(&target, b"short\n")?;

        assert_eq!(fs::read_to_string(&target)?, "short\n");
        assert_eq!(fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn keeps_target_permissions() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let target = dir.path().join("SD.h");
        fs::write(&target, "x")?;
        fs::set_permissions(&target, fs::Permissions::from_mode(0o640))?;

        write_atomic(&target, b"y")?;

        assert_eq!(fs::metadata(&target)?.permissions().mode() & 0o777, 0o640);
        Ok(())
    }
}
