use std::path::PathBuf;

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

pub fn home_dir() -> Option<PathBuf> {
    #[cfg(unix)]
    {
        env_path("HOME")
    }

    #[cfg(windows)]
    {
        env_path("USERPROFILE").or_else(|| {
            let home_drive = std::env::var_os("HOMEDRIVE")?;
            let home_path = std::env::var_os("HOMEPATH")?;
            let mut path = PathBuf::from(home_drive);
            path.push(home_path);
            Some(path)
        })
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
pub fn data_dir() -> Option<PathBuf> {
    env_path("XDG_DATA_HOME")
        .filter(|p| p.is_absolute())
        .or_else(|| home_dir().map(|h| h.join(".local").join("share")))
}

#[cfg(target_os = "macos")]
pub fn data_dir() -> Option<PathBuf> {
    home_dir().map(|h| h.join("Library").join("Application Support"))
}

#[cfg(windows)]
pub fn data_dir() -> Option<PathBuf> {
    env_path("APPDATA")
}

/// `TMPDIR` override for the staging area, when set.
pub fn tmp_dir_override() -> Option<PathBuf> {
    env_path("TMPDIR")
}
