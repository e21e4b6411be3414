//! Filesystem checks guarding what may run and where output may land.
//!
//! The binary check is filename prefix plus owner-execute bit, nothing more:
//! no signature or checksum is verified. Any executable file whose name starts
//! with `yt-dlp` passes. Callers re-run it on every use.

use crate::{EngineError, Result};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

pub const BINARY_PREFIX: &str = "yt-dlp";

/// Same bound as Linux `MAXSYMLINKS`; past it the rest stays lexical.
const MAX_SYMLINK_HOPS: usize = 40;

#[cfg(unix)]
const OWNER_EXEC_BIT: u32 = 0o100;
#[cfg(unix)]
const SANDBOX_MODE: u32 = 0o700;

/// Canonical path of an initialized sandbox directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRoot {
    path: PathBuf,
}

impl SandboxRoot {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRef<Path> for SandboxRoot {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// True iff `path` is an existing regular file, owner-executable, and named
/// `yt-dlp*`. Never errors; any failure reads as `false`.
pub fn validate_binary(path: &Path) -> bool {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return false,
    };
    if !meta.is_file() {
        return false;
    }
    if !is_owner_executable(&meta) {
        return false;
    }
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with(BINARY_PREFIX))
        .unwrap_or(false)
}

pub fn check_binary(path: &Path) -> Result<()> {
    if validate_binary(path) {
        Ok(())
    } else {
        Err(EngineError::InvalidBinary {
            path: path.to_path_buf(),
        })
    }
}

#[cfg(unix)]
fn is_owner_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & OWNER_EXEC_BIT != 0
}

#[cfg(not(unix))]
fn is_owner_executable(_meta: &std::fs::Metadata) -> bool {
    true
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => match dirs::home_dir() {
            Some(home) => home.join(components.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

/// Absolute, symlink-resolved form of `path`.
///
/// Components are resolved left to right, so `..` applies to the real target
/// of any symlink before it. Symlinks are followed even when their target is
/// missing. Components that do not exist are kept lexically, which lets
/// containment be checked for paths not yet created.
pub fn canonicalize(path: &Path) -> PathBuf {
    let expanded = expand_home(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(expanded),
            Err(_) => expanded,
        }
    };

    let mut pending: VecDeque<OsString> = absolute
        .components()
        .map(|c| c.as_os_str().to_os_string())
        .collect();
    let mut resolved = PathBuf::new();
    let mut hops = 0;
    while let Some(part) = pending.pop_front() {
        match Path::new(&part).components().next() {
            Some(Component::Prefix(_)) | Some(Component::RootDir) => resolved.push(&part),
            Some(Component::CurDir) | None => {}
            Some(Component::ParentDir) => {
                resolved.pop();
            }
            Some(Component::Normal(name)) => {
                resolved.push(name);
                let is_symlink = std::fs::symlink_metadata(&resolved)
                    .map(|m| m.file_type().is_symlink())
                    .unwrap_or(false);
                if !is_symlink || hops >= MAX_SYMLINK_HOPS {
                    continue;
                }
                let Ok(target) = std::fs::read_link(&resolved) else {
                    continue;
                };
                hops += 1;
                resolved.pop();
                if target.is_absolute() {
                    resolved = PathBuf::new();
                }
                for component in target.components().rev() {
                    pending.push_front(component.as_os_str().to_os_string());
                }
            }
        }
    }
    resolved
}

/// True iff `candidate` is `root` or lies beneath it, after both are
/// canonicalized. Comparison is per component.
pub fn is_contained(root: &Path, candidate: &Path) -> bool {
    let root = canonicalize(root);
    let candidate = canonicalize(candidate);
    candidate.starts_with(&root)
}

/// Creates (mode 0700) or tightens the sandbox dir and returns its canonical
/// path. Every error from here is fatal to the application.
pub fn init_sandbox(path: &Path) -> Result<SandboxRoot> {
    let expanded = expand_home(path);

    if let Ok(meta) = std::fs::symlink_metadata(&expanded) {
        if meta.file_type().is_symlink() {
            return Err(EngineError::SandboxViolation(format!(
                "sandbox directory cannot be a symlink: {}",
                expanded.display()
            )));
        }
    }

    let target = canonicalize(&expanded);
    let unwritable = |reason: String| EngineError::SandboxUnwritable {
        path: target.clone(),
        reason,
    };

    create_private_dir(&target).map_err(|e| unwritable(format!("cannot create sandbox: {e}")))?;
    let meta = std::fs::metadata(&target).map_err(|e| unwritable(e.to_string()))?;
    if !meta.is_dir() {
        return Err(unwritable("not a directory".to_string()));
    }
    restrict_to_owner(&target).map_err(|e| unwritable(format!("cannot set permissions: {e}")))?;
    if !is_writable(&target) {
        return Err(unwritable("write access denied".to_string()));
    }

    let canonical = target
        .canonicalize()
        .map_err(|e| unwritable(e.to_string()))?;
    Ok(SandboxRoot { path: canonical })
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(SANDBOX_MODE)
        .create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SANDBOX_MODE))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn is_writable(path: &Path) -> bool {
    use std::os::unix::ffi::OsStrExt;
    let c_path = match std::ffi::CString::new(path.as_os_str().as_bytes()) {
        Ok(p) => p,
        Err(_) => return false,
    };
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 }
}

#[cfg(not(unix))]
fn is_writable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn write_with_mode(path: &Path, mode: u32) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(path, "#!/bin/sh\nexit 0\n").expect("write");
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).expect("chmod");
    }

    #[cfg(unix)]
    #[test]
    fn validate_binary_tracks_prefix_and_owner_exec_bit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let names = ["yt-dlp", "yt-dlp_linux", "yt-dlp.exe", "ytdlp", "my-yt-dlp", "YT-DLP"];
        let modes = [0o700, 0o755, 0o744, 0o100, 0o644, 0o600, 0o077, 0o011, 0o000];

        for name in names {
            for mode in modes {
                let path = dir.path().join(name);
                write_with_mode(&path, mode);
                let expected = name.starts_with(BINARY_PREFIX) && mode & 0o100 != 0;
                assert_eq!(
                    validate_binary(&path),
                    expected,
                    "name={name} mode={mode:o}"
                );
                std::fs::remove_file(&path).expect("cleanup");
            }
        }
    }

    #[test]
    fn validate_binary_rejects_missing_and_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(!validate_binary(&dir.path().join("yt-dlp")));

        let as_dir = dir.path().join("yt-dlp-dir");
        std::fs::create_dir(&as_dir).expect("mkdir");
        assert!(!validate_binary(&as_dir));
        assert!(matches!(
            check_binary(&as_dir),
            Err(EngineError::InvalidBinary { .. })
        ));
    }

    #[test]
    fn containment_accepts_root_and_descendants() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("sandbox");
        std::fs::create_dir(&root).expect("mkdir");

        assert!(is_contained(&root, &root));
        assert!(is_contained(&root, &root.join("a").join("b.mp4")));
        assert!(is_contained(&root, &root.join("a").join("..").join("c")));
    }

    #[test]
    fn containment_rejects_escapes_and_siblings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("sandbox");
        std::fs::create_dir(&root).expect("mkdir");
        std::fs::create_dir(dir.path().join("sandbox2")).expect("mkdir sibling");

        assert!(!is_contained(&root, &root.join("..").join("escape")));
        assert!(!is_contained(&root, &root.join("new").join("..").join("..").join("x")));
        assert!(!is_contained(&root, &dir.path().join("sandbox2")));
        assert!(!is_contained(&root, Path::new("/etc/passwd")));
        assert!(!is_contained(&root, dir.path()));
    }

    #[cfg(unix)]
    #[test]
    fn containment_follows_symlinks_out_of_the_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("sandbox");
        let outside = dir.path().join("outside");
        std::fs::create_dir(&root).expect("mkdir root");
        std::fs::create_dir(&outside).expect("mkdir outside");
        std::os::unix::fs::symlink(&outside, root.join("link")).expect("symlink");

        assert!(!is_contained(&root, &root.join("link")));
        assert!(!is_contained(&root, &root.join("link").join("file.mp4")));
    }

    #[cfg(unix)]
    #[test]
    fn containment_rejects_dangling_symlink_out_of_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("sandbox");
        let outside = dir.path().join("outside");
        std::fs::create_dir(&root).expect("mkdir root");
        std::fs::create_dir(&outside).expect("mkdir outside");
        std::os::unix::fs::symlink(outside.join("victim.mp4"), root.join("link"))
            .expect("dangling symlink");
        std::os::unix::fs::symlink("../outside/gone", root.join("rel")).expect("relative symlink");

        assert!(!is_contained(&root, &root.join("link")));
        assert!(!is_contained(&root, &root.join("rel")));
        assert_eq!(
            canonicalize(&root.join("link")),
            outside.canonicalize().expect("canonical outside").join("victim.mp4")
        );
    }

    #[cfg(unix)]
    #[test]
    fn containment_accepts_dangling_symlink_inside_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("sandbox");
        std::fs::create_dir(&root).expect("mkdir root");
        std::os::unix::fs::symlink("not-yet.part", root.join("pending")).expect("symlink");
        std::os::unix::fs::symlink(root.join("loop"), root.join("loop")).expect("loop");

        assert!(is_contained(&root, &root.join("pending")));
        assert!(is_contained(&root, &root.join("loop")));
    }

    #[cfg(unix)]
    #[test]
    fn containment_resolves_symlinked_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let real = dir.path().join("real");
        std::fs::create_dir(&real).expect("mkdir");
        let alias = dir.path().join("alias");
        std::os::unix::fs::symlink(&real, &alias).expect("symlink");

        assert!(is_contained(&alias, &real.join("x")));
        assert!(is_contained(&real, &alias.join("x")));
    }

    #[test]
    fn canonicalize_normalizes_dot_segments_of_missing_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path().canonicalize().expect("canonical tempdir");
        let messy = dir.path().join("a").join(".").join("b").join("..").join("c");
        assert_eq!(canonicalize(&messy), base.join("a").join("c"));
    }

    #[test]
    fn expand_home_only_touches_leading_tilde() {
        let plain = Path::new("/srv/~/x");
        assert_eq!(expand_home(plain), plain.to_path_buf());
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/Videos")), home.join("Videos"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn init_sandbox_creates_private_dir_and_is_idempotent() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("Videos").join("yt-dlp-gui");

        let first = init_sandbox(&target).expect("init");
        let mode = std::fs::metadata(first.path())
            .expect("meta")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o700);

        let second = init_sandbox(&target).expect("init again");
        assert_eq!(first, second);
        let mode_again = std::fs::metadata(second.path())
            .expect("meta")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode_again, 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn init_sandbox_tightens_existing_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("open");
        std::fs::create_dir(&target).expect("mkdir");
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o777)).expect("chmod");

        let root = init_sandbox(&target).expect("init");
        let mode = std::fs::metadata(root.path())
            .expect("meta")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn init_sandbox_rejects_symlink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let real = dir.path().join("real");
        std::fs::create_dir(&real).expect("mkdir");
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).expect("symlink");

        let err = init_sandbox(&link).expect_err("symlink must fail");
        assert!(matches!(err, EngineError::SandboxViolation(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn init_sandbox_rejects_regular_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("file");
        std::fs::write(&file, "x").expect("write");

        let err = init_sandbox(&file).expect_err("file must fail");
        assert!(matches!(err, EngineError::SandboxUnwritable { .. }));
        assert!(err.is_fatal());
    }
}
