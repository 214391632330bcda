//! Copying bundled shared objects into the installation directory.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use super::NativeLoadError;

/// Copy every regular file in `bundle_dir` into `install_dir`.
///
/// Returns the installed paths sorted by file name. A missing bundle
/// directory means nothing is bundled and yields an empty list. A file that
/// fails to copy is logged and left out.
///
/// # Errors
///
/// Returns an error if the bundle directory cannot be listed or the
/// installation directory cannot be created.
pub fn install_bundle(bundle_dir: &Path, install_dir: &Path) -> Result<Vec<PathBuf>, NativeLoadError> {
    if !bundle_dir.is_dir() {
        debug!(bundle_dir = %bundle_dir.display(), "no native bundle present");
        return Ok(Vec::new());
    }

    let mut sources: Vec<PathBuf> = fs::read_dir(bundle_dir)
        .map_err(|source| NativeLoadError::Bundle {
            path: bundle_dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    sources.sort();

    if sources.is_empty() {
        return Ok(Vec::new());
    }

    fs::create_dir_all(install_dir).map_err(|source| NativeLoadError::Install {
        path: install_dir.to_path_buf(),
        source,
    })?;

    let mut installed = Vec::with_capacity(sources.len());
    for source_path in sources {
        let Some(name) = source_path.file_name() else {
            continue;
        };
        let target = install_dir.join(name);
        match fs::copy(&source_path, &target) {
            Ok(bytes) => {
                info!(library = %target.display(), bytes, "installed bundled native library");
                installed.push(target);
            }
            Err(e) => {
                warn!(library = %source_path.display(), error = %e, "failed to install bundled native library");
            }
        }
    }
    Ok(installed)
}

/// [`install_bundle`], downgrading a directory-level failure to a warning.
pub fn install_or_warn(bundle_dir: &Path, install_dir: &Path) -> Vec<PathBuf> {
    install_bundle(bundle_dir, install_dir).unwrap_or_else(|e| {
        warn!(error = %e, "native bundle not installed; continuing without it");
        Vec::new()
    })
}

/// Delete previously installed files, returning how many were removed.
pub fn remove_installed(installed: &[PathBuf]) -> usize {
    installed
        .iter()
        .filter(|path| match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) => {
                warn!(library = %path.display(), error = %e, "failed to remove installed native library");
                false
            }
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_bundle_installs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let install = dir.path().join("lib");
        let installed = install_bundle(&dir.path().join("absent"), &install).unwrap();
        assert!(installed.is_empty());
        assert!(!install.exists());
    }

    #[test]
    fn copies_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("bundle");
        fs::create_dir(&bundle).unwrap();
        fs::write(bundle.join("libz-provider.so.1"), b"second").unwrap();
        fs::write(bundle.join("liba-runtime.so.1"), b"first").unwrap();
        fs::create_dir(bundle.join("nested")).unwrap();

        let install = dir.path().join("lib");
        let installed = install_bundle(&bundle, &install).unwrap();

        assert_eq!(
            installed,
            vec![install.join("liba-runtime.so.1"), install.join("libz-provider.so.1")]
        );
        assert_eq!(fs::read(&installed[0]).unwrap(), b"first");
        assert!(!install.join("nested").exists());
    }

    #[test]
    fn remove_installed_counts_only_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("libpresent.so");
        fs::write(&present, b"x").unwrap();
        let absent = dir.path().join("libabsent.so");

        assert_eq!(remove_installed(&[present.clone(), absent]), 1);
        assert!(!present.exists());
    }
}
