//! Ordered, independent load attempts with a structured outcome per library.

use std::{
    ffi::{OsStr, OsString},
    fmt, io,
    path::{Path, PathBuf},
};

use libloading::Library;
use thiserror::Error;
use tracing::{info, warn};

use super::bundle;

/// Errors produced by the native library layer.
#[derive(Debug, Error)]
pub enum NativeLoadError {
    /// The bundle directory exists but could not be listed.
    #[error("failed to read native bundle {}: {source}", path.display())]
    Bundle {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The installation directory could not be created.
    #[error("failed to create native install directory {}: {source}", path.display())]
    Install {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The dynamic loader rejected a library.
    #[error("{}: {reason}", target.to_string_lossy())]
    Open { target: OsString, reason: String },
}

/// Opens a shared library and returns a handle that keeps it mapped.
#[cfg_attr(test, mockall::automock(type Handle = ();))]
pub trait LibraryOpener {
    type Handle;

    /// Load `target`, either an absolute path or a bare file name resolved by
    /// the system dynamic loader.
    fn open(&self, target: &OsStr) -> Result<Self::Handle, NativeLoadError>;
}

/// [`LibraryOpener`] backed by `dlopen` / `LoadLibrary`.
pub struct DylibOpener;

impl LibraryOpener for DylibOpener {
    type Handle = Library;

    fn open(&self, target: &OsStr) -> Result<Library, NativeLoadError> {
        // SAFETY: loading runs the library's initialisers. Only files from the
        // operator-provided bundle and the configured candidate names reach here.
        unsafe { Library::new(target) }.map_err(|e| NativeLoadError::Open {
            target: target.to_owned(),
            reason: e.to_string(),
        })
    }
}

/// Result of trying one library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Loaded from `from` (absolute path or bare file name).
    Loaded { from: OsString },
    /// Every location failed; one reason per location tried.
    Failed { reasons: Vec<String> },
}

/// One entry of the load report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadAttempt {
    /// Bundled file name or candidate library name.
    pub library: String,
    pub outcome: LoadOutcome,
}

impl LoadAttempt {
    pub fn is_loaded(&self) -> bool {
        matches!(self.outcome, LoadOutcome::Loaded { .. })
    }
}

/// Report of the native preload, owning the handles of loaded libraries.
///
/// Handles are never dropped while the report is alive, so loaded libraries
/// stay mapped for the lifetime of the process.
pub struct NativeLibraries<H> {
    attempts: Vec<LoadAttempt>,
    installed: Vec<PathBuf>,
    handles: Vec<H>,
}

impl<H> NativeLibraries<H> {
    fn new(installed: Vec<PathBuf>) -> Self {
        Self {
            attempts: Vec::new(),
            installed,
            handles: Vec::new(),
        }
    }

    /// Every attempt, in the order it was made.
    pub fn attempts(&self) -> &[LoadAttempt] {
        &self.attempts
    }

    /// Files copied into the installation directory.
    pub fn installed(&self) -> &[PathBuf] {
        &self.installed
    }

    pub fn loaded_count(&self) -> usize {
        self.handles.len()
    }

    pub fn failed_count(&self) -> usize {
        self.attempts.len() - self.handles.len()
    }

    /// Names of the libraries that loaded, for diagnostics.
    pub fn loaded_names(&self) -> Vec<&str> {
        self.attempts
            .iter()
            .filter(|a| a.is_loaded())
            .map(|a| a.library.as_str())
            .collect()
    }

    /// Delete the installed copies. Loaded libraries stay mapped.
    pub fn remove_installed(&self) -> usize {
        bundle::remove_installed(&self.installed)
    }

    fn attempt<O>(&mut self, opener: &O, library: String, targets: &[OsString])
    where
        O: LibraryOpener<Handle = H>,
    {
        let mut reasons = Vec::new();
        for target in targets {
            info!(library = %library, target = %target.to_string_lossy(), "loading native library");
            match opener.open(target) {
                Ok(handle) => {
                    info!(library = %library, "native library loaded");
                    self.handles.push(handle);
                    self.attempts.push(LoadAttempt {
                        library,
                        outcome: LoadOutcome::Loaded {
                            from: target.clone(),
                        },
                    });
                    return;
                }
                Err(e) => reasons.push(e.to_string()),
            }
        }

        warn!(library = %library, reasons = ?reasons, "native library not loaded");
        self.attempts.push(LoadAttempt {
            library,
            outcome: LoadOutcome::Failed { reasons },
        });
    }
}

impl<H> fmt::Debug for NativeLibraries<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibraries")
            .field("attempts", &self.attempts)
            .field("installed", &self.installed)
            .finish()
    }
}

/// Load every installed file by absolute path, then every candidate name.
///
/// A candidate is looked up in `install_dir` first (using the platform file
/// name, e.g. `libssl.so`), then through the system loader search path.
pub fn load_all<O: LibraryOpener>(
    opener: &O,
    installed: Vec<PathBuf>,
    install_dir: &Path,
    candidates: &[String],
) -> NativeLibraries<O::Handle> {
    let mut libs = NativeLibraries::new(installed.clone());

    for path in &installed {
        let library = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        libs.attempt(opener, library, &[path.clone().into_os_string()]);
    }

    for candidate in candidates {
        let file_name = libloading::library_filename(candidate);
        let local = install_dir.join(&file_name);
        let mut targets = Vec::with_capacity(2);
        if local.is_file() {
            targets.push(local.into_os_string());
        }
        targets.push(file_name);
        libs.attempt(opener, candidate.clone(), &targets);
    }

    libs
}
