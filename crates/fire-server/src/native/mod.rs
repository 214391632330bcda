//! Preloading of native shared libraries for the TLS provider.
//!
//! Bundled shared objects are copied into an installation directory and loaded
//! by absolute path, then an ordered list of candidate library names is tried.
//! Every attempt is independent: a failure is logged and the next one runs.
//!
//! The dynamic loader search path is never modified at runtime. Libraries that
//! depend on each other must either be bundled (and loaded in file-name order)
//! or be reachable through `LD_LIBRARY_PATH` set before the process starts.
//!
//! The loaded handles stay mapped for the life of the process, but TLS does
//! not go through them: the listener always terminates TLS with rustls and its
//! `ring` provider, whatever this module managed to load.

pub mod bundle;
pub mod loader;

use std::{path::PathBuf, sync::OnceLock};

use libloading::Library;
use tracing::info;

pub use loader::{LibraryOpener, NativeLibraries, NativeLoadError};

/// Where to find the bundle, where to install it, and what else to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeConfig {
    pub bundle_dir: PathBuf,
    pub install_dir: PathBuf,
    pub candidates: Vec<String>,
}

static NATIVE: OnceLock<NativeLibraries<Library>> = OnceLock::new();

/// Install and load the native libraries, at most once per process.
///
/// The first caller performs the work; every later call returns the same
/// report regardless of the `cfg` it passes.
pub fn ensure_loaded(cfg: &NativeConfig) -> &'static NativeLibraries<Library> {
    NATIVE.get_or_init(|| {
        let libs = load(cfg, &loader::DylibOpener);
        info!(
            installed = libs.installed().len(),
            loaded = libs.loaded_count(),
            failed = libs.failed_count(),
            "native library preload finished"
        );
        libs
    })
}

/// Install the bundle and run every load attempt with `opener`.
pub fn load<O: LibraryOpener>(cfg: &NativeConfig, opener: &O) -> NativeLibraries<O::Handle> {
    let installed = bundle::install_or_warn(&cfg.bundle_dir, &cfg.install_dir);
    loader::load_all(opener, installed, &cfg.install_dir, &cfg.candidates)
}
