//! Binding to the pdfium shared library.
//!
//! pdfium is a C++ library loaded at runtime. Resolution order:
//!
//! 1. `PDFIUM_LIB_PATH`: an explicit library file, or a directory holding
//!    the platform library (`libpdfium.so` / `libpdfium.dylib` / `pdfium.dll`).
//! 2. The system library search path.
//!
//! Each call returns a fresh [`Pdfium`]; callers run inside `spawn_blocking`
//! and drop it when the blocking task ends.

use crate::error::Pdf2CardsError;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::debug;

/// Environment variable naming an existing pdfium library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Bind to pdfium, preferring `PDFIUM_LIB_PATH` over the system library.
pub fn bind() -> Result<Pdfium, Pdf2CardsError> {
    if let Ok(configured) = std::env::var(PDFIUM_LIB_PATH_ENV) {
        if !configured.is_empty() {
            let mut path = PathBuf::from(&configured);
            if path.is_dir() {
                path = Pdfium::pdfium_platform_library_name_at_path(&path);
            }
            debug!("Binding pdfium from {}", path.display());
            return Pdfium::bind_to_library(&path)
                .map(Pdfium::new)
                .map_err(|e| {
                    Pdf2CardsError::PdfiumBindingFailed(format!("{}: {}", path.display(), e))
                });
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| Pdf2CardsError::PdfiumBindingFailed(e.to_string()))
}

/// `true` when a pdfium library can be bound in this environment.
///
/// Used by tests and by the CLI's startup check.
pub fn is_available() -> bool {
    bind().is_ok()
}
