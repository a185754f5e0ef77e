use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::engine::backend::DiffusionBackend;
use crate::engine::sdcpp::SdCppBackend;
use crate::engine::Engine;
use crate::state::favorites::FavoriteStore;
use crate::state::library::{Library, LibraryError};
use crate::state::paths::AppPaths;
use crate::state::session::SessionConfig;
use crate::state::store::ConfigError;
use crate::state::styles::StyleBook;

/// Services shared by every front-end, built once at startup
#[derive(Clone)]
pub struct AppContext {
    pub paths: AppPaths,
    pub library: Library,
    pub engine: Arc<Engine>,
}

impl AppContext {
    /// Set up the installation at `root` with the stable-diffusion.cpp backend
    pub fn bootstrap(root: PathBuf, sd_binary: PathBuf, threads: Option<u32>) -> Result<Self, LibraryError> {
        let mut backend = SdCppBackend::new(sd_binary);
        if let Some(threads) = threads {
            backend = backend.with_threads(threads);
        }
        Self::with_backend(AppPaths::new(root), Box::new(backend))
    }

    pub fn with_backend(paths: AppPaths, backend: Box<dyn DiffusionBackend>) -> Result<Self, LibraryError> {
        paths.ensure_dirs()?;

        let library = Library::open(paths.library_db())?;
        let styles = StyleBook::load(&paths.styles_file());
        let engine = Arc::new(Engine::new(backend, library.clone(), paths.output_dir(), styles));

        match library.image_count() {
            Ok(count) => info!("🎨 Kami initialized with {} images", count),
            Err(e) => warn!("Could not count library images: {}", e),
        }

        Ok(Self {
            paths,
            library,
            engine,
        })
    }

    pub fn load_session(&self) -> SessionConfig {
        SessionConfig::load(&self.paths.session_file())
    }

    pub fn save_session(&self, session: &SessionConfig) -> Result<(), ConfigError> {
        session.save(&self.paths.session_file())
    }

    pub fn load_favorites(&self) -> FavoriteStore {
        FavoriteStore::load(&self.paths.favorites_file())
    }

    /// Import images written outside this process; returns the new count
    pub fn rescan_output(&self) -> usize {
        self.library.rescan_folder(&self.paths.output_dir())
    }
}

#[cfg(test)]
impl AppContext {
    /// Context over a temporary root with an in-process backend
    pub(crate) fn for_tests(root: &std::path::Path, backend: crate::engine::testing::StubBackend) -> Self {
        Self::with_backend(AppPaths::new(root), Box::new(backend)).unwrap()
    }
}
