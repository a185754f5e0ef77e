/// Generation engine
///
/// `Engine` sequences one text-to-image run: compose the prompt, make sure
/// the right weights are resident, sample, write the PNG with its metadata
/// and record it in the library. Only one run happens at a time.
pub mod backend;
pub mod sdcpp;

#[cfg(test)]
pub(crate) mod testing;

use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use thiserror::Error;
use tracing::{info, warn};

use crate::media::metadata::{self, GenerationInfo, MetadataError, SCHEDULER};
use crate::media::naming;
use crate::state::library::{normalize_path, Library};
use crate::state::params::GenerationParams;
use crate::state::session::SessionConfig;
use crate::state::styles::{StyleBook, NO_STYLE};

use backend::{BackendError, DiffusionBackend, LoraState, ModelSpec, SampleRequest};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a generation is already running")]
    Busy,

    #[error("generation cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Backend(BackendError),

    #[error("could not save image: {0}")]
    Metadata(#[from] MetadataError),
}

impl From<BackendError> for EngineError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Cancelled => EngineError::Cancelled,
            other => EngineError::Backend(other),
        }
    }
}

/// Everything needed for one generation
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub params: GenerationParams,
    /// Checkpoint file or repository id
    pub model: String,
    /// Style preset name, "None" for no prefixes
    pub style: String,
    pub pony_mode: bool,
}

impl GenerationRequest {
    pub fn new(params: GenerationParams, model: impl Into<String>) -> Self {
        Self {
            params,
            model: model.into(),
            style: NO_STYLE.to_string(),
            pony_mode: false,
        }
    }

    /// Request for `prompt` using the session's settings
    pub fn from_session(session: &SessionConfig, prompt: &str) -> Self {
        Self {
            params: session.to_params(prompt),
            model: session.model_path.clone(),
            style: session.current_style.clone(),
            pony_mode: session.pony_mode,
        }
    }
}

struct EngineState {
    backend: Box<dyn DiffusionBackend>,
    loaded: Option<ModelSpec>,
}

pub struct Engine {
    state: Mutex<EngineState>,
    cancel: AtomicBool,
    /// Set while a run holds `state`
    running: AtomicBool,
    backend_name: String,
    /// Name of the resident model, readable while a run holds `state`
    loaded_model: Mutex<Option<String>>,
    library: Library,
    output_dir: PathBuf,
    styles: StyleBook,
}

impl Engine {
    pub fn new(
        backend: Box<dyn DiffusionBackend>,
        library: Library,
        output_dir: impl Into<PathBuf>,
        styles: StyleBook,
    ) -> Self {
        Self {
            backend_name: backend.name().to_string(),
            state: Mutex::new(EngineState {
                backend,
                loaded: None,
            }),
            cancel: AtomicBool::new(false),
            running: AtomicBool::new(false),
            loaded_model: Mutex::new(None),
            library,
            output_dir: output_dir.into(),
            styles,
        }
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    pub fn loaded_model(&self) -> Option<String> {
        self.loaded_model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn styles(&self) -> &StyleBook {
        &self.styles
    }

    pub fn is_busy(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the running generation to stop
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Generate, waiting for any running generation to finish first
    pub fn generate(
        &self,
        request: &GenerationRequest,
        progress: &mut dyn FnMut(u32, u32),
    ) -> Result<PathBuf, EngineError> {
        let state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::WouldBlock) => {
                info!("⏳ Engine busy, waiting for the current generation");
                self.state.lock().unwrap_or_else(PoisonError::into_inner)
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        self.run(state, request, progress)
    }

    /// Generate, or fail with `EngineError::Busy` if a generation is running
    pub fn try_generate(
        &self,
        request: &GenerationRequest,
        progress: &mut dyn FnMut(u32, u32),
    ) -> Result<PathBuf, EngineError> {
        let state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::WouldBlock) => return Err(EngineError::Busy),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        self.run(state, request, progress)
    }

    /// Drop the resident model
    pub fn unload(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.backend.unload();
        state.loaded = None;
        self.set_loaded_model(None);
        info!("Model unloaded");
    }

    fn set_loaded_model(&self, name: Option<String>) {
        *self.loaded_model.lock().unwrap_or_else(PoisonError::into_inner) = name;
    }

    fn run(
        &self,
        mut state: MutexGuard<'_, EngineState>,
        request: &GenerationRequest,
        progress: &mut dyn FnMut(u32, u32),
    ) -> Result<PathBuf, EngineError> {
        let params = &request.params;
        if params.prompt.trim().is_empty() {
            return Err(EngineError::InvalidRequest("prompt is empty".to_string()));
        }
        if params.steps == 0 || params.width == 0 || params.height == 0 {
            return Err(EngineError::InvalidRequest(
                "steps, width and height must be positive".to_string(),
            ));
        }

        self.cancel.store(false, Ordering::SeqCst);
        let _running = RunningFlag::raise(&self.running);

        let (prompt, negative_prompt) = self.styles.compose(
            &request.style,
            request.pony_mode,
            &params.prompt,
            &params.negative_prompt,
        );

        let spec = ModelSpec {
            model: request.model.clone(),
            lora: LoraState::resolve(params.lora.as_ref()),
        };

        if state.loaded.as_ref() != Some(&spec) {
            if state.loaded.is_some() {
                info!("Reloading pipeline due to model or LoRA change");
                state.backend.unload();
                state.loaded = None;
            }
            state.backend.load(&spec)?;
            state.loaded = Some(spec.clone());
            self.set_loaded_model(Some(spec.model_name()));
        }

        let seed = params.seed.unwrap_or_else(|| u64::from(rand::random::<u32>()));
        let output = naming::output_path(
            &self.output_dir,
            &params.prompt,
            spec.lora.is_loaded(),
            params.use_refiner,
            Local::now(),
        );

        info!(
            "🎨 Generating {}x{}, {} steps, cfg {}, seed {}",
            params.width, params.height, params.steps, params.guidance_scale, seed
        );

        let sample = SampleRequest {
            prompt: prompt.clone(),
            negative_prompt: negative_prompt.clone(),
            steps: params.steps,
            guidance_scale: params.guidance_scale,
            seed,
            width: params.width,
            height: params.height,
            use_refiner: params.use_refiner,
            freeu: params.freeu,
        };
        let image = state.backend.sample(&sample, progress, &self.cancel)?;

        let info = GenerationInfo {
            prompt,
            negative_prompt,
            steps: params.steps,
            cfg: cfg_value(params.guidance_scale),
            seed: seed.to_string(),
            model: spec.model_name(),
            scheduler: SCHEDULER.to_string(),
            lora: spec.lora.file_name(),
            freeu: params.freeu.is_some(),
            mode: "T2I".to_string(),
        };
        metadata::write_png(&output, &image, &info)?;

        let path = normalize_path(&output);
        info!("Image saved to: {}", path);

        if !self.library.record_image(&info.into_new_image(path.clone(), None)) {
            warn!("Image was saved but not added to the library");
        }

        Ok(PathBuf::from(path))
    }
}

/// Clears the busy flag when a run ends, however it ends
struct RunningFlag<'a>(&'a AtomicBool);

impl<'a> RunningFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The guidance value as typed (7.1, not 7.099999904632568)
fn cfg_value(guidance: f32) -> f64 {
    guidance.to_string().parse().unwrap_or(f64::from(guidance))
}
