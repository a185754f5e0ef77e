//! In-process backend for tests: paints a flat image, no weights involved.

use image::{DynamicImage, Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use super::backend::{BackendError, DiffusionBackend, ModelSpec, SampleRequest};

#[derive(Default)]
pub(crate) struct StubBackend {
    loads: Arc<Mutex<Vec<ModelSpec>>>,
    requests: Arc<Mutex<Vec<SampleRequest>>>,
    /// Signalled when sampling starts
    started: Option<Sender<()>>,
    /// Sampling waits for a message (or a hang-up) here before finishing
    release: Option<Receiver<()>>,
    failure: Option<String>,
    loaded: bool,
}

impl StubBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn gated(started: Sender<()>, release: Receiver<()>) -> Self {
        Self {
            started: Some(started),
            release: Some(release),
            ..Self::default()
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn loads(&self) -> Arc<Mutex<Vec<ModelSpec>>> {
        Arc::clone(&self.loads)
    }

    pub(crate) fn requests(&self) -> Arc<Mutex<Vec<SampleRequest>>> {
        Arc::clone(&self.requests)
    }
}

impl DiffusionBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    fn load(&mut self, spec: &ModelSpec) -> Result<(), BackendError> {
        self.loads.lock().unwrap().push(spec.clone());
        self.loaded = true;
        Ok(())
    }

    fn sample(
        &mut self,
        request: &SampleRequest,
        progress: &mut dyn FnMut(u32, u32),
        cancel: &AtomicBool,
    ) -> Result<DynamicImage, BackendError> {
        if !self.loaded {
            return Err(BackendError::NotLoaded);
        }
        self.requests.lock().unwrap().push(request.clone());

        if let Some(started) = &self.started {
            let _ = started.send(());
        }
        if let Some(release) = &self.release {
            let _ = release.recv();
        }
        if let Some(message) = &self.failure {
            return Err(BackendError::Process(message.clone()));
        }

        for step in 1..=request.steps {
            if cancel.load(Ordering::SeqCst) {
                return Err(BackendError::Cancelled);
            }
            progress(step, request.steps);
        }

        let shade = (request.seed % 256) as u8;
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            request.width,
            request.height,
            Rgb([shade, 128, 255 - shade]),
        )))
    }

    fn unload(&mut self) {
        self.loaded = false;
    }
}
