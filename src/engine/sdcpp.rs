/// stable-diffusion.cpp backend
///
/// Runs the `sd` command line tool once per image. "Loading" only validates
/// the model and LoRA files; the process reads the weights on every run.
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backend::{BackendError, DiffusionBackend, LoraState, ModelSpec, SampleRequest};

/// Default executable name, looked up on PATH
pub const DEFAULT_BINARY: &str = "sd";

/// stderr lines kept for error messages
const TAIL_LINES: usize = 20;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

static PROGRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\|\s*(\d+)/(\d+)").expect("valid progress regex"));

pub struct SdCppBackend {
    binary: PathBuf,
    /// CPU threads, None = let sd decide
    threads: Option<u32>,
    loaded: Option<ModelSpec>,
}

impl SdCppBackend {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            threads: None,
            loaded: None,
        }
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = (threads > 0).then_some(threads);
        self
    }
}

impl DiffusionBackend for SdCppBackend {
    fn name(&self) -> &str {
        "stable-diffusion.cpp"
    }

    fn load(&mut self, spec: &ModelSpec) -> Result<(), BackendError> {
        let model = Path::new(&spec.model);
        if !model.is_file() {
            return Err(BackendError::MissingModel(format!(
                "{} is not a local checkpoint; stable-diffusion.cpp needs a .safetensors, .ckpt or .gguf file",
                spec.model
            )));
        }

        info!("Loading base model: {}", spec.model);
        if let Some(lora) = spec.lora.file_name() {
            info!("Loading LoRA weights: {}", lora);
        }

        self.loaded = Some(spec.clone());
        Ok(())
    }

    fn sample(
        &mut self,
        request: &SampleRequest,
        progress: &mut dyn FnMut(u32, u32),
        cancel: &AtomicBool,
    ) -> Result<DynamicImage, BackendError> {
        let spec = self.loaded.as_ref().ok_or(BackendError::NotLoaded)?;

        if request.use_refiner {
            warn!("Refiner pass is not supported by stable-diffusion.cpp, ignoring");
        }
        if request.freeu.is_some() {
            warn!("FreeU is not supported by stable-diffusion.cpp, ignoring");
        }

        let out = std::env::temp_dir().join(format!(
            "kami_sd_{}_{}.png",
            std::process::id(),
            crate::state::library::now_millis()
        ));
        let args = build_args(spec, request, &out, self.threads);
        debug!("Running {} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BackendError::Process(format!("could not start {}: {}", self.binary.display(), e)))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BackendError::Process("no stderr pipe".to_string()))?;
        let (tx, rx) = mpsc::channel();
        let reader = thread::spawn(move || forward_segments(stderr, tx));

        let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
        let mut handle_line = |line: String, tail: &mut VecDeque<String>| {
            if let Some((step, total)) = parse_progress(&line) {
                if total == request.steps {
                    progress(step, total);
                }
            }
            if tail.len() == TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        };

        let status = loop {
            while let Ok(line) = rx.try_recv() {
                handle_line(line, &mut tail);
            }

            if cancel.load(Ordering::SeqCst) {
                info!("Cancelling generation");
                let _ = child.kill();
                let _ = child.wait();
                let _ = fs::remove_file(&out);
                return Err(BackendError::Cancelled);
            }

            if let Some(status) = child.try_wait()? {
                break status;
            }
            thread::sleep(POLL_INTERVAL);
        };

        let _ = reader.join();
        for line in rx.try_iter() {
            handle_line(line, &mut tail);
        }

        if !status.success() {
            let _ = fs::remove_file(&out);
            let tail: Vec<String> = tail.into_iter().collect();
            return Err(BackendError::Process(format!("sd exited with {}: {}", status, tail.join("\n"))));
        }

        let image = image::open(&out)?;
        let _ = fs::remove_file(&out);
        Ok(image)
    }

    fn unload(&mut self) {
        self.loaded = None;
    }
}

/// Command line for one run
fn build_args(spec: &ModelSpec, request: &SampleRequest, out: &Path, threads: Option<u32>) -> Vec<String> {
    let mut prompt = request.prompt.clone();
    let mut args = vec!["-m".to_string(), spec.model.clone()];

    if let LoraState::Loaded { path, scale } = &spec.lora {
        if let (Some(dir), Some(stem)) = (path.parent(), path.file_stem()) {
            args.push("--lora-model-dir".to_string());
            args.push(dir.display().to_string());
            prompt.push_str(&format!(" <lora:{}:{}>", stem.to_string_lossy(), scale));
        }
    }

    args.extend([
        "-p".to_string(),
        prompt,
        "-n".to_string(),
        request.negative_prompt.clone(),
        "--steps".to_string(),
        request.steps.to_string(),
        "--cfg-scale".to_string(),
        request.guidance_scale.to_string(),
        "-s".to_string(),
        request.seed.to_string(),
        "-W".to_string(),
        request.width.to_string(),
        "-H".to_string(),
        request.height.to_string(),
        "--sampling-method".to_string(),
        "dpm++2m".to_string(),
        "--schedule".to_string(),
        "karras".to_string(),
        "-o".to_string(),
        out.display().to_string(),
    ]);

    if let Some(threads) = threads {
        args.push("-t".to_string());
        args.push(threads.to_string());
    }

    args
}

/// Extract `(step, total)` from a progress bar line like `|=====>   | 3/20 - 1.2s/it`
pub fn parse_progress(line: &str) -> Option<(u32, u32)> {
    let caps = PROGRESS_RE.captures(line)?;
    let step = caps.get(1)?.as_str().parse().ok()?;
    let total = caps.get(2)?.as_str().parse().ok()?;
    Some((step, total))
}

/// sd redraws its progress bar with `\r`, so split on both line endings
fn forward_segments(mut stream: impl Read, tx: Sender<String>) {
    let mut buf = [0u8; 4096];
    let mut pending = Vec::new();

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &byte in &buf[..n] {
            if byte == b'\r' || byte == b'\n' {
                if !pending.is_empty() {
                    if tx.send(String::from_utf8_lossy(&pending).into_owned()).is_err() {
                        return;
                    }
                    pending.clear();
                }
            } else {
                pending.push(byte);
            }
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn request() -> SampleRequest {
        SampleRequest {
            prompt: "a lighthouse".to_string(),
            negative_prompt: "blurry".to_string(),
            steps: 20,
            guidance_scale: 6.5,
            seed: 42,
            width: 832,
            height: 1216,
            use_refiner: false,
            freeu: None,
        }
    }

    #[test]
    fn test_parse_progress() {
        assert_eq!(parse_progress("  |==========>        | 7/20 - 1.52s/it"), Some((7, 20)));
        assert_eq!(parse_progress("[INFO ] stable-diffusion.cpp:1234 - sampling completed"), None);
    }

    #[test]
    fn test_args_without_lora() {
        let spec = ModelSpec {
            model: "/models/sdxl.safetensors".to_string(),
            lora: LoraState::NoLora,
        };
        let args = build_args(&spec, &request(), Path::new("/tmp/out.png"), Some(8));

        let value = |flag: &str| {
            let i = args.iter().position(|a| a == flag).unwrap();
            args[i + 1].clone()
        };
        assert_eq!(value("-m"), "/models/sdxl.safetensors");
        assert_eq!(value("-p"), "a lighthouse");
        assert_eq!(value("--cfg-scale"), "6.5");
        assert_eq!(value("-s"), "42");
        assert_eq!(value("-W"), "832");
        assert_eq!(value("-t"), "8");
        assert!(!args.contains(&"--lora-model-dir".to_string()));
    }

    #[test]
    fn test_zero_threads_leaves_choice_to_sd() {
        assert_eq!(SdCppBackend::new("sd").with_threads(0).threads, None);
        assert_eq!(SdCppBackend::new("sd").with_threads(4).threads, Some(4));
    }

    #[test]
    fn test_args_with_lora_tag() {
        let spec = ModelSpec {
            model: "/models/sdxl.safetensors".to_string(),
            lora: LoraState::Loaded {
                path: PathBuf::from("/loras/ink_style.safetensors"),
                scale: 0.8,
            },
        };
        let args = build_args(&spec, &request(), Path::new("/tmp/out.png"), None);

        let prompt_at = args.iter().position(|a| a == "-p").unwrap() + 1;
        assert_eq!(args[prompt_at], "a lighthouse <lora:ink_style:0.8>");
        let dir_at = args.iter().position(|a| a == "--lora-model-dir").unwrap() + 1;
        assert_eq!(args[dir_at], "/loras");
    }

    #[test]
    fn test_segments_split_on_carriage_returns() {
        let (tx, rx) = mpsc::channel();
        forward_segments(Cursor::new(b"loading\n| 1/20\r| 2/20\rdone".to_vec()), tx);
        let lines: Vec<String> = rx.try_iter().collect();
        assert_eq!(lines, vec!["loading", "| 1/20", "| 2/20", "done"]);
    }

    #[test]
    fn test_repo_id_is_rejected() {
        let mut backend = SdCppBackend::new(DEFAULT_BINARY);
        let spec = ModelSpec {
            model: "stabilityai/stable-diffusion-xl-base-1.0".to_string(),
            lora: LoraState::NoLora,
        };
        assert!(matches!(backend.load(&spec), Err(BackendError::MissingModel(_))));
    }
}
