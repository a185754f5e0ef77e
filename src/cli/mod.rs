/// Terminal front-ends: one-shot commands and the interactive menu
pub mod interactive;
pub mod preview;

use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::context::AppContext;
use crate::engine::GenerationRequest;
use crate::state::params::LoraSettings;

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Text prompt describing the image
    pub prompt: String,

    /// Negative prompt (things to avoid); defaults to the session's
    #[arg(long)]
    pub neg: Option<String>,

    /// Number of denoising steps
    #[arg(long)]
    pub steps: Option<u32>,

    /// Guidance scale (CFG)
    #[arg(long)]
    pub guidance: Option<f32>,

    /// Seed for reproducible results
    #[arg(long)]
    pub seed: Option<u64>,

    /// Run the refiner pass (a saved refiner setting stays on without it)
    #[arg(long)]
    pub refiner: bool,

    /// LoRA weights file
    #[arg(long, value_name = "FILE")]
    pub lora: Option<PathBuf>,

    /// LoRA strength, 0.0 (no effect) to 1.0 (full effect); defaults to the session's
    #[arg(long)]
    pub lora_scale: Option<f32>,

    /// Checkpoint to use instead of the session's model
    #[arg(long)]
    pub model: Option<String>,
}

impl GenerateArgs {
    /// Request built on top of the saved session settings
    pub fn to_request(&self, ctx: &AppContext) -> Result<GenerationRequest> {
        if let Some(scale) = self.lora_scale {
            if !(0.0..=1.0).contains(&scale) {
                bail!("--lora-scale must be between 0.0 (no effect) and 1.0 (full effect)");
            }
        }

        let session = ctx.load_session();
        let mut request = GenerationRequest::from_session(&session, &self.prompt);
        let params = &mut request.params;

        if let Some(neg) = &self.neg {
            params.negative_prompt = neg.clone();
        }
        if let Some(steps) = self.steps {
            params.steps = steps;
        }
        if let Some(guidance) = self.guidance {
            params.guidance_scale = guidance;
        }
        if let Some(seed) = self.seed {
            params.seed = Some(seed);
        }
        if self.refiner {
            params.use_refiner = true;
        }
        if let Some(path) = &self.lora {
            params.lora = Some(LoraSettings {
                path: path.clone(),
                scale: self.lora_scale.unwrap_or(session.lora_scale),
            });
        } else if let (Some(lora), Some(scale)) = (params.lora.as_mut(), self.lora_scale) {
            lora.scale = scale;
        }
        if let Some(model) = &self.model {
            request.model = model.clone();
        }

        Ok(request)
    }
}

/// Step counter for terminal generations
pub(crate) fn progress_bar(steps: u32) -> ProgressBar {
    let bar = ProgressBar::new(steps as u64);
    let style = ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} steps {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    bar.set_style(style);
    bar
}

/// Generate one image and print where it went
pub fn generate(ctx: &AppContext, args: &GenerateArgs) -> Result<PathBuf> {
    let request = args.to_request(ctx)?;
    info!("🎨 Generating '{}' with {}", args.prompt, request.model);

    let bar = progress_bar(request.params.steps);
    let result = ctx.engine.generate(&request, &mut |step, total| {
        bar.set_length(total as u64);
        bar.set_position(step as u64);
    });
    bar.finish_and_clear();

    let path = result.context("generation failed")?;
    println!("✅ Saved: {}", path.display());
    if let Err(e) = preview::show(&path) {
        tracing::warn!("Preview failed: {}", e);
    }
    Ok(path)
}

/// Import PNGs under `dir` (the output folder by default)
pub fn rescan(ctx: &AppContext, dir: Option<&Path>) -> Result<usize> {
    let target = dir.map(Path::to_path_buf).unwrap_or_else(|| ctx.paths.output_dir());
    let imported = ctx
        .library
        .try_rescan_folder(&target)
        .with_context(|| format!("could not scan {}", target.display()))?;

    println!("📂 Imported {} new images from {}", imported, target.display());
    Ok(imported)
}

/// Point moved records back at their files, then drop the ones still missing
pub fn repair(ctx: &AppContext) -> Result<()> {
    let report = ctx
        .library
        .relocate_paths(&ctx.paths.output_dir())
        .context("relocating paths failed")?;
    let pruned = ctx.library.prune_missing().context("pruning missing images failed")?;

    println!(
        "🔧 Repair complete: {} fixed, {} duplicates removed, {} pruned",
        report.fixed, report.removed_duplicates, pruned
    );
    Ok(())
}
