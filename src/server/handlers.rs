use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

use super::types::*;
use crate::context::AppContext;
use crate::engine::{EngineError, GenerationRequest};
use crate::state::data::{ImageQuery, SortKey};
use crate::state::library::normalize_path;
use crate::state::params::{GenerationParams, LoraSettings};
use crate::state::session::SessionConfig;

pub type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn api_error(status: StatusCode, message: impl Into<String>, kind: &str) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError::new(message, kind)))
}

/// Run catalog or engine work off the async workers
async fn blocking<T, F>(work: F) -> Result<T, (StatusCode, Json<ApiError>)>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("worker failed: {}", e),
            "server_error",
        )
    })
}

/// URL of `path` under the `/images` mount, if it lives in the output folder
pub fn image_url(output_dir: &Path, path: &Path) -> Option<String> {
    let root = PathBuf::from(normalize_path(output_dir));
    let relative = Path::new(&normalize_path(path)).strip_prefix(&root).ok()?.to_path_buf();
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    Some(format!("/images/{}", parts.join("/")))
}

// ============================================================================
// Status
// ============================================================================

pub async fn status(State(ctx): State<AppContext>) -> Json<StatusResponse> {
    let model = ctx
        .engine
        .loaded_model()
        .or_else(|| Some(ctx.load_session().model_path));

    Json(StatusResponse {
        status: "online".to_string(),
        model,
        backend: ctx.engine.backend_name().to_string(),
        is_generating: ctx.engine.is_busy(),
    })
}

// ============================================================================
// Generation
// ============================================================================

fn to_generation_request(req: GenerateRequest, session: &SessionConfig) -> GenerationRequest {
    let lora = req
        .lora_path
        .filter(|p| !p.trim().is_empty() && p != "None")
        .map(|p| LoraSettings {
            path: PathBuf::from(p),
            scale: req.lora_scale,
        });

    GenerationRequest {
        params: GenerationParams {
            prompt: req.prompt,
            negative_prompt: req.negative_prompt,
            steps: req.steps,
            guidance_scale: req.guidance_scale,
            seed: req.seed,
            width: req.width,
            height: req.height,
            use_refiner: req.use_refiner,
            lora,
            freeu: req.use_freeu.then_some(session.freeu_args),
        },
        model: req.model.unwrap_or_else(|| session.model_path.clone()),
        style: req.style.unwrap_or_else(|| session.current_style.clone()),
        pony_mode: req.pony_mode,
    }
}

pub async fn generate(
    State(ctx): State<AppContext>,
    Json(req): Json<GenerateRequest>,
) -> ApiResult<GenerateResponse> {
    if req.prompt.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "prompt is empty", "invalid_request_error"));
    }

    // Fast fail; try_generate below closes the race
    if ctx.engine.is_busy() {
        return Err(api_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Engine is busy processing another request.",
            "busy",
        ));
    }

    let request = to_generation_request(req, &ctx.load_session());
    let engine = Arc::clone(&ctx.engine);
    let result = blocking(move || {
        engine.try_generate(&request, &mut |step, total| debug!("step {}/{}", step, total))
    })
    .await?;

    match result {
        Ok(path) => Ok(Json(GenerateResponse {
            status: "success".to_string(),
            url: image_url(ctx.engine.output_dir(), &path),
            image_path: path.display().to_string(),
        })),
        Err(EngineError::Busy) => Err(api_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Engine is busy processing another request.",
            "busy",
        )),
        Err(EngineError::InvalidRequest(message)) => {
            Err(api_error(StatusCode::BAD_REQUEST, message, "invalid_request_error"))
        }
        Err(e) => {
            error!("Generation error: {}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "server_error"))
        }
    }
}

// ============================================================================
// Catalog
// ============================================================================

pub async fn gallery(
    State(ctx): State<AppContext>,
    Query(params): Query<GalleryQuery>,
) -> ApiResult<Vec<GalleryItem>> {
    let sort: SortKey = params
        .sort
        .parse()
        .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e, "invalid_request_error"))?;

    let query = ImageQuery::new(params.search, sort, params.model);
    let library = ctx.library.clone();
    let records = blocking(move || library.query_images(&query)).await?;

    let output_dir = ctx.paths.output_dir();
    let items = records
        .into_iter()
        .skip(params.offset)
        .take(params.limit)
        .map(|record| GalleryItem {
            url: image_url(&output_dir, Path::new(&record.path)),
            record,
        })
        .collect();

    Ok(Json(items))
}

pub async fn models(State(ctx): State<AppContext>) -> ApiResult<Vec<String>> {
    let library = ctx.library.clone();
    let models = blocking(move || library.list_distinct_models()).await?;
    Ok(Json(models))
}

pub async fn rescan(State(ctx): State<AppContext>) -> ApiResult<RescanResponse> {
    let imported = blocking(move || ctx.rescan_output()).await?;
    Ok(Json(RescanResponse { imported }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_url_is_relative_to_output() {
        let root = Path::new("/data/kami/output_images");
        assert_eq!(
            image_url(root, Path::new("/data/kami/output_images/20240501/120000_cat.png")).as_deref(),
            Some("/images/20240501/120000_cat.png")
        );
        assert_eq!(image_url(root, Path::new("/elsewhere/cat.png")), None);
    }

    #[test]
    fn test_request_falls_back_to_session() {
        let session = SessionConfig::default();
        let req: GenerateRequest =
            serde_json::from_str(r#"{"prompt": "a fox", "lora_path": "None", "use_freeu": true}"#).unwrap();
        let request = to_generation_request(req, &session);

        assert_eq!(request.model, session.model_path);
        assert_eq!(request.params.steps, 30);
        assert!(request.params.lora.is_none());
        assert_eq!(request.params.freeu, Some(session.freeu_args));
    }
}
