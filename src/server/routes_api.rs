use crate::config::Config;
use crate::server::{ApiError, AppContext};
use crate::state::{CompressionConfig, Task, TaskStatus};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path as FsPath, PathBuf};
use std::str::FromStr;
use webpforge_av::Preset;
use webpforge_common::{Error, TaskId};

/// Page size when the client does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Largest page the server will return.
pub const MAX_PAGE_SIZE: usize = 100;

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/info", get(info))
        .route("/stats", get(stats))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/:id", get(get_task).delete(delete_task))
        .route("/tasks/:id/cancel", post(cancel_task))
}

/// Task ids that do not parse cannot name a task.
pub(crate) fn parse_task_id(raw: &str) -> Result<TaskId, ApiError> {
    TaskId::from_str(raw).map_err(|_| ApiError(Error::not_found("task", raw)))
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    /// Path of the source animation, relative to the upload directory
    pub input_file: String,
    pub quality: Option<i64>,
    pub preset: Option<String>,
    #[serde(default)]
    pub lossless: bool,
    /// Opt out of frame-level parallelism
    pub parallel: Option<bool>,
    /// File name for the result inside the output directory
    pub output_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListTasksQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Serialize)]
struct TaskPage {
    tasks: Vec<Task>,
    limit: usize,
    offset: usize,
    total: usize,
}

async fn create_task(
    State(ctx): State<AppContext>,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let Json(request) = payload?;
    let (input, output, config) = prepare_task(&ctx.config, &request)?;

    let task = ctx.store.create_exclusive(input, output, config)?;
    tracing::info!(
        task_id = %task.id,
        input = %task.input_file.display(),
        quality = task.config.quality,
        "Task submitted"
    );

    if let Err(e) = ctx.processor.submit(task.id) {
        tracing::warn!(task_id = %task.id, error = %e, "Task rejected by processor");
    }

    let task = ctx.store.get(task.id)?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let task = ctx.store.get(parse_task_id(&id)?)?;
    Ok(Json(task))
}

async fn list_tasks(
    State(ctx): State<AppContext>,
    query: Result<Query<ListTasksQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = query?;

    let limit = match params.limit {
        None | Some(0) => DEFAULT_PAGE_SIZE,
        Some(n) => n.min(MAX_PAGE_SIZE),
    };
    let offset = params.offset.unwrap_or(0);

    Ok(Json(TaskPage {
        tasks: ctx.store.list(limit, offset),
        limit,
        offset,
        total: ctx.store.count(),
    }))
}

async fn cancel_task(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let task = ctx.processor.cancel(parse_task_id(&id)?)?;
    Ok(Json(task))
}

async fn delete_task(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let task = ctx.store.delete(parse_task_id(&id)?)?;
    ctx.broker.unsubscribe(task.id);

    // Only a Completed task owns the file at its output path.
    if task.status == TaskStatus::Completed {
        match tokio::fs::remove_file(&task.output_file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                task_id = %task.id,
                path = %task.output_file.display(),
                error = %e,
                "Failed to remove output of deleted task"
            ),
        }
    }

    tracing::info!(task_id = %task.id, "Task deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Limits and defaults a client needs to build valid requests.
async fn info(State(ctx): State<AppContext>) -> impl IntoResponse {
    let config = &ctx.config;
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "tasks": {
            "workers": ctx.processor.workers(),
            "queue_capacity": ctx.processor.queue_capacity(),
            "timeout_secs": config.tasks.timeout_secs,
            "retention_hours": config.tasks.retention_hours,
        },
        "processing": {
            "enable_parallel": config.processing.enable_parallel,
            "frame_workers": config.processing.frame_workers,
            "default_preset": config.processing.default_preset,
            "default_quality": config.processing.default_quality,
        },
        "quality": { "min": 0, "max": 100 },
        "presets": Preset::ALL,
        "page_size": { "default": DEFAULT_PAGE_SIZE, "max": MAX_PAGE_SIZE },
        "auth_enabled": config.server.auth.enabled,
    }))
}

async fn stats(State(ctx): State<AppContext>) -> impl IntoResponse {
    let stats = ctx.store.stats();
    Json(serde_json::json!({
        "tasks": stats,
        "workers": ctx.processor.workers(),
        "queue_capacity": ctx.processor.queue_capacity(),
        "active": ctx.processor.active(),
        "dropped_events": ctx.broker.dropped_events(),
    }))
}

/// Validate a creation request and resolve its paths and encoder settings.
pub fn prepare_task(
    config: &Config,
    request: &CreateTaskRequest,
) -> Result<(PathBuf, PathBuf, CompressionConfig), Error> {
    let quality = match request.quality {
        None => return Err(Error::validation("quality is required")),
        Some(q) if !(0..=100).contains(&q) => {
            return Err(Error::validation(format!(
                "quality must be between 0 and 100, got {q}"
            )))
        }
        Some(q) => q as u8,
    };

    let input = resolve_input(&config.tasks.upload_dir, &request.input_file)?;
    let output = output_path(
        &config.tasks.output_dir,
        &input,
        quality,
        request.output_name.as_deref(),
    )?;

    let mut compression = CompressionConfig::new(quality);
    compression.preset = match request.preset.as_deref() {
        Some(name) => Preset::from_str(name)?,
        None => config.processing.default_preset,
    };
    compression.lossless = request.lossless;
    compression.enable_parallel =
        config.processing.enable_parallel && request.parallel.unwrap_or(true);
    compression.max_concurrency = config.processing.frame_workers;

    Ok((input, output, compression))
}

/// Resolve `raw` inside `upload_dir`. Absolute paths and `..` are rejected.
fn resolve_input(upload_dir: &FsPath, raw: &str) -> Result<PathBuf, Error> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::validation("input_file is required"));
    }

    let relative = FsPath::new(raw);
    let contained = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !contained {
        return Err(Error::validation(format!(
            "input_file must stay inside the upload directory: {raw}"
        )));
    }

    let path = upload_dir.join(relative);
    if !path.is_file() {
        return Err(Error::validation(format!("input file not found: {raw}")));
    }
    Ok(path)
}

fn output_path(
    output_dir: &FsPath,
    input: &FsPath,
    quality: u8,
    output_name: Option<&str>,
) -> Result<PathBuf, Error> {
    if let Some(name) = output_name.map(str::trim).filter(|n| !n.is_empty()) {
        let mut components = FsPath::new(name).components();
        return match (components.next(), components.next()) {
            (Some(Component::Normal(file)), None) => Ok(output_dir.join(file)),
            _ => Err(Error::validation(format!(
                "output_name must be a plain file name: {name}"
            ))),
        };
    }

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    Ok(output_dir.join(format!("{stem}_compressed_{quality}.webp")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.tasks.upload_dir = dir.path().join("uploads");
        config.tasks.output_dir = dir.path().join("outputs");
        std::fs::create_dir_all(&config.tasks.upload_dir).unwrap();
        std::fs::write(config.tasks.upload_dir.join("cat.webp"), b"RIFF").unwrap();
        (dir, config)
    }

    fn request(input: &str, quality: Option<i64>) -> CreateTaskRequest {
        CreateTaskRequest {
            input_file: input.to_string(),
            quality,
            preset: None,
            lossless: false,
            parallel: None,
            output_name: None,
        }
    }

    #[test]
    fn prepares_default_output_name() {
        let (_dir, config) = setup();
        let (input, output, compression) =
            prepare_task(&config, &request("cat.webp", Some(30))).unwrap();

        assert_eq!(input, config.tasks.upload_dir.join("cat.webp"));
        assert_eq!(output, config.tasks.output_dir.join("cat_compressed_30.webp"));
        assert_eq!(compression.quality, 30);
        assert_eq!(compression.alpha_quality, 15);
        assert_eq!(compression.max_concurrency, config.processing.frame_workers);
    }

    #[test]
    fn quality_is_required_and_bounded() {
        let (_dir, config) = setup();
        assert_matches!(
            prepare_task(&config, &request("cat.webp", None)),
            Err(Error::Validation(_))
        );
        assert_matches!(
            prepare_task(&config, &request("cat.webp", Some(101))),
            Err(Error::Validation(_))
        );
        assert_matches!(
            prepare_task(&config, &request("cat.webp", Some(-1))),
            Err(Error::Validation(_))
        );
        assert!(prepare_task(&config, &request("cat.webp", Some(0))).is_ok());
    }

    #[test]
    fn rejects_missing_and_escaping_inputs() {
        let (_dir, config) = setup();
        assert_matches!(
            prepare_task(&config, &request("dog.webp", Some(50))),
            Err(Error::Validation(_))
        );
        assert_matches!(
            prepare_task(&config, &request("../cat.webp", Some(50))),
            Err(Error::Validation(_))
        );
        assert_matches!(
            prepare_task(&config, &request("/etc/passwd", Some(50))),
            Err(Error::Validation(_))
        );
    }

    #[test]
    fn request_can_only_narrow_parallelism() {
        let (_dir, mut config) = setup();
        let mut req = request("cat.webp", Some(50));
        req.parallel = Some(false);
        let (_, _, compression) = prepare_task(&config, &req).unwrap();
        assert!(!compression.enable_parallel);

        config.processing.enable_parallel = false;
        req.parallel = Some(true);
        let (_, _, compression) = prepare_task(&config, &req).unwrap();
        assert!(!compression.enable_parallel);
    }

    #[test]
    fn preset_and_output_name_are_validated() {
        let (_dir, config) = setup();
        let mut req = request("cat.webp", Some(50));
        req.preset = Some("Drawing".to_string());
        req.output_name = Some("small.webp".to_string());
        let (_, output, compression) = prepare_task(&config, &req).unwrap();
        assert_eq!(compression.preset, Preset::Drawing);
        assert_eq!(output, config.tasks.output_dir.join("small.webp"));

        req.preset = Some("blurry".to_string());
        assert_matches!(prepare_task(&config, &req), Err(Error::Validation(_)));

        req.preset = None;
        req.output_name = Some("../escape.webp".to_string());
        assert_matches!(prepare_task(&config, &req), Err(Error::Validation(_)));
    }

    #[test]
    fn unparseable_id_is_not_found() {
        let err = parse_task_id("not-a-uuid").unwrap_err();
        assert_matches!(err.0, Error::NotFound { .. });
    }
}
