//! HTTP routes for registering, verifying and auditing files.

use axum::extract::{Multipart, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::chain::ChainFault;
use crate::crypto::ContentHasher;
use crate::error::AppError;
use crate::model::Block;
use crate::query::LedgerStats;
use crate::workflow::{Registration, Submission, WorkflowError};
use crate::AppState;

const FILE_FIELD: &str = "file";
const UPLOADER_FIELD: &str = "uploader_id";
const FALLBACK_FILENAME: &str = "upload";

/// Pull the `file` part (hashed chunk by chunk, never buffered whole) and the
/// optional `uploader_id` part out of a multipart body.
async fn read_upload(mut multipart: Multipart) -> Result<Submission, AppError> {
    let mut file = None;
    let mut uploader_id = None;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Malformed upload: {e}")))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(FILE_FIELD) => {
                let filename = field
                    .file_name()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or(FALLBACK_FILENAME)
                    .to_string();
                let mut hasher = ContentHasher::new();
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| WorkflowError::InputRead(e.to_string()))?
                {
                    hasher.update(&chunk);
                }
                file = Some((filename, hasher.finalize()));
            }
            Some(UPLOADER_FIELD) => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| WorkflowError::InputRead(e.to_string()))?;
                let text = text.trim();
                if !text.is_empty() {
                    uploader_id = Some(text.to_string());
                }
            }
            _ => {}
        }
    }
    let (filename, digest) =
        file.ok_or_else(|| AppError::BadRequest("No file part in request.".to_string()))?;
    Ok(Submission {
        filename,
        digest,
        uploader_id,
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    pub index: u64,
    pub block_hash: String,
    pub file_hash: String,
}

/// POST /register
pub async fn register_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<RegisterResponse>, AppError> {
    let sub = read_upload(multipart).await?;
    let filename = sub.filename.clone();
    let outcome = state.integrity.register(sub)?;
    let message = match &outcome {
        Registration::Registered(_) => format!("{filename} registered successfully!"),
        Registration::AlreadyRegistered(b) => {
            format!("{filename} is already registered in block {}.", b.index)
        }
    };
    let block = outcome.block();
    Ok(Json(RegisterResponse {
        success: true,
        message,
        index: block.index,
        block_hash: block.block_hash.clone(),
        file_hash: block.file_hash.clone(),
    }))
}

/// Registration a verified file matched.
#[derive(Debug, Serialize, Deserialize)]
pub struct MatchInfo {
    pub index: u64,
    pub filename: String,
    pub timestamp: i64,
    pub uploader_id: Option<String>,
}

impl From<&Block> for MatchInfo {
    fn from(b: &Block) -> Self {
        Self {
            index: b.index,
            filename: b.filename.clone(),
            timestamp: b.timestamp,
            uploader_id: b.uploader_id.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub message: String,
    pub file_hash: String,
    pub matches: Vec<MatchInfo>,
    /// Index of the VERIFY block recording this check.
    pub audit_index: u64,
}

/// POST /verify
pub async fn verify_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<VerifyResponse>, AppError> {
    let sub = read_upload(multipart).await?;
    let filename = sub.filename.clone();
    let v = state.integrity.verify(sub)?;
    let success = v.is_match();
    let message = if success {
        format!("{filename} integrity verified.")
    } else {
        format!("{filename} appears tampered or unregistered.")
    };
    Ok(Json(VerifyResponse {
        success,
        message,
        matches: v.matches.iter().map(MatchInfo::from).collect(),
        file_hash: v.file_hash,
        audit_index: v.audit_block.index,
    }))
}

/// GET /history
pub async fn history_all(State(state): State<AppState>) -> Result<Json<Vec<Block>>, AppError> {
    Ok(Json(state.history.history()?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub success: bool,
    pub message: String,
    pub blocks_checked: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_invalid_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ChainFault>,
}

/// GET /validate
pub async fn validate_chain(
    State(state): State<AppState>,
) -> Result<Json<ValidateResponse>, AppError> {
    let report = state.chain.validate()?;
    let message = match (report.first_invalid_index, report.reason) {
        (Some(index), Some(reason)) => format!("Blockchain corrupted at block {index}: {reason}."),
        _ => "Blockchain valid - no corruption found.".to_string(),
    };
    Ok(Json(ValidateResponse {
        success: report.valid,
        message,
        blocks_checked: report.blocks_checked,
        first_invalid_index: report.first_invalid_index,
        reason: report.reason,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DemoResponse {
    pub message: String,
}

/// GET /demo
pub async fn demo() -> Json<DemoResponse> {
    Json(DemoResponse {
        message: "Demo running successfully - blockchain operational.".to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlocksResponse {
    pub success: bool,
    pub count: usize,
    pub blocks: Vec<Block>,
}

impl BlocksResponse {
    fn new(blocks: Vec<Block>) -> Self {
        Self {
            success: true,
            count: blocks.len(),
            blocks,
        }
    }
}

fn required(value: Option<String>, what: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("{what} required")))
}

/// GET /api/history_user?username=
pub async fn history_user(
    State(state): State<AppState>,
    Query(q): Query<UserQuery>,
) -> Result<Json<BlocksResponse>, AppError> {
    let username = required(q.username, "Username")?;
    Ok(Json(BlocksResponse::new(
        state.history.user_history(&username)?,
    )))
}

/// GET /api/history_file?filename=
pub async fn history_file(
    State(state): State<AppState>,
    Query(q): Query<FileQuery>,
) -> Result<Json<BlocksResponse>, AppError> {
    let filename = required(q.filename, "Filename")?;
    Ok(Json(BlocksResponse::new(
        state.history.file_history(&filename)?,
    )))
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<LedgerStats>, AppError> {
    Ok(Json(state.history.statistics()?))
}

/// GET /health
#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
}
pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

/// GET /version
#[derive(Serialize)]
pub struct Version {
    pub version: &'static str,
    pub git_sha: Option<&'static str>,
}
pub async fn version() -> Json<Version> {
    Json(Version {
        version: env!("CARGO_PKG_VERSION"),
        git_sha: option_env!("GIT_SHA"),
    })
}
