//! 文件上传与下载
//!
//! 文件以名称平铺存放在上传目录中，请求体和文件内容都以流的方式处理，
//! 限速由 [`crate::bandwidth`] 中间件在外层完成。

use std::io;
use std::path::PathBuf;

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use futures_util::TryStreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub file_path: String,
    pub file_size: u64,
}

/// 拒绝可能跳出上传目录的文件名
fn resolve(state: &AppState, name: &str) -> Result<PathBuf, ApiError> {
    if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
        return Err(ApiError::bad_request(format!("invalid file name: {name}")));
    }
    Ok(state.upload_dir.join(name))
}

pub async fn upload_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Body,
) -> Result<Json<UploadResponse>, ApiError> {
    let path = resolve(&state, &name)?;
    tokio::fs::create_dir_all(state.upload_dir.as_path()).await?;

    let mut reader = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
    let mut file = tokio::fs::File::create(&path).await?;
    let written = match tokio::io::copy(&mut reader, &mut file).await {
        Ok(written) => written,
        Err(err) => {
            drop(file);
            if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %remove_err, "清理未完成的上传失败");
            }
            return Err(err.into());
        }
    };
    file.flush().await?;

    tracing::info!(file = %name, size = written, "文件已上传");
    Ok(Json(UploadResponse {
        success: true,
        file_path: format!("/api/files/{name}"),
        file_size: written,
    }))
}

pub async fn download_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let path = resolve(&state, &name)?;
    let file = tokio::fs::File::open(&path).await?;
    let size = file.metadata().await?.len();

    tracing::debug!(file = %name, size, "开始下载");
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CONTENT_LENGTH, size.to_string()),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}
