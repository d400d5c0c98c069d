use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    Json,
};
use serde::Serialize;
use tracing::error;

use super::service::{AvatarError, AvatarService};
use crate::api_errors::AppError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResp {
    avatar_id: String,
    url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResp {
    avatar_id: String,
}

/// `POST ""`: multipart field `file`, or the raw request body.
pub async fn upload(
    State(svc): State<Arc<AvatarService>>,
    req: Request,
) -> Result<(StatusCode, Json<UploadResp>), AppError> {
    let is_multipart = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let bytes = if is_multipart {
        read_file_field(req).await?
    } else {
        Bytes::from_request(req, &()).await.map_err(|rej| {
            if rej.status() == StatusCode::PAYLOAD_TOO_LARGE {
                AppError::from(AvatarError::TooLarge)
            } else {
                AppError::bad_request(rej.body_text())
            }
        })?
    };

    let stored = svc.store(&bytes).await.map_err(|e| {
        if let AvatarError::Io(io) = &e {
            error!(error = %io, "avatar write failed");
        }
        AppError::from(e)
    })?;

    Ok((
        StatusCode::OK,
        Json(UploadResp {
            avatar_id: stored.avatar_id,
            url: stored.url,
        }),
    ))
}

async fn read_file_field(req: Request) -> Result<Bytes, AppError> {
    let mut multipart = Multipart::from_request(req, &())
        .await
        .map_err(|rej| AppError::bad_request(rej.body_text()))?;

    loop {
        let field = multipart.next_field().await.map_err(multipart_error)?;
        let Some(field) = field else {
            return Err(AvatarError::MissingFile.into());
        };
        if field.name() == Some("file") {
            return field.bytes().await.map_err(multipart_error);
        }
    }
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AvatarError::TooLarge.into()
    } else {
        AppError::bad_request(err.body_text())
    }
}

/// `GET /{id}`
pub async fn lookup(
    State(svc): State<Arc<AvatarService>>,
    Path(id): Path<String>,
) -> Result<Json<LookupResp>, AppError> {
    match svc.find(&id).await {
        Ok(Some(_)) => Ok(Json(LookupResp { avatar_id: id })),
        Ok(None) => Err(AppError::not_found("not found")),
        Err(e) => {
            if let AvatarError::Io(io) = &e {
                error!(error = %io, "avatar lookup failed");
            }
            Err(e.into())
        }
    }
}
