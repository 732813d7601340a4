use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::{BytesRejection, PathRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use payvar_report::ReportFormat;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::ingest::MAX_UPLOAD_BYTES;
use crate::service::{
    DepartmentVariance, EmployeeVariance, HealthStatus, PayrollService, ServiceError,
    UploadSummary,
};

pub type SharedService = Arc<PayrollService>;

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
}

/// `{"error": <code>, "detail": <message>}` with a status per error kind.
#[derive(Debug)]
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn rejected(status: StatusCode, detail: String) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            Self(ServiceError::TooLarge(detail))
        } else {
            Self(ServiceError::Input(detail))
        }
    }
}

macro_rules! rejection_into_api_error {
    ($($rejection:ty),+ $(,)?) => {
        $(
            impl From<$rejection> for ApiError {
                fn from(rejection: $rejection) -> Self {
                    Self::rejected(rejection.status(), rejection.body_text())
                }
            }
        )+
    };
}

rejection_into_api_error!(
    BytesRejection,
    MultipartError,
    MultipartRejection,
    PathRejection,
    QueryRejection,
);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::Input(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::ZeroBaseline(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Store(_) | ServiceError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let detail = if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
            "internal server error".to_owned()
        } else {
            self.0.to_string()
        };

        let body = ErrorBody {
            error: self.0.code(),
            detail,
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct VarianceQuery {
    #[serde(default)]
    pub strict_baseline: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    pub format: Option<String>,
}

pub fn router(service: SharedService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/upload/{period}", post(upload))
        .route(
            "/variance/{employee_id}/{period1}/{period2}",
            get(employee_variance),
        )
        .route(
            "/departments/variance/{period1}/{period2}",
            get(department_variance),
        )
        .route("/report/{period1}/{period2}", get(report))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(service)
}

async fn health(State(service): State<SharedService>) -> Result<Json<HealthStatus>, ApiError> {
    Ok(Json(service.health()?))
}

/// Accepts a `multipart/form-data` body with a `file` part, or the
/// spreadsheet bytes as the raw body.
async fn upload(
    State(service): State<SharedService>,
    period: Result<Path<String>, PathRejection>,
    request: Request,
) -> Result<Json<UploadSummary>, ApiError> {
    let Path(period) = period?;
    let body = if is_multipart(&request) {
        let multipart = Multipart::from_request(request, &()).await?;
        file_field(multipart).await?
    } else {
        Bytes::from_request(request, &()).await?
    };
    Ok(Json(service.upload(&period, &body)?))
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().starts_with("multipart/form-data"))
}

async fn file_field(mut multipart: Multipart) -> Result<Bytes, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(UPLOAD_FIELD) {
            return Ok(field.bytes().await?);
        }
    }
    Err(ApiError(ServiceError::Input(format!(
        "multipart upload has no '{UPLOAD_FIELD}' field"
    ))))
}

async fn employee_variance(
    State(service): State<SharedService>,
    path: Result<Path<(String, String, String)>, PathRejection>,
    query: Result<Query<VarianceQuery>, QueryRejection>,
) -> Result<Json<EmployeeVariance>, ApiError> {
    let Path((employee_id, previous, current)) = path?;
    let Query(query) = query?;
    let result = service
        .employee_variance(&employee_id, &previous, &current, query.strict_baseline)
        .await?;
    Ok(Json(result))
}

async fn department_variance(
    State(service): State<SharedService>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<DepartmentVariance>, ApiError> {
    let Path((previous, current)) = path?;
    Ok(Json(service.department_variance(&previous, &current).await?))
}

async fn report(
    State(service): State<SharedService>,
    path: Result<Path<(String, String)>, PathRejection>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Path((previous, current)) = path?;
    let Query(query) = query?;
    let format = match query.format.as_deref() {
        Some(value) => value
            .parse::<ReportFormat>()
            .map_err(ServiceError::Input)?,
        None => ReportFormat::Pdf,
    };

    let rendered = service.report(&previous, &current, format).await?;
    let disposition = format!("attachment; filename=\"{}\"", rendered.filename);
    Ok((
        [
            (header::CONTENT_TYPE, rendered.content_type.to_owned()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        rendered.bytes,
    )
        .into_response())
}
