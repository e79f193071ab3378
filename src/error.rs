use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};

/// Precondition failures raised by the lifecycle engine.
///
/// Expected business outcomes (incompatible version, nothing to update,
/// failed scan) are returned as values and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("Invalid stage: {0}")]
    InvalidStage(String),

    #[error("Unknown rejection reason: {0}")]
    UnknownRejectionReason(String),

    #[error("Cannot {action} {entity} in status '{from}'")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        action: String,
    },

    #[error("Submission {id} has stages that have not passed: {outstanding}")]
    StagesIncomplete { id: uuid::Uuid, outstanding: String },

    #[error("Version {listing}@{version} already exists")]
    DuplicateVersion { listing: String, version: String },

    #[error("Listing {listing} is already installed for tenant {tenant}")]
    AlreadyInstalled { listing: String, tenant: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version not found: {listing}@{version}")]
    VersionNotFound { listing: String, version: String },

    #[error("No installable {channel} version of {listing}")]
    NoInstallableVersion { listing: String, channel: String },

    #[error("Installation {0} requires a purchase before it can be activated")]
    PurchaseRequired(uuid::Uuid),

    #[error("Concurrent modification of {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Error::Validation {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn transition(
        entity: &'static str,
        from: impl ToString,
        action: impl Into<String>,
    ) -> Self {
        Error::InvalidTransition {
            entity,
            from: from.to_string(),
            action: action.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) | Error::VersionNotFound { .. } => StatusCode::NOT_FOUND,
            Error::Validation { .. }
            | Error::InvalidStage(_)
            | Error::UnknownRejectionReason(_) => StatusCode::BAD_REQUEST,
            Error::InvalidTransition { .. }
            | Error::StagesIncomplete { .. }
            | Error::DuplicateVersion { .. }
            | Error::AlreadyInstalled { .. }
            | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::NoInstallableVersion { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::PurchaseRequired(_) => StatusCode::PAYMENT_REQUIRED,
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.to_string()
        });

        let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("application/json"),
        );
        response
    }
}

pub type Result<T> = std::result::Result<T, Error>;
