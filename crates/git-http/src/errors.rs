use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

/// Every way a git request can be turned away before protocol bytes flow.
#[derive(Debug)]
pub enum GitHttpError {
    RouteNotFound,
    RepositoryNotFound,
    /// A dumb-protocol file is missing. Answered with a bare 404.
    FileNotFound,
    /// Route matched but the method did not. HTTP/1.1 clients get 405,
    /// older clients a plain 400.
    MethodMismatch { http11: bool },
    HttpGitDisabled,
    /// No credentials were offered at all; carries a Basic challenge.
    CredentialsRequired,
    /// Credentials were offered and rejected.
    Unauthorized(String),
    /// Wrong request content type or a disabled service. Reported as a bare
    /// 401 to match what git clients have always received here.
    PreconditionFailed,
    Forbidden(String),
    BadRequest(String),
    Internal(String),
}

impl GitHttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            GitHttpError::RouteNotFound
            | GitHttpError::RepositoryNotFound
            | GitHttpError::FileNotFound => StatusCode::NOT_FOUND,
            GitHttpError::MethodMismatch { http11: true } => StatusCode::METHOD_NOT_ALLOWED,
            GitHttpError::MethodMismatch { http11: false } => StatusCode::BAD_REQUEST,
            GitHttpError::HttpGitDisabled | GitHttpError::Forbidden(_) => StatusCode::FORBIDDEN,
            GitHttpError::CredentialsRequired
            | GitHttpError::Unauthorized(_)
            | GitHttpError::PreconditionFailed => StatusCode::UNAUTHORIZED,
            GitHttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GitHttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<axum::http::Error> for GitHttpError {
    fn from(err: axum::http::Error) -> Self {
        GitHttpError::Internal(format!("response build: {err}"))
    }
}

impl IntoResponse for GitHttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            GitHttpError::RouteNotFound => (status, "not found").into_response(),
            GitHttpError::RepositoryNotFound => (status, "Repository not found").into_response(),
            GitHttpError::FileNotFound | GitHttpError::PreconditionFailed => status.into_response(),
            GitHttpError::MethodMismatch { http11: true } => {
                (status, "Method Not Allowed").into_response()
            }
            GitHttpError::MethodMismatch { http11: false } => (status, "Bad Request").into_response(),
            GitHttpError::HttpGitDisabled => (
                status,
                "Interacting with repositories by HTTP protocol is not allowed",
            )
                .into_response(),
            GitHttpError::CredentialsRequired => (
                status,
                [(header::WWW_AUTHENTICATE, "Basic realm=\".\"")],
                "Unauthorized",
            )
                .into_response(),
            GitHttpError::Unauthorized(msg)
            | GitHttpError::Forbidden(msg)
            | GitHttpError::BadRequest(msg) => (status, msg).into_response(),
            GitHttpError::Internal(msg) => {
                tracing::error!(error = %msg, "git http internal error");
                (status, "internal server error").into_response()
            }
        }
    }
}
