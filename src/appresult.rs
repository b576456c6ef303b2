use axum::{http::StatusCode, response::{IntoResponse, Response}};

pub type AppResult<T> = Result<T, AppError>;

/// Unexpected failure inside an HTTP handler. Domain errors never take this path.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    /// The backtrace goes to the log only; callers see a generic body.
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, backtrace = %self.0.backtrace(), "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    #[tokio::test]
    async fn failures_hide_their_details() {
        let response = AppError(anyhow::anyhow!("sqlite at /var/lib/secret.db is locked")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"internal error");
    }
}
