pub mod display;
pub mod health;
pub mod history;
pub mod measurements;

use axum::Router;

use crate::error::{AppError, ServiceError};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .merge(measurements::router())
                .merge(display::router())
                .merge(history::router()),
        )
        .with_state(state)
}

/// Method fallback shared by every route.
pub(crate) async fn method_not_allowed() -> AppError {
    ServiceError::MethodNotAllowed.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seeded_store, send, test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    #[tokio::test]
    async fn unsupported_methods_are_rejected_per_route() {
        let cases = [
            ("GET", "/api/measurements"),
            ("PUT", "/api/measurements"),
            ("POST", "/api/display"),
            ("DELETE", "/api/display"),
            ("GET", "/api/history"),
            ("POST", "/api/history/devices"),
        ];
        for (method, uri) in cases {
            let app = router(test_state(seeded_store().await));
            let (status, body) = send(
                app,
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await;
            assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{method} {uri}");
            assert_eq!(&body[..], b"Method not allowed");
        }
    }

    #[tokio::test]
    async fn unknown_paths_are_not_found() {
        let app = router(test_state(seeded_store().await));
        let (status, _) = send(
            app,
            Request::builder()
                .uri("/api/nope")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
