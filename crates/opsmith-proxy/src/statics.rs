//! Static file serving for routes marked `static_serve`.

use crate::route::Route;
use axum::body::Body;
use http::{Request, Response, StatusCode};
use tower::util::ServiceExt;
use tower_http::services::ServeDir;

/// Serve a file from the route's static root.
///
/// `strip_prefix` is applied to the URL path before resolution; content
/// types come from the file-serving layer's inference. Missing files are a
/// 404 from `ServeDir` itself.
pub async fn serve(route: &Route, req: Request<Body>) -> Response<Body> {
    if route.static_root.as_os_str().is_empty() {
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from("static root not configured"))
            .expect("static response");
    }

    let path = req.uri().path();
    let mut stripped = route
        .strip_prefix
        .is_empty()
        .then(|| path.to_string())
        .unwrap_or_else(|| {
            path.strip_prefix(&route.strip_prefix)
                .unwrap_or(path)
                .to_string()
        });
    if !stripped.starts_with('/') {
        stripped.insert(0, '/');
    }

    let mut file_req = Request::builder()
        .method(req.method())
        .uri(stripped.as_str())
        .body(Body::empty())
        .expect("file request");
    *file_req.headers_mut() = req.headers().clone();

    match ServeDir::new(&route.static_root).oneshot(file_req).await {
        Ok(resp) => resp.map(Body::new),
        Err(_) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from("file serving failed"))
            .expect("static response"),
    }
}
