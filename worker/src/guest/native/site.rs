use super::runtime::{is_under, normalize};
use crate::guest::{GuestRuntime, SiteHandler};
use async_trait::async_trait;
use pressbox_shared::constants::guest_paths;
use pressbox_shared::{HttpRequest, HttpResponse, PressboxResult};
use std::sync::Arc;

/// Answers requests from the document root of the primary instance.
pub struct NativeSiteHandler {
    site_url: String,
    primary: Arc<dyn GuestRuntime>,
}

impl NativeSiteHandler {
    pub fn new(site_url: impl Into<String>, primary: Arc<dyn GuestRuntime>) -> Self {
        Self {
            site_url: site_url.into(),
            primary,
        }
    }

    fn serve_file(&self, guest_path: &str, head: bool) -> PressboxResult<HttpResponse> {
        if is_script(guest_path) {
            return Ok(text(501, "script execution is not available in this runtime"));
        }

        let body = self.primary.read_file(guest_path)?;
        let response = HttpResponse::new(200)
            .with_header("content-type", content_type(guest_path))
            .with_header("content-length", body.len().to_string());
        Ok(if head { response } else { response.with_body(body) })
    }
}

#[async_trait]
impl SiteHandler for NativeSiteHandler {
    fn primary_instance(&self) -> Arc<dyn GuestRuntime> {
        Arc::clone(&self.primary)
    }

    async fn request(&self, request: HttpRequest) -> PressboxResult<HttpResponse> {
        let method = request.method().to_ascii_uppercase();
        let head = match method.as_str() {
            "GET" => false,
            "HEAD" => true,
            _ => {
                return Ok(text(405, "method not allowed").with_header("allow", "GET, HEAD"));
            }
        };

        let (path, query) = split_target(&request.url);
        let guest_path = normalize(&format!("{}{}", guest_paths::DOCUMENT_ROOT, path));
        tracing::trace!(method = %method, path, "Serving request");

        if !is_under(&guest_path, guest_paths::DOCUMENT_ROOT) {
            tracing::debug!(path, "Request target escapes the document root");
            return Ok(text(404, "not found"));
        }

        if self.primary.is_dir(&guest_path) {
            if !path.ends_with('/') {
                let location = format!(
                    "{}{}/{}",
                    self.site_url.trim_end_matches('/'),
                    path,
                    query
                );
                return Ok(text(301, "moved permanently").with_header("location", location));
            }
            let index = format!("{}/index.html", guest_path.trim_end_matches('/'));
            if self.primary.file_exists(&index) {
                return self.serve_file(&index, head);
            }
            let script_index = format!("{}/index.php", guest_path.trim_end_matches('/'));
            if self.primary.file_exists(&script_index) {
                return self.serve_file(&script_index, head);
            }
            return Ok(text(404, "not found"));
        }

        if self.primary.file_exists(&guest_path) {
            return self.serve_file(&guest_path, head);
        }
        Ok(text(404, "not found"))
    }
}

/// Path and query of a request target, absolute URL or not.
/// The query keeps its leading `?`; fragments are dropped.
fn split_target(url: &str) -> (&str, &str) {
    let target = match url.find("://") {
        Some(scheme_end) => {
            let rest = &url[scheme_end + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => "/",
            }
        }
        None => url,
    };
    let target = target.split('#').next().unwrap_or_default();
    let (path, query) = match target.find('?') {
        Some(q) => (&target[..q], &target[q..]),
        None => (target, ""),
    };
    if path.is_empty() {
        ("/", query)
    } else {
        (path, query)
    }
}

fn is_script(path: &str) -> bool {
    path.ends_with(".php")
}

fn text(status: u16, body: &str) -> HttpResponse {
    HttpResponse::new(status)
        .with_header("content-type", "text/plain; charset=utf-8")
        .with_body(body)
}

fn content_type(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::RuntimeOptions;
    use crate::guest::native::NativeRuntime;
    use crate::testing::NoopLock;

    fn site() -> (tempfile::TempDir, NativeSiteHandler) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("wordpress");
        std::fs::create_dir_all(root.join("wp-admin")).unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();
        std::fs::write(root.join("index.html"), b"home").unwrap();
        std::fs::write(root.join("style.css"), b"body{}").unwrap();
        std::fs::write(root.join("wp-admin/index.php"), b"<?php").unwrap();

        let runtime = NativeRuntime::new(
            dir.path(),
            RuntimeOptions {
                php_version: "8.2".into(),
                process_id: 3,
                trace: false,
                follow_symlinks: false,
                file_lock: Arc::new(NoopLock::default()),
            },
        );
        let handler = NativeSiteHandler::new("http://localhost:9400/", Arc::new(runtime));
        (dir, handler)
    }

    #[test]
    fn test_split_target() {
        assert_eq!(split_target("http://localhost:9400"), ("/", ""));
        assert_eq!(
            split_target("https://example.com/wp-admin?x=1#top"),
            ("/wp-admin", "?x=1")
        );
        assert_eq!(split_target("/style.css"), ("/style.css", ""));
    }

    #[tokio::test]
    async fn test_static_file() {
        let (_dir, handler) = site();
        let response = handler
            .request(HttpRequest::get("http://localhost:9400/style.css"))
            .await
            .unwrap();
        assert_eq!(response.http_status_code, 200);
        assert_eq!(response.header_values("content-type"), ["text/css; charset=utf-8".to_string()]);
        assert_eq!(response.text(), "body{}");
    }

    #[tokio::test]
    async fn test_directory_without_slash_redirects() {
        let (_dir, handler) = site();
        let response = handler
            .request(HttpRequest::get("/wp-admin?step=1"))
            .await
            .unwrap();
        assert_eq!(response.http_status_code, 301);
        assert_eq!(
            response.header_values("location"),
            ["http://localhost:9400/wp-admin/?step=1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_script_index_is_not_executed() {
        let (_dir, handler) = site();
        let response = handler.request(HttpRequest::get("/wp-admin/")).await.unwrap();
        assert_eq!(response.http_status_code, 501);
    }

    #[tokio::test]
    async fn test_missing_and_unsupported() {
        let (_dir, handler) = site();
        let missing = handler.request(HttpRequest::get("/nope.html")).await.unwrap();
        assert_eq!(missing.http_status_code, 404);

        let empty = handler.request(HttpRequest::get("/empty/")).await.unwrap();
        assert_eq!(empty.http_status_code, 404);

        let mut post = HttpRequest::get("/");
        post.method = Some("POST".into());
        let response = handler.request(post).await.unwrap();
        assert_eq!(response.http_status_code, 405);
        assert_eq!(response.header_values("allow"), ["GET, HEAD".to_string()]);
    }

    #[tokio::test]
    async fn test_head_has_no_body() {
        let (_dir, handler) = site();
        let mut head = HttpRequest::get("/");
        head.method = Some("head".into());
        let response = handler.request(head).await.unwrap();
        assert_eq!(response.http_status_code, 200);
        assert!(response.body.is_empty());
        assert_eq!(response.header_values("content-length"), ["4".to_string()]);
    }

    #[tokio::test]
    async fn test_targets_outside_document_root_are_not_served() {
        let (dir, handler) = site();
        std::fs::create_dir_all(dir.path().join("internal/shared")).unwrap();
        std::fs::write(dir.path().join("internal/shared/php.ini"), b"secret").unwrap();
        std::fs::write(dir.path().join("outside.html"), b"outside").unwrap();

        for target in [
            "/../internal/shared/php.ini",
            "/wp-admin/../../internal/shared/php.ini",
            "http://localhost:9400/../outside.html",
            "/..",
        ] {
            let response = handler.request(HttpRequest::get(target)).await.unwrap();
            assert_eq!(response.http_status_code, 404, "{target}");
            assert_ne!(response.text(), "secret");
        }

        let inside = handler
            .request(HttpRequest::get("/wp-admin/../style.css"))
            .await
            .unwrap();
        assert_eq!(inside.text(), "body{}");
    }
}
