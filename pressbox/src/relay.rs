//! Request relay into a booted playground.

use async_trait::async_trait;
use pressbox_shared::{HttpRequest, HttpResponse, PressboxError, PressboxResult};

const LOCATION: &str = "location";

/// Anything that answers HTTP-shaped requests.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn request(&self, request: HttpRequest) -> PressboxResult<HttpResponse>;
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302)
}

/// Issue `request`, then re-issue a plain GET against `Location` for as long
/// as the answer is a 301/302 carrying exactly one `Location` value.
///
/// Zero or several `Location` values end the chain with the current
/// response. More than `max_hops` redirects fail with `Relay`.
pub async fn follow_redirects(
    handler: &dyn RequestHandler,
    request: HttpRequest,
    max_hops: usize,
) -> PressboxResult<HttpResponse> {
    let mut response = handler.request(request).await?;
    let mut hops = 0;

    loop {
        if !is_redirect(response.http_status_code) {
            return Ok(response);
        }
        let location = match response.header_values(LOCATION) {
            [single] => single.clone(),
            _ => return Ok(response),
        };
        if hops == max_hops {
            return Err(PressboxError::Relay(format!(
                "gave up after {} redirects, last Location: {}",
                max_hops, location
            )));
        }
        hops += 1;
        tracing::debug!(hop = hops, status = response.http_status_code, %location, "Following redirect");
        response = handler.request(HttpRequest::get(location)).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct Scripted {
        responses: Mutex<VecDeque<HttpResponse>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<HttpResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RequestHandler for Scripted {
        async fn request(&self, request: HttpRequest) -> PressboxResult<HttpResponse> {
            self.seen.lock().push(request);
            self.responses
                .lock()
                .pop_front()
                .ok_or_else(|| PressboxError::Internal("script exhausted".into()))
        }
    }

    fn redirect(status: u16, to: &str) -> HttpResponse {
        HttpResponse::new(status).with_header("Location", to)
    }

    #[tokio::test]
    async fn test_follows_chain_to_final_response() {
        let handler = Scripted::new(vec![
            redirect(301, "/b"),
            redirect(302, "/c"),
            HttpResponse::new(200).with_body("done"),
        ]);

        let mut request = HttpRequest::get("/a");
        request.method = Some("POST".into());
        let response = follow_redirects(&handler, request, 20).await.unwrap();

        assert_eq!(response.http_status_code, 200);
        assert_eq!(response.text(), "done");
        let urls: Vec<String> = handler.seen.lock().iter().map(|r| r.url.clone()).collect();
        assert_eq!(urls, vec!["/a", "/b", "/c"]);
        assert_eq!(handler.seen.lock()[1].method(), "GET");
    }

    #[tokio::test]
    async fn test_ambiguous_location_stops() {
        let ambiguous = redirect(301, "/b").with_header("location", "/c");
        let handler = Scripted::new(vec![ambiguous.clone(), HttpResponse::new(200)]);

        let response = follow_redirects(&handler, HttpRequest::get("/a"), 20)
            .await
            .unwrap();
        assert_eq!(response, ambiguous);
        assert_eq!(handler.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_location_and_other_statuses_stop() {
        let handler = Scripted::new(vec![HttpResponse::new(302)]);
        let response = follow_redirects(&handler, HttpRequest::get("/a"), 20)
            .await
            .unwrap();
        assert_eq!(response.http_status_code, 302);

        let handler = Scripted::new(vec![redirect(307, "/b")]);
        let response = follow_redirects(&handler, HttpRequest::get("/a"), 20)
            .await
            .unwrap();
        assert_eq!(response.http_status_code, 307);
        assert_eq!(handler.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_redirect_loop_hits_hop_limit() {
        let handler = Scripted::new((0..10).map(|_| redirect(302, "/loop")).collect());
        let err = follow_redirects(&handler, HttpRequest::get("/loop"), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, PressboxError::Relay(_)));
        assert_eq!(handler.seen.lock().len(), 4);
    }
}
