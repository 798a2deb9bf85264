//! Webhook dispatcher mounted on the tunnel endpoint.
//!
//! Push deliveries are acknowledged before any git work happens: the
//! provider enforces a short response timeout, so the pull is handed to a
//! [`PullDispatch`] that runs it detached. Pull failures end up in the log and
//! nowhere else.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{middleware, Router};

use gitfresh_core::{GitExecutor, PullJob, WebhookEvent};

use crate::signature::{require_signature, WebhookSecret, MAX_BODY_BYTES};

pub const EVENT_HEADER: &str = "x-github-event";
pub const HOOK_ID_HEADER: &str = "x-github-hook-id";
pub const DELIVERY_HEADER: &str = "x-github-delivery";

const PING_EVENT: &str = "ping";

/// Hands a pull off to be executed later. Must not block the caller.
pub trait PullDispatch: Send + Sync + 'static {
    fn dispatch(&self, job: PullJob);
}

/// Runs each pull on tokio's blocking pool; results are only logged.
#[derive(Debug)]
pub struct DetachedPull<G> {
    git: Arc<G>,
}

impl<G: GitExecutor> DetachedPull<G> {
    pub fn new(git: G) -> Self {
        Self { git: Arc::new(git) }
    }
}

impl<G: GitExecutor> PullDispatch for DetachedPull<G> {
    fn dispatch(&self, job: PullJob) {
        let git = self.git.clone();
        tokio::task::spawn_blocking(move || match git.pull(&job) {
            Ok(()) => tracing::info!(
                repository = %job.repository,
                branch = %job.branch,
                "repository pulled",
            ),
            Err(err) => tracing::error!(
                repository = %job.repository,
                branch = %job.branch,
                error = %err,
                "git pull failed",
            ),
        });
    }
}

/// Parses deliveries and turns push events into [`PullJob`]s.
#[derive(Clone)]
pub struct WebhookDispatcher {
    workdir: PathBuf,
    pulls: Arc<dyn PullDispatch>,
}

impl WebhookDispatcher {
    pub fn new(workdir: PathBuf, pulls: Arc<dyn PullDispatch>) -> Self {
        Self { workdir, pulls }
    }

    /// Router answering every method and path with [`handle_delivery`].
    /// Bodies up to [`MAX_BODY_BYTES`] are accepted.
    pub fn router(self) -> Router {
        Router::new()
            .fallback(handle_delivery)
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .with_state(self)
    }

    /// [`Self::router`] behind the `X-Hub-Signature-256` check.
    pub fn signed_router(self, secret: WebhookSecret) -> Router {
        if secret.is_disabled() {
            tracing::warn!("git_hook_secret is empty; webhook signatures are not verified");
        }
        self.router()
            .layer(middleware::from_fn_with_state(secret, require_signature))
    }
}

/// Ping → 200; unreadable, malformed or unsafe push → 400; push → 200 + one pull.
pub async fn handle_delivery(
    State(dispatcher): State<WebhookDispatcher>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let hook_id = header_str(&headers, HOOK_ID_HEADER);
    let delivery = header_str(&headers, DELIVERY_HEADER);

    if header_str(&headers, EVENT_HEADER) == Some(PING_EVENT) {
        tracing::info!(hook_id, "handling ping");
        return StatusCode::OK.into_response();
    }

    tracing::info!(hook_id, delivery, "handling webhook");
    let body = match body {
        Ok(body) => body,
        Err(err) => {
            tracing::error!(error = %err, "error reading webhook body");
            return (StatusCode::BAD_REQUEST, "error reading request data").into_response();
        }
    };
    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(err) => {
            tracing::error!(error = %err, "error parsing webhook payload");
            return (StatusCode::BAD_REQUEST, "error parsing data form").into_response();
        }
    };

    tracing::info!(
        branch = %event.git_ref,
        repository = %event.repository.name,
        last_commit = %event.short_sha(),
        "push received",
    );
    let job = match PullJob::from_event(dispatcher.workdir.clone(), &event) {
        Ok(job) => job,
        Err(err) => {
            tracing::warn!(error = %err, "refusing to pull for webhook");
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    };
    dispatcher.pulls.dispatch(job);
    StatusCode::OK.into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::signature::SIGNATURE_HEADER;

    #[derive(Default)]
    struct RecordingPulls {
        jobs: Mutex<Vec<PullJob>>,
    }

    impl PullDispatch for RecordingPulls {
        fn dispatch(&self, job: PullJob) {
            self.jobs.lock().expect("lock").push(job);
        }
    }

    fn setup() -> (Router, Arc<RecordingPulls>) {
        let pulls = Arc::new(RecordingPulls::default());
        let router = WebhookDispatcher::new(PathBuf::from("/srv/code"), pulls.clone()).router();
        (router, pulls)
    }

    fn delivery(event: &str, body: &'static str) -> Request<Body> {
        Request::post("/")
            .header(EVENT_HEADER, event)
            .header(HOOK_ID_HEADER, "42")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .expect("request")
    }

    #[tokio::test]
    async fn ping_is_acknowledged_without_pulling() {
        let (router, pulls) = setup();
        let response = router
            .oneshot(delivery("ping", "{\"zen\":\"Keep it logically awesome.\"}"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.expect("body");
        assert!(body.is_empty());
        assert!(pulls.jobs.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn push_dispatches_exactly_one_pull() {
        let (router, pulls) = setup();
        let response = router
            .oneshot(delivery(
                "push",
                r#"{"ref":"refs/heads/main","repository":{"name":"demo"},"after":"abc1234"}"#,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let jobs = pulls.jobs.lock().expect("lock");
        assert_eq!(
            *jobs,
            vec![PullJob {
                workdir: PathBuf::from("/srv/code"),
                repository: "demo".into(),
                branch: "refs/heads/main".into(),
            }]
        );
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_without_pulling() {
        let (router, pulls) = setup();
        let response = router
            .oneshot(delivery("push", "{not json"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(pulls.jobs.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn push_missing_fields_is_rejected() {
        let (router, pulls) = setup();
        let response = router
            .oneshot(delivery("push", r#"{"ref":"refs/heads/main"}"#))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(pulls.jobs.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn signed_router_rejects_bad_signatures_before_dispatch() {
        let pulls = Arc::new(RecordingPulls::default());
        let secret = WebhookSecret::new("topsecret");
        let body = r#"{"ref":"refs/heads/main","repository":{"name":"demo"},"after":"abc1234"}"#;
        let router = WebhookDispatcher::new(PathBuf::from("/srv/code"), pulls.clone())
            .signed_router(secret.clone());

        let forged = Request::post("/")
            .header(EVENT_HEADER, "push")
            .header(SIGNATURE_HEADER, WebhookSecret::new("wrong").sign(body.as_bytes()))
            .body(Body::from(body))
            .expect("request");
        let response = router.clone().oneshot(forged).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(pulls.jobs.lock().expect("lock").is_empty());

        let signed = Request::post("/")
            .header(EVENT_HEADER, "push")
            .header(SIGNATURE_HEADER, secret.sign(body.as_bytes()))
            .body(Body::from(body))
            .expect("request");
        let response = router.oneshot(signed).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(pulls.jobs.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn any_path_reaches_the_dispatcher() {
        let (router, pulls) = setup();
        let request = Request::post("/hooks/github")
            .header(EVENT_HEADER, "push")
            .body(Body::from(
                r#"{"ref":"refs/heads/dev","repository":{"name":"api"},"after":"0123456789"}"#,
            ))
            .expect("request");
        let response = router.oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(pulls.jobs.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn push_with_option_like_ref_is_rejected() {
        let (router, pulls) = setup();
        let response = router
            .oneshot(delivery(
                "push",
                r#"{"ref":"--upload-pack=touch /tmp/x","repository":{"name":"demo"},"after":"abc1234"}"#,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(pulls.jobs.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn push_with_traversing_repository_name_is_rejected() {
        let (router, pulls) = setup();
        let response = router
            .oneshot(delivery(
                "push",
                r#"{"ref":"refs/heads/main","repository":{"name":"../../../etc"},"after":"abc1234"}"#,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(pulls.jobs.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn signed_push_larger_than_axum_default_limit_is_dispatched() {
        let pulls = Arc::new(RecordingPulls::default());
        let secret = WebhookSecret::new("topsecret");
        let router = WebhookDispatcher::new(PathBuf::from("/srv/code"), pulls.clone())
            .signed_router(secret.clone());
        let body = format!(
            r#"{{"ref":"refs/heads/main","repository":{{"name":"demo"}},"after":"abc1234","commits":"{}"}}"#,
            "x".repeat(3 * 1024 * 1024)
        );

        let request = Request::post("/")
            .header(EVENT_HEADER, "push")
            .header(SIGNATURE_HEADER, secret.sign(body.as_bytes()))
            .body(Body::from(body))
            .expect("request");
        let response = router.oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(pulls.jobs.lock().expect("lock").len(), 1);
    }
}
