use crate::backend::memory::InMemoryStore;
use crate::backend::{HistoryStore, Timestamp};
use crate::middleware::builder::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
use crate::middleware::*;
use crate::window::SlidingWindow;
use crate::Error;
use actix_web::http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::http::StatusCode;
use actix_web::test::{read_body, TestRequest};
use actix_web::{get, test, App, HttpResponse, Responder};
use async_trait::async_trait;
use std::future::{ready, Ready};

#[get("/200")]
async fn route_200() -> impl Responder {
    HttpResponse::Ok().body("Hello world!")
}

#[get("/500")]
async fn route_500() -> impl Responder {
    HttpResponse::InternalServerError().body("Internal error")
}

fn coordinator() -> Arc<Coordinator<InMemoryStore>> {
    let engine = SlidingWindow::builder(InMemoryStore::builder().build()).build();
    Arc::new(Coordinator::builder(engine).build())
}

fn api_input(_req: &ServiceRequest) -> Ready<Result<AdmissionInput, actix_web::Error>> {
    ready(Ok(AdmissionInput {
        resource: "api".to_owned(),
        kind: RequestKind::Requests,
    }))
}

fn header<'a>(headers: &'a HeaderMap, name: &HeaderName) -> &'a str {
    headers.get(name).unwrap().to_str().unwrap()
}

struct FailingStore;

fn unavailable() -> Error {
    Error::Store("store unavailable".into())
}

#[async_trait]
impl HistoryStore for FailingStore {
    async fn record(&self, _key: &str, _timestamp: Timestamp) -> crate::Result<()> {
        Err(unavailable())
    }

    async fn count_since(&self, _key: &str, _window_start: Timestamp) -> crate::Result<u64> {
        Err(unavailable())
    }

    async fn prune_before(&self, _key: &str, _window_start: Timestamp) -> crate::Result<()> {
        Err(unavailable())
    }

    async fn oldest_since(
        &self,
        _key: &str,
        _window_start: Timestamp,
        _default: Timestamp,
    ) -> crate::Result<Timestamp> {
        Err(unavailable())
    }

    async fn remove_key(&self, _key: &str) -> crate::Result<()> {
        Err(unavailable())
    }

    fn kind(&self) -> &'static str {
        "failing"
    }
}

fn failing_coordinator() -> Arc<Coordinator<FailingStore>> {
    let coordinator = Coordinator::builder(SlidingWindow::builder(FailingStore).build()).build();
    coordinator
        .configure_resource("api", Ceilings::new().requests_per_second(1))
        .unwrap();
    Arc::new(coordinator)
}

#[actix_web::test]
async fn test_allow_deny() {
    tokio::time::pause();
    let limiter = RateLimiter::builder(coordinator(), api_input)
        .default_ceilings(Some(Ceilings::new().requests_per_second(1)))
        .build();
    let app = test::init_service(App::new().service(route_200).wrap(limiter)).await;
    assert!(
        test::call_service(&app, TestRequest::get().uri("/200").to_request())
            .await
            .status()
            .is_success()
    );
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(response.headers(), &RETRY_AFTER), "1");
}

#[actix_web::test]
async fn test_unconfigured_resource_is_unlimited() {
    tokio::time::pause();
    let coordinator = coordinator();
    let limiter = RateLimiter::builder(coordinator.clone(), api_input).build();
    let app = test::init_service(App::new().service(route_200).wrap(limiter)).await;
    for _ in 0..20 {
        let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert!(!coordinator.is_configured("api"));
}

#[actix_web::test]
async fn test_default_ceilings_do_not_replace_configuration() {
    tokio::time::pause();
    let coordinator = coordinator();
    coordinator
        .configure_resource("api", Ceilings::new().requests_per_second(3))
        .unwrap();
    let limiter = RateLimiter::builder(coordinator.clone(), api_input)
        .default_ceilings(Some(Ceilings::new().requests_per_second(1)))
        .build();
    let app = test::init_service(App::new().service(route_200).wrap(limiter)).await;
    for _ in 0..3 {
        let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        coordinator.ceilings("api").unwrap().requests_per_second,
        Some(3)
    );
}

#[actix_web::test]
async fn test_admission_kept_on_server_error() {
    tokio::time::pause();
    let coordinator = coordinator();
    let limiter = RateLimiter::builder(coordinator.clone(), api_input)
        .default_ceilings(Some(Ceilings::new().requests_per_minute(10)))
        .build();
    let app = test::init_service(App::new().service(route_500).wrap(limiter)).await;
    let response = test::call_service(&app, TestRequest::get().uri("/500").to_request()).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let usage = coordinator
        .current_usage("api", Dimension::RequestsPerMinute)
        .await
        .unwrap();
    assert_eq!(usage.count, 1);
}

#[actix_web::test]
async fn test_add_headers() {
    tokio::time::pause();
    let limiter = RateLimiter::builder(coordinator(), api_input)
        .default_ceilings(Some(Ceilings::new().requests_per_minute(2)))
        .add_headers()
        .build();
    let app = test::init_service(App::new().service(route_200).wrap(limiter)).await;

    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(header(headers, &X_RATELIMIT_LIMIT), "2");
    assert_eq!(header(headers, &X_RATELIMIT_REMAINING), "1");
    assert_eq!(header(headers, &X_RATELIMIT_RESET), "0");
    assert!(!headers.contains_key(RETRY_AFTER));

    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(response.headers(), &X_RATELIMIT_REMAINING), "0");

    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let headers = response.headers();
    assert_eq!(header(headers, &X_RATELIMIT_LIMIT), "2");
    assert_eq!(header(headers, &X_RATELIMIT_REMAINING), "0");
    let retry_after: u64 = headers
        .get(RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(
        header(headers, &X_RATELIMIT_RESET),
        header(headers, &RETRY_AFTER)
    );
}

#[actix_web::test]
async fn test_custom_deny_response() {
    tokio::time::pause();
    let limiter = RateLimiter::builder(coordinator(), api_input)
        .default_ceilings(Some(Ceilings::new().requests_per_second(1)))
        .request_denied_response(|status| {
            assert!(status.wait_seconds > 0f64);
            HttpResponse::build(StatusCode::IM_A_TEAPOT).body("Custom denied response")
        })
        .build();
    let app = test::init_service(App::new().service(route_200).wrap(limiter)).await;
    test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    let body = String::from_utf8(read_body(response).await.to_vec()).unwrap();
    assert_eq!(body, "Custom denied response");
}

#[actix_web::test]
async fn test_header_transformation() {
    tokio::time::pause();
    let limiter = RateLimiter::builder(coordinator(), api_input)
        .default_ceilings(Some(Ceilings::new().requests_per_hour(100)))
        .request_allowed_transformation(Some(
            |headers: &mut HeaderMap, status: Option<&AdmissionStatus>| {
                let status = status.expect("Coordinator is working so status should be some");
                headers.insert(
                    HeaderName::from_static("test-header"),
                    HeaderValue::from(status.remaining()),
                );
            },
        ))
        .build();
    let app = test::init_service(App::new().service(route_200).wrap(limiter)).await;
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header(response.headers(), &HeaderName::from_static("test-header")),
        "99"
    );
}

#[actix_web::test]
async fn test_fail_open() {
    // Test first without fail open
    let limiter = RateLimiter::builder(failing_coordinator(), api_input).build();
    let app = test::init_service(App::new().service(route_200).wrap(limiter)).await;
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // Test again with fail open enabled
    let limiter = RateLimiter::builder(failing_coordinator(), api_input)
        .request_allowed_transformation(Some(
            |map: &mut HeaderMap, status: Option<&AdmissionStatus>| {
                map.insert(
                    HeaderName::from_static("custom-header"),
                    HeaderValue::from_static(""),
                );
                assert!(status.is_none());
            },
        ))
        .fail_open(true)
        .build();
    let app = test::init_service(App::new().service(route_200).wrap(limiter)).await;
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("custom-header"))
}

#[actix_web::test]
async fn test_invalid_default_ceilings() {
    let limiter = RateLimiter::builder(coordinator(), api_input)
        .default_ceilings(Some(Ceilings::new()))
        .build();
    let app = test::init_service(App::new().service(route_200).wrap(limiter)).await;
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[actix_web::test]
async fn test_input_fn_error() {
    let limiter = RateLimiter::builder(coordinator(), |_req: &ServiceRequest| async {
        Err::<AdmissionInput, _>(actix_web::error::ErrorBadRequest("no resource"))
    })
    .build();
    let app = test::init_service(App::new().service(route_200).wrap(limiter)).await;
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_with_input_builder() {
    tokio::time::pause();
    let input_fn = input_builder::AdmissionInputBuilder::new("api")
        .path_key()
        .build();
    let limiter = RateLimiter::builder(coordinator(), input_fn)
        .default_ceilings(Some(Ceilings::new().requests_per_second(1)))
        .build();
    let app = test::init_service(
        App::new()
            .service(route_200)
            .service(route_500)
            .wrap(limiter),
    )
    .await;
    // Each path is a separate resource
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = test::call_service(&app, TestRequest::get().uri("/500").to_request()).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let response = test::call_service(&app, TestRequest::get().uri("/200").to_request()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}
