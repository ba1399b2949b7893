use crate::backend::HistoryStore;
use crate::coordinator::{Ceilings, Coordinator};
use crate::middleware::{
    AdmissionInput, AdmissionStatus, AllowedTransformation, DeniedResponse, RateLimiter,
};
use actix_web::dev::ServiceRequest;
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

pub static X_RATELIMIT_LIMIT: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-limit"));

pub static X_RATELIMIT_REMAINING: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-remaining"));

pub static X_RATELIMIT_RESET: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-reset"));

pub struct RateLimiterBuilder<HS, F> {
    coordinator: Arc<Coordinator<HS>>,
    input_fn: F,
    fail_open: bool,
    default_ceilings: Option<Ceilings>,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
}

impl<HS, F, O> RateLimiterBuilder<HS, F>
where
    HS: HistoryStore + 'static,
    F: Fn(&ServiceRequest) -> O,
    O: Future<Output = Result<AdmissionInput, actix_web::Error>>,
{
    pub(super) fn new(coordinator: Arc<Coordinator<HS>>, input_fn: F) -> Self {
        Self {
            coordinator,
            input_fn,
            fail_open: false,
            default_ceilings: None,
            allowed_transformation: None,
            denied_response: Rc::new(|status| {
                HttpResponse::TooManyRequests()
                    .insert_header((RETRY_AFTER, status.seconds_until_reset()))
                    .finish()
            }),
        }
    }

    /// Choose whether to allow a request if the coordinator returns a failure.
    ///
    /// Default is false.
    pub fn fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// Ceilings applied to a resource the first time a request for it is seen, if it has not
    /// been configured already.
    ///
    /// By default unconfigured resources are unlimited.
    pub fn default_ceilings(mut self, ceilings: Option<Ceilings>) -> Self {
        self.default_ceilings = ceilings;
        self
    }

    /// Sets the [RateLimiterBuilder::request_allowed_transformation] and
    /// [RateLimiterBuilder::request_denied_response] functions, such that the following headers
    /// are set in both the allowed and denied responses:
    ///
    /// - `x-ratelimit-limit` (of the dimension with the fewest admissions left)\
    /// - `x-ratelimit-remaining`\
    /// - `x-ratelimit-reset` (seconds until the request could be admitted)
    /// - `retry-after` (denied only, seconds until the request could be admitted)
    pub fn add_headers(mut self) -> Self {
        self.allowed_transformation = Some(Rc::new(|map, status| {
            if let Some(status) = status {
                insert_status_headers(map, status);
            }
        }));
        self.denied_response = Rc::new(|status| {
            let mut response = HttpResponse::TooManyRequests().finish();
            let map = response.headers_mut();
            insert_status_headers(map, status);
            map.insert(RETRY_AFTER, HeaderValue::from(status.seconds_until_reset()));
            response
        });
        self
    }

    /// In the event that the request is allowed:
    ///
    /// You can optionally mutate the response headers to include the rate limit status.
    ///
    /// By default no changes are made to the response.
    ///
    /// Note the [AdmissionStatus] will be [None] if the coordinator failed and
    /// [RateLimiterBuilder::fail_open] is enabled.
    pub fn request_allowed_transformation<M>(mut self, mutation: Option<M>) -> Self
    where
        M: Fn(&mut HeaderMap, Option<&AdmissionStatus>) + 'static,
    {
        self.allowed_transformation = mutation.map(|m| Rc::new(m) as Rc<AllowedTransformation>);
        self
    }

    /// In the event that the request is denied, configure the [HttpResponse] returned.
    ///
    /// Defaults to an empty body with status 429 and a `retry-after` header.
    pub fn request_denied_response<R>(mut self, denied_response: R) -> Self
    where
        R: Fn(&AdmissionStatus) -> HttpResponse + 'static,
    {
        self.denied_response = Rc::new(denied_response);
        self
    }

    pub fn build(self) -> RateLimiter<HS, F> {
        RateLimiter {
            coordinator: self.coordinator,
            input_fn: Rc::new(self.input_fn),
            fail_open: self.fail_open,
            default_ceilings: self.default_ceilings.map(Rc::new),
            allowed_transformation: self.allowed_transformation,
            denied_response: self.denied_response,
        }
    }
}

fn insert_status_headers(map: &mut HeaderMap, status: &AdmissionStatus) {
    map.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(status.limit()));
    map.insert(
        X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(status.remaining()),
    );
    map.insert(
        X_RATELIMIT_RESET.clone(),
        HeaderValue::from(status.seconds_until_reset()),
    );
}
