pub mod builder;
pub mod input_builder;
#[cfg(test)]
mod tests;

use crate::backend::HistoryStore;
use crate::coordinator::{Ceilings, Coordinator, Dimension, RequestKind};
use crate::window::Usage;
use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::HeaderMap;
use actix_web::{HttpResponse, ResponseError};
use builder::RateLimiterBuilder;
use futures::future::{ok, LocalBoxFuture, Ready};
use std::cell::RefCell;
use std::sync::Arc;
use std::{future::Future, rc::Rc};

type AllowedTransformation = dyn Fn(&mut HeaderMap, Option<&AdmissionStatus>);
type DeniedResponse = dyn Fn(&AdmissionStatus) -> HttpResponse;

/// What the input function produces for a request: the resource it is admitted against, and
/// which family of ceilings applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionInput {
    pub resource: String,
    pub kind: RequestKind,
}

/// The limiter's view of a resource when a request was let through or turned away.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionStatus {
    /// Seconds until the request could be admitted, 0 for an admitted request.
    pub wait_seconds: f64,
    /// The dimension with the fewest admissions left, if it could be read.
    pub tightest: Option<(Dimension, Usage)>,
}

impl AdmissionStatus {
    /// Value for the `x-ratelimit-limit` header.
    pub fn limit(&self) -> u64 {
        self.tightest.map(|(_, u)| u.limit).unwrap_or_default()
    }

    /// Value for the `x-ratelimit-remaining` header.
    pub fn remaining(&self) -> u64 {
        self.tightest.map(|(_, u)| u.remaining()).unwrap_or_default()
    }

    /// Value for the `x-ratelimit-reset` and `retry-after` headers, the wait rounded up to whole
    /// seconds.
    pub fn seconds_until_reset(&self) -> u64 {
        self.wait_seconds.max(0f64).ceil() as u64
    }
}

/// Rate limit middleware.
///
/// Requests that would have to wait are rejected with a 429, everything else is admitted through
/// the [Coordinator] (recording it in every applicable dimension) and passed on.
pub struct RateLimiter<HS, F> {
    coordinator: Arc<Coordinator<HS>>,
    input_fn: Rc<F>,
    fail_open: bool,
    default_ceilings: Option<Rc<Ceilings>>,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
}

impl<HS, F> Clone for RateLimiter<HS, F> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            input_fn: self.input_fn.clone(),
            fail_open: self.fail_open,
            default_ceilings: self.default_ceilings.clone(),
            allowed_transformation: self.allowed_transformation.clone(),
            denied_response: self.denied_response.clone(),
        }
    }
}

impl<HS, F, O> RateLimiter<HS, F>
where
    HS: HistoryStore + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<AdmissionInput, actix_web::Error>>,
{
    /// # Arguments
    ///
    /// * `coordinator`: The coordinator holding each resource's ceilings, shared by all workers.
    /// * `input_fn`: A future that produces the [AdmissionInput] based on the incoming request.
    pub fn builder(coordinator: Arc<Coordinator<HS>>, input_fn: F) -> RateLimiterBuilder<HS, F> {
        RateLimiterBuilder::new(coordinator, input_fn)
    }
}

impl<S, B, HS, F, O> Transform<S, ServiceRequest> for RateLimiter<HS, F>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
    HS: HistoryStore + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<AdmissionInput, actix_web::Error>>,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Transform = RateLimiterMiddleware<S, HS, F>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimiterMiddleware {
            service: Rc::new(RefCell::new(service)),
            limiter: self.clone(),
        })
    }
}

pub struct RateLimiterMiddleware<S, HS, F> {
    service: Rc<RefCell<S>>,
    limiter: RateLimiter<HS, F>,
}

enum Outcome {
    Admitted,
    Delayed(AdmissionStatus),
}

impl<HS: HistoryStore, F> RateLimiter<HS, F> {
    async fn check(&self, input: &AdmissionInput) -> crate::Result<Outcome> {
        if let Some(ceilings) = &self.default_ceilings {
            if !self.coordinator.is_configured(&input.resource) {
                log::debug!("Applying default ceilings to {}", input.resource);
                self.coordinator
                    .configure_resource(&input.resource, ceilings.as_ref().clone())?;
            }
        }
        let wait = self.coordinator.decide(&input.resource, input.kind).await?;
        if wait > 0f64 {
            let tightest = self.tightest(input).await;
            return Ok(Outcome::Delayed(AdmissionStatus {
                wait_seconds: wait,
                tightest,
            }));
        }
        // A concurrent request may have taken the last slot since the decision, in which case
        // this waits for the next one
        self.coordinator.admit(&input.resource, input.kind).await?;
        Ok(Outcome::Admitted)
    }

    async fn tightest(&self, input: &AdmissionInput) -> Option<(Dimension, Usage)> {
        self.coordinator
            .tightest_usage(&input.resource, input.kind)
            .await
            .map_err(|e| log::warn!("Unable to read usage of {}: {e}", input.resource))
            .ok()
            .flatten()
    }
}

impl<S, B, HS, F, O> Service<ServiceRequest> for RateLimiterMiddleware<S, HS, F>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
    HS: HistoryStore + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<AdmissionInput, actix_web::Error>>,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let limiter = self.limiter.clone();

        Box::pin(async move {
            let input = match (limiter.input_fn)(&req).await {
                Ok(input) => input,
                Err(e) => {
                    log::error!("Rate limiter input function failed: {e}");
                    return Ok(req.into_response(e.error_response()).map_into_right_body());
                }
            };

            let admitted = match limiter.check(&input).await {
                Ok(Outcome::Admitted) => true,
                Ok(Outcome::Delayed(status)) => {
                    let response: HttpResponse = (limiter.denied_response)(&status);
                    return Ok(req.into_response(response).map_into_right_body());
                }
                Err(e) => {
                    if limiter.fail_open {
                        log::warn!("Rate limiter failed: {}, allowing the request anyway", e);
                        false
                    } else {
                        log::error!("Rate limiter failed: {}", e);
                        return Ok(req.into_response(e.error_response()).map_into_right_body());
                    }
                }
            };

            let mut service_response = service.call(req).await?;

            if let Some(transformation) = &limiter.allowed_transformation {
                let status = if admitted {
                    Some(AdmissionStatus {
                        wait_seconds: 0f64,
                        tightest: limiter.tightest(&input).await,
                    })
                } else {
                    None
                };
                (transformation)(service_response.headers_mut(), status.as_ref());
            }

            Ok(service_response.map_into_left_body())
        })
    }
}
