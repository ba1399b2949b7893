#![cfg_attr(docsrs, feature(doc_cfg))]
//! Sliding window admission control over several simultaneous ceilings.
//!
//! A [Coordinator] holds the [Ceilings] of each resource (requests per second, minute and hour,
//! tokens per second and minute, and one custom window) and decides how long a caller must wait
//! before it may proceed. The history it counts lives in a
//! [HistoryStore](backend::HistoryStore), either in process or, with the `redis` feature, in
//! Redis so that several processes share the same ceilings.
//!
//! ```
//! # use sliding_admission::backend::memory::InMemoryStore;
//! # use sliding_admission::{Ceilings, Coordinator, RequestKind, SlidingWindow};
//! # async fn example() -> sliding_admission::Result<()> {
//! let engine = SlidingWindow::builder(InMemoryStore::builder().build()).build();
//! let coordinator = Coordinator::builder(engine).build();
//! coordinator.configure_resource(
//!     "openai",
//!     Ceilings::new().requests_per_second(5).requests_per_minute(10),
//! )?;
//! let guard = coordinator.admit("openai", RequestKind::Requests).await?;
//! println!("Admitted after {:?}", guard.waited());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod clock;
mod coordinator;
mod error;
pub mod event;
mod locks;
mod middleware;
pub mod window;

pub use clock::Clock;
pub use coordinator::{
    AdmissionGuard, Ceilings, Coordinator, CoordinatorBuilder, Dimension, LockStrategy,
    RequestKind, ResourceStatus,
};
pub use error::{Error, Result};
pub use middleware::builder::{
    RateLimiterBuilder, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use middleware::input_builder::{AdmissionInputBuilder, AdmissionInputFuture};
pub use middleware::{AdmissionInput, AdmissionStatus, RateLimiter};
pub use window::{PrunePolicy, SlidingWindow, Usage, WindowConfig};
