#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod breaker;
pub use breaker::*;

mod limiter;
pub use limiter::*;

mod store;
pub use store::*;

mod error;
pub use error::*;

mod common;
pub use common::{IntervalSeconds, MaxRequests, StateKey};

#[cfg(test)]
mod tests;
