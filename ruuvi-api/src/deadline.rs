//! Caller-supplied deadlines.
//!
//! Every engine call takes a [`Deadline`]. Work that outlives it, including
//! backoff sleeps during reconnect, is dropped and the call fails with
//! [`RuuviError::DeadlineExceeded`].

use ruuvi_core::{RuuviError, RuuviResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline; the call may run indefinitely.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Drive `fut` to completion unless the deadline passes first.
    pub async fn run<T, F>(&self, fut: F) -> RuuviResult<T>
    where
        F: Future<Output = RuuviResult<T>>,
    {
        match self.0 {
            None => fut.await,
            Some(at) => match tokio::time::timeout_at(at, fut).await {
                Ok(result) => result,
                Err(_) => Err(RuuviError::DeadlineExceeded),
            },
        }
    }
}
