//! Residual failure channel.
//!
//! Failures that arrive after an aggregation has settled are handed to a
//! single registered callback. Until one is registered they are buffered.

use std::sync::Arc;

use parking_lot::Mutex;

use super::failure::Failure;
use super::key::OperationKey;
use crate::error::{AllendError, Result};

/// Callback invoked once per residual failure.
pub type ResidualHandler<E> = Arc<dyn Fn(Failure<E>, OperationKey) + Send + Sync>;

enum SinkState<E> {
    Buffering(Vec<(OperationKey, Failure<E>)>),
    /// Handler installed, buffered residuals still being handed to it
    Flushing {
        handler: ResidualHandler<E>,
        pending: Vec<(OperationKey, Failure<E>)>,
    },
    Registered(ResidualHandler<E>),
}

/// Handler calls never overlap and follow arrival order: while a
/// registration is flushing, new residuals queue behind the buffered ones.
pub(crate) struct ResidualSink<E> {
    state: Mutex<SinkState<E>>,
}

impl<E> ResidualSink<E> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SinkState::Buffering(Vec::new())),
        }
    }

    /// Install the handler and flush anything buffered into it.
    pub fn register(&self, handler: ResidualHandler<E>) -> Result<()> {
        let mut batch = {
            let mut state = self.state.lock();
            if !matches!(*state, SinkState::Buffering(_)) {
                return Err(AllendError::residual_handler_already_registered());
            }
            let flushing = SinkState::Flushing {
                handler: Arc::clone(&handler),
                pending: Vec::new(),
            };
            match std::mem::replace(&mut *state, flushing) {
                SinkState::Buffering(buffered) => buffered,
                _ => Vec::new(),
            }
        };

        // handler runs outside the lock
        loop {
            for (key, failure) in batch {
                handler(failure, key);
            }

            let mut state = self.state.lock();
            let next = match &mut *state {
                SinkState::Flushing { pending, .. } => std::mem::take(pending),
                _ => Vec::new(),
            };
            if next.is_empty() {
                *state = SinkState::Registered(Arc::clone(&handler));
                return Ok(());
            }
            batch = next;
        }
    }

    /// Hand a residual to the handler, or queue it.
    ///
    /// Returns whether a handler observed or is about to observe it.
    pub fn deliver(&self, key: OperationKey, failure: Failure<E>) -> bool {
        let handler = {
            let mut state = self.state.lock();
            match &mut *state {
                SinkState::Registered(handler) => Arc::clone(handler),
                SinkState::Flushing { pending, .. } => {
                    pending.push((key, failure));
                    return true;
                }
                SinkState::Buffering(buffered) => {
                    buffered.push((key, failure));
                    return false;
                }
            }
        };

        handler(failure, key);
        true
    }

    /// Residuals still waiting for a handler.
    pub fn unobserved(&self) -> Vec<OperationKey> {
        match &*self.state.lock() {
            SinkState::Buffering(buffered) => buffered.iter().map(|(key, _)| key.clone()).collect(),
            SinkState::Flushing { .. } | SinkState::Registered(_) => Vec::new(),
        }
    }

    pub fn is_registered(&self) -> bool {
        !matches!(*self.state.lock(), SinkState::Buffering(_))
    }
}
