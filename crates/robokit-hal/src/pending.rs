//! [`Pending`] – the result handle returned by every asynchronous unit
//! operation.
//!
//! Issuing an operation (`connect`, `start_device`, a driver command, …) only
//! enqueues a message on the unit's mailbox and returns immediately.  The
//! caller awaits the `Pending` whenever it is ready to collect the outcome,
//! which lets a supervisor fan out many operations before waiting on any.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use robokit_types::RobotError;
use tokio::sync::oneshot;

/// Reply half handed to the unit processing the operation.
pub(crate) type Reply<T> = oneshot::Sender<Result<T, RobotError>>;

/// A not-yet-resolved result of an operation issued to a unit.
///
/// Resolves to [`RobotError::UnitTerminated`] if the unit went away before
/// replying.  Dropping a `Pending` does not cancel the operation.
#[must_use = "a Pending does nothing to the outcome unless awaited; drop it explicitly to fire and forget"]
#[derive(Debug)]
pub struct Pending<T> {
    unit: String,
    rx: oneshot::Receiver<Result<T, RobotError>>,
}

impl<T> Pending<T> {
    pub(crate) fn channel(unit: &str) -> (Reply<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                unit: unit.to_string(),
                rx,
            },
        )
    }

    /// A handle that is already resolved to `result`.
    pub fn ready(unit: &str, result: Result<T, RobotError>) -> Self {
        let (tx, pending) = Self::channel(unit);
        // The receiver is alive in `pending`, so the send cannot fail.
        let _ = tx.send(result);
        pending
    }

    /// Identifier of the unit the operation was issued to.
    pub fn unit(&self) -> &str {
        &self.unit
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, RobotError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|reply| match reply {
            Ok(result) => result,
            Err(_) => Err(RobotError::UnitTerminated(this.unit.clone())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_to_the_reply() {
        let (tx, pending) = Pending::<u32>::channel("led");
        tx.send(Ok(7)).unwrap();
        assert_eq!(pending.await, Ok(7));
    }

    #[tokio::test]
    async fn dropped_reply_means_unit_terminated() {
        let (tx, pending) = Pending::<()>::channel("serial");
        drop(tx);
        assert_eq!(
            pending.await,
            Err(RobotError::UnitTerminated("serial".to_string()))
        );
    }

    #[tokio::test]
    async fn ready_is_already_resolved() {
        let pending = Pending::<()>::ready("led", Err(RobotError::device_start("led", "no pin")));
        assert_eq!(pending.unit(), "led");
        assert!(matches!(pending.await, Err(RobotError::DeviceStart { .. })));
    }
}
