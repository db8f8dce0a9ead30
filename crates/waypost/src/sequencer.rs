//! Strict FIFO call queue.
//!
//! Every public operation becomes one unit on a single worker task. A unit is
//! admitted (or rejected by the init gate) when it reaches the head of the
//! queue, and the next unit starts only after its future has resolved. Units may
//! enqueue further units but must never await them.

use crate::errors::{InitFailureCode, SdkError};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitState {
    NotInitialized,
    InitPending,
    InitSucceeded,
    InitFailed {
        code: InitFailureCode,
        detail: String,
    },
}

impl InitState {
    /// The error an init-requiring unit completes with, if any.
    fn admission(&self) -> Result<(), SdkError> {
        match self {
            Self::InitSucceeded => Ok(()),
            Self::NotInitialized => Err(SdkError::NotInitialized),
            Self::InitPending => Err(SdkError::InitPending),
            Self::InitFailed { code, detail } => Err(SdkError::InitFailed {
                code: *code,
                detail: detail.clone(),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    RequiresInit,
    Exempt,
}

type Job = Box<dyn FnOnce(Result<(), SdkError>) -> Option<BoxFuture<'static, ()>> + Send>;

struct Unit {
    label: &'static str,
    gate: Gate,
    job: Job,
}

/// Completion handle for one queued call.
///
/// Dropping it is allowed: the call still runs in order and its outcome is
/// only logged.
#[must_use = "dropping a Pending still runs the call; await it to observe the outcome"]
#[derive(Debug)]
pub struct Pending<T> {
    receiver: oneshot::Receiver<Result<T, SdkError>>,
}

impl<T> Pending<T> {
    /// Non-blocking probe used by hosts that poll instead of awaiting.
    pub fn try_take(&mut self) -> Option<Result<T, SdkError>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(SdkError::QueueClosed)),
        }
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, SdkError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SdkError::QueueClosed)))
    }
}

#[derive(Clone)]
pub struct Sequencer {
    sender: mpsc::UnboundedSender<Unit>,
    state: Arc<Mutex<InitState>>,
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("state", &self.init_state())
            .finish_non_exhaustive()
    }
}

impl Sequencer {
    /// Spawns the worker on the current tokio runtime.
    pub fn start() -> Result<Self, SdkError> {
        let handle = Handle::try_current().map_err(|_| SdkError::NoRuntime)?;
        Ok(Self::start_on(&handle))
    }

    pub fn start_on(handle: &Handle) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(InitState::NotInitialized));
        handle.spawn(drain(receiver, state.clone()));
        Self { sender, state }
    }

    pub fn init_state(&self) -> InitState {
        self.lock_state().clone()
    }

    pub fn set_init_state(&self, state: InitState) {
        *self.lock_state() = state;
    }

    /// Appends a unit; issue order is execution order.
    pub fn enqueue<T, F, Fut>(&self, label: &'static str, gate: Gate, work: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SdkError>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let job: Job = Box::new(move |admission: Result<(), SdkError>| match admission {
            Ok(()) => Some(
                async move {
                    let outcome = work().await;
                    deliver(label, sender, outcome);
                }
                .boxed(),
            ),
            Err(error) => {
                deliver(label, sender, Err(error));
                None
            }
        });

        if let Err(mpsc::error::SendError(unit)) = self.sender.send(Unit { label, gate, job }) {
            tracing::warn!(unit = label, "call queue closed; rejecting unit");
            let _ = (unit.job)(Err(SdkError::QueueClosed));
        }
        Pending { receiver }
    }

    fn lock_state(&self) -> MutexGuard<'_, InitState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn deliver<T>(
    label: &'static str,
    sender: oneshot::Sender<Result<T, SdkError>>,
    outcome: Result<T, SdkError>,
) {
    if let Err(Err(error)) = sender.send(outcome) {
        tracing::warn!(unit = label, error = %error, "call failed with no completion handle");
    }
}

async fn drain(mut receiver: mpsc::UnboundedReceiver<Unit>, state: Arc<Mutex<InitState>>) {
    while let Some(unit) = receiver.recv().await {
        let admission = match unit.gate {
            Gate::Exempt => Ok(()),
            Gate::RequiresInit => state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .admission(),
        };
        tracing::debug!(unit = unit.label, admitted = admission.is_ok(), "starting unit");

        if let Some(work) = (unit.job)(admission) {
            if AssertUnwindSafe(work).catch_unwind().await.is_err() {
                tracing::warn!(unit = unit.label, "unit panicked; continuing with the next one");
            }
        }
    }
    tracing::debug!("call queue drained and closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "current_thread")]
    async fn units_run_one_at_a_time_in_issue_order() {
        let sequencer = Sequencer::start().expect("runtime available");
        let log = Arc::new(Mutex::new(Vec::new()));

        let slow_log = log.clone();
        let slow = sequencer.enqueue("slow", Gate::Exempt, move || async move {
            slow_log.lock().expect("log").push("slow:start");
            tokio::time::sleep(Duration::from_millis(20)).await;
            slow_log.lock().expect("log").push("slow:end");
            Ok(1)
        });
        let fast_log = log.clone();
        let fast = sequencer.enqueue("fast", Gate::Exempt, move || async move {
            fast_log.lock().expect("log").push("fast");
            Ok(2)
        });

        assert_eq!(fast.await, Ok(2));
        assert_eq!(slow.await, Ok(1));
        assert_eq!(
            *log.lock().expect("log"),
            vec!["slow:start", "slow:end", "fast"]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn gate_reports_state_at_start_time() {
        let sequencer = Sequencer::start().expect("runtime available");

        let before = sequencer.enqueue("data", Gate::RequiresInit, || async { Ok(()) });
        assert_eq!(before.await, Err(SdkError::NotInitialized));

        sequencer.set_init_state(InitState::InitPending);
        let pending = sequencer.enqueue("data", Gate::RequiresInit, || async { Ok(()) });
        assert_eq!(pending.await, Err(SdkError::InitPending));

        sequencer.set_init_state(InitState::InitFailed {
            code: InitFailureCode::SessionOpenFailed,
            detail: "Error in API: 500".to_string(),
        });
        let failed = sequencer.enqueue("data", Gate::RequiresInit, || async { Ok(()) });
        assert!(matches!(
            failed.await,
            Err(SdkError::InitFailed {
                code: InitFailureCode::SessionOpenFailed,
                ..
            })
        ));

        let exempt = sequencer.enqueue("view", Gate::Exempt, || async { Ok("ran") });
        assert_eq!(exempt.await, Ok("ran"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn gate_is_checked_when_unit_starts_not_when_enqueued() {
        let sequencer = Sequencer::start().expect("runtime available");
        let init = sequencer.clone();
        let first = sequencer.enqueue("init", Gate::Exempt, move || async move {
            init.set_init_state(InitState::InitSucceeded);
            Ok(())
        });
        let second = sequencer.enqueue("data", Gate::RequiresInit, || async { Ok(()) });

        assert_eq!(first.await, Ok(()));
        assert_eq!(second.await, Ok(()));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn panicking_unit_does_not_stall_the_queue() {
        let sequencer = Sequencer::start().expect("runtime available");
        let broken: Pending<()> = sequencer.enqueue("broken", Gate::Exempt, || async {
            if true {
                panic!("unit failure");
            }
            Ok(())
        });
        let next = sequencer.enqueue("next", Gate::Exempt, || async { Ok(7) });

        assert_eq!(broken.await, Err(SdkError::QueueClosed));
        assert_eq!(next.await, Ok(7));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn dropped_handle_still_runs_the_unit() {
        let sequencer = Sequencer::start().expect("runtime available");
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        drop(sequencer.enqueue("fire-and-forget", Gate::Exempt, move || async move {
            *flag.lock().expect("flag") = true;
            Ok(())
        }));

        let after = sequencer.enqueue("after", Gate::Exempt, || async { Ok(()) });
        assert_eq!(after.await, Ok(()));
        assert!(*ran.lock().expect("flag"));
    }

    #[test]
    fn start_without_runtime_reports_no_runtime() {
        assert!(matches!(Sequencer::start(), Err(SdkError::NoRuntime)));
    }
}
