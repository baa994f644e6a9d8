//! One worker thread per admitted transfer.
//!
//! The worker runs the selected strategy, catches failures and panics at its
//! boundary and hands a single [`WorkerResult`] to the finished callback. It
//! never touches the item table itself.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::id::ItemId;
use crate::transfer::direct::remove_partial;
use crate::transfer::{Transfer, TransferContext, TransferOutcome};

/// Final outcome of one worker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerResult {
    Completed { path: PathBuf, bytes: u64 },
    /// Resumed after a pause; the item goes back in the queue.
    Requeued,
    Cancelled,
    Failed(String),
}

/// Called exactly once when the worker is done.
pub type FinishedCallback = Box<dyn FnOnce(ItemId, WorkerResult) + Send + 'static>;

pub struct TransferWorker;

impl TransferWorker {
    /// Starts the transfer on a new thread.
    pub fn spawn(
        ctx: TransferContext,
        strategy: Arc<dyn Transfer>,
        on_finished: FinishedCallback,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(format!("worker-{}", ctx.id))
            .spawn(move || {
                let id = ctx.id;
                let result = Self::run(&ctx, strategy.as_ref());
                tracing::info!(item = %id, ?result, "worker finished");
                on_finished(id, result);
            })
    }

    /// Runs the strategy on the current thread and maps its result.
    pub fn run(ctx: &TransferContext, strategy: &dyn Transfer) -> WorkerResult {
        tracing::debug!(item = %ctx.id, url = %ctx.url, "worker starting");
        let ran = panic::catch_unwind(AssertUnwindSafe(|| strategy.run(ctx)));
        let cancelled = ctx.control.is_cancelled();
        match ran {
            Ok(Ok(TransferOutcome::Completed { path, .. })) if cancelled => {
                remove_partial(&path);
                WorkerResult::Cancelled
            }
            Ok(_) | Err(_) if cancelled => WorkerResult::Cancelled,
            Ok(Ok(TransferOutcome::Completed { path, bytes })) => {
                WorkerResult::Completed { path, bytes }
            }
            Ok(Ok(TransferOutcome::Requeued)) => WorkerResult::Requeued,
            Ok(Err(e)) if e.is_cancelled() => WorkerResult::Cancelled,
            Ok(Err(e)) => WorkerResult::Failed(e.to_string()),
            Err(payload) => WorkerResult::Failed(format!(
                "worker panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
