//! The page-parallel executor: a pool of worker threads fanning out over
//! pages, fanning results back in to a single driver.
//!
//! Workers pull page contexts from a shared queue and send results over a
//! channel. The driver (the calling thread) receives results in completion
//! order, reorders them by page number, and applies them strictly in
//! ascending order — so downstream effects (grafting) are deterministic no
//! matter how completion order is permuted.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Cooperative cancellation flag shared between the driver, the workers and
/// whoever handles the user's interrupt.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A unit of work with a page number, used for result reordering.
pub trait PageTask {
    fn pageno(&self) -> usize;
}

/// Run `worker` over `tasks` on `jobs` threads; apply each result on the
/// calling thread via `task_finished`, in ascending page order.
///
/// Error semantics:
/// - a worker error cancels the pool and is returned (first one wins)
/// - a `task_finished` error does the same
/// - cancellation yields [`Error::Cancelled`]
/// - a worker dying without reporting yields [`Error::BrokenWorkerPool`]
pub fn execute_pages<T, R, F, G>(
    jobs: usize,
    tasks: Vec<T>,
    cancel: &CancellationToken,
    worker: F,
    mut task_finished: G,
) -> Result<()>
where
    T: PageTask + Send,
    R: Send,
    F: Fn(&T) -> Result<R> + Send + Sync,
    G: FnMut(R) -> Result<()>,
{
    let task_count = tasks.len();
    if task_count == 0 {
        return Ok(());
    }
    let jobs = jobs.clamp(1, task_count);
    debug!(jobs, pages = task_count, "starting worker pool");

    let mut expected_order: Vec<usize> = tasks.iter().map(PageTask::pageno).collect();
    expected_order.sort_unstable();

    let queue: Mutex<VecDeque<T>> = Mutex::new(tasks.into());
    let (result_tx, result_rx) = mpsc::channel::<(usize, Result<R>)>();

    let pool = catch_unwind(AssertUnwindSafe(|| {
        std::thread::scope(|scope| -> Result<()> {
            for _ in 0..jobs {
                let queue = &queue;
                let worker = &worker;
                let cancel = cancel.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let task = {
                            #[allow(clippy::unwrap_used)]
                            let mut queue = queue.lock().unwrap();
                            queue.pop_front()
                        };
                        let Some(task) = task else { break };
                        let pageno = task.pageno();
                        let outcome = worker(&task);
                        if result_tx.send((pageno, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            // Driver: reorder by page number and apply in ascending order.
            let mut pending: BTreeMap<usize, R> = BTreeMap::new();
            let mut next_idx = 0usize;
            let mut first_error: Option<Error> = None;
            let mut received = 0usize;

            while received < task_count {
                let Ok((pageno, outcome)) = result_rx.recv() else {
                    // All workers are gone but results are missing.
                    if first_error.is_none() && !cancel.is_cancelled() {
                        first_error = Some(Error::BrokenWorkerPool);
                    }
                    break;
                };
                received += 1;

                match outcome {
                    Ok(result) => {
                        if first_error.is_none() {
                            pending.insert(pageno, result);
                        }
                    }
                    Err(e) => {
                        warn!(page = pageno + 1, "page failed: {e}");
                        if first_error.is_none() {
                            first_error = Some(e);
                            cancel.cancel();
                        }
                    }
                }

                // Apply every contiguous result now available.
                while first_error.is_none() && next_idx < expected_order.len() {
                    let Some(result) = pending.remove(&expected_order[next_idx]) else {
                        break;
                    };
                    next_idx += 1;
                    if let Err(e) = task_finished(result) {
                        first_error = Some(e);
                        cancel.cancel();
                    }
                }
            }

            match first_error {
                Some(e) => Err(e),
                None if cancel.is_cancelled() => Err(Error::Cancelled),
                None => Ok(()),
            }
        })
    }));

    match pool {
        Ok(result) => result,
        Err(_) => Err(Error::BrokenWorkerPool),
    }
}
