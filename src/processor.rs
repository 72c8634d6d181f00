//! Work queue dispatch of independent fits.
//!
//! Every cluster (or Monte Carlo replicate) is submitted as a self-contained
//! [`Command`] together with a [`Memo`]. The commands share no mutable state, so
//! a [`Processor`] may run them in any order and on any number of threads. The
//! memos then apply the results back onto the session one at a time; this merge
//! is the only serial step.

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::debug;

use crate::data::AnalysisSession;
use crate::error::{DispError, Result};

/// A unit of work that can run on any worker.
pub trait Command: Send {
    type Output: Send;

    fn run(self) -> Result<Self::Output>;
}

/// Applies the result of a command back onto the session.
pub trait Memo: Send {
    type Output;

    fn merge(self, session: &mut AnalysisSession, result: Result<Self::Output>) -> Result<()>;
}

/// Executes a queue of commands, returning every memo paired with its result.
pub trait Processor {
    fn name(&self) -> &'static str;

    fn execute<C, M>(&self, queue: Vec<(C, M)>) -> Vec<(M, Result<C::Output>)>
    where
        C: Command,
        M: Memo<Output = C::Output>;
}

/// Runs every command on the calling thread, in submission order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialProcessor;

impl Processor for SerialProcessor {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn execute<C, M>(&self, queue: Vec<(C, M)>) -> Vec<(M, Result<C::Output>)>
    where
        C: Command,
        M: Memo<Output = C::Output>,
    {
        queue.into_iter().map(|(command, memo)| (memo, command.run())).collect()
    }
}

/// Runs the commands on a dedicated rayon thread pool.
pub struct ThreadPoolProcessor {
    pool: ThreadPool,
}

impl ThreadPoolProcessor {
    /// Build a pool with `threads` workers, or one per logical CPU for `None`.
    pub fn new(threads: Option<usize>) -> Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("dispfit-worker-{}", i));
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| DispError::Configuration(format!("Failed to build the thread pool: {}", e)))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Processor for ThreadPoolProcessor {
    fn name(&self) -> &'static str {
        "thread pool"
    }

    fn execute<C, M>(&self, queue: Vec<(C, M)>) -> Vec<(M, Result<C::Output>)>
    where
        C: Command,
        M: Memo<Output = C::Output>,
    {
        self.pool.install(|| {
            queue
                .into_par_iter()
                .map(|(command, memo)| (memo, command.run()))
                .collect()
        })
    }
}

/// Merge command results into the session, one at a time.
///
/// The first fatal error aborts the merge; other errors are handled by the memos.
pub fn merge_results<M: Memo>(session: &mut AnalysisSession, results: Vec<(M, Result<M::Output>)>) -> Result<()> {
    for (memo, result) in results {
        memo.merge(session, result)?;
    }
    Ok(())
}

/// Execute a queue and merge its results in submission order.
pub fn run_queue<P, C, M>(processor: &P, session: &mut AnalysisSession, queue: Vec<(C, M)>) -> Result<()>
where
    P: Processor,
    C: Command,
    M: Memo<Output = C::Output>,
{
    debug!(processor = processor.name(), jobs = queue.len(), "Running the queue");
    let results = processor.execute(queue);
    merge_results(session, results)
}
