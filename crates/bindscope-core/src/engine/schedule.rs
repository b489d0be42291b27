//! Scheduling strategies for a batch of jobs.

use std::sync::Arc;

use crate::config::Scheduling;
use crate::error::{Error, Result};

/// A unit of scheduled work: runs one job and settles its bookkeeping.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

/// Dispatches the tasks of a batch.
#[derive(Clone)]
pub(crate) enum Dispatcher {
    /// One OS thread per task.
    ThreadPerJob,
    /// Tasks share a bounded Rayon pool.
    Pool(Arc<rayon::ThreadPool>),
    /// One background thread runs the batch in order.
    Sequential,
    /// Tasks run on the calling thread; dispatch returns when they are done.
    Blocking,
}

impl Dispatcher {
    pub(crate) fn new(scheduling: Scheduling, max_parallel_jobs: usize) -> Result<Self> {
        Ok(match scheduling {
            Scheduling::ThreadPerJob => Dispatcher::ThreadPerJob,
            Scheduling::Sequential => Dispatcher::Sequential,
            Scheduling::Pooled => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(max_parallel_jobs.max(1))
                    .thread_name(|i| format!("bindscope-job-{}", i))
                    .build()
                    .map_err(|e| Error::Config(format!("failed to build job pool: {}", e)))?;
                Dispatcher::Pool(Arc::new(pool))
            }
        })
    }

    pub(crate) fn dispatch(&self, tasks: Vec<Task>) {
        match self {
            Dispatcher::ThreadPerJob => {
                for task in tasks {
                    std::thread::spawn(task);
                }
            }
            Dispatcher::Pool(pool) => {
                for task in tasks {
                    pool.spawn(task);
                }
            }
            Dispatcher::Sequential => {
                std::thread::spawn(move || {
                    for task in tasks {
                        task();
                    }
                });
            }
            Dispatcher::Blocking => {
                for task in tasks {
                    task();
                }
            }
        }
    }
}
