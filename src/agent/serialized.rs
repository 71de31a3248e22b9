//! The single-dedicated-worker policy: every compile request is pushed
//! onto a FIFO queue and drained by one background thread, so callers
//! never compile on their own thread but never contend with each other
//! for a worker either.
//!
//! Grounded on `original_source/src/microjit/command_queue.h`'s
//! `CommandQueue` (one server thread, a mutex+condvar-guarded
//! `std::queue<std::function<void()>>`, `packaged_task`/`future` per
//! request) and `compilation_agent.h`'s `CommandQueueCompilationHandler`,
//! which is exactly a `CompilationHandler` built on top of one. This port
//! mirrors that structure directly with `std::thread` + a
//! `parking_lot::Mutex<VecDeque<Job>>` + `parking_lot::Condvar`, and turns
//! each request's `packaged_task`/`future` pair into a one-shot
//! `std::sync::mpsc` reply channel.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::agent::CompilationAgent;
use crate::codegen::{CalleeResolver, EntryPoint};
use crate::error::JitError;
use crate::ir::{FunctionId, RectifiedFunction};
use crate::runtime::code_cache::CodeCache;

enum Job {
    GetOrCreate { func: Arc<RectifiedFunction>, respond: mpsc::SyncSender<Result<EntryPoint, JitError>> },
    Recompile { func: Arc<RectifiedFunction>, respond: mpsc::SyncSender<Result<EntryPoint, JitError>> },
    RemoveFunction { id: FunctionId, respond: mpsc::SyncSender<bool> },
}

#[derive(Default)]
struct Queue {
    jobs: Mutex<VecDeque<Job>>,
    condvar: Condvar,
    shutdown: Mutex<bool>,
}

impl Queue {
    fn push(&self, job: Job) {
        self.jobs.lock().push_back(job);
        self.condvar.notify_one();
    }

    /// Blocks until a job is available or the queue has been told to shut
    /// down, mirroring `CommandQueue::server`'s
    /// `conditional_lock.wait(lock, [this] { return !task_queue.empty() || is_terminated; })`.
    fn pop(&self) -> Option<Job> {
        let mut jobs = self.jobs.lock();
        loop {
            if let Some(job) = jobs.pop_front() {
                return Some(job);
            }
            if *self.shutdown.lock() {
                return None;
            }
            self.condvar.wait(&mut jobs);
        }
    }

    fn shut_down(&self) {
        *self.shutdown.lock() = true;
        self.condvar.notify_all();
    }
}

/// One dedicated worker thread servicing every compile/recompile/remove
/// request for the agent's lifetime.
pub struct SerializedAgent {
    cache: Arc<CodeCache>,
    queue: Arc<Queue>,
    worker: Option<JoinHandle<()>>,
}

impl SerializedAgent {
    pub fn new<R: CalleeResolver + Send + 'static>(resolver: R) -> Self {
        let cache = Arc::new(CodeCache::new());
        let queue = Arc::new(Queue::default());
        let worker_cache = Arc::clone(&cache);
        let worker_queue = Arc::clone(&queue);
        let worker = std::thread::Builder::new()
            .name("vstack-jit-compile-queue".into())
            .spawn(move || {
                while let Some(job) = worker_queue.pop() {
                    match job {
                        Job::GetOrCreate { func, respond } => {
                            let result = worker_cache.get_or_create(&func, &resolver).map(EntryPoint);
                            let _ = respond.send(result);
                        }
                        Job::Recompile { func, respond } => {
                            let result = worker_cache.recompile(&func, &resolver).map(EntryPoint);
                            let _ = respond.send(result);
                        }
                        Job::RemoveFunction { id, respond } => {
                            let _ = respond.send(worker_cache.remove(id));
                        }
                    }
                }
            })
            .expect("failed to spawn the compilation queue's worker thread");
        SerializedAgent { cache, queue, worker: Some(worker) }
    }

    fn dispatch(&self, make_job: impl FnOnce(mpsc::SyncSender<Result<EntryPoint, JitError>>) -> Job) -> Result<*const u8, JitError> {
        let (respond, response) = mpsc::sync_channel(1);
        self.queue.push(make_job(respond));
        response
            .recv()
            .expect("compilation queue's worker thread must answer every request before exiting")
            .map(|entry| entry.0)
    }
}

impl CompilationAgent for SerializedAgent {
    fn is_compiled(&self, func: &Arc<RectifiedFunction>) -> bool {
        self.cache.is_compiled(func.id())
    }

    fn get_or_create(&self, func: &Arc<RectifiedFunction>) -> Result<*const u8, JitError> {
        let func = Arc::clone(func);
        self.dispatch(|respond| Job::GetOrCreate { func, respond })
    }

    fn recompile(&self, func: &Arc<RectifiedFunction>) -> Result<*const u8, JitError> {
        let func = Arc::clone(func);
        self.dispatch(|respond| Job::Recompile { func, respond })
    }

    fn remove_function(&self, id: FunctionId) -> bool {
        let (respond, response) = mpsc::sync_channel(1);
        self.queue.push(Job::RemoveFunction { id, respond });
        response.recv().expect("compilation queue's worker thread must answer every request before exiting")
    }
}

impl Drop for SerializedAgent {
    fn drop(&mut self) {
        self.queue.shut_down();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CalleeId, FunctionBuilder};
    use crate::types::TypeDescriptor;

    struct NoCallees;
    impl CalleeResolver for NoCallees {
        fn resolve(&self, _callee: CalleeId) -> Option<(usize, usize)> {
            None
        }
    }

    #[test]
    fn compiles_on_the_worker_thread() {
        let agent = SerializedAgent::new(NoCallees);
        let func = Arc::new(FunctionBuilder::new(TypeDescriptor::void(), Vec::new()).rectify());
        assert!(!agent.is_compiled(&func));
        agent.get_or_create(&func).expect("trivial void function should compile");
        assert!(agent.is_compiled(&func));
        assert!(agent.remove_function(func.id()));
    }
}
