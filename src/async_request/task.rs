//! Executor seam for application work started on behalf of a request.

/// Job handed to a [`TaskExecutor`]. Failures are already isolated and
/// logged when it runs.
pub type TaskJob = Box<dyn FnOnce() + Send>;

/// Runs tasks started through
/// [`AsyncRequestState::start_task`](super::AsyncRequestState::start_task).
pub trait TaskExecutor: Send + Sync {
    /// Run `job`, typically on another thread.
    fn execute(&self, job: TaskJob);
}

impl TaskExecutor for tokio::runtime::Handle {
    fn execute(&self, job: TaskJob) { drop(self.spawn_blocking(job)); }
}

/// Executor running each job on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&self, job: TaskJob) { job(); }
}
