use tokio::sync::mpsc;
use tracing::warn;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Where a subscriber publishes its updates (e.g. a UI thread). Implementations
/// must run tasks in submission order.
pub trait ExecutionContext: Send + Sync {
    fn run(&self, task: Task);
}

impl<F> ExecutionContext for F
where
    F: Fn(Task) + Send + Sync,
{
    fn run(&self, task: Task) {
        (self)(task)
    }
}

/// Runs the task immediately on the caller's stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inline;

impl ExecutionContext for Inline {
    fn run(&self, task: Task) {
        task()
    }
}

/// Forwards tasks to a single tokio task, one at a time.
#[derive(Clone)]
pub struct TokioContext {
    tx: mpsc::UnboundedSender<Task>,
}

impl TokioContext {
    /// Must be called from within a tokio runtime.
    pub fn spawn() -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let handle = tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
        });
        (Self { tx }, handle)
    }
}

impl ExecutionContext for TokioContext {
    fn run(&self, task: Task) {
        if self.tx.send(task).is_err() {
            warn!(target = "telemetry.ws.context", "execution context stopped, update dropped");
        }
    }
}
