use crossbeam_channel::{Receiver, Sender, unbounded};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread;
use tracing::{debug, error};

use super::fence::{Fence, FenceState};
use super::metrics::CompilerMetrics;
use crate::codegen::{CodeGenerator, GeneratorContext};

/// Which queue a job goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Main-part and warm-up builds.
    Normal,
    /// Optimized variant builds, kept apart so they never starve normal work.
    Low,
}

impl Priority {
    fn name(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Low => "lowp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub threads: usize,
    pub low_priority_threads: usize,
}

/// State handed to a job while it runs on a worker.
pub struct WorkerContext {
    pub thread_index: usize,
    pub priority: Priority,
    pub generator: Box<dyn GeneratorContext>,
}

pub type JobFn = Box<dyn FnOnce(&mut WorkerContext) -> FenceState + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Dropped,
}

impl JobStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Queued,
            1 => Self::Running,
            2 => Self::Done,
            _ => Self::Dropped,
        }
    }
}

/// Shared view of an enqueued job.
#[derive(Debug)]
pub struct JobTicket {
    id: JobId,
    priority: Priority,
    status: AtomicU8,
    fence: Arc<Fence>,
}

impl JobTicket {
    fn new(priority: Priority, fence: Arc<Fence>) -> Self {
        Self {
            id: JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed)),
            priority,
            status: AtomicU8::new(0),
            fence,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }

    fn transition(&self, from: JobStatus, to: JobStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self, outcome: FenceState) {
        self.status.store(JobStatus::Done as u8, Ordering::Release);
        self.fence.signal(outcome);
    }
}

struct Job {
    ticket: Arc<JobTicket>,
    func: JobFn,
}

struct WorkerPool {
    sender: Option<Sender<Job>>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    fn spawn(
        priority: Priority,
        threads: usize,
        generator: &Arc<dyn CodeGenerator>,
        metrics: &Arc<CompilerMetrics>,
    ) -> io::Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let mut handles = Vec::with_capacity(threads);

        for index in 0..threads.max(1) {
            let receiver = receiver.clone();
            let generator = Arc::clone(generator);
            let metrics = Arc::clone(metrics);
            let handle = thread::Builder::new()
                .name(format!("shader-compiler-{}-{index}", priority.name()))
                .spawn(move || {
                    let context = WorkerContext {
                        thread_index: index,
                        priority,
                        generator: generator.create_context(),
                    };
                    worker_loop(&receiver, context, &metrics);
                })?;
            handles.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            threads: handles,
        })
    }

    fn shutdown(&mut self) {
        // closing the channel lets every worker drain the queue and exit
        self.sender.take();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("shader compiler worker panicked during shutdown");
            }
        }
    }
}

fn worker_loop(receiver: &Receiver<Job>, mut context: WorkerContext, metrics: &CompilerMetrics) {
    while let Ok(Job { ticket, func }) = receiver.recv() {
        if !ticket.transition(JobStatus::Queued, JobStatus::Running) {
            // dropped while queued; the dropper already resolved the fence
            continue;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| func(&mut context)))
            .unwrap_or_else(|_| {
                error!(
                    job = ticket.id.0,
                    thread = context.thread_index,
                    "shader compile job panicked"
                );
                FenceState::Failed
            });

        ticket.finish(outcome);
        metrics.record_completion();
        debug!(
            job = ticket.id.0,
            queue = context.priority.name(),
            ?outcome,
            "compile job finished"
        );
    }
}

/// The two compile queues and their worker pools.
pub struct CompilerQueues {
    normal: WorkerPool,
    low_priority: WorkerPool,
    metrics: Arc<CompilerMetrics>,
}

impl CompilerQueues {
    pub fn new(
        config: QueueConfig,
        generator: &Arc<dyn CodeGenerator>,
        metrics: Arc<CompilerMetrics>,
    ) -> io::Result<Self> {
        let normal = WorkerPool::spawn(Priority::Normal, config.threads, generator, &metrics)?;
        let low_priority = WorkerPool::spawn(
            Priority::Low,
            config.low_priority_threads,
            generator,
            &metrics,
        )?;
        Ok(Self {
            normal,
            low_priority,
            metrics,
        })
    }

    /// Enqueue `func`; `fence` must be pending and is resolved with the
    /// job's outcome once it runs, or with `Failed` if it is dropped.
    pub fn add_job(&self, priority: Priority, fence: Arc<Fence>, func: JobFn) -> Arc<JobTicket> {
        let ticket = Arc::new(JobTicket::new(priority, fence));
        let pool = match priority {
            Priority::Normal => &self.normal,
            Priority::Low => &self.low_priority,
        };

        self.metrics.record_enqueue();
        let job = Job {
            ticket: Arc::clone(&ticket),
            func,
        };
        let sent = pool
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(job).is_ok());
        if !sent && ticket.transition(JobStatus::Queued, JobStatus::Dropped) {
            ticket.fence.signal(FenceState::Failed);
            self.metrics.record_drop();
            error!(job = ticket.id.0, "compile queue is shut down, job dropped");
        } else {
            debug!(job = ticket.id.0, queue = priority.name(), "compile job queued");
        }
        ticket
    }

    /// Remove a job that has not started yet. Returns false if it already
    /// started or was dropped before.
    pub fn cancel_job(&self, ticket: &JobTicket) -> bool {
        if !ticket.transition(JobStatus::Queued, JobStatus::Dropped) {
            return false;
        }
        ticket.fence.signal(FenceState::Failed);
        self.metrics.record_drop();
        debug!(job = ticket.id.0, "queued compile job dropped");
        true
    }

    /// Remove a job that has not started yet, or wait for it to finish.
    pub fn drop_job(&self, ticket: &JobTicket) {
        if !self.cancel_job(ticket) {
            ticket.fence.wait();
        }
    }
}

impl Drop for CompilerQueues {
    fn drop(&mut self) {
        self.normal.shutdown();
        self.low_priority.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::ShaderBinary;
    use crate::codegen::CompileTarget;
    use crate::key::ShaderPartKey;
    use crate::shader::ShaderProgram;
    use crate::utils::errors::Diagnostics;
    use crossbeam_channel::bounded;
    use std::time::Duration;

    struct NullGenerator;
    struct NullContext;

    impl GeneratorContext for NullContext {
        fn compile(
            &mut self,
            _program: &ShaderProgram,
            _target: CompileTarget<'_>,
        ) -> Result<ShaderBinary, Diagnostics> {
            Ok(ShaderBinary::default())
        }

        fn compile_part(&mut self, _key: &ShaderPartKey) -> Result<ShaderBinary, Diagnostics> {
            Ok(ShaderBinary::default())
        }
    }

    impl CodeGenerator for NullGenerator {
        fn identifier(&self) -> String {
            "null".into()
        }

        fn create_context(&self) -> Box<dyn GeneratorContext> {
            Box::new(NullContext)
        }
    }

    fn queues(threads: usize) -> CompilerQueues {
        let generator: Arc<dyn CodeGenerator> = Arc::new(NullGenerator);
        CompilerQueues::new(
            QueueConfig {
                threads,
                low_priority_threads: 1,
            },
            &generator,
            CompilerMetrics::new(),
        )
        .unwrap()
    }

    #[test]
    fn job_outcome_resolves_fence() {
        let queues = queues(2);
        let fence = Arc::new(Fence::new());
        let ticket = queues.add_job(
            Priority::Normal,
            Arc::clone(&fence),
            Box::new(|_: &mut WorkerContext| FenceState::Failed),
        );
        assert_eq!(fence.wait(), FenceState::Failed);
        assert_eq!(ticket.status(), JobStatus::Done);
    }

    #[test]
    fn low_priority_job_sees_its_queue() {
        let queues = queues(1);
        let fence = Arc::new(Fence::new());
        let (tx, rx) = bounded(1);
        queues.add_job(
            Priority::Low,
            Arc::clone(&fence),
            Box::new(move |ctx: &mut WorkerContext| {
                tx.send(ctx.priority).unwrap();
                FenceState::Ready
            }),
        );
        assert_eq!(fence.wait(), FenceState::Ready);
        assert_eq!(rx.recv().unwrap(), Priority::Low);
    }

    #[test]
    fn queued_job_can_be_dropped() {
        let queues = queues(1);
        let (release_tx, release_rx) = bounded::<()>(0);
        let (started_tx, started_rx) = bounded::<()>(1);

        let blocker = Arc::new(Fence::new());
        queues.add_job(
            Priority::Normal,
            Arc::clone(&blocker),
            Box::new(move |_: &mut WorkerContext| {
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                FenceState::Ready
            }),
        );
        started_rx.recv().unwrap();

        let victim = Arc::new(Fence::new());
        let ticket = queues.add_job(
            Priority::Normal,
            Arc::clone(&victim),
            Box::new(|_: &mut WorkerContext| -> FenceState {
                panic!("dropped job must not run")
            }),
        );
        queues.drop_job(&ticket);
        assert_eq!(ticket.status(), JobStatus::Dropped);
        assert_eq!(victim.state(), FenceState::Failed);

        release_tx.send(()).unwrap();
        assert_eq!(blocker.wait(), FenceState::Ready);
    }

    #[test]
    fn panicking_job_fails_without_killing_worker() {
        let queues = queues(1);
        let first = Arc::new(Fence::new());
        queues.add_job(
            Priority::Normal,
            Arc::clone(&first),
            Box::new(|_: &mut WorkerContext| -> FenceState { panic!("generator crashed") }),
        );
        assert_eq!(first.wait(), FenceState::Failed);

        let second = Arc::new(Fence::new());
        queues.add_job(
            Priority::Normal,
            Arc::clone(&second),
            Box::new(|_: &mut WorkerContext| {
                std::thread::sleep(Duration::from_millis(1));
                FenceState::Ready
            }),
        );
        assert_eq!(second.wait(), FenceState::Ready);
    }
}
