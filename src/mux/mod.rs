//! Output multiplexer.
//!
//! ```text
//! sampler (core 0)                                   I/O context (core 1)
//! ────────────────                                   ────────────────────
//!
//! emit(frame) ──▶ BufferPool ──▶ 2 tasks ──▶ TaskQueue ──▶ TaskArena ──▶ ConsoleSink
//!                 lease, copy    one per     bounded       pending list   WifiSink
//!                 (waits when    sink        hand-off      by priority    sleep
//!                  all leased)
//! ```
//!
//! The sampler hands every message to all sinks and returns without
//! touching slow I/O. The I/O context executes one task at a time, gives
//! back the sink's permit on the buffer whatever the sink reported, and
//! returns the task slot. Sink failures are never reported to the producer.
//!
//! Nothing is ever dropped: the pool bounds the number of messages in
//! flight, and the task capacity covers every buffer on every sink plus one
//! sleep, so the hand-off can only wait, never overflow.

mod pool;
mod queue;
pub mod sinks;
mod task;

pub use pool::{BufferPool, Leased, SinkId};
pub use queue::TaskQueue;
pub use sinks::{ConsoleSink, WifiSink};
pub use task::{Action, Fairness, Pending, Task, TaskArena};

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::hal::{Clock, Instant, SerialTimeout};
use crate::modem::SendFailure;
use crate::sync::SpinLock;

/// Buffers in the node's output pool.
pub const BUFFER_COUNT: usize = 20;

/// Bytes per buffer.
pub const BUFFER_LEN: usize = 256;

/// Task slots, and hand-off queue length.
pub const TASK_SLOTS: usize = 64;

/// The multiplexer the firmware runs.
pub type NodeOutput = OutputMux<BUFFER_COUNT, BUFFER_LEN, TASK_SLOTS>;

/// A destination for pooled messages.
pub trait Sink {
    fn send(&mut self, payload: &[u8]) -> Result<(), SinkError>;
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Nobody is listening; the message is skipped for this sink.
    #[error("sink not connected")]
    NotConnected,
    #[error(transparent)]
    Serial(#[from] SerialTimeout),
    #[error(transparent)]
    Wifi(#[from] SendFailure),
}

impl SinkError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "S01",
            Self::Serial(_) => "S02",
            Self::Wifi(_) => "S03",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MuxError {
    #[error("all output buffers are in use")]
    PoolExhausted,
}

impl MuxError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PoolExhausted => "X01",
        }
    }
}

/// Scheduling parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MuxSettings {
    pub console_priority: u8,
    pub wifi_priority: u8,
    pub sleep_priority: u8,
    pub fairness: Fairness,
}

impl MuxSettings {
    pub const DEFAULT: MuxSettings = MuxSettings {
        console_priority: 4,
        wifi_priority: 3,
        sleep_priority: 10,
        fairness: Fairness::DEFAULT,
    };
}

impl Default for MuxSettings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A message accepted by the multiplexer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Emitted {
    pub buffer: u16,
    pub seq: u32,
    /// Only the first buffer-length bytes were kept.
    pub truncated: bool,
}

/// What happened to an executed task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Delivered,
    Failed(SinkError),
    Slept,
}

/// One task run by [`OutputMux::process`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Executed {
    pub task: Task,
    pub outcome: Outcome,
}

/// `B` buffers of `L` bytes, `Q` task slots (a power of two).
pub struct OutputMux<const B: usize, const L: usize, const Q: usize> {
    pool: BufferPool<B, L>,
    queue: TaskQueue<Q>,
    arena: SpinLock<TaskArena<Q>>,
    console_priority: AtomicU8,
    wifi_priority: AtomicU8,
    sleep_priority: AtomicU8,
    sleep_pending: AtomicBool,
    seq: AtomicU32,
}

impl<const B: usize, const L: usize, const Q: usize> OutputMux<B, L, Q> {
    pub const fn new(settings: MuxSettings) -> Self {
        const {
            assert!(Q >= 2 * B + 1, "task slots must cover two sinks per buffer plus a sleep");
            assert!(Q.is_power_of_two(), "task slots must be a power of two");
        }

        Self {
            pool: BufferPool::new(),
            queue: TaskQueue::new(),
            arena: SpinLock::new(TaskArena::new(settings.fairness)),
            console_priority: AtomicU8::new(settings.console_priority),
            wifi_priority: AtomicU8::new(settings.wifi_priority),
            sleep_priority: AtomicU8::new(settings.sleep_priority),
            sleep_pending: AtomicBool::new(false),
            seq: AtomicU32::new(0),
        }
    }

    /// Apply new settings. Tasks already pending keep their priority.
    pub fn configure(&self, settings: MuxSettings) {
        self.console_priority
            .store(settings.console_priority, Ordering::Relaxed);
        self.wifi_priority
            .store(settings.wifi_priority, Ordering::Relaxed);
        self.sleep_priority
            .store(settings.sleep_priority, Ordering::Relaxed);
        self.arena.lock().set_fairness(settings.fairness);
    }

    pub fn settings(&self) -> MuxSettings {
        MuxSettings {
            console_priority: self.console_priority.load(Ordering::Relaxed),
            wifi_priority: self.wifi_priority.load(Ordering::Relaxed),
            sleep_priority: self.sleep_priority.load(Ordering::Relaxed),
            fairness: self.arena.lock().fairness(),
        }
    }

    pub fn set_fairness(&self, fairness: Fairness) {
        self.arena.lock().set_fairness(fairness);
    }

    /// Queue `message` for every sink, spinning while the pool is exhausted.
    pub fn emit(&self, message: &[u8]) -> Emitted {
        self.emit_with(message, core::hint::spin_loop)
    }

    /// Queue `message` for every sink, calling `relax` while waiting for a
    /// free buffer or task slot.
    pub fn emit_with(&self, message: &[u8], mut relax: impl FnMut()) -> Emitted {
        let leased = self.pool.lease_with(message, &mut relax);
        self.dispatch(leased, &mut relax)
    }

    /// Queue `message` unless every buffer is in use.
    pub fn try_emit(&self, message: &[u8]) -> Result<Emitted, MuxError> {
        let leased = self
            .pool
            .try_lease(message)
            .ok_or(MuxError::PoolExhausted)?;
        let mut relax = core::hint::spin_loop;
        Ok(self.dispatch(leased, &mut relax))
    }

    fn dispatch(&self, leased: Leased, relax: &mut impl FnMut()) -> Emitted {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        for sink in SinkId::ALL {
            let action = Action::Send {
                sink,
                buffer: leased.index,
            };
            self.enqueue(Task::new(action, self.priority_of(sink), seq), relax);
        }

        Emitted {
            buffer: leased.index,
            seq,
            truncated: leased.truncated,
        }
    }

    /// Ask the I/O context to idle until `deadline` once it reaches the task.
    ///
    /// At most one sleep is outstanding; returns `false` if one already is.
    pub fn request_sleep_until(&self, deadline: Instant) -> bool {
        if self.sleep_pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let priority = self.sleep_priority.load(Ordering::Relaxed);
        let mut relax = core::hint::spin_loop;
        self.enqueue(Task::new(Action::SleepUntil(deadline), priority, seq), &mut relax);
        true
    }

    fn enqueue(&self, task: Task, relax: &mut impl FnMut()) {
        let handle = loop {
            if let Some(handle) = self.arena.lock().alloc(task) {
                break handle;
            }
            relax();
        };
        while self.queue.push(handle).is_err() {
            relax();
        }
    }

    fn priority_of(&self, sink: SinkId) -> u8 {
        match sink {
            SinkId::Console => self.console_priority.load(Ordering::Relaxed),
            SinkId::Wifi => self.wifi_priority.load(Ordering::Relaxed),
        }
    }

    /// Execute the most urgent task. `None` when there was nothing to do.
    pub fn process<C, W, K>(&self, console: &mut C, wifi: &mut W, clock: &K) -> Option<Executed>
    where
        C: Sink,
        W: Sink,
        K: Clock,
    {
        let (handle, task) = {
            let mut arena = self.arena.lock();
            while let Some(handle) = self.queue.pop() {
                arena.insert_pending(handle);
            }
            arena.pop_pending()
        }?;

        let outcome = match task.action {
            Action::Send { sink, buffer } => {
                let result = self.pool.with_payload(buffer, sink, |payload| match sink {
                    SinkId::Console => console.send(payload),
                    SinkId::Wifi => wifi.send(payload),
                });
                self.pool.release(buffer, sink);
                match result {
                    Some(Ok(())) => Outcome::Delivered,
                    Some(Err(e)) => Outcome::Failed(e),
                    // Permit already returned; nothing to deliver
                    None => Outcome::Failed(SinkError::NotConnected),
                }
            }
            Action::SleepUntil(deadline) => {
                clock.sleep_until(deadline);
                self.sleep_pending.store(false, Ordering::Release);
                Outcome::Slept
            }
        };

        self.arena.lock().free(handle);
        Some(Executed { task, outcome })
    }

    /// Run [`process`](Self::process) until no task is left. Returns how
    /// many ran.
    pub fn run_until_idle<C, W, K>(&self, console: &mut C, wifi: &mut W, clock: &K) -> usize
    where
        C: Sink,
        W: Sink,
        K: Clock,
    {
        let mut count = 0;
        while self.process(console, wifi, clock).is_some() {
            count += 1;
        }
        count
    }

    /// Buffers free for [`emit`](Self::emit).
    pub fn available_buffers(&self) -> usize {
        self.pool.available()
    }

    /// Task slots not holding a queued, pending or executing task.
    pub fn free_tasks(&self) -> usize {
        self.arena.lock().free_len()
    }

    /// Tasks waiting to execute.
    pub fn pending_tasks(&self) -> usize {
        self.queue.len() + self.arena.lock().pending_len()
    }

    pub fn sleep_pending(&self) -> bool {
        self.sleep_pending.load(Ordering::Acquire)
    }

    pub const fn buffer_len(&self) -> usize {
        L
    }
}
