//! Output tasks and the fixed arena that orders them.
//!
//! Tasks live in a fixed array linked by index. A slot is on the free list,
//! in flight (queued or executing), or on the pending list, which is kept in
//! execution order: smaller priority number first, FIFO among equals.
//!
//! A new task goes in front of the first pending task with a strictly larger
//! priority number, and every task it passes is charged one bypass. Under
//! [`Fairness::Bounded`] a task that has been passed `n` times can no longer
//! be passed, so a steady stream of urgent tasks cannot starve the rest.
//! Sleep tasks never accrue bypasses: they are meant to run last.

use crate::hal::Instant;

use super::pool::SinkId;

const NIL: u16 = u16::MAX;

/// How far priority may reorder pending tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fairness {
    /// Pure priority order.
    Strict,
    /// A task is passed at most this many times.
    Bounded(u8),
}

impl Fairness {
    pub const DEFAULT: Fairness = Fairness::Bounded(8);

    /// `0` means strict.
    pub fn from_limit(limit: u8) -> Self {
        match limit {
            0 => Fairness::Strict,
            n => Fairness::Bounded(n),
        }
    }
}

impl Default for Fairness {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Deliver a pooled buffer to one sink, then release that sink's permit.
    Send { sink: SinkId, buffer: u16 },
    /// Block the I/O context until the deadline.
    SleepUntil(Instant),
}

/// One unit of output work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Task {
    pub action: Action,
    /// Smaller runs first.
    pub priority: u8,
    /// Emission order, for diagnostics.
    pub seq: u32,
    bypassed: u8,
}

impl Task {
    const IDLE: Task = Task::new(Action::SleepUntil(Instant::ZERO), u8::MAX, 0);

    pub const fn new(action: Action, priority: u8, seq: u32) -> Self {
        Self {
            action,
            priority,
            seq,
            bypassed: 0,
        }
    }

    /// Times a later task was ordered ahead of this one.
    pub fn bypassed(&self) -> u8 {
        self.bypassed
    }

    pub fn is_sleep(&self) -> bool {
        matches!(self.action, Action::SleepUntil(_))
    }
}

#[derive(Clone, Copy)]
struct Node {
    task: Task,
    next: u16,
}

/// `Q` task slots.
pub struct TaskArena<const Q: usize> {
    nodes: [Node; Q],
    free_head: u16,
    free_len: usize,
    pending_head: u16,
    pending_len: usize,
    fairness: Fairness,
}

impl<const Q: usize> TaskArena<Q> {
    pub const fn new(fairness: Fairness) -> Self {
        assert!(Q > 0 && Q < NIL as usize, "arena needs 1..65535 slots");

        let mut nodes = [Node {
            task: Task::IDLE,
            next: NIL,
        }; Q];
        let mut i = 0;
        while i + 1 < Q {
            nodes[i].next = (i + 1) as u16;
            i += 1;
        }

        Self {
            nodes,
            free_head: 0,
            free_len: Q,
            pending_head: NIL,
            pending_len: 0,
            fairness,
        }
    }

    pub fn fairness(&self) -> Fairness {
        self.fairness
    }

    pub fn set_fairness(&mut self, fairness: Fairness) {
        self.fairness = fairness;
    }

    /// Take a free slot for `task`.
    pub fn alloc(&mut self, task: Task) -> Option<u16> {
        let handle = self.free_head;
        if handle == NIL {
            return None;
        }
        let node = &mut self.nodes[handle as usize];
        self.free_head = node.next;
        node.task = task;
        node.next = NIL;
        self.free_len -= 1;
        Some(handle)
    }

    /// Return a slot taken by [`alloc`](Self::alloc).
    pub fn free(&mut self, handle: u16) {
        debug_assert!((handle as usize) < Q);
        let node = &mut self.nodes[handle as usize];
        node.next = self.free_head;
        self.free_head = handle;
        self.free_len += 1;
    }

    /// Put an allocated task into execution order.
    pub fn insert_pending(&mut self, handle: u16) {
        debug_assert!((handle as usize) < Q);
        let priority = self.nodes[handle as usize].task.priority;

        // (predecessor, first passed task)
        let mut at: Option<(u16, u16)> = None;
        let mut prev = NIL;
        let mut cur = self.pending_head;
        while cur != NIL {
            let node = &self.nodes[cur as usize];
            if at.is_none() && node.task.priority > priority {
                at = Some((prev, cur));
            }
            if at.is_some() && self.saturated(&node.task) {
                at = None;
            }
            prev = cur;
            cur = node.next;
        }

        match at {
            Some((before, first)) => {
                self.nodes[handle as usize].next = first;
                self.link_after(before, handle);

                let mut cur = first;
                while cur != NIL {
                    let node = &mut self.nodes[cur as usize];
                    if !node.task.is_sleep() {
                        node.task.bypassed = node.task.bypassed.saturating_add(1);
                    }
                    cur = node.next;
                }
            }
            None => {
                self.nodes[handle as usize].next = NIL;
                self.link_after(prev, handle);
            }
        }
        self.pending_len += 1;
    }

    /// Unlink the next task to execute. The slot stays allocated until
    /// [`free`](Self::free).
    pub fn pop_pending(&mut self) -> Option<(u16, Task)> {
        let handle = self.pending_head;
        if handle == NIL {
            return None;
        }
        let node = self.nodes[handle as usize];
        self.pending_head = node.next;
        self.pending_len -= 1;
        Some((handle, node.task))
    }

    /// Pending tasks in execution order.
    pub fn pending(&self) -> Pending<'_, Q> {
        Pending {
            arena: self,
            cur: self.pending_head,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending_len
    }

    pub fn free_len(&self) -> usize {
        self.free_len
    }

    pub const fn capacity(&self) -> usize {
        Q
    }

    fn saturated(&self, task: &Task) -> bool {
        match self.fairness {
            Fairness::Strict => false,
            Fairness::Bounded(limit) => !task.is_sleep() && task.bypassed >= limit,
        }
    }

    fn link_after(&mut self, before: u16, handle: u16) {
        if before == NIL {
            self.pending_head = handle;
        } else {
            self.nodes[before as usize].next = handle;
        }
    }
}

/// Iterator over [`TaskArena::pending`].
pub struct Pending<'a, const Q: usize> {
    arena: &'a TaskArena<Q>,
    cur: u16,
}

impl<'a, const Q: usize> Iterator for Pending<'a, Q> {
    type Item = &'a Task;

    fn next(&mut self) -> Option<&'a Task> {
        if self.cur == NIL {
            return None;
        }
        let node = &self.arena.nodes[self.cur as usize];
        self.cur = node.next;
        Some(&node.task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(priority: u8, seq: u32) -> Task {
        Task::new(
            Action::Send {
                sink: SinkId::Console,
                buffer: 0,
            },
            priority,
            seq,
        )
    }

    fn enqueue<const Q: usize>(arena: &mut TaskArena<Q>, task: Task) {
        let handle = arena.alloc(task).unwrap();
        arena.insert_pending(handle);
    }

    fn order<const Q: usize>(arena: &TaskArena<Q>) -> Vec<u32> {
        arena.pending().map(|t| t.seq).collect()
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut arena = TaskArena::<8>::new(Fairness::Strict);
        enqueue(&mut arena, send(3, 0));
        enqueue(&mut arena, send(1, 1));
        enqueue(&mut arena, send(3, 2));
        enqueue(&mut arena, send(1, 3));

        assert_eq!(order(&arena), [1, 3, 0, 2]);
    }

    #[test]
    fn test_alloc_exhaustion_and_free() {
        let mut arena = TaskArena::<2>::new(Fairness::Strict);
        let a = arena.alloc(send(1, 0)).unwrap();
        let _b = arena.alloc(send(1, 1)).unwrap();
        assert!(arena.alloc(send(1, 2)).is_none());
        assert_eq!(arena.free_len(), 0);

        arena.free(a);
        assert!(arena.alloc(send(1, 3)).is_some());
    }

    #[test]
    fn test_bounded_bypass() {
        let mut arena = TaskArena::<8>::new(Fairness::Bounded(2));
        enqueue(&mut arena, send(5, 0));
        enqueue(&mut arena, send(1, 1));
        enqueue(&mut arena, send(1, 2));
        // seq 0 has now been passed twice and holds its place
        enqueue(&mut arena, send(1, 3));

        assert_eq!(order(&arena), [1, 2, 0, 3]);
    }

    #[test]
    fn test_sleep_never_saturates() {
        let mut arena = TaskArena::<8>::new(Fairness::Bounded(1));
        enqueue(&mut arena, Task::new(Action::SleepUntil(Instant::ZERO), 10, 0));
        enqueue(&mut arena, send(3, 1));
        enqueue(&mut arena, send(3, 2));

        assert_eq!(order(&arena), [1, 2, 0]);
        assert_eq!(arena.pending().last().map(Task::bypassed), Some(0));
    }
}
