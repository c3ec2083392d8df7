use crate::error::ErrorKind;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, RwLock,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSnapshot {
    pub running: bool,
    pub error: Option<ErrorKind>,
    pub message: String,
}

#[derive(Debug)]
struct Task {
    state: Mutex<TaskSnapshot>,
}

impl Task {
    fn lock(&self) -> MutexGuard<'_, TaskSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Append-only record of install tasks. The vector is behind a read-write lock
/// and every task carries its own mutex, so a renderer reading task `i` never
/// blocks on, or sees half of, a write to task `j`.
#[derive(Debug, Default)]
pub struct TaskLedger {
    tasks: RwLock<Vec<Arc<Task>>>,
    dirty: AtomicBool,
}

impl TaskLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn append(self: &Arc<Self>, message: impl Into<String>) -> TaskHandle {
        let task = Arc::new(Task {
            state: Mutex::new(TaskSnapshot {
                running: false,
                error: None,
                message: message.into(),
            }),
        });
        let index = {
            let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
            tasks.push(Arc::clone(&task));
            tasks.len() - 1
        };
        self.mark_dirty();
        TaskHandle {
            ledger: Arc::clone(self),
            task,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<TaskSnapshot> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        let task = tasks.get(index)?;
        let snapshot = task.lock().clone();
        Some(snapshot)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Returns whether anything changed since the last call and clears the flag.
    pub fn consume_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}

/// Write access to one task. Not `Clone`: a single orchestrator owns it.
#[derive(Debug)]
pub struct TaskHandle {
    ledger: Arc<TaskLedger>,
    task: Arc<Task>,
    index: usize,
}

impl TaskHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn start(&self, message: impl Into<String>) {
        self.update(true, None, message.into());
    }

    pub fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        {
            let mut state = self.task.lock();
            state.message = message;
        }
        self.ledger.mark_dirty();
    }

    pub fn finish(&self, message: impl Into<String>) {
        self.update(false, None, message.into());
    }

    pub fn fail(&self, kind: ErrorKind, message: impl Into<String>) {
        self.update(false, Some(kind), message.into());
    }

    fn update(&self, running: bool, error: Option<ErrorKind>, message: String) {
        {
            let mut state = self.task.lock();
            *state = TaskSnapshot {
                running,
                error,
                message,
            };
        }
        self.ledger.mark_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Barrier, thread};

    #[test]
    fn append_starts_idle() {
        let ledger = TaskLedger::new();
        let handle = ledger.append("Queued");
        assert_eq!(handle.index(), 0);
        assert_eq!(
            ledger.get(0),
            Some(TaskSnapshot {
                running: false,
                error: None,
                message: "Queued".to_string(),
            })
        );
        assert_eq!(ledger.get(1), None);
    }

    #[test]
    fn indices_follow_append_order() {
        let ledger = TaskLedger::new();
        let first = ledger.append("one");
        let second = ledger.append("two");
        assert_eq!((first.index(), second.index()), (0, 1));
        assert_eq!(ledger.get(1).unwrap().message, "two");
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        const N: usize = 64;
        let ledger = TaskLedger::new();
        let barrier = Arc::new(Barrier::new(N));
        let threads: Vec<_> = (0..N)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    ledger.append(format!("task {i}")).index()
                })
            })
            .collect();
        let indices: HashSet<usize> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(ledger.len(), N);
        assert_eq!(indices, (0..N).collect::<HashSet<usize>>());
        let messages: HashSet<String> = (0..N).map(|i| ledger.get(i).unwrap().message).collect();
        let expected: HashSet<String> = (0..N).map(|i| format!("task {i}")).collect();
        assert_eq!(messages, expected);
    }

    #[test]
    fn readers_never_see_torn_updates() {
        let ledger = TaskLedger::new();
        let handle = ledger.append("idle");
        let writer = thread::spawn(move || {
            for round in 0..2_000 {
                if round % 2 == 0 {
                    handle.start("running");
                } else {
                    handle.fail(ErrorKind::Install, "failed");
                }
            }
            handle.finish("done");
        });

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let snap = ledger.get(0).unwrap();
                        let consistent = matches!(
                            (snap.running, snap.error, snap.message.as_str()),
                            (false, None, "idle")
                                | (true, None, "running")
                                | (false, Some(ErrorKind::Install), "failed")
                                | (false, None, "done")
                        );
                        assert!(consistent, "torn read: {snap:?}");
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(ledger.get(0).unwrap().message, "done");
    }

    #[test]
    fn dirty_flag_is_consumed_once() {
        let ledger = TaskLedger::new();
        assert!(!ledger.consume_dirty());
        let handle = ledger.append("x");
        assert!(ledger.consume_dirty());
        assert!(!ledger.consume_dirty());
        handle.set_message("y");
        assert!(ledger.consume_dirty());
        assert_eq!(ledger.get(0).unwrap().message, "y");
    }
}
