//! Deferred work, run breadth-first after the main descent returns.

use std::collections::VecDeque;

use tracing::trace;

use super::reader::LineSource;
use crate::model::{Classification, EntityPath};

/// A unit of deferred parser work. Each carries the data it needs.
pub enum Task<'a> {
    /// Parse a complete message from `source` into the root entity.
    ParseRoot { source: LineSource<'a> },
    /// Re-read the decoded body of the container at `path` and parse it
    /// as `class`.
    Reparse {
        path: EntityPath,
        class: Classification,
        depth: usize,
    },
    /// Offer the finished leaf at `path` to the redo hooks.
    Redo { path: EntityPath, depth: usize },
}

impl Task<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ParseRoot { .. } => "parse-root",
            Self::Reparse { .. } => "reparse",
            Self::Redo { .. } => "redo",
        }
    }
}

impl<'a> TaskQueue<Task<'a>> {
    /// Enqueue a parser task under its own name.
    pub fn push(&mut self, task: Task<'a>) {
        self.enqueue(task.name(), task);
    }
}

/// Strict FIFO of named work items.
#[derive(Debug)]
pub struct TaskQueue<T> {
    items: VecDeque<(&'static str, T)>,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, name: &'static str, work: T) {
        trace!(task = name, queued = self.items.len() + 1, "Enqueued task");
        self.items.push_back((name, work));
    }

    pub fn pop(&mut self) -> Option<(&'static str, T)> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Run every queued item in order, including items enqueued by `run`
    /// while draining. Stops at the first error; remaining items are
    /// dropped with the queue.
    pub fn drain_all<E>(
        &mut self,
        mut run: impl FnMut(&mut Self, T) -> Result<(), E>,
    ) -> Result<(), E> {
        while let Some((name, work)) = self.pop() {
            trace!(task = name, remaining = self.items.len(), "Running task");
            run(self, work)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_including_nested_enqueues() {
        let mut q: TaskQueue<u32> = TaskQueue::new();
        q.enqueue("a", 1);
        q.enqueue("b", 2);

        let mut seen = Vec::new();
        q.drain_all(|q, n| {
            seen.push(n);
            if n < 10 {
                q.enqueue("child", n * 10);
                q.enqueue("child", n * 10 + 1);
            }
            Ok::<(), ()>(())
        })
        .unwrap();

        assert_eq!(seen, vec![1, 2, 10, 11, 20, 21]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_drain_stops_at_error() {
        let mut q: TaskQueue<u32> = TaskQueue::new();
        for n in 0..5 {
            q.enqueue("n", n);
        }
        let mut seen = Vec::new();
        let res = q.drain_all(|_, n| {
            seen.push(n);
            if n == 2 {
                Err("boom")
            } else {
                Ok(())
            }
        });
        assert_eq!(res, Err("boom"));
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_push_uses_task_name() {
        let mut q: TaskQueue<Task<'_>> = TaskQueue::new();
        q.push(Task::Reparse {
            path: vec![0],
            class: Classification::Multipart,
            depth: 1,
        });
        q.push(Task::Redo {
            path: vec![0, 1],
            depth: 2,
        });

        let (name, task) = q.pop().unwrap();
        assert_eq!(name, "reparse");
        assert!(matches!(task, Task::Reparse { ref path, .. } if path == &vec![0]));
        assert_eq!(q.pop().map(|(name, _)| name), Some("redo"));
        assert!(q.is_empty());
    }
}
