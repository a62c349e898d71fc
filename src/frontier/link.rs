use crate::frontier::{Frontier, WorkUnit};
use crate::url::ScopeFilter;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::Notify;
use tracing::debug;
use url::Url;

/// Queue, visited set and in-flight count, guarded together so that
/// dequeue-and-mark-visited is a single step
#[derive(Debug, Default)]
struct LinkQueue {
    queue: VecDeque<WorkUnit>,
    visited: HashSet<String>,
    attempts: HashMap<String, u32>,
    in_flight: usize,
    closed: bool,
}

/// Link-following frontier
///
/// Duplicates may sit in the queue; they are resolved against the visited
/// set when dequeued, so each unit reaches exactly one worker. The frontier
/// is exhausted when the queue is empty and no handed-out unit is still
/// being processed (a running unit may still submit children).
pub struct LinkFrontier {
    inner: Mutex<LinkQueue>,
    scope: ScopeFilter,
    notify: Notify,
    max_attempts: u32,
}

impl LinkFrontier {
    /// Creates a frontier seeded with `seed`
    ///
    /// The seed bypasses the scope filter; everything submitted later must pass it.
    pub fn new(scope: ScopeFilter, seed: WorkUnit, max_attempts: u32) -> Self {
        let mut inner = LinkQueue::default();
        inner.queue.push_back(seed);

        Self {
            inner: Mutex::new(inner),
            scope,
            notify: Notify::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    fn admits(&self, unit: &WorkUnit) -> bool {
        match Url::parse(unit.key()) {
            Ok(url) => self.scope.admits(&url),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Frontier for LinkFrontier {
    async fn next(&self) -> Option<WorkUnit> {
        loop {
            // Registered before inspecting the queue so a wakeup between the
            // check and the await is not lost.
            let notified = self.notify.notified();

            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return None;
                }

                while let Some(unit) = inner.queue.pop_front() {
                    if inner.visited.insert(unit.key().to_string()) {
                        inner.in_flight += 1;
                        return Some(unit);
                    }
                }

                if inner.in_flight == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }

    fn submit(&self, children: Vec<WorkUnit>) {
        let mut added = 0;

        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }

            for child in children {
                if inner.visited.contains(child.key()) || !self.admits(&child) {
                    continue;
                }
                inner.queue.push_back(child);
                added += 1;
            }
        }

        if added > 0 {
            debug!("Queued {} links", added);
            self.notify.notify_waiters();
        }
    }

    fn finish(&self, _unit: &WorkUnit) {
        {
            let mut inner = self.inner.lock();
            inner.in_flight = inner.in_flight.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    fn retry(&self, unit: WorkUnit) -> bool {
        let requeued = {
            let mut inner = self.inner.lock();
            inner.in_flight = inner.in_flight.saturating_sub(1);

            let attempts = inner.attempts.entry(unit.key().to_string()).or_insert(0);
            *attempts += 1;

            if *attempts < self.max_attempts && !inner.closed {
                inner.visited.remove(unit.key());
                inner.queue.push_back(unit);
                true
            } else {
                false
            }
        };

        self.notify.notify_waiters();
        requeued
    }

    fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }
}
