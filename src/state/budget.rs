use std::sync::atomic::{AtomicU64, Ordering};

/// Global cap on items acquired across all workers in a run
///
/// A limit of zero means unlimited. The count never exceeds the limit:
/// once it is reached every further [`try_increment`](Budget::try_increment)
/// fails without changing the count.
#[derive(Debug)]
pub struct Budget {
    limit: u64,
    count: AtomicU64,
}

impl Budget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            count: AtomicU64::new(0),
        }
    }

    /// Claims one item from the budget
    ///
    /// # Returns
    ///
    /// * `true` - The item was counted and is within the limit
    /// * `false` - The budget is exhausted; the caller must stop
    pub fn try_increment(&self) -> bool {
        if self.limit == 0 {
            self.count.fetch_add(1, Ordering::AcqRel);
            return true;
        }

        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.limit).then_some(count + 1)
            })
            .is_ok()
    }

    /// Returns true once no further increments will be accepted
    pub fn is_reached(&self) -> bool {
        self.limit > 0 && self.count() >= self.limit
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Items left before the limit, `None` when unlimited
    pub fn remaining(&self) -> Option<u64> {
        (self.limit > 0).then(|| self.limit.saturating_sub(self.count()))
    }
}
