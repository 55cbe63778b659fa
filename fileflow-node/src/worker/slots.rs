//! Execution slots: the set of jobs currently running on this node.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Answers "is it safe to interrupt the node right now?".
pub trait ActiveRunners: Send + Sync {
    fn has_active_runners(&self) -> bool;
}

/// Mutex-guarded set of job ids occupying an execution slot.
#[derive(Debug, Default)]
pub struct ActiveJobSet {
    jobs: Mutex<HashSet<Uuid>>,
}

impl ActiveJobSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim a slot for `job_uid` if fewer than `capacity` jobs are running.
    ///
    /// The returned guard releases the slot when dropped, on every path.
    pub fn try_claim(self: &Arc<Self>, job_uid: Uuid, capacity: usize) -> Option<SlotGuard> {
        let mut jobs = self.jobs.lock();
        if jobs.len() >= capacity || !jobs.insert(job_uid) {
            return None;
        }
        debug!(job_id = %job_uid, active = jobs.len(), capacity, "Claimed execution slot");
        Some(SlotGuard {
            set: Arc::clone(self),
            job_uid,
        })
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    pub fn contains(&self, job_uid: &Uuid) -> bool {
        self.jobs.lock().contains(job_uid)
    }

    fn release(&self, job_uid: &Uuid) {
        let mut jobs = self.jobs.lock();
        jobs.remove(job_uid);
        debug!(job_id = %job_uid, active = jobs.len(), "Released execution slot");
    }
}

impl ActiveRunners for ActiveJobSet {
    fn has_active_runners(&self) -> bool {
        !self.is_empty()
    }
}

/// Occupies one slot in an [`ActiveJobSet`] until dropped.
#[derive(Debug)]
pub struct SlotGuard {
    set: Arc<ActiveJobSet>,
    job_uid: Uuid,
}

impl SlotGuard {
    pub fn job_uid(&self) -> Uuid {
        self.job_uid
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.set.release(&self.job_uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_respects_capacity() {
        let set = ActiveJobSet::new();
        let a = set.try_claim(Uuid::new_v4(), 2);
        let b = set.try_claim(Uuid::new_v4(), 2);
        let c = set.try_claim(Uuid::new_v4(), 2);

        assert!(a.is_some());
        assert!(b.is_some());
        assert!(c.is_none());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_drop_releases_slot() {
        let set = ActiveJobSet::new();
        let guard = set.try_claim(Uuid::new_v4(), 1).unwrap();
        assert!(set.has_active_runners());

        drop(guard);
        assert!(!set.has_active_runners());
        assert!(set.try_claim(Uuid::new_v4(), 1).is_some());
    }

    #[test]
    fn test_duplicate_job_rejected() {
        let set = ActiveJobSet::new();
        let uid = Uuid::new_v4();
        let _guard = set.try_claim(uid, 4).unwrap();
        assert!(set.try_claim(uid, 4).is_none());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_slot_released_on_panic() {
        let set = ActiveJobSet::new();
        let inner = Arc::clone(&set);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = inner.try_claim(Uuid::new_v4(), 1).unwrap();
            panic!("job crashed");
        }));
        assert!(result.is_err());
        assert!(set.is_empty());
    }

    #[test]
    fn test_concurrent_claims_never_exceed_capacity() {
        let set = ActiveJobSet::new();
        let capacity = 3;
        let peak = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let set = Arc::clone(&set);
                let peak = Arc::clone(&peak);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if let Some(guard) = set.try_claim(Uuid::new_v4(), capacity) {
                            peak.fetch_max(set.len(), std::sync::atomic::Ordering::SeqCst);
                            drop(guard);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(peak.load(std::sync::atomic::Ordering::SeqCst) <= capacity);
        assert!(set.is_empty());
    }
}
