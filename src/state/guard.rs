/// Test-and-set flag for mutually exclusive fetch groups
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

pub struct FetchGuard {
    name: &'static str,
    in_progress: AtomicBool,
}

impl FetchGuard {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(FetchGuard {
            name,
            in_progress: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Set the flag if clear. `None` means a fetch of this group is already running.
    pub fn try_acquire(self: &Arc<Self>) -> Option<GuardPermit> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                debug!("{} guard acquired", self.name);
                GuardPermit {
                    guard: Arc::clone(self),
                }
            })
    }

    pub fn is_set(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }
}

/// Clears the guard when dropped, including on panic or early return
pub struct GuardPermit {
    guard: Arc<FetchGuard>,
}

impl Drop for GuardPermit {
    fn drop(&mut self) {
        self.guard.in_progress.store(false, Ordering::Release);
        debug!("{} guard released", self.guard.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected() {
        let guard = FetchGuard::new("portfolio");
        let permit = guard.try_acquire();
        assert!(permit.is_some());
        assert!(guard.is_set());
        assert!(guard.try_acquire().is_none());

        drop(permit);
        assert!(!guard.is_set());
        assert!(guard.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_released_when_task_panics() {
        let guard = FetchGuard::new("nifty50");
        let permit = guard.try_acquire().unwrap();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            panic!("fetch blew up");
        });
        assert!(handle.await.is_err());
        assert!(!guard.is_set());
    }
}
