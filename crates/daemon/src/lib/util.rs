use std::sync::atomic::{AtomicBool, Ordering};

/// Per-method reentrancy guard: while one caller holds the slot, later
/// callers observe a no-op. Replaces the source system's `@OneAtTime`
/// decorator with a CAS flag.
#[derive(Default)]
pub struct OneAtTime {
    busy: AtomicBool,
}

pub struct OneAtTimePermit<'a> {
    guard: &'a OneAtTime,
}

impl OneAtTime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a permit if the slot was free; the slot is released when the
    /// permit drops.
    pub fn try_acquire(&self) -> Option<OneAtTimePermit<'_>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(OneAtTimePermit { guard: self })
        } else {
            None
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for OneAtTimePermit<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn second_acquire_fails_while_permit_is_held() {
        let guard = OneAtTime::new();
        let permit = guard.try_acquire().expect("free slot");
        assert!(guard.try_acquire().is_none());
        drop(permit);
        assert!(guard.try_acquire().is_some());
    }

    #[tokio::test]
    async fn overlapping_tasks_enter_once() {
        let guard = Arc::new(OneAtTime::new());
        let entered = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let guard = Arc::clone(&guard);
            let entered = Arc::clone(&entered);
            handles.push(tokio::spawn(async move {
                if let Some(_permit) = guard.try_acquire() {
                    entered.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }
}
