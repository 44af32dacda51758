//! Admission control for concurrent resource loads.
//!
//! At most `max_active` loads hold a permit at once. Excess requests wait in
//! a priority queue (priority desc, arrival order) and are handed a permit
//! directly when one is released, so a freed slot never goes to a late
//! arrival ahead of a queued request.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::resource::LoadError;
use crate::scheduler::PriorityQueue;

struct AdmissionState {
    max_active: usize,
    active: usize,
    pending: PriorityQueue<oneshot::Sender<AdmissionPermit>>,
    closed: bool,
}

/// Priority-ordered counting gate for in-flight loads.
#[derive(Clone)]
pub struct LoadAdmission {
    state: Arc<Mutex<AdmissionState>>,
}

impl LoadAdmission {
    pub fn new(max_active: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(AdmissionState {
                max_active: max_active.max(1),
                active: 0,
                pending: PriorityQueue::new(),
                closed: false,
            })),
        }
    }

    /// Wait for a load slot. Fails only once the gate has been closed.
    pub async fn acquire(&self, priority: i32) -> Result<AdmissionPermit, LoadError> {
        let rx = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(LoadError::ShutDown);
            }
            if state.active < state.max_active {
                state.active += 1;
                return Ok(AdmissionPermit { admission: Some(self.clone()) });
            }
            let (tx, rx) = oneshot::channel();
            state.pending.push(tx, priority);
            rx
        };
        rx.await.map_err(|_| LoadError::ShutDown)
    }

    /// Number of permits currently held.
    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    /// Number of requests waiting for a permit.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Reject all waiting and future requests.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        // Dropping the senders wakes every waiter with an error.
        state.pending.clear();
    }

    fn release(&self) {
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.pending.pop() {
                    Some(tx) if !state.closed => tx,
                    _ => {
                        state.active = state.active.saturating_sub(1);
                        return;
                    }
                }
            };
            let permit = AdmissionPermit { admission: Some(self.clone()) };
            match next.send(permit) {
                Ok(()) => return,
                // Waiter gave up; disarm the bounced permit and keep the slot
                // for the next one in line.
                Err(mut bounced) => bounced.admission = None,
            }
        }
    }
}

/// RAII load slot. Dropping it admits the next pending request.
pub struct AdmissionPermit {
    admission: Option<LoadAdmission>,
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("armed", &self.admission.is_some())
            .finish()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Some(admission) = self.admission.take() {
            admission.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn grants_up_to_capacity() {
        let admission = LoadAdmission::new(2);
        let a = admission.acquire(0).await.unwrap();
        let _b = admission.acquire(0).await.unwrap();
        assert_eq!(admission.active(), 2);

        let waiter = {
            let admission = admission.clone();
            tokio::spawn(async move { admission.acquire(0).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(admission.pending(), 1);

        drop(a);
        waiter.await.unwrap().unwrap();
        assert_eq!(admission.pending(), 0);
    }

    #[tokio::test]
    async fn released_slot_goes_to_highest_priority() {
        let admission = LoadAdmission::new(1);
        let holder = admission.acquire(0).await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for priority in [1, 5, 3] {
            let admission = admission.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _permit = admission.acquire(priority).await.unwrap();
                order.lock().push(priority);
            }));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(admission.pending(), 3);

        drop(holder);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![5, 3, 1]);
        assert_eq!(admission.active(), 0);
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_leak_slot() {
        let admission = LoadAdmission::new(1);
        let holder = admission.acquire(0).await.unwrap();

        let abandoned = tokio::time::timeout(Duration::from_millis(10), admission.acquire(9)).await;
        assert!(abandoned.is_err());

        drop(holder);
        assert_eq!(admission.active(), 0);
        let _again = admission.acquire(0).await.unwrap();
        assert_eq!(admission.active(), 1);
    }

    #[tokio::test]
    async fn close_rejects_waiters() {
        let admission = LoadAdmission::new(1);
        let _holder = admission.acquire(0).await.unwrap();
        let waiter = {
            let admission = admission.clone();
            tokio::spawn(async move { admission.acquire(0).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        admission.close();
        assert_eq!(waiter.await.unwrap(), Err(LoadError::ShutDown));
        assert!(matches!(admission.acquire(0).await, Err(LoadError::ShutDown)));
    }

    #[test]
    fn release_wakes_the_queued_waiter() {
        use tokio_test::{assert_pending, assert_ready_ok, task};

        let admission = LoadAdmission::new(1);
        let mut first = task::spawn(admission.acquire(0));
        let holder = assert_ready_ok!(first.poll());

        let mut second = task::spawn(admission.acquire(0));
        assert_pending!(second.poll());
        assert_eq!(admission.pending(), 1);

        drop(holder);
        assert!(second.is_woken());
        let _permit = assert_ready_ok!(second.poll());
        assert_eq!(admission.active(), 1);
        assert_eq!(admission.pending(), 0);
    }
}
