use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

/// One caller's turn to use the shared connection. Opaque, monotonically
/// increasing, valid from issuance until released.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket#{}", self.0)
    }
}

#[derive(Default)]
struct State {
    current: Option<u64>,
    next: u64,
    queue: VecDeque<(u64, oneshot::Sender<()>)>,
}

/// FIFO ticket lock over the single connection handle.
///
/// Tickets are granted strictly in allocation order. Waiters park on a
/// oneshot channel rather than polling; release hands the grant to the
/// queue head. There is no cancellation and no timeout: a queued ticket
/// waits until every ticket ahead of it has released.
#[derive(Default)]
pub struct AccessSerializer {
    state: Mutex<State>,
}

impl AccessSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next ticket and wait for the connection. Grants
    /// immediately when nothing holds it.
    pub async fn acquire(&self) -> Ticket {
        let (id, granted) = {
            let mut state = self.state.lock();
            let id = state.next;
            state.next += 1;
            if state.current.is_none() {
                state.current = Some(id);
                trace!(ticket = id, "granted immediately");
                return Ticket(id);
            }
            let (tx, rx) = oneshot::channel();
            state.queue.push_back((id, tx));
            (id, rx)
        };
        // The sender stays in the queue until release() grants this
        // ticket, so an Err here only means the serializer went away.
        let _ = granted.await;
        trace!(ticket = id, "granted from queue");
        Ticket(id)
    }

    /// Hand the connection to the next queued ticket, or clear the held
    /// state when the queue is empty. Panics if the caller does not hold
    /// the connection: that is a serialization bug, not a runtime
    /// condition.
    pub fn release(&self, ticket: Ticket) {
        let mut state = self.state.lock();
        assert_eq!(
            state.current,
            Some(ticket.0),
            "release of {ticket} by a non-holder"
        );
        loop {
            match state.queue.pop_front() {
                Some((id, tx)) => {
                    state.current = Some(id);
                    if tx.send(()).is_ok() {
                        break;
                    }
                    // waiter vanished; skip to the next one
                }
                None => {
                    state.current = None;
                    break;
                }
            }
        }
    }

    /// Whether `ticket` currently holds the connection. Executors check
    /// this before every statement.
    pub fn holds(&self, ticket: Ticket) -> bool {
        self.state.lock().current == Some(ticket.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn immediate_grant_when_idle() {
        let ser = AccessSerializer::new();
        let t = ser.acquire().await;
        assert!(ser.holds(t));
        ser.release(t);
        assert!(!ser.holds(t));
    }

    #[tokio::test]
    async fn tickets_increase_monotonically() {
        let ser = AccessSerializer::new();
        let t1 = ser.acquire().await;
        ser.release(t1);
        let t2 = ser.acquire().await;
        ser.release(t2);
        assert_ne!(t1, t2);
    }

    #[tokio::test]
    async fn fifo_grant_order() {
        let ser = Arc::new(AccessSerializer::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let holder = ser.acquire().await;

        let mut handles = Vec::new();
        for n in 1..=3u32 {
            let ser = ser.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let t = ser.acquire().await;
                order.lock().push(n);
                // the first waiter works longest; order must still hold
                tokio::time::sleep(Duration::from_millis(10 * (4 - n) as u64)).await;
                ser.release(t);
            }));
            // let this waiter enqueue before spawning the next
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        ser.release(holder);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn abandoned_waiter_is_skipped() {
        let ser = Arc::new(AccessSerializer::new());
        let holder = ser.acquire().await;

        let waiter = {
            let ser = ser.clone();
            tokio::spawn(async move {
                let _ = ser.acquire().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        waiter.abort();
        let _ = waiter.await;

        ser.release(holder);
        // the dead waiter must not wedge the queue
        let t = tokio::time::timeout(Duration::from_secs(1), ser.acquire())
            .await
            .expect("serializer wedged by abandoned waiter");
        ser.release(t);
    }

    #[tokio::test]
    #[should_panic(expected = "non-holder")]
    async fn release_by_non_holder_panics() {
        let ser = AccessSerializer::new();
        let t1 = ser.acquire().await;
        ser.release(t1);
        ser.release(t1);
    }

    #[tokio::test]
    async fn holds_is_exclusive() {
        let ser = Arc::new(AccessSerializer::new());
        let t1 = ser.acquire().await;

        let ser2 = ser.clone();
        let pending = tokio::spawn(async move { ser2.acquire().await });
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(ser.holds(t1));
        ser.release(t1);
        let t2 = pending.await.unwrap();
        assert!(!ser.holds(t1));
        assert!(ser.holds(t2));
        ser.release(t2);
    }
}
