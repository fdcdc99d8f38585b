//! Byte-budget gatekeeper with FIFO deadline-based waiting.
//!
//! Mirrors the limbo's concurrency shape (§5): one [`std::sync::Mutex`]
//! guards all accounting state, and every park is a bounded
//! [`std::sync::Condvar::wait_timeout`]. FIFO ordering among parked
//! acquirers is not something `std::sync::Condvar` gives you for free — it
//! only promises *some* waiter wakes, not which one — so this module hands
//! out arrival tickets and has each waiter recheck "is it my turn" on every
//! wake, waking everyone (`notify_all`) on every potential state change so
//! the true head of the line is guaranteed to notice (§10.6 covers why a
//! literal `notify_one` translation of the original's single-signal
//! hand-off would be unsafe here).

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::config::QuotaConfig;
use crate::error::{QuotaError, QuotaResult};

thread_local! {
    static IN_ON_EXCEEDED: Cell<bool> = const { Cell::new(false) };
}

struct ReentrancyGuard;

impl ReentrancyGuard {
    fn enter() -> Self {
        IN_ON_EXCEEDED.with(|flag| flag.set(true));
        ReentrancyGuard
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        IN_ON_EXCEEDED.with(|flag| flag.set(false));
    }
}

struct Inner {
    used: u64,
    limit: u64,
    too_long_threshold: Duration,
    next_ticket: u64,
    queue: VecDeque<u64>,
}

/// A FIFO byte-budget gatekeeper (§4.11–4.13).
pub struct Quota {
    state: Mutex<Inner>,
    cond: Condvar,
    on_exceeded: Box<dyn Fn() + Send + Sync>,
}

impl Quota {
    pub fn new(config: QuotaConfig, on_exceeded: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(Inner {
                used: 0,
                limit: config.limit,
                too_long_threshold: config.too_long_threshold,
                next_ticket: 0,
                queue: VecDeque::new(),
            }),
            cond: Condvar::new(),
            on_exceeded: Box::new(on_exceeded),
        }
    }

    fn fire_on_exceeded(&self) {
        assert!(
            !IN_ON_EXCEEDED.with(|flag| flag.get()),
            "on_exceeded callback attempted to reenter this quota (recursive acquire)"
        );
        let _guard = ReentrancyGuard::enter();
        (self.on_exceeded)();
    }

    pub fn used(&self) -> u64 {
        self.state.lock().unwrap().used
    }

    pub fn limit(&self) -> u64 {
        self.state.lock().unwrap().limit
    }

    /// §4.11 `acquire` (named `use` in the original; `use` is a Rust
    /// keyword).
    pub fn acquire(&self, n: u64, timeout: Duration) -> QuotaResult<()> {
        assert!(
            !IN_ON_EXCEEDED.with(|flag| flag.get()),
            "acquire called recursively from an on_exceeded callback"
        );

        let mut state = self.state.lock().unwrap();
        if state.queue.is_empty() && state.used + n <= state.limit {
            state.used += n;
            return Ok(());
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);
        log::debug!("quota acquire({n}) parking as ticket {ticket}; used={} limit={}", state.used, state.limit);
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            if state.queue.front() == Some(&ticket) && state.used + n <= state.limit {
                state.queue.pop_front();
                state.used += n;
                let threshold = state.too_long_threshold;
                drop(state);
                self.cond.notify_all();
                let waited = started.elapsed();
                if waited > threshold {
                    log::warn!("quota acquire({n}) waited {waited:?}, exceeding too_long_threshold");
                }
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                state.queue.retain(|t| *t != ticket);
                drop(state);
                self.cond.notify_all();
                log::warn!("quota acquire({n}) timed out after {timeout:?}");
                return Err(QuotaError::TimedOut);
            }

            drop(state);
            self.fire_on_exceeded();
            let guard = self.state.lock().unwrap();
            let (woken, _result) = self.cond.wait_timeout(guard, remaining).unwrap();
            state = woken;
        }
    }

    /// §4.12 `release`.
    pub fn release(&self, n: u64) {
        let mut state = self.state.lock().unwrap();
        assert!(n <= state.used, "release({n}) exceeds used quota ({})", state.used);
        state.used -= n;
        drop(state);
        self.cond.notify_all();
    }

    /// §4.12 `force_use`: unconditional accounting, may push `used` past
    /// `limit`.
    pub fn force_use(&self, n: u64) {
        let over = {
            let mut state = self.state.lock().unwrap();
            state.used += n;
            state.used > state.limit
        };
        if over {
            self.fire_on_exceeded();
        }
    }

    /// §4.12 `adjust`: reconciles a pre-reserved amount against what was
    /// actually consumed. Returns the amount refunded back into the
    /// budget, or `0` if the actual consumption exceeded the reservation
    /// (in which case the shortfall is charged instead).
    pub fn adjust(&self, reserved: u64, used_actual: u64) -> u64 {
        if reserved >= used_actual {
            let refund = reserved - used_actual;
            {
                let mut state = self.state.lock().unwrap();
                state.used = state.used.saturating_sub(refund);
            }
            self.cond.notify_all();
            refund
        } else {
            let shortfall = used_actual - reserved;
            let over = {
                let mut state = self.state.lock().unwrap();
                state.used += shortfall;
                state.used > state.limit
            };
            if over {
                self.fire_on_exceeded();
            }
            0
        }
    }

    /// §4.12 `set_limit`.
    pub fn set_limit(&self, new_limit: u64) {
        let over = {
            let mut state = self.state.lock().unwrap();
            state.limit = new_limit;
            state.used > state.limit
        };
        self.cond.notify_all();
        if over {
            self.fire_on_exceeded();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn no_reclaim() -> impl Fn() + Send + Sync + 'static {
        || {}
    }

    #[test]
    fn fast_path_acquires_within_limit() {
        let q = Quota::new(QuotaConfig::new(100), no_reclaim());
        assert!(q.acquire(80, Duration::from_millis(10)).is_ok());
        assert_eq!(q.used(), 80);
    }

    #[test]
    fn acquire_beyond_limit_times_out() {
        let q = Quota::new(QuotaConfig::new(100), no_reclaim());
        q.acquire(100, Duration::from_millis(10)).unwrap();
        let err = q.acquire(1, Duration::from_millis(20)).unwrap_err();
        assert_eq!(err, QuotaError::TimedOut);
        assert_eq!(q.used(), 100);
    }

    #[test]
    fn release_unblocks_a_parked_acquirer() {
        let q = Arc::new(Quota::new(QuotaConfig::new(100), no_reclaim()));
        q.acquire(100, Duration::from_millis(10)).unwrap();

        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.acquire(50, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(30));
        q.release(100);
        assert!(waiter.join().unwrap().is_ok());
        assert_eq!(q.used(), 50);
    }

    #[test]
    fn fifo_hand_off_serves_earlier_waiter_first() {
        // S5: limit=100, used=0. A acquires 80. B(50) then C(10) park in
        // that order. A releases 80; B must succeed before C.
        let q = Arc::new(Quota::new(QuotaConfig::new(100), no_reclaim()));
        q.acquire(80, Duration::from_millis(10)).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let b = {
            let q = Arc::clone(&q);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                q.acquire(50, Duration::from_secs(5)).unwrap();
                order.lock().unwrap().push('B');
            })
        };
        thread::sleep(Duration::from_millis(20));
        let c = {
            let q = Arc::clone(&q);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                q.acquire(10, Duration::from_secs(5)).unwrap();
                order.lock().unwrap().push('C');
            })
        };
        thread::sleep(Duration::from_millis(20));

        q.release(80);
        b.join().unwrap();
        c.join().unwrap();
        assert_eq!(*order.lock().unwrap(), vec!['B', 'C']);
        assert_eq!(q.used(), 60);
    }

    #[test]
    fn on_exceeded_fires_when_slow_path_entered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let q = Arc::new(Quota::new(QuotaConfig::new(10), move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        q.acquire(10, Duration::from_millis(10)).unwrap();
        let _ = q.acquire(1, Duration::from_millis(20));
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    #[should_panic(expected = "recursive acquire")]
    fn on_exceeded_may_not_recursively_acquire() {
        use std::sync::Weak;

        let q: Arc<Quota> = Arc::new_cyclic(|weak: &Weak<Quota>| {
            let weak = weak.clone();
            Quota::new(QuotaConfig::new(10), move || {
                if let Some(q) = weak.upgrade() {
                    let _ = q.acquire(1, Duration::from_millis(1));
                }
            })
        });
        q.acquire(10, Duration::from_millis(5)).unwrap();
        let _ = q.acquire(1, Duration::from_millis(5));
    }

    #[test]
    fn set_limit_downsize_fires_on_exceeded_and_blocks_until_release() {
        // S6: limit=1000, used=600. set_limit(500) fires on_exceeded;
        // use(1) parks until used drops below the new limit.
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let q = Arc::new(Quota::new(QuotaConfig::new(1000), move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));
        q.force_use(600);
        q.set_limit(500);
        assert!(fired.load(Ordering::SeqCst) >= 1);

        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.acquire(1, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(30));
        q.release(200);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn force_use_can_exceed_limit_and_reports_it() {
        let called = Arc::new(AtomicUsize::new(0));
        let called_clone = Arc::clone(&called);
        let q = Quota::new(QuotaConfig::new(10), move || {
            called_clone.fetch_add(1, Ordering::SeqCst);
        });
        q.force_use(15);
        assert_eq!(q.used(), 15);
        assert_eq!(called.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn adjust_refunds_over_reservation() {
        let q = Quota::new(QuotaConfig::new(100), no_reclaim());
        q.acquire(50, Duration::from_millis(10)).unwrap();
        let refund = q.adjust(50, 30);
        assert_eq!(refund, 20);
        assert_eq!(q.used(), 30);
    }

    #[test]
    fn adjust_charges_under_reservation() {
        let q = Quota::new(QuotaConfig::new(100), no_reclaim());
        q.acquire(50, Duration::from_millis(10)).unwrap();
        let refund = q.adjust(50, 70);
        assert_eq!(refund, 0);
        assert_eq!(q.used(), 70);
    }

    #[test]
    #[should_panic(expected = "exceeds used quota")]
    fn release_more_than_used_is_a_programming_error() {
        let q = Quota::new(QuotaConfig::new(100), no_reclaim());
        q.acquire(10, Duration::from_millis(10)).unwrap();
        q.release(20);
    }
}
