//! Process-wide millisecond clock.
//!
//! # Invariants
//! - `now_ms` never returns a value lower than a previous call in this process.
//! - Two calls never return the same value, so rows stamped in sequence keep
//!   their write order when sorted by timestamp.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST_ISSUED_MS: AtomicI64 = AtomicI64::new(0);

/// Returns Unix epoch milliseconds, strictly increasing per process.
pub fn now_ms() -> i64 {
    let wall = wall_clock_ms();
    let mut previous = LAST_ISSUED_MS.load(Ordering::Relaxed);
    loop {
        let next = wall.max(previous + 1);
        match LAST_ISSUED_MS.compare_exchange_weak(
            previous,
            next,
            Ordering::SeqCst,
            Ordering::Relaxed,
        ) {
            Ok(_) => return next,
            Err(actual) => previous = actual,
        }
    }
}

fn wall_clock_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::now_ms;

    #[test]
    fn consecutive_reads_strictly_increase() {
        let mut last = now_ms();
        for _ in 0..1_000 {
            let next = now_ms();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn concurrent_reads_never_collide() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..250).map(|_| now_ms()).collect::<Vec<_>>()))
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
