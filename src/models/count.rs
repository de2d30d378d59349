use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Outcome of one forwarding attempt through a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageOutcome {
    Success,
    Failed,
}

impl UsageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageOutcome::Success => "success",
            UsageOutcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for UsageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Success/failure tallies.
///
/// Every field is its own atomic; readers may observe a total that is briefly
/// ahead of or behind `success + failed`.
#[derive(Debug, Default)]
pub struct ProxyCount {
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
}

impl ProxyCount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, outcome: UsageOutcome) {
        match outcome {
            UsageOutcome::Success => self.success.fetch_add(1, Ordering::Relaxed),
            UsageOutcome::Failed => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountSnapshot {
        CountSnapshot {
            total: self.total.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for ProxyCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.snapshot();
        write!(
            f,
            "Total:{}, Success:{}, Failed:{}",
            s.total, s.success, s.failed
        )
    }
}

/// Point-in-time copy of a [`ProxyCount`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountSnapshot {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
}

/// Named counters for the admin status view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GroupNumbers(BTreeMap<String, usize>);

impl GroupNumbers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, item: impl Into<String>, n: usize) {
        *self.0.entry(item.into()).or_insert(0) += n;
    }

    pub fn get(&self, item: &str) -> usize {
        self.0.get(item).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_mark() {
        let count = ProxyCount::new();
        count.mark(UsageOutcome::Success);
        count.mark(UsageOutcome::Failed);
        count.mark(UsageOutcome::Failed);

        assert_eq!(
            count.snapshot(),
            CountSnapshot {
                total: 3,
                success: 1,
                failed: 2
            }
        );
        assert_eq!(count.to_string(), "Total:3, Success:1, Failed:2");
    }

    #[test]
    fn test_count_concurrent_marks() {
        let count = std::sync::Arc::new(ProxyCount::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let count = count.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        count.mark(UsageOutcome::Success);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let s = count.snapshot();
        assert_eq!(s.total, 8000);
        assert_eq!(s.success, 8000);
    }

    #[test]
    fn test_group_numbers() {
        let mut numbers = GroupNumbers::new();
        numbers.add("active", 0);
        numbers.add("active", 1);
        numbers.add("active", 1);

        assert_eq!(numbers.get("active"), 2);
        assert_eq!(numbers.get("missing"), 0);
        assert_eq!(
            serde_json::to_value(&numbers).unwrap(),
            serde_json::json!({ "active": 2 })
        );
    }
}
