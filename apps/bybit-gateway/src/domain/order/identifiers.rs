//! Strongly-typed order identifiers.
//!
//! Two identity spaces exist for every order: the local id the gateway
//! generates before submission (sent to Bybit as `order_link_id`) and the
//! exchange id Bybit assigns on acknowledgement (`order_id`).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier from a string.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

define_id!(
    LocalOrderId,
    "Client-generated order identifier (Bybit `order_link_id`)."
);
define_id!(
    ExchangeOrderId,
    "Exchange-assigned order identifier (Bybit `order_id`)."
);

/// Separator between the process prefix and the counter.
const SEPARATOR: char = '-';

/// Generates local order ids of the form `{prefix}-{counter}`.
///
/// The prefix is unique per process instantiation (start time by default) so
/// ids never collide with orders from a previous run that the exchange may
/// still report. Allocation is a single atomic increment.
#[derive(Debug)]
pub struct LocalIdAllocator {
    prefix: String,
    counter: AtomicU64,
}

impl LocalIdAllocator {
    /// Create an allocator with an explicit prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }

    /// Create an allocator prefixed with the current UTC time (`yymmddHHMMSS`).
    #[must_use]
    pub fn from_start_time() -> Self {
        Self::new(chrono::Utc::now().format("%y%m%d%H%M%S").to_string())
    }

    /// The prefix shared by every id from this allocator.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Allocate the next id. Never blocks.
    pub fn allocate(&self) -> LocalOrderId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        LocalOrderId(format!("{}{SEPARATOR}{n}", self.prefix))
    }

    /// Number of ids allocated so far.
    #[must_use]
    pub fn allocated(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Returns true if `id` was produced by this allocator.
    #[must_use]
    pub fn was_issued(&self, id: &LocalOrderId) -> bool {
        let Some(rest) = id.as_str().strip_prefix(self.prefix.as_str()) else {
            return false;
        };
        let Some(digits) = rest.strip_prefix(SEPARATOR) else {
            return false;
        };
        if digits.starts_with('0') {
            return false;
        }
        digits
            .parse::<u64>()
            .is_ok_and(|n| (1..=self.allocated()).contains(&n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_monotonic_prefixed_ids() {
        let alloc = LocalIdAllocator::new("241018093000");
        assert_eq!(alloc.allocate().as_str(), "241018093000-1");
        assert_eq!(alloc.allocate().as_str(), "241018093000-2");
        assert_eq!(alloc.allocated(), 2);
    }

    #[test]
    fn was_issued_accepts_only_allocated_ids() {
        let alloc = LocalIdAllocator::new("p");
        let first = alloc.allocate();

        assert!(alloc.was_issued(&first));
        assert!(!alloc.was_issued(&LocalOrderId::new("p-2")));
        assert!(!alloc.was_issued(&LocalOrderId::new("p-0")));
        assert!(!alloc.was_issued(&LocalOrderId::new("p-01")));
        assert!(!alloc.was_issued(&LocalOrderId::new("q-1")));
        assert!(!alloc.was_issued(&LocalOrderId::new("p1")));
    }

    #[test]
    fn start_time_prefix_is_twelve_digits() {
        let alloc = LocalIdAllocator::from_start_time();
        assert_eq!(alloc.prefix().len(), 12);
        assert!(alloc.prefix().chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn concurrent_allocation_yields_unique_ids() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let alloc = Arc::new(LocalIdAllocator::new("c"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                std::thread::spawn(move || (0..250).map(|_| alloc.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 2000);
    }

    #[test]
    fn exchange_id_round_trips_through_string() {
        let id: ExchangeOrderId = "EX100".into();
        assert_eq!(id.as_str(), "EX100");
        assert_eq!(id.to_string(), "EX100");
        assert_eq!(id.into_inner(), "EX100");
    }
}
