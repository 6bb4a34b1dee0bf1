//! Time-window throttles.
//!
//! The stream logger duplicates selected messages to the console. High-volume
//! messages (a stalled producer logs once per frame) would flood it, so the
//! duplication goes through a throttle that lets a message pass at most once per
//! window.
//!
//! Throttles read [`tokio::time::Instant`], which follows the paused clock in
//! `start_paused` tests and the real monotonic clock everywhere else.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// Number of occurrences of a value.
pub type Count = i64;

/// A throttled value together with the number of occurrences swallowed since the
/// value last passed.
pub type ThrottledValue<T> = (T, Count);

/// A throttle over strings, as used for console duplication.
pub trait StringThrottle: Send {
    /// Offers `value` to the throttle.
    ///
    /// Returns the text to emit, or `None` if the value is currently throttled.
    fn add(&mut self, value: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy)]
struct ValueMetadata {
    /// Occurrences within the current window. Zero or negative while below the
    /// activation count.
    count: Count,
    /// End of the throttle window; `None` until the throttle activates.
    interval_end: Option<Instant>,
    /// Last time the value was offered.
    last_seen: Instant,
}

/// Throttles multiple different values to occur once per interval each.
#[derive(Debug)]
pub struct MultipleValues<T> {
    throttled_values: HashMap<T, ValueMetadata>,
    throttle_interval: Duration,
    activation_count: u32,
    backoff_multiplier: f64,
    next_prune: Option<Instant>,
}

impl<T: Hash + Eq + Clone> MultipleValues<T> {
    /// Creates a throttle for multiple values.
    ///
    /// * `throttle_interval` - window during which repeated values are swallowed
    /// * `activation_count` - number of initial occurrences let through unthrottled
    /// * `backoff_multiplier` - factor applied to the window on every reactivation
    pub fn new(throttle_interval: Duration, activation_count: u32, backoff_multiplier: f64) -> Self {
        Self {
            throttled_values: HashMap::new(),
            throttle_interval,
            activation_count: activation_count.max(1),
            backoff_multiplier,
            next_prune: None,
        }
    }

    /// Throttle with a single activation and no back-off.
    pub fn with_interval(throttle_interval: Duration) -> Self {
        Self::new(throttle_interval, 1, 1.0)
    }

    /// Throttles a value to occur only once within the throttle interval.
    ///
    /// Returns `None` while within the interval. Otherwise returns the value and the
    /// number of occurrences swallowed since it last passed; that number is zero or
    /// negative while the value is still below the activation count.
    pub fn add(&mut self, value: T) -> Option<ThrottledValue<T>> {
        let now = Instant::now();
        self.prune_idle_values(now);

        let metadata = match self.throttled_values.get(&value) {
            Some(existing) => ValueMetadata {
                count: existing.count + 1,
                last_seen: now,
                ..*existing
            },
            None => ValueMetadata {
                count: 1 - Count::from(self.activation_count),
                interval_end: None,
                last_seen: now,
            },
        };

        if metadata.count <= 0 {
            // Throttle is not active yet for this value.
            self.throttled_values.insert(value.clone(), metadata);
            return Some((value, metadata.count));
        }

        if let Some(interval_end) = metadata.interval_end {
            if now > interval_end {
                // First occurrence after the window: pass it and open a new window.
                self.throttle_interval = self.throttle_interval.mul_f64(self.backoff_multiplier);
                self.throttled_values.insert(
                    value.clone(),
                    ValueMetadata {
                        count: 0,
                        interval_end: Some(now + self.throttle_interval),
                        last_seen: now,
                    },
                );
                return Some((value, metadata.count - 1));
            }
        }

        if metadata.count == 1 {
            // First throttled occurrence starts the window.
            self.throttled_values.insert(
                value,
                ValueMetadata {
                    interval_end: Some(now + self.throttle_interval),
                    ..metadata
                },
            );
        } else {
            self.throttled_values.insert(value, metadata);
        }

        None
    }

    /// Number of values currently tracked.
    pub fn tracked_values(&self) -> usize {
        self.throttled_values.len()
    }

    /// Forgets values that were idle for a whole throttle interval without any
    /// swallowed occurrence. Runs at most once per interval.
    fn prune_idle_values(&mut self, now: Instant) {
        if self.next_prune.is_some_and(|next_prune| now < next_prune) {
            return;
        }
        let throttle_interval = self.throttle_interval;
        self.throttled_values.retain(|_, metadata| {
            metadata.count > 0 || now.duration_since(metadata.last_seen) <= throttle_interval
        });
        self.next_prune = Some(now + throttle_interval);
    }

    /// Returns the values whose throttle count lies in `range` and purges them.
    ///
    /// If `range` is `None`, all values are returned and none is purged.
    pub fn flush_values(
        &mut self,
        range: Option<std::ops::RangeInclusive<Count>>,
    ) -> Vec<ThrottledValue<T>> {
        match range {
            None => self
                .throttled_values
                .iter()
                .map(|(value, metadata)| (value.clone(), metadata.count))
                .collect(),
            Some(range) => {
                let matching: Vec<T> = self
                    .throttled_values
                    .iter()
                    .filter(|(_, metadata)| range.contains(&metadata.count))
                    .map(|(value, _)| value.clone())
                    .collect();
                matching
                    .into_iter()
                    .filter_map(|value| {
                        self.throttled_values
                            .remove(&value)
                            .map(|metadata| (value, metadata.count))
                    })
                    .collect()
            }
        }
    }
}

/// Formats a throttled message for output, appending the swallowed count.
pub fn describe_throttled((message, count): ThrottledValue<String>) -> String {
    if count > 0 {
        format!("{message} (throttled: {count})")
    } else {
        message
    }
}

impl StringThrottle for MultipleValues<String> {
    fn add(&mut self, value: &str) -> Option<String> {
        MultipleValues::add(self, value.to_string()).map(describe_throttled)
    }
}

/// Throttles one designated value, lets all other values pass.
#[derive(Debug)]
pub struct FilteredValue {
    throttle: MultipleValues<String>,
    throttled_value: String,
}

impl FilteredValue {
    /// Creates a throttle that only affects `throttled_value`.
    pub fn new(throttled_value: impl Into<String>, throttle_interval: Duration) -> Self {
        Self {
            throttle: MultipleValues::with_interval(throttle_interval),
            throttled_value: throttled_value.into(),
        }
    }
}

impl StringThrottle for FilteredValue {
    fn add(&mut self, value: &str) -> Option<String> {
        if value != self.throttled_value {
            return Some(value.to_string());
        }
        self.throttle.add(value.to_string()).map(describe_throttled)
    }
}

/// A pass-through that doesn't throttle.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl StringThrottle for Passthrough {
    fn add(&mut self, value: &str) -> Option<String> {
        Some(value.to_string())
    }
}
