/// Optimistic value that stands in for device state until telemetry catches up
///
/// The expiration is expressed in status timestamps, not wall-clock time:
/// the value expires once a published status is newer than
/// `expiration_timestamp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporaryValue<T> {
    value: Option<T>,
    expiration_timestamp: u64,
}

impl<T> Default for TemporaryValue<T> {
    fn default() -> Self {
        Self {
            value: None,
            expiration_timestamp: 0,
        }
    }
}

impl<T: Clone> TemporaryValue<T> {
    /// Create an empty temporary value
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a value is currently held
    #[must_use]
    pub const fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Timestamp after which the value expires
    #[must_use]
    pub const fn expiration_timestamp(&self) -> u64 {
        self.expiration_timestamp
    }

    /// Hold `value` until a status newer than `expiration_timestamp` arrives
    pub fn set(&mut self, value: T, expiration_timestamp: u64) {
        self.value = Some(value);
        self.expiration_timestamp = expiration_timestamp;
    }

    /// Drop the held value
    pub fn reset(&mut self) {
        self.value = None;
    }

    /// Whether the held value is past its expiration at `current_timestamp`
    #[must_use]
    pub const fn is_expired(&self, current_timestamp: u64) -> bool {
        self.value.is_some() && current_timestamp > self.expiration_timestamp
    }

    /// The held value or `default`, dropping the value first if it expired
    pub fn get(&mut self, current_timestamp: u64, default: T) -> T {
        if self.is_expired(current_timestamp) {
            self.reset();
        }
        self.peek(default)
    }

    /// The held value or `default`, without checking expiration
    #[must_use]
    pub fn peek(&self, default: T) -> T {
        self.value.clone().unwrap_or(default)
    }
}
