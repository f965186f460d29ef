use std::time::Duration;

/// Grace window applied before a raw `Disconnected` transport signal is
/// reported outward as a transient disconnect.  Must stay above the
/// transport's own minimum reconnect interval or the bridge state flaps.
pub const DISCONNECT_DEBOUNCE: Duration = Duration::from_secs(7);

/// Implicit expiry of a "started typing" signal.  After this long without
/// a stop signal, consumers must treat the indicator as stale.
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(15);

/// Initial delay of the reconnect backoff loop.
pub const RECONNECT_BACKOFF_MIN: Duration = Duration::from_secs(2);

/// Upper bound of the reconnect backoff loop.  The delay doubles on every
/// failed attempt until it reaches this cap.
pub const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(150);

/// Default page size for paginated history import requests.
pub const DEFAULT_BACKFILL_COUNT: usize = 50;

/// How long a fetched remote profile stays fresh before a ghost refetch.
pub const PROFILE_REFETCH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
