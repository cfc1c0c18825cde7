use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MAX_SERVICE_DURATION_MINUTES: u32 = 24 * 60;
pub const MAX_BOOKINGS_PER_PROVIDER: usize = 100_000;
pub const MAX_RESERVATIONS: usize = 100_000;
pub const MAX_LOCATION_LEN: usize = 1024;
pub const MAX_CURRENCY_LEN: usize = 8;
pub const MAX_METADATA_VALUE_LEN: usize = 2048;
