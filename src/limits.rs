//! Service-wide bounds. Every ingress path checks against these before
//! touching state, so a single misbehaving client cannot balloon memory
//! or the WAL.

/// Max distinct resource groups per tenant.
pub const MAX_GROUPS_PER_TENANT: usize = 4096;

/// Max bytes in a resource-group name.
pub const MAX_GROUP_NAME_LEN: usize = 128;

/// Max bytes in a booking label.
pub const MAX_LABEL_LEN: usize = 256;

/// Max booking records per group.
pub const MAX_BOOKINGS_PER_GROUP: usize = 65_536;

/// Max days a single booking may span (inclusive of its start date).
pub const MAX_DURATION_DAYS: i64 = 366;

/// Max width of a blocked-days / availability query window, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 366;

/// Supported civil-date range for booking dates. Dates outside are
/// rejected at ingress; stored rows outside are skipped from accounting.
pub const MIN_BOOKING_YEAR: i32 = 2000;
pub const MAX_BOOKING_YEAR: i32 = 2100;

/// Max concurrently loaded tenants.
pub const MAX_TENANTS: usize = 64;

/// Max bytes in a tenant (database) name.
pub const MAX_TENANT_NAME_LEN: usize = 64;
