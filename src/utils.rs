/// Number of slots allocated for a table expected to hold `capacity` records
///
/// The table is oversized to the next power of two at or above twice the
/// expected record count, which keeps reprobe chains short.
#[must_use]
pub fn table_size(capacity: usize) -> usize {
    capacity.max(1).saturating_mul(2).next_power_of_two()
}
