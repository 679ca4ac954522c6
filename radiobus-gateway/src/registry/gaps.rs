//! Gap table computation.

use super::model::{AddressGap, ConfiguredDevice};

/// Compute the unassigned ranges of `[lowest, highest]`.
///
/// Gaps are emitted in address order: before the first block, between
/// consecutive blocks and after the last block. Together with the device
/// blocks they tile the whole register space.
pub fn compute_gaps(
    devices: &[ConfiguredDevice],
    lowest: u16,
    highest: u16,
    block_size: u16,
) -> Vec<AddressGap> {
    let mut ranges: Vec<(u16, u16)> = devices
        .iter()
        .map(|d| (d.modbus_start_address, d.modbus_end_address))
        .collect();
    ranges.sort_unstable();

    let mut gaps = Vec::new();
    // Next unassigned address; u32 so it can step past u16::MAX.
    let mut cursor = u32::from(lowest);

    for (start, end) in ranges {
        if u32::from(start) > cursor {
            gaps.push(AddressGap::new(cursor as u16, start - 1, block_size));
        }
        cursor = cursor.max(u32::from(end) + 1);
    }

    if cursor <= u32::from(highest) {
        gaps.push(AddressGap::new(cursor as u16, highest, block_size));
    }

    gaps
}

/// First usable gap start, if any.
pub fn first_usable(gaps: &[AddressGap]) -> Option<u16> {
    gaps.iter().find(|g| g.usable).map(|g| g.range_start)
}
