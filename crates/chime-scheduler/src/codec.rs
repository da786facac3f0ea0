//! Day-index codec.
//!
//! Canonical weekday indices run Monday=0 … Sunday=6. Calendar day numbers
//! follow the Sunday=1 … Saturday=7 convention used by platform calendars.
//! The same seven slots double as a little-endian bitmask for the
//! "every N days" repeat count.

use chrono::Weekday;

/// Largest count a seven-slot bitmask can hold.
pub const MAX_EVERY_DAY_COUNT: u8 = 0b111_1111;

/// The week in canonical order.
pub const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Map a Sunday=1 calendar day number to the canonical Monday=0 index.
///
/// # Panics
/// If `calendar_day` is outside `1..=7`.
pub fn calendar_day_to_index(calendar_day: u8) -> usize {
    assert!(
        (1..=7).contains(&calendar_day),
        "calendar day {calendar_day} is not between 1 and 7"
    );
    if calendar_day == 1 {
        6
    } else {
        calendar_day as usize - 2
    }
}

/// Inverse of [`calendar_day_to_index`].
///
/// # Panics
/// If `index` is outside `0..7`.
pub fn index_to_calendar_day(index: usize) -> u8 {
    assert!(index < 7, "weekday index {index} is not between 0 and 6");
    if index == 6 {
        1
    } else {
        index as u8 + 2
    }
}

pub fn weekday_to_index(day: Weekday) -> usize {
    day.num_days_from_monday() as usize
}

/// # Panics
/// If `index` is outside `0..7`.
pub fn index_to_weekday(index: usize) -> Weekday {
    assert!(index < 7, "weekday index {index} is not between 0 and 6");
    WEEK[index]
}

/// Read the slots as a little-endian bitmask: slot 0 is the low bit.
pub fn days_to_every_day_count(days: &[bool; 7]) -> u8 {
    days.iter()
        .enumerate()
        .filter(|(_, set)| **set)
        .fold(0u8, |acc, (i, _)| acc | (1 << i))
}

/// Spread `n` over seven slots, slot 0 holding the low bit.
///
/// # Panics
/// If `n` is greater than 127.
pub fn every_day_count_to_days(n: u8) -> [bool; 7] {
    assert!(
        n <= MAX_EVERY_DAY_COUNT,
        "{n} is not between 0 and {MAX_EVERY_DAY_COUNT}"
    );
    let mut bits = [false; 7];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = n & (1 << i) != 0;
    }
    bits
}
