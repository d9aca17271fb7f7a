use chrono::NaiveDate;

use crate::model::*;

/// Candidate slots for `date`, ascending, every `interval` minutes from opening
/// such that each slot ends no later than closing. Closed days yield nothing.
pub fn generate_slots(
    date: NaiveDate,
    window: Option<&OperatingWindow>,
    duration: Minutes,
    interval: Minutes,
) -> Vec<Span> {
    let Some(window) = window else {
        return Vec::new();
    };
    if duration == 0 || interval == 0 {
        return Vec::new();
    }
    let open = window.span_on(date);
    let mut slots = Vec::new();
    let mut start = open.start;
    while start + minutes(duration) <= open.end {
        slots.push(Span::starting_at(start, duration));
        start += minutes(interval);
    }
    slots
}
