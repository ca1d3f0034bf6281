//! Date range filtering and next-event selection over parsed events.

use chrono::NaiveDate;

use crate::feed::PickupEvent;

/// Keep the events within `[start_date, end_date]`, in their original order.
///
/// A missing bound is unbounded on that side. A start after the end matches nothing.
pub fn filter_by_date(
    pickup_events: Vec<PickupEvent>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Vec<PickupEvent> {
    if start_date.is_none() && end_date.is_none() {
        return pickup_events;
    }
    pickup_events
        .into_iter()
        .filter(|event| start_date.map_or(true, |start_date| start_date <= event.date))
        .filter(|event| end_date.map_or(true, |end_date| event.date <= end_date))
        .collect()
}

/// The earliest event on or after `today`. Equal dates resolve to the one first in the feed.
pub fn next_pickup_event(
    pickup_events: Vec<PickupEvent>,
    today: NaiveDate,
) -> Option<PickupEvent> {
    pickup_events
        .into_iter()
        .filter(|event| event.date >= today)
        .min_by_key(|event| event.date)
}
