use chrono::{
    DateTime, Datelike, Days, Duration, Local, LocalResult, NaiveDate, NaiveTime, Offset, TimeZone,
};

use crate::types::{Repeat, Trigger};

/// Compute the next instant `trigger` must fire strictly after `now`.
///
/// The time zone is the one `now` carries; nothing about the zone is stored
/// on the trigger, so a device zone change only moves future fire times.
///
/// Day arithmetic happens on calendar dates and the wall clock is resolved
/// once at the end, which keeps the local time at exactly `hour:minute`
/// across DST transitions. A time that falls inside a spring-forward gap is
/// pushed forward by the gap length; a time inside a fall-back overlap takes
/// the earlier instant.
///
/// # Panics
/// If a weekly trigger selects no day. Collapse it with
/// [`Repeat::normalized`] first.
pub fn next_fire<Tz: TimeZone>(trigger: &Trigger, now: &DateTime<Tz>) -> DateTime<Tz> {
    let tz = now.timezone();
    let time = trigger.time.naive_time();

    // Today's slot counts as gone once the clock reaches it, so a trigger
    // never fires twice in the minute it was computed for.
    let mut date = now.date_naive();
    if resolve_local(&tz, date, time) <= *now {
        date = date + Days::new(1);
    }

    match trigger.repeat {
        Repeat::Once => {}
        Repeat::Weekly(days) => {
            date = date
                .iter_days()
                .take(7)
                .find(|d| days.contains(d.weekday()))
                .unwrap_or_else(|| {
                    panic!("weekly trigger {} has no selected day", trigger.id)
                });
        }
        Repeat::EveryDays(n) => {
            // One day may already be consumed above, so N=1 means "every day".
            date = date + Days::new(u64::from(n.get()) - 1);
        }
    }

    resolve_local(&tz, date, time)
}

/// [`next_fire`] in the system's current local time zone.
pub fn next_fire_local(trigger: &Trigger) -> DateTime<Local> {
    next_fire(trigger, &Local::now())
}

/// Preview the next `count` fire instants after `now`.
///
/// A `Once` trigger yields at most one instant.
pub fn upcoming<Tz: TimeZone>(trigger: &Trigger, now: &DateTime<Tz>, count: usize) -> Vec<DateTime<Tz>> {
    let count = if trigger.repeat.is_repeating() {
        count
    } else {
        count.min(1)
    };
    let mut out: Vec<DateTime<Tz>> = Vec::with_capacity(count);
    let mut cursor = now.clone();
    for _ in 0..count {
        let next = next_fire(trigger, &cursor);
        out.push(next.clone());
        cursor = next;
    }
    out
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Tz> {
    let local = date.and_time(time);
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            // Read the wall clock with the offset in force before the jump.
            let before = tz
                .offset_from_utc_datetime(&(local - Duration::days(1)))
                .fix();
            tz.from_utc_datetime(&(local - before))
        }
    }
}
