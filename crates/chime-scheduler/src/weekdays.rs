//! Week ordering and day-list rendering.
//!
//! The user picks which day their week starts on. Every rendered list of
//! days follows that order, so Friday precedes Monday when the week starts
//! on Wednesday. Nothing here caches the choice: a new first day means a
//! new [`WeekdayFormatter`].

use chime_core::config::ScheduleConfig;
use chime_core::{ChimeError, Result};
use chrono::Weekday;

use crate::codec::weekday_to_index;
use crate::types::{Repeat, WeekdaySet};

/// Rotation of the canonical week starting at `first_day`.
pub fn week_order(first_day: Weekday) -> [Weekday; 7] {
    let mut order = [first_day; 7];
    let mut day = first_day;
    for slot in order.iter_mut() {
        *slot = day;
        day = day.succ();
    }
    order
}

/// Localized weekday names, Monday first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayNames {
    pub short: [String; 7],
    pub long: [String; 7],
}

impl Default for DayNames {
    fn default() -> Self {
        Self {
            short: ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"].map(String::from),
            long: [
                "Monday",
                "Tuesday",
                "Wednesday",
                "Thursday",
                "Friday",
                "Saturday",
                "Sunday",
            ]
            .map(String::from),
        }
    }
}

impl DayNames {
    pub fn short(&self, day: Weekday) -> &str {
        &self.short[weekday_to_index(day)]
    }

    pub fn long(&self, day: Weekday) -> &str {
        &self.long[weekday_to_index(day)]
    }
}

/// Render a day selection for display.
///
/// - nothing selected: empty string (not repeating)
/// - everything selected: `all_days_label`
/// - otherwise the selected days in `order`, joined with `", "`; a lone day
///   is spelled out in full
pub fn format_selected_days(
    days: &WeekdaySet,
    order: &[Weekday; 7],
    names: &DayNames,
    all_days_label: &str,
) -> String {
    if days.is_empty() {
        return String::new();
    }
    if days.is_full() {
        return all_days_label.to_string();
    }

    let long_names = days.len() <= 1;
    order
        .iter()
        .filter(|day| days.contains(**day))
        .map(|day| {
            if long_names {
                names.long(*day)
            } else {
                names.short(*day)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// The formatting inputs that come from user preferences, bundled.
#[derive(Debug, Clone)]
pub struct WeekdayFormatter {
    order: [Weekday; 7],
    all_days_label: String,
    names: DayNames,
}

impl WeekdayFormatter {
    pub fn new(first_day: Weekday, all_days_label: impl Into<String>, names: DayNames) -> Self {
        Self {
            order: week_order(first_day),
            all_days_label: all_days_label.into(),
            names,
        }
    }

    /// Build from the `[schedule]` config section. Custom name lists must
    /// have exactly seven entries.
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        let defaults = DayNames::default();
        let names = DayNames {
            short: match &config.short_day_names {
                Some(list) => seven_names(list, "short_day_names")?,
                None => defaults.short,
            },
            long: match &config.long_day_names {
                Some(list) => seven_names(list, "long_day_names")?,
                None => defaults.long,
            },
        };
        Ok(Self::new(
            config.first_day_of_week,
            config.every_day_label.clone(),
            names,
        ))
    }

    pub fn first_day(&self) -> Weekday {
        self.order[0]
    }

    pub fn order(&self) -> &[Weekday; 7] {
        &self.order
    }

    pub fn format(&self, days: &WeekdaySet) -> String {
        format_selected_days(days, &self.order, &self.names, &self.all_days_label)
    }

    /// Short description of any repeat mode.
    pub fn describe(&self, repeat: &Repeat) -> String {
        match repeat {
            Repeat::Once => String::new(),
            Repeat::Weekly(days) => self.format(days),
            Repeat::EveryDays(n) if n.get() == 1 => self.all_days_label.clone(),
            Repeat::EveryDays(n) => format!("Every {} days", n.get()),
        }
    }
}

fn seven_names(list: &[String], field: &str) -> Result<[String; 7]> {
    <[String; 7]>::try_from(list.to_vec()).map_err(|v| {
        ChimeError::Config(format!(
            "schedule.{field} needs 7 entries, got {}",
            v.len()
        ))
    })
}
