use std::fmt;
use std::num::NonZeroU32;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::codec::{
    days_to_every_day_count, every_day_count_to_days, weekday_to_index, MAX_EVERY_DAY_COUNT, WEEK,
};
use crate::error::TriggerError;

/// Identity of a trigger.
///
/// A trigger that has not been stored yet is a `Draft`. A trigger that does
/// not exist at all is `Option::<Trigger>::None`; the two are never conflated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerId {
    Draft,
    Saved(NonZeroU32),
}

impl TriggerId {
    /// Decode the integer form used at the persistence boundary, where `0`
    /// means "not stored yet".
    pub fn from_raw(raw: i64) -> Result<Self, TriggerError> {
        let id = u32::try_from(raw).map_err(|_| TriggerError::InvalidId(raw))?;
        Ok(NonZeroU32::new(id).map_or(TriggerId::Draft, TriggerId::Saved))
    }

    pub fn to_raw(self) -> i64 {
        match self {
            TriggerId::Draft => 0,
            TriggerId::Saved(id) => id.get() as i64,
        }
    }

    pub fn saved(self) -> Option<u32> {
        match self {
            TriggerId::Draft => None,
            TriggerId::Saved(id) => Some(id.get()),
        }
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerId::Draft => write!(f, "draft"),
            TriggerId::Saved(id) => write!(f, "{id}"),
        }
    }
}

/// Which transition of the target timer a trigger invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerAction {
    Start,
    End,
}

impl TriggerAction {
    pub const RAW_START: i64 = 0;
    pub const RAW_END: i64 = 1;

    pub fn to_raw(self) -> i64 {
        match self {
            TriggerAction::Start => Self::RAW_START,
            TriggerAction::End => Self::RAW_END,
        }
    }
}

impl TryFrom<i64> for TriggerAction {
    type Error = TriggerError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        match raw {
            Self::RAW_START => Ok(TriggerAction::Start),
            Self::RAW_END => Ok(TriggerAction::End),
            other => Err(TriggerError::UnknownAction(other)),
        }
    }
}

impl std::str::FromStr for TriggerAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "start" => Ok(TriggerAction::Start),
            "end" => Ok(TriggerAction::End),
            other => Err(format!("unknown trigger action: {other}")),
        }
    }
}

impl fmt::Display for TriggerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerAction::Start => write!(f, "start"),
            TriggerAction::End => write!(f, "end"),
        }
    }
}

/// Local wall-clock time a trigger fires at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimeOfDay", into = "RawTimeOfDay")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

#[derive(Serialize, Deserialize)]
struct RawTimeOfDay {
    hour: i64,
    minute: i64,
}

impl TimeOfDay {
    pub fn new(hour: i64, minute: i64) -> Result<Self, TriggerError> {
        if !(0..=23).contains(&hour) {
            return Err(TriggerError::HourOutOfRange(hour));
        }
        if !(0..=59).contains(&minute) {
            return Err(TriggerError::MinuteOutOfRange(minute));
        }
        Ok(Self {
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    pub fn hour(&self) -> u32 {
        self.hour as u32
    }

    pub fn minute(&self) -> u32 {
        self.minute as u32
    }

    pub fn naive_time(&self) -> NaiveTime {
        // range checked in `new`, so the fallback never applies
        NaiveTime::from_hms_opt(self.hour(), self.minute(), 0).unwrap_or_default()
    }
}

impl TryFrom<RawTimeOfDay> for TimeOfDay {
    type Error = TriggerError;

    fn try_from(raw: RawTimeOfDay) -> Result<Self, Self::Error> {
        TimeOfDay::new(raw.hour, raw.minute)
    }
}

impl From<TimeOfDay> for RawTimeOfDay {
    fn from(t: TimeOfDay) -> Self {
        RawTimeOfDay {
            hour: t.hour as i64,
            minute: t.minute as i64,
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Per-weekday selection, canonical order (Monday first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct WeekdaySet([bool; 7]);

impl WeekdaySet {
    pub fn from_slots(slots: [bool; 7]) -> Self {
        Self(slots)
    }

    pub fn from_days(days: impl IntoIterator<Item = Weekday>) -> Self {
        let mut slots = [false; 7];
        for day in days {
            slots[weekday_to_index(day)] = true;
        }
        Self(slots)
    }

    pub fn all() -> Self {
        Self([true; 7])
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0[weekday_to_index(day)]
    }

    pub fn is_empty(&self) -> bool {
        !self.0.iter().any(|d| *d)
    }

    pub fn is_full(&self) -> bool {
        self.0.iter().all(|d| *d)
    }

    pub fn len(&self) -> usize {
        self.0.iter().filter(|d| **d).count()
    }

    pub fn slots(&self) -> &[bool; 7] {
        &self.0
    }

    /// Selected days in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        WEEK.iter().copied().filter(|d| self.contains(*d))
    }
}

/// "Every N days" count, always in `1..=127`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct DayInterval(u8);

impl DayInterval {
    pub const DAILY: DayInterval = DayInterval(1);

    pub fn new(n: i64) -> Result<Self, TriggerError> {
        if !(1..=MAX_EVERY_DAY_COUNT as i64).contains(&n) {
            return Err(TriggerError::IntervalOutOfRange(n));
        }
        Ok(Self(n as u8))
    }

    /// Decode the bitmask form. An empty mask is normalized to one day.
    pub fn from_slots(slots: &[bool; 7]) -> Self {
        Self(days_to_every_day_count(slots).max(1))
    }

    pub fn to_slots(self) -> [bool; 7] {
        every_day_count_to_days(self.0)
    }

    pub fn get(self) -> u32 {
        self.0 as u32
    }
}

impl TryFrom<i64> for DayInterval {
    type Error = TriggerError;

    fn try_from(n: i64) -> Result<Self, Self::Error> {
        DayInterval::new(n)
    }
}

impl From<DayInterval> for i64 {
    fn from(n: DayInterval) -> Self {
        n.0 as i64
    }
}

/// How a trigger repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Repeat {
    /// Fire at the next occurrence of the time of day, then stop.
    Once,
    /// Fire on each selected weekday.
    Weekly(WeekdaySet),
    /// Fire every N days counted from the first occurrence.
    EveryDays(DayInterval),
}

impl Repeat {
    /// Collapse a weekly selection with no days to [`Repeat::Once`].
    ///
    /// Callers run this before arming; `next_fire` refuses an empty weekly set.
    pub fn normalized(self) -> Self {
        match self {
            Repeat::Weekly(days) if days.is_empty() => Repeat::Once,
            other => other,
        }
    }

    pub fn is_repeating(&self) -> bool {
        !matches!(self, Repeat::Once)
    }

    pub fn mode(&self) -> RepeatMode {
        match self {
            Repeat::Once => RepeatMode::Once,
            Repeat::Weekly(_) => RepeatMode::EveryWeek,
            Repeat::EveryDays(_) => RepeatMode::EveryDays,
        }
    }
}

/// Flat repeat tag used by [`TriggerRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    Once,
    EveryWeek,
    EveryDays,
}

/// A configured rule that fires a start/end action for a timer.
///
/// Values are immutable: the `with_*` methods return a new trigger that
/// keeps the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    pub timer_id: u32,
    pub label: String,
    pub action: TriggerAction,
    pub time: TimeOfDay,
    pub repeat: Repeat,
    pub enabled: bool,
}

impl Trigger {
    /// A new, unsaved, enabled trigger that fires once.
    pub fn draft(timer_id: u32, action: TriggerAction, time: TimeOfDay) -> Self {
        Self {
            id: TriggerId::Draft,
            timer_id,
            label: String::new(),
            action,
            time,
            repeat: Repeat::Once,
            enabled: true,
        }
    }

    pub fn with_id(self, id: TriggerId) -> Self {
        Self { id, ..self }
    }

    pub fn with_label(self, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..self
        }
    }

    pub fn with_time(self, time: TimeOfDay) -> Self {
        Self { time, ..self }
    }

    pub fn with_repeat(self, repeat: Repeat) -> Self {
        Self { repeat, ..self }
    }

    pub fn with_enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }
}

/// Flat trigger shape exchanged with storage and external callers.
///
/// `days` means per-weekday flags under `EveryWeek` and the little-endian
/// bits of the repeat count under `EveryDays`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub id: i64,
    pub timer_id: i64,
    #[serde(default)]
    pub label: String,
    pub action: i64,
    pub hour: i64,
    pub minute: i64,
    pub repeat_mode: RepeatMode,
    #[serde(default)]
    pub days: [bool; 7],
    pub enabled: bool,
}

impl TryFrom<TriggerRecord> for Trigger {
    type Error = TriggerError;

    fn try_from(record: TriggerRecord) -> Result<Self, Self::Error> {
        let repeat = match record.repeat_mode {
            RepeatMode::Once => Repeat::Once,
            RepeatMode::EveryWeek => Repeat::Weekly(WeekdaySet::from_slots(record.days)),
            RepeatMode::EveryDays => Repeat::EveryDays(DayInterval::from_slots(&record.days)),
        };
        Ok(Trigger {
            id: TriggerId::from_raw(record.id)?,
            timer_id: u32::try_from(record.timer_id)
                .map_err(|_| TriggerError::InvalidTimerId(record.timer_id))?,
            label: record.label,
            action: TriggerAction::try_from(record.action)?,
            time: TimeOfDay::new(record.hour, record.minute)?,
            repeat: repeat.normalized(),
            enabled: record.enabled,
        })
    }
}

impl From<&Trigger> for TriggerRecord {
    fn from(trigger: &Trigger) -> Self {
        let days = match trigger.repeat {
            Repeat::Once => [false; 7],
            Repeat::Weekly(set) => *set.slots(),
            Repeat::EveryDays(n) => n.to_slots(),
        };
        TriggerRecord {
            id: trigger.id.to_raw(),
            timer_id: trigger.timer_id as i64,
            label: trigger.label.clone(),
            action: trigger.action.to_raw(),
            hour: trigger.time.hour() as i64,
            minute: trigger.time.minute() as i64,
            repeat_mode: trigger.repeat.mode(),
            days,
            enabled: trigger.enabled,
        }
    }
}
