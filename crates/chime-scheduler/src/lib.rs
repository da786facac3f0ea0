//! `chime-scheduler`: next-fire computation for timer triggers, plus the
//! alarm plumbing that acts on it.
//!
//! # Overview
//!
//! A [`Trigger`] fires a start or end action on a timer at a local time of
//! day. [`schedule::next_fire`] turns a trigger and the current instant into
//! the next instant it must fire. The [`AlarmGateway`] arms that instant in a
//! SQLite `alarms` table, the [`AlarmEngine`] polls the table and reports due
//! alarms, and the [`TriggerService`] keeps armed alarms in step with edits.
//!
//! # Repeat modes
//!
//! | Variant     | Behaviour                                             |
//! |-------------|-------------------------------------------------------|
//! | `Once`      | Next occurrence of HH:MM local time, then disabled    |
//! | `Weekly`    | HH:MM local time on each selected weekday             |
//! | `EveryDays` | HH:MM local time every N days (N in 1..=127)          |

pub mod codec;
pub mod db;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod schedule;
pub mod service;
pub mod store;
pub mod types;
pub mod weekdays;

pub use engine::{AlarmEngine, AlarmGateway, ArmedAlarm, FiredAlarm};
pub use error::{Result, SchedulerError, TriggerError};
pub use gateway::{ScheduleOutcome, SchedulingGateway};
pub use schedule::{next_fire, next_fire_local, upcoming};
pub use service::TriggerService;
pub use store::{MemoryTriggerStore, TriggerStore};
pub use types::{
    DayInterval, Repeat, RepeatMode, TimeOfDay, Trigger, TriggerAction, TriggerId, TriggerRecord,
    WeekdaySet,
};
pub use weekdays::{format_selected_days, week_order, DayNames, WeekdayFormatter};
