use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local, SecondsFormat, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::{
    db::init_db,
    error::Result,
    gateway::{ScheduleOutcome, SchedulingGateway},
    schedule::next_fire,
    types::{Repeat, Trigger, TriggerAction},
};

/// An alarm waiting in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmedAlarm {
    pub trigger_id: u32,
    pub timer_id: u32,
    pub action: TriggerAction,
    pub fire_at: DateTime<Utc>,
}

/// An alarm whose time has come, as handed to the fired-alarm consumer.
pub type FiredAlarm = ArmedAlarm;

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

fn row_to_alarm(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<ArmedAlarm>> {
    let trigger_id: u32 = row.get(0)?;
    let timer_id: u32 = row.get(1)?;
    let action: String = row.get(2)?;
    let fire_at: String = row.get(3)?;

    let action = match action.parse::<TriggerAction>() {
        Ok(a) => a,
        Err(e) => {
            warn!(trigger_id, "skipping alarm row: {e}");
            return Ok(None);
        }
    };
    let fire_at = match DateTime::parse_from_rfc3339(&fire_at) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(e) => {
            warn!(trigger_id, "skipping alarm row with bad fire_at: {e}");
            return Ok(None);
        }
    };
    Ok(Some(ArmedAlarm {
        trigger_id,
        timer_id,
        action,
        fire_at,
    }))
}

/// SQLite-backed stand-in for the OS alarm facility.
///
/// Each saved trigger owns at most one row; arming again replaces it.
pub struct AlarmGateway {
    conn: Arc<Mutex<Connection>>,
}

impl AlarmGateway {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Arm the next occurrence of `trigger` after `now`.
    ///
    /// [`SchedulingGateway::schedule`] calls this with the local clock.
    pub fn schedule_after<Tz: TimeZone>(
        &self,
        trigger: &Trigger,
        now: &DateTime<Tz>,
    ) -> ScheduleOutcome {
        let Some(id) = trigger.id.saved() else {
            return ScheduleOutcome::failed("draft trigger has no id to arm under");
        };
        if matches!(trigger.repeat, Repeat::Weekly(days) if days.is_empty()) {
            return ScheduleOutcome::failed("weekly trigger selects no day");
        }

        let at = next_fire(trigger, now).with_timezone(&Utc);
        match self.arm(id, trigger, at) {
            Ok(()) => {
                info!(trigger_id = id, fire_at = %ts(at), action = %trigger.action, "alarm armed");
                ScheduleOutcome::Scheduled { at }
            }
            Err(e) => {
                error!(trigger_id = id, "arming alarm failed: {e}");
                ScheduleOutcome::failed(e.to_string())
            }
        }
    }

    /// The alarm currently armed for `trigger_id`, if any.
    pub fn armed(&self, trigger_id: u32) -> Result<Option<ArmedAlarm>> {
        let conn = lock(&self.conn);
        let alarm = conn
            .query_row(
                "SELECT trigger_id, timer_id, action, fire_at FROM alarms WHERE trigger_id = ?1",
                [trigger_id],
                row_to_alarm,
            )
            .optional()?;
        Ok(alarm.flatten())
    }

    /// All armed alarms, soonest first.
    pub fn pending(&self) -> Result<Vec<ArmedAlarm>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT trigger_id, timer_id, action, fire_at FROM alarms ORDER BY fire_at",
        )?;
        let alarms = stmt
            .query_map([], row_to_alarm)?
            .filter_map(|r| r.ok().flatten())
            .collect();
        Ok(alarms)
    }

    fn arm(&self, id: u32, trigger: &Trigger, at: DateTime<Utc>) -> Result<()> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO alarms (trigger_id, timer_id, action, fire_at, armed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(trigger_id) DO UPDATE SET
                timer_id = excluded.timer_id,
                action   = excluded.action,
                fire_at  = excluded.fire_at,
                armed_at = excluded.armed_at",
            rusqlite::params![
                id,
                trigger.timer_id,
                trigger.action.to_string(),
                ts(at),
                ts(Utc::now())
            ],
        )?;
        Ok(())
    }

    fn disarm(&self, id: u32) -> Result<usize> {
        let conn = lock(&self.conn);
        Ok(conn.execute("DELETE FROM alarms WHERE trigger_id = ?1", [id])?)
    }
}

impl SchedulingGateway for AlarmGateway {
    fn schedule(&self, trigger: &Trigger) -> ScheduleOutcome {
        self.schedule_after(trigger, &Local::now())
    }

    fn cancel(&self, trigger: &Trigger) -> ScheduleOutcome {
        let Some(id) = trigger.id.saved() else {
            return ScheduleOutcome::Canceled { count: 0 };
        };
        match self.disarm(id) {
            Ok(count) => {
                debug!(trigger_id = id, count, "alarm canceled");
                ScheduleOutcome::Canceled { count }
            }
            Err(e) => {
                error!(trigger_id = id, "canceling alarm failed: {e}");
                ScheduleOutcome::failed(e.to_string())
            }
        }
    }
}

/// Polls the alarm table and hands due alarms to a consumer.
pub struct AlarmEngine {
    conn: Arc<Mutex<Connection>>,
    /// If set, fired alarms are sent here.
    fired_tx: Option<mpsc::Sender<FiredAlarm>>,
    poll_interval: Duration,
}

impl AlarmEngine {
    /// Create an engine on the same connection as `gateway`.
    ///
    /// Delivery never blocks the tick loop: when `fired_tx` has no free slot
    /// the alarm waits in the table for a later tick.
    pub fn sharing(
        gateway: &AlarmGateway,
        fired_tx: Option<mpsc::Sender<FiredAlarm>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            conn: Arc::clone(&gateway.conn),
            fired_tx,
            poll_interval,
        }
    }

    /// Main event loop. Polls until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "alarm engine started");
        self.report_overdue();

        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()) {
                        error!("alarm tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("alarm engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    // --- private helpers ---------------------------------------------------

    /// Alarms that came due while nothing was polling fire on the first tick.
    fn report_overdue(&self) {
        let now = ts(Utc::now());
        let conn = lock(&self.conn);
        match conn.query_row(
            "SELECT COUNT(*) FROM alarms WHERE fire_at < ?1",
            [&now],
            |r| r.get::<_, i64>(0),
        ) {
            Ok(n) if n > 0 => warn!(count = n, "overdue alarms will fire late"),
            Err(e) => error!("overdue query failed: {e}"),
            _ => {}
        }
    }

    /// Remove every alarm due at `now` and forward it. Returns what fired.
    ///
    /// Only alarms that fit in the fired channel are removed; the rest stay
    /// armed until the consumer catches up.
    pub(crate) fn tick(&self, now: DateTime<Utc>) -> Result<Vec<FiredAlarm>> {
        let now_str = ts(now);
        let conn = lock(&self.conn);

        // Collect eagerly so `stmt` is dropped before the DELETEs below.
        let due: Vec<ArmedAlarm> = {
            let mut stmt = conn.prepare_cached(
                "SELECT trigger_id, timer_id, action, fire_at FROM alarms
                 WHERE fire_at <= ?1 ORDER BY fire_at",
            )?;
            let rows: Vec<_> = stmt
                .query_map([&now_str], row_to_alarm)?
                .filter_map(|r| r.ok().flatten())
                .collect();
            rows
        };

        let mut fired = Vec::with_capacity(due.len());
        for alarm in due {
            // Reserve a slot before touching the row: an alarm that cannot be
            // delivered stays armed and is retried on the next tick.
            let permit = match self.fired_tx.as_ref().map(|tx| tx.try_reserve()) {
                None => None,
                Some(Ok(permit)) => Some(permit),
                Some(Err(e)) => {
                    warn!(
                        trigger_id = alarm.trigger_id,
                        "fired channel unavailable ({e}), alarm kept for retry"
                    );
                    break;
                }
            };

            // Match on fire_at too: a re-arm since the SELECT keeps its row.
            let removed = conn.execute(
                "DELETE FROM alarms WHERE trigger_id = ?1 AND fire_at = ?2",
                rusqlite::params![alarm.trigger_id, ts(alarm.fire_at)],
            )?;
            if removed == 0 {
                continue;
            }

            info!(
                trigger_id = alarm.trigger_id,
                timer_id = alarm.timer_id,
                action = %alarm.action,
                "alarm fired"
            );

            if let Some(permit) = permit {
                permit.send(alarm.clone());
            }
            fired.push(alarm);
        }
        Ok(fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DayInterval, TimeOfDay, TriggerId, WeekdaySet};
    use chrono::Weekday;
    use std::num::NonZeroU32;

    fn saved(id: u32, repeat: Repeat) -> Trigger {
        Trigger::draft(7, TriggerAction::End, TimeOfDay::new(9, 0).unwrap())
            .with_id(TriggerId::Saved(NonZeroU32::new(id).unwrap()))
            .with_repeat(repeat)
    }

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap()
    }

    fn gateway() -> AlarmGateway {
        AlarmGateway::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn schedule_arms_one_row_per_trigger() {
        let gw = gateway();
        let t = saved(1, Repeat::Once);
        assert_eq!(
            gw.schedule_after(&t, &at(4, 8)),
            ScheduleOutcome::Scheduled { at: at(4, 9) }
        );
        // re-arm replaces
        assert_eq!(
            gw.schedule_after(&t, &at(4, 10)),
            ScheduleOutcome::Scheduled { at: at(5, 9) }
        );
        let pending = gw.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].fire_at, at(5, 9));
        assert_eq!(pending[0].action, TriggerAction::End);
    }

    #[test]
    fn draft_cannot_be_armed() {
        let gw = gateway();
        let t = Trigger::draft(1, TriggerAction::Start, TimeOfDay::new(9, 0).unwrap());
        assert!(gw.schedule_after(&t, &at(4, 8)).is_failed());
        assert_eq!(gw.cancel(&t), ScheduleOutcome::Canceled { count: 0 });
    }

    #[test]
    fn empty_weekly_fails_without_panicking() {
        let gw = gateway();
        let t = saved(2, Repeat::Weekly(WeekdaySet::default()));
        assert!(gw.schedule_after(&t, &at(4, 8)).is_failed());
        assert!(gw.pending().unwrap().is_empty());
    }

    #[test]
    fn cancel_reports_removed_count() {
        let gw = gateway();
        let t = saved(3, Repeat::EveryDays(DayInterval::new(2).unwrap()));
        gw.schedule_after(&t, &at(4, 10));
        assert_eq!(gw.cancel(&t), ScheduleOutcome::Canceled { count: 1 });
        assert_eq!(gw.cancel(&t), ScheduleOutcome::Canceled { count: 0 });
        assert!(gw.armed(3).unwrap().is_none());
    }

    #[test]
    fn tick_fires_due_alarms_only() {
        let gw = gateway();
        let (tx, mut rx) = mpsc::channel(8);
        let engine = AlarmEngine::sharing(&gw, Some(tx), Duration::from_secs(1));

        gw.schedule_after(&saved(1, Repeat::Once), &at(4, 8));
        gw.schedule_after(
            &saved(2, Repeat::Weekly(WeekdaySet::from_days([Weekday::Fri]))),
            &at(4, 8),
        );

        assert!(engine.tick(at(4, 8)).unwrap().is_empty());

        let fired = engine.tick(at(4, 9)).unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].trigger_id, 1);
        assert_eq!(rx.try_recv().unwrap().trigger_id, 1);

        // gone after firing
        assert!(engine.tick(at(4, 9)).unwrap().is_empty());
        assert_eq!(gw.pending().unwrap().len(), 1);
        assert_eq!(gw.armed(2).unwrap().unwrap().fire_at, at(8, 9));
    }

    #[test]
    fn full_channel_keeps_undelivered_alarms_armed() {
        let gw = gateway();
        let (tx, mut rx) = mpsc::channel(1);
        let engine = AlarmEngine::sharing(&gw, Some(tx), Duration::from_secs(1));
        let daily = Repeat::EveryDays(DayInterval::DAILY);
        gw.schedule_after(&saved(1, daily), &at(4, 8));
        gw.schedule_after(&saved(2, daily), &at(4, 8));

        let fired = engine.tick(at(4, 9)).unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(gw.pending().unwrap().len(), 1);
        let first = rx.try_recv().unwrap().trigger_id;

        // consumer drained the slot; the kept alarm goes out now
        let fired = engine.tick(at(4, 9)).unwrap();
        assert_eq!(fired.len(), 1);
        let second = rx.try_recv().unwrap().trigger_id;
        assert_ne!(first, second);
        assert!(gw.pending().unwrap().is_empty());
    }

    #[test]
    fn closed_channel_fires_nothing() {
        let gw = gateway();
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let engine = AlarmEngine::sharing(&gw, Some(tx), Duration::from_secs(1));
        gw.schedule_after(&saved(1, Repeat::Once), &at(4, 8));

        assert!(engine.tick(at(4, 9)).unwrap().is_empty());
        assert_eq!(gw.armed(1).unwrap().unwrap().fire_at, at(4, 9));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let gw = gateway();
        let engine = AlarmEngine::sharing(&gw, None, Duration::from_millis(10));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(engine.run(shutdown_rx));
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
