use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tracing::{info, instrument, warn};

use crate::error::{Result, SchedulerError};
use crate::gateway::{ScheduleOutcome, SchedulingGateway};
use crate::store::TriggerStore;
use crate::types::Trigger;

/// Trigger use cases: every edit keeps the armed alarm in step with the
/// stored trigger.
///
/// Mutations of one trigger id run one at a time so a stale cancel can never
/// undo a newer schedule. Different ids proceed in parallel.
pub struct TriggerService {
    store: Arc<dyn TriggerStore>,
    gateway: Arc<dyn SchedulingGateway>,
    locks: DashMap<u32, Arc<Mutex<()>>>,
}

impl TriggerService {
    pub fn new(store: Arc<dyn TriggerStore>, gateway: Arc<dyn SchedulingGateway>) -> Self {
        Self {
            store,
            gateway,
            locks: DashMap::new(),
        }
    }

    fn id_lock(&self, id: u32) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(id).or_default().value())
    }

    pub fn get(&self, id: u32) -> Result<Option<Trigger>> {
        self.store.get(id)
    }

    pub fn list(&self) -> Result<Vec<Trigger>> {
        self.store.list()
    }

    /// Store a new trigger and arm it when enabled.
    ///
    /// The outcome is `None` when the trigger is disabled and nothing was armed.
    #[instrument(skip(self, trigger), fields(timer_id = trigger.timer_id))]
    pub fn add(&self, trigger: Trigger) -> Result<(Trigger, Option<ScheduleOutcome>)> {
        let trigger = self.store.insert(trigger)?;
        let id = trigger.id.saved().ok_or(SchedulerError::Draft)?;
        let lock = self.id_lock(id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        info!(trigger_id = id, "trigger added");
        let outcome = trigger.enabled.then(|| self.gateway.schedule(&trigger));
        Ok((trigger, outcome))
    }

    /// Replace a stored trigger. The old alarm is canceled first, then the
    /// new value is armed when enabled.
    ///
    /// When the old alarm cannot be canceled the stored trigger is left as
    /// it was and the failed cancel is returned.
    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    pub fn save(&self, trigger: Trigger) -> Result<Option<ScheduleOutcome>> {
        let id = trigger.id.saved().ok_or(SchedulerError::Draft)?;
        let lock = self.id_lock(id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(old) = self.store.get(id)? {
            let canceled = self.gateway.cancel(&old);
            if canceled.is_failed() {
                warn!(outcome = ?canceled, "old alarm still armed, trigger not saved");
                return Ok(Some(canceled));
            }
        }
        self.store.update(trigger.clone())?;
        info!("trigger saved");
        Ok(trigger.enabled.then(|| self.gateway.schedule(&trigger)))
    }

    /// Flip the enabled flag and arm or cancel to match.
    ///
    /// An unknown id yields [`ScheduleOutcome::Failed`].
    #[instrument(skip(self))]
    pub fn set_enabled(&self, id: u32, enabled: bool) -> Result<ScheduleOutcome> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.set_enabled_locked(id, enabled)
    }

    fn set_enabled_locked(&self, id: u32, enabled: bool) -> Result<ScheduleOutcome> {
        let Some(trigger) = self.store.get(id)? else {
            warn!(trigger_id = id, "set_enabled on unknown trigger");
            return Ok(ScheduleOutcome::failed(format!("trigger {id} not found")));
        };
        let trigger = trigger.with_enabled(enabled);
        self.store.update(trigger.clone())?;
        let outcome = if enabled {
            self.gateway.schedule(&trigger)
        } else {
            self.gateway.cancel(&trigger)
        };
        if outcome.is_failed() {
            warn!(trigger_id = id, ?outcome, "gateway refused trigger");
        }
        Ok(outcome)
    }

    /// Cancel then forget a trigger. Returns how many alarms were removed.
    #[instrument(skip(self))]
    pub fn delete(&self, id: u32) -> Result<usize> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let count = match self.store.get(id)? {
            Some(trigger) => match self.gateway.cancel(&trigger) {
                ScheduleOutcome::Canceled { count } => count,
                other => {
                    warn!(trigger_id = id, outcome = ?other, "cancel before delete did not succeed");
                    0
                }
            },
            None => 0,
        };
        self.store.remove(id)?;
        // Keep the entry while another caller holds or waits on it (the map
        // and `lock` account for two references).
        self.locks.remove_if(&id, |_, entry| Arc::strong_count(entry) == 2);
        info!(trigger_id = id, canceled = count, "trigger deleted");
        Ok(count)
    }

    /// React to a fired alarm: repeating triggers are armed for their next
    /// occurrence, one-shot triggers are disabled.
    ///
    /// Returns `None` when the trigger was deleted after the alarm was armed.
    #[instrument(skip(self))]
    pub fn handle_fired(&self, id: u32) -> Result<Option<(Trigger, ScheduleOutcome)>> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(trigger) = self.store.get(id)? else {
            warn!(trigger_id = id, "fired alarm for unknown trigger");
            return Ok(None);
        };
        let outcome = self.set_enabled_locked(id, trigger.repeat.is_repeating())?;
        let trigger = self.store.get(id)?.unwrap_or(trigger);
        Ok(Some((trigger, outcome)))
    }

    /// Arm every enabled trigger, e.g. after a restart.
    #[instrument(skip(self))]
    pub fn restore_all(&self) -> Result<Vec<(u32, ScheduleOutcome)>> {
        let mut out = Vec::new();
        for trigger in self.store.list()?.into_iter().filter(|t| t.enabled) {
            let Some(id) = trigger.id.saved() else {
                continue;
            };
            let lock = self.id_lock(id);
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            out.push((id, self.gateway.schedule(&trigger)));
        }
        info!(count = out.len(), "enabled triggers re-armed");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTriggerStore;
    use crate::types::{DayInterval, Repeat, TimeOfDay, TriggerAction, TriggerId};
    use chrono::{Duration, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    /// Records gateway calls instead of arming anything.
    #[derive(Default)]
    struct FakeGateway {
        armed: Mutex<HashMap<u32, Trigger>>,
        cancels: Mutex<Vec<u32>>,
        fail_cancel: AtomicBool,
    }

    impl SchedulingGateway for FakeGateway {
        fn schedule(&self, trigger: &Trigger) -> ScheduleOutcome {
            let Some(id) = trigger.id.saved() else {
                return ScheduleOutcome::failed("draft");
            };
            self.armed.lock().unwrap().insert(id, trigger.clone());
            ScheduleOutcome::Scheduled {
                at: Utc::now() + Duration::hours(1),
            }
        }

        fn cancel(&self, trigger: &Trigger) -> ScheduleOutcome {
            let id = trigger.id.saved().unwrap_or(0);
            self.cancels.lock().unwrap().push(id);
            if self.fail_cancel.load(Ordering::SeqCst) {
                return ScheduleOutcome::failed("alarm service unavailable");
            }
            let count = self.armed.lock().unwrap().remove(&id).map_or(0, |_| 1);
            ScheduleOutcome::Canceled { count }
        }
    }

    fn service() -> (TriggerService, Arc<FakeGateway>) {
        let gateway = Arc::new(FakeGateway::default());
        let service = TriggerService::new(Arc::new(MemoryTriggerStore::new()), gateway.clone());
        (service, gateway)
    }

    fn draft(repeat: Repeat) -> Trigger {
        Trigger::draft(5, TriggerAction::Start, TimeOfDay::new(8, 0).unwrap()).with_repeat(repeat)
    }

    #[test]
    fn add_arms_enabled_triggers() {
        let (svc, gw) = service();
        let (t, outcome) = svc.add(draft(Repeat::Once)).unwrap();
        assert!(matches!(t.id, TriggerId::Saved(_)));
        assert!(matches!(outcome, Some(ScheduleOutcome::Scheduled { .. })));
        assert!(gw.armed.lock().unwrap().contains_key(&1));

        let (_, outcome) = svc.add(draft(Repeat::Once).with_enabled(false)).unwrap();
        assert!(outcome.is_none());
        assert_eq!(gw.armed.lock().unwrap().len(), 1);
    }

    #[test]
    fn save_cancels_old_alarm_first() {
        let (svc, gw) = service();
        let (t, _) = svc.add(draft(Repeat::Once)).unwrap();
        let edited = t.with_time(TimeOfDay::new(21, 30).unwrap());
        svc.save(edited).unwrap();
        assert_eq!(*gw.cancels.lock().unwrap(), vec![1]);
        assert_eq!(gw.armed.lock().unwrap()[&1].time.hour(), 21);
    }

    #[test]
    fn save_keeps_old_value_when_cancel_fails() {
        let (svc, gw) = service();
        let (t, _) = svc
            .add(draft(Repeat::EveryDays(DayInterval::DAILY)))
            .unwrap();
        gw.fail_cancel.store(true, Ordering::SeqCst);

        let outcome = svc.save(t.clone().with_enabled(false)).unwrap();
        assert!(matches!(outcome, Some(ScheduleOutcome::Failed { .. })));
        assert_eq!(svc.get(1).unwrap().unwrap(), t);
        assert!(gw.armed.lock().unwrap().contains_key(&1));
    }

    #[test]
    fn save_rejects_drafts() {
        let (svc, _) = service();
        assert!(matches!(
            svc.save(draft(Repeat::Once)),
            Err(SchedulerError::Draft)
        ));
    }

    #[test]
    fn set_enabled_unknown_is_failed_outcome() {
        let (svc, _) = service();
        assert!(svc.set_enabled(99, true).unwrap().is_failed());
    }

    #[test]
    fn disable_cancels() {
        let (svc, gw) = service();
        svc.add(draft(Repeat::Once)).unwrap();
        assert_eq!(
            svc.set_enabled(1, false).unwrap(),
            ScheduleOutcome::Canceled { count: 1 }
        );
        assert!(!svc.get(1).unwrap().unwrap().enabled);
        assert!(gw.armed.lock().unwrap().is_empty());
    }

    #[test]
    fn fired_once_is_disabled() {
        let (svc, gw) = service();
        svc.add(draft(Repeat::Once)).unwrap();
        let (t, outcome) = svc.handle_fired(1).unwrap().unwrap();
        assert!(!t.enabled);
        assert!(matches!(outcome, ScheduleOutcome::Canceled { .. }));
        assert!(gw.armed.lock().unwrap().is_empty());
    }

    #[test]
    fn fired_repeating_is_rearmed() {
        let (svc, gw) = service();
        svc.add(draft(Repeat::EveryDays(DayInterval::new(2).unwrap())))
            .unwrap();
        gw.armed.lock().unwrap().clear();
        let (t, outcome) = svc.handle_fired(1).unwrap().unwrap();
        assert!(t.enabled);
        assert!(matches!(outcome, ScheduleOutcome::Scheduled { .. }));
        assert!(gw.armed.lock().unwrap().contains_key(&1));
    }

    #[test]
    fn fired_after_delete_is_ignored() {
        let (svc, _) = service();
        svc.add(draft(Repeat::Once)).unwrap();
        assert_eq!(svc.delete(1).unwrap(), 1);
        assert!(svc.handle_fired(1).unwrap().is_none());
        assert!(svc.get(1).unwrap().is_none());
    }

    #[test]
    fn restore_arms_only_enabled() {
        let (svc, gw) = service();
        svc.add(draft(Repeat::Once)).unwrap();
        svc.add(draft(Repeat::Once).with_enabled(false)).unwrap();
        gw.armed.lock().unwrap().clear();
        let restored = svc.restore_all().unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].0, 1);
    }

    #[test]
    fn concurrent_toggles_leave_consistent_state() {
        let (svc, gw) = service();
        svc.add(draft(Repeat::Once)).unwrap();
        let svc = Arc::new(svc);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let svc = Arc::clone(&svc);
                std::thread::spawn(move || svc.set_enabled(1, i % 2 == 0).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let enabled = svc.get(1).unwrap().unwrap().enabled;
        assert_eq!(gw.armed.lock().unwrap().contains_key(&1), enabled);
    }

    #[test]
    fn delete_without_waiters_drops_lock_entry() {
        let (svc, _) = service();
        svc.add(draft(Repeat::Once)).unwrap();
        svc.delete(1).unwrap();
        assert!(!svc.locks.contains_key(&1));
    }

    #[test]
    fn delete_keeps_lock_shared_with_waiters() {
        let (svc, _) = service();
        svc.add(draft(Repeat::Once)).unwrap();
        let held = svc.id_lock(1);
        svc.delete(1).unwrap();
        assert!(Arc::ptr_eq(&held, &svc.id_lock(1)));
    }

    /// Parks the first cancel until the test lets it go.
    struct GatedGateway {
        gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    }

    impl SchedulingGateway for GatedGateway {
        fn schedule(&self, _trigger: &Trigger) -> ScheduleOutcome {
            ScheduleOutcome::Scheduled { at: Utc::now() }
        }

        fn cancel(&self, _trigger: &Trigger) -> ScheduleOutcome {
            let gate = self.gate.lock().unwrap().take();
            if let Some((entered, go)) = gate {
                entered.send(()).unwrap();
                go.recv().unwrap();
            }
            ScheduleOutcome::Canceled { count: 1 }
        }
    }

    #[test]
    fn save_waiting_on_delete_stays_serialized() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (go_tx, go_rx) = mpsc::channel();
        let gateway = Arc::new(GatedGateway {
            gate: Mutex::new(Some((entered_tx, go_rx))),
        });
        let svc = Arc::new(TriggerService::new(
            Arc::new(MemoryTriggerStore::new()),
            gateway,
        ));
        let (t, _) = svc.add(draft(Repeat::Once)).unwrap();

        // delete parks inside cancel while holding the id lock
        let deleter = {
            let svc = Arc::clone(&svc);
            std::thread::spawn(move || svc.delete(1).unwrap())
        };
        entered_rx.recv().unwrap();

        let saver = {
            let svc = Arc::clone(&svc);
            std::thread::spawn(move || svc.save(t.with_enabled(false)))
        };
        while svc.locks.get(&1).map(|l| Arc::strong_count(l.value())) != Some(3) {
            std::thread::yield_now();
        }

        go_tx.send(()).unwrap();
        assert_eq!(deleter.join().unwrap(), 1);
        // the waiting save still owns the entry, so later callers share it
        assert!(svc.locks.contains_key(&1));

        assert!(matches!(
            saver.join().unwrap(),
            Err(SchedulerError::TriggerNotFound { id: 1 })
        ));
        assert!(svc.set_enabled(1, true).unwrap().is_failed());
        assert!(svc.get(1).unwrap().is_none());
    }
}
