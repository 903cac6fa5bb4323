//! Undo/redo journal.
//!
//! Every recorded action stores the whole snapshot *after* the action. Since
//! snapshots share unchanged canvases, an entry costs roughly the canvases
//! the action touched. Undo and redo are total replacements through the
//! store, so there is no inverse chain that could drift.
//!
//! Entries recorded between `begin_group` and the matching `end_group` share
//! a `GroupId` and are undone as one step. Consecutive records of the same
//! action inside a group collapse into one entry (a drag records once per
//! pointer move).

use crate::bus::{EventBus, Payload, topics};
use crate::error::{HistoryError, StoreError};
use crate::store::Store;
use nest_core::Snapshot;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u64);

/// One journal entry; immutable once recorded.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub action: String,
    pub snapshot: Snapshot,
    pub timestamp: SystemTime,
    pub group: Option<GroupId>,
}

struct Journal {
    entries: VecDeque<HistoryEntry>,
    /// Index of the last applied entry; -1 when nothing can be undone.
    cursor: isize,
    /// State before the oldest retained entry.
    baseline: Snapshot,
    max_entries: usize,
    depth: usize,
    open: Option<GroupId>,
    recorded_in_group: bool,
    next_group: u64,
}

impl Journal {
    fn can_undo(&self) -> bool {
        self.cursor >= 0
    }

    fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len() as isize
    }

    /// Index of the first entry of the step containing `at`.
    fn step_start(&self, at: usize) -> usize {
        let Some(group) = self.entries[at].group else {
            return at;
        };
        let mut start = at;
        while start > 0 && self.entries[start - 1].group == Some(group) {
            start -= 1;
        }
        start
    }

    /// Index of the last entry of the step containing `at`.
    fn step_end(&self, at: usize) -> usize {
        let Some(group) = self.entries[at].group else {
            return at;
        };
        let mut end = at;
        while end + 1 < self.entries.len() && self.entries[end + 1].group == Some(group) {
            end += 1;
        }
        end
    }

    /// Drop whole oldest steps until at most `max_entries` remain. The
    /// newest step is never dropped, even if it alone exceeds the limit.
    fn enforce_retention(&mut self) {
        while self.entries.len() > self.max_entries {
            let end = self.step_end(0);
            if end + 1 >= self.entries.len() {
                break;
            }
            for _ in 0..=end {
                if let Some(dropped) = self.entries.pop_front() {
                    self.baseline = dropped.snapshot;
                }
            }
            self.cursor -= (end + 1) as isize;
            log::debug!("history: dropped {} oldest entries", end + 1);
        }
    }
}

pub struct History {
    store: Rc<Store>,
    bus: EventBus,
    journal: RefCell<Journal>,
    restoring: Cell<bool>,
}

impl History {
    /// A journal whose baseline is the store's current snapshot.
    pub fn new(store: Rc<Store>, bus: EventBus, max_entries: usize) -> Self {
        let baseline = store.get();
        Self {
            store,
            bus,
            journal: RefCell::new(Journal {
                entries: VecDeque::new(),
                cursor: -1,
                baseline,
                max_entries: max_entries.max(1),
                depth: 0,
                open: None,
                recorded_in_group: false,
                next_group: 0,
            }),
            restoring: Cell::new(false),
        }
    }

    /// Record the store's current snapshot as the result of `action`.
    /// Ignored while an undo/redo is being applied.
    pub fn record(&self, action: &str) {
        if self.restoring.get() {
            return;
        }
        let snapshot = self.store.get();
        let publish = {
            let mut j = self.journal.borrow_mut();
            let keep = (j.cursor + 1) as usize;
            j.entries.truncate(keep);

            let group = j.open;
            let coalesce = group.is_some()
                && j
                    .entries
                    .back()
                    .is_some_and(|last| last.group == group && last.action == action);
            if coalesce {
                if let Some(last) = j.entries.back_mut() {
                    last.snapshot = snapshot;
                    last.timestamp = SystemTime::now();
                }
            } else {
                j.entries.push_back(HistoryEntry {
                    action: action.to_string(),
                    snapshot,
                    timestamp: SystemTime::now(),
                    group,
                });
                j.cursor += 1;
            }
            log::debug!("history: record `{action}` ({} entries)", j.entries.len());

            if group.is_some() {
                j.recorded_in_group = true;
                false
            } else {
                j.enforce_retention();
                true
            }
        };
        if publish {
            self.publish_changed();
        }
    }

    /// Open a group. Nested calls join the outermost group, whose id is
    /// returned.
    pub fn begin_group(&self, name: &str) -> GroupId {
        let mut j = self.journal.borrow_mut();
        if j.depth == 0 {
            let id = GroupId(j.next_group);
            j.next_group += 1;
            j.open = Some(id);
            j.recorded_in_group = false;
            log::debug!("history: begin group `{name}`");
        }
        j.depth += 1;
        j.open.unwrap_or(GroupId(0))
    }

    /// Close the innermost open group. Closing the outermost one makes the
    /// group a single undo step and notifies if anything was recorded.
    pub fn end_group(&self) {
        let publish = {
            let mut j = self.journal.borrow_mut();
            if j.depth == 0 {
                return;
            }
            j.depth -= 1;
            if j.depth > 0 {
                return;
            }
            j.open = None;
            let recorded = std::mem::take(&mut j.recorded_in_group);
            if recorded {
                j.enforce_retention();
            }
            recorded
        };
        if publish {
            self.publish_changed();
        }
    }

    /// Run `recipe` against the store as one undo step named `action`.
    /// Inside an already open group the step joins that group.
    pub fn transact<E, F>(&self, action: &str, recipe: F) -> Result<bool, E>
    where
        E: From<StoreError>,
        F: FnOnce(&Snapshot) -> Result<Snapshot, E>,
    {
        self.begin_group(action);
        let result = self.store.update(recipe);
        if matches!(result, Ok(true)) {
            self.record(action);
        }
        self.end_group();
        result
    }

    pub fn is_grouping(&self) -> bool {
        self.journal.borrow().depth > 0
    }

    /// Restore the snapshot preceding the current step.
    ///
    /// # Errors
    /// `HistoryError::Underflow` when there is nothing to undo; the state is
    /// left untouched.
    pub fn undo(&self) -> Result<(), HistoryError> {
        self.close_open_group();
        let (target, cursor) = {
            let j = self.journal.borrow();
            if !j.can_undo() {
                return Err(HistoryError::Underflow);
            }
            let start = j.step_start(j.cursor as usize);
            let target = match start {
                0 => j.baseline.clone(),
                n => j.entries[n - 1].snapshot.clone(),
            };
            (target, start as isize - 1)
        };
        self.restore(target, cursor)?;
        log::debug!("history: undo -> cursor {cursor}");
        self.publish_changed();
        Ok(())
    }

    /// Restore the last snapshot of the next step.
    ///
    /// # Errors
    /// `HistoryError::Overflow` when there is nothing to redo.
    pub fn redo(&self) -> Result<(), HistoryError> {
        self.close_open_group();
        let (target, cursor) = {
            let j = self.journal.borrow();
            if !j.can_redo() {
                return Err(HistoryError::Overflow);
            }
            let end = j.step_end((j.cursor + 1) as usize);
            (j.entries[end].snapshot.clone(), end as isize)
        };
        self.restore(target, cursor)?;
        log::debug!("history: redo -> cursor {cursor}");
        self.publish_changed();
        Ok(())
    }

    fn restore(&self, target: Snapshot, cursor: isize) -> Result<(), HistoryError> {
        self.restoring.set(true);
        let result = self.store.replace(target);
        self.restoring.set(false);
        result.map_err(|e| HistoryError::Restore(e.to_string()))?;
        self.journal.borrow_mut().cursor = cursor;
        Ok(())
    }

    /// An undo or redo in the middle of a gesture ends the gesture first.
    fn close_open_group(&self) {
        let open = self.journal.borrow().depth;
        if open > 0 {
            log::warn!("history: force-closing {open} open group(s)");
            self.journal.borrow_mut().depth = 1;
            self.end_group();
        }
    }

    /// Forget every entry and take the current snapshot as the new baseline.
    pub fn reset(&self) {
        let baseline = self.store.get();
        {
            let mut j = self.journal.borrow_mut();
            j.entries.clear();
            j.cursor = -1;
            j.baseline = baseline;
            j.depth = 0;
            j.open = None;
            j.recorded_in_group = false;
        }
        self.publish_changed();
    }

    pub fn can_undo(&self) -> bool {
        self.journal.borrow().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.journal.borrow().can_redo()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.journal.borrow().entries.iter().cloned().collect()
    }

    pub fn cursor(&self) -> isize {
        self.journal.borrow().cursor
    }

    pub fn baseline(&self) -> Snapshot {
        self.journal.borrow().baseline.clone()
    }

    fn publish_changed(&self) {
        let (can_undo, can_redo) = {
            let j = self.journal.borrow();
            (j.can_undo(), j.can_redo())
        };
        self.bus.publish(
            topics::HISTORY_CHANGED,
            Payload::History { can_undo, can_redo },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::UiPatch;
    use pretty_assertions::assert_eq;

    struct Fixture {
        store: Rc<Store>,
        history: History,
        notifications: Rc<RefCell<Vec<Payload>>>,
    }

    fn fixture(max: usize) -> Fixture {
        let store = Rc::new(Store::new(Snapshot::default()));
        let bus = EventBus::new();
        let notifications = Rc::new(RefCell::new(Vec::new()));
        let sink = notifications.clone();
        bus.subscribe(topics::HISTORY_CHANGED, move |p| {
            sink.borrow_mut().push(p.clone());
            Ok(())
        });
        let history = History::new(store.clone(), bus, max);
        Fixture {
            store,
            history,
            notifications,
        }
    }

    fn set_zoom(f: &Fixture, zoom: f32) {
        f.store
            .patch(UiPatch {
                zoom: Some(zoom),
                ..UiPatch::default()
            })
            .unwrap();
    }

    fn zoom(f: &Fixture) -> f32 {
        f.store.get().ui.zoom
    }

    #[test]
    fn notifies_once_per_record_group_and_move() {
        let f = fixture(100);
        for z in [2.0, 3.0, 4.0] {
            set_zoom(&f, z);
            f.history.record("zoom");
        }
        assert_eq!(f.notifications.borrow().len(), 3);

        f.history.begin_group("drag");
        set_zoom(&f, 5.0);
        f.history.record("a");
        set_zoom(&f, 6.0);
        f.history.record("b");
        assert_eq!(f.notifications.borrow().len(), 3);
        f.history.end_group();
        assert_eq!(f.notifications.borrow().len(), 4);

        f.history.undo().unwrap();
        f.history.redo().unwrap();
        assert_eq!(f.notifications.borrow().len(), 6);
        assert_eq!(
            f.notifications.borrow().last(),
            Some(&Payload::History {
                can_undo: true,
                can_redo: false
            })
        );
    }

    #[test]
    fn empty_group_does_not_notify() {
        let f = fixture(100);
        f.history.begin_group("noop");
        f.history.end_group();
        assert!(f.notifications.borrow().is_empty());
        assert!(!f.history.can_undo());
    }

    #[test]
    fn undo_at_bottom_is_idempotent() {
        let f = fixture(100);
        set_zoom(&f, 2.0);
        f.history.record("zoom");
        f.history.undo().unwrap();
        let bottom = f.store.get();

        assert_eq!(f.history.undo(), Err(HistoryError::Underflow));
        assert_eq!(f.history.undo(), Err(HistoryError::Underflow));
        assert!(f.store.get().same_as(&bottom));
        assert_eq!(f.history.cursor(), -1);
        assert_eq!(zoom(&f), 1.0);
    }

    #[test]
    fn redo_past_end_overflows() {
        let f = fixture(100);
        assert_eq!(f.history.redo(), Err(HistoryError::Overflow));
    }

    #[test]
    fn group_is_one_step() {
        let f = fixture(100);
        set_zoom(&f, 2.0);
        f.history.record("zoom");

        f.history.begin_group("outer");
        set_zoom(&f, 3.0);
        f.history.record("one");
        f.history.begin_group("inner");
        set_zoom(&f, 4.0);
        f.history.record("two");
        f.history.end_group();
        assert!(f.history.is_grouping());
        f.history.end_group();

        f.history.undo().unwrap();
        assert_eq!(zoom(&f), 2.0);
        f.history.redo().unwrap();
        assert_eq!(zoom(&f), 4.0);
    }

    #[test]
    fn repeated_action_in_group_coalesces() {
        let f = fixture(100);
        f.history.begin_group("drag");
        for z in [2.0, 3.0, 4.0] {
            set_zoom(&f, z);
            f.history.record("move");
        }
        f.history.end_group();

        let entries = f.history.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].snapshot.ui.zoom, 4.0);
    }

    #[test]
    fn new_record_truncates_redo_tail() {
        let f = fixture(100);
        for z in [2.0, 3.0] {
            set_zoom(&f, z);
            f.history.record("zoom");
        }
        f.history.undo().unwrap();
        assert!(f.history.can_redo());

        set_zoom(&f, 9.0);
        f.history.record("zoom");
        assert!(!f.history.can_redo());
        assert_eq!(f.history.entries().len(), 2);
    }

    #[test]
    fn retention_drops_whole_oldest_groups() {
        let f = fixture(3);
        f.history.begin_group("pair");
        set_zoom(&f, 2.0);
        f.history.record("a");
        set_zoom(&f, 3.0);
        f.history.record("b");
        f.history.end_group();
        for z in [4.0, 5.0] {
            set_zoom(&f, z);
            f.history.record("zoom");
        }

        let entries = f.history.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(f.history.baseline().ui.zoom, 3.0);

        f.history.undo().unwrap();
        f.history.undo().unwrap();
        assert_eq!(zoom(&f), 3.0);
        assert_eq!(f.history.undo(), Err(HistoryError::Underflow));
    }

    #[test]
    fn transact_records_only_real_changes() {
        let f = fixture(100);
        f.history
            .transact("noop", |s| Ok::<_, StoreError>(s.clone()))
            .unwrap();
        assert!(!f.history.can_undo());

        f.history
            .transact("zoom", |s| {
                let mut next = s.clone();
                next.ui_mut().zoom = 2.0;
                Ok::<_, StoreError>(next)
            })
            .unwrap();
        assert_eq!(f.history.entries()[0].action, "zoom");
        assert_eq!(f.notifications.borrow().len(), 1);
    }

    #[test]
    fn records_during_restore_are_ignored() {
        let f = fixture(100);
        let history = Rc::new(f.history);
        let h = history.clone();
        f.store.subscribe(crate::store::StatePath::Zoom, move |_, _| {
            h.record("echo");
        });

        f.store
            .update(|s| {
                let mut next = s.clone();
                next.ui_mut().zoom = 2.0;
                Ok::<_, StoreError>(next)
            })
            .unwrap();
        assert_eq!(history.entries().len(), 1);

        history.undo().unwrap();
        assert_eq!(history.entries().len(), 1);
        assert_eq!(history.cursor(), -1);
    }
}
