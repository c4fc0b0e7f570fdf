//! Rotation bookkeeping for the content queue
//!
//! Four regions, consulted in this order when picking the next task:
//!
//! ```text
//! prepend (one-shot, newest first)
//! items   [ fresh ............ | aged (last `old`) ]   capacity `max`
//! exceed  (overflow FIFO, waiting for rotation space)
//! ```
//!
//! Executing a rotation item moves it from the head to the tail and marks
//! it aged. New tasks go in front of the aged tail; when the rotation is
//! full the oldest aged item (by creation time) makes room, otherwise the
//! task waits in `exceed`. Every operation keeps these invariants:
//!
//! - `old <= items.len() <= max`
//! - a uid appears at most once across all regions
//! - `exceed` is only non-empty while rotation space is unavailable

use std::collections::VecDeque;

use crate::queue::task::{TaskId, TaskMetadata, TaskWrapper};

/// Where a task landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Prepend,
    Rotation,
    Aged,
    Overflow,
}

/// Result of [`Rotation::shift`]
#[derive(Debug, Clone)]
pub struct Shifted<M> {
    pub task: TaskWrapper<M>,
    /// Taken from the prepend list and gone from the queue
    pub one_shot: bool,
}

#[derive(Debug, Clone)]
pub struct Rotation<M> {
    max: usize,
    items: VecDeque<TaskWrapper<M>>,
    old: usize,
    exceed: VecDeque<TaskWrapper<M>>,
    prepend: VecDeque<TaskWrapper<M>>,
}

impl<M: TaskMetadata> Rotation<M> {
    /// `max` must be at least 1.
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            items: VecDeque::new(),
            old: 0,
            exceed: VecDeque::new(),
            prepend: VecDeque::new(),
        }
    }

    /// Rebuild from stored regions, restoring the invariants.
    ///
    /// Later duplicates of a uid are dropped. Rotation items beyond `max`
    /// are moved, fresh ones first, to the head of the overflow list, and
    /// from there promoted as usual.
    pub fn from_parts(
        max: usize,
        items: Vec<TaskWrapper<M>>,
        old: usize,
        exceed: Vec<TaskWrapper<M>>,
        prepend: Vec<TaskWrapper<M>>,
    ) -> Self {
        let mut rotation = Self::new(max);
        let mut seen = std::collections::HashSet::new();
        let mut keep = |w: &TaskWrapper<M>| seen.insert(w.uid().to_string());

        let fresh_len = items.len().saturating_sub(old);
        let mut fresh = Vec::new();
        let mut aged = Vec::new();
        for (i, w) in items.into_iter().enumerate() {
            if !keep(&w) {
                continue;
            }
            if i < fresh_len {
                fresh.push(w);
            } else {
                aged.push(w);
            }
        }
        let prepend: Vec<_> = prepend.into_iter().filter(|w| keep(w)).collect();
        let exceed: Vec<_> = exceed.into_iter().filter(|w| keep(w)).collect();

        let mut spill = Vec::new();
        while fresh.len() + aged.len() > rotation.max {
            if !fresh.is_empty() {
                spill.push(fresh.remove(0));
            } else {
                spill.push(aged.remove(0));
            }
        }

        rotation.old = aged.len();
        rotation.items = fresh.into_iter().chain(aged).collect();
        rotation.exceed = spill.into_iter().chain(exceed).collect();
        rotation.prepend = prepend.into();

        // Aged entries left over from a larger rotation make way for the spill
        let mut evicted = Vec::new();
        rotation.promote(&mut evicted);
        rotation
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Logical length: fresh rotation items, overflow and prepend entries.
    ///
    /// Aged items still rotate but are not counted.
    pub fn len(&self) -> usize {
        self.items.len() - self.old + self.exceed.len() + self.prepend.len()
    }

    /// Nothing left to run
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.prepend.is_empty()
    }

    pub fn rotation_len(&self) -> usize {
        self.items.len()
    }

    pub fn aged(&self) -> usize {
        self.old
    }

    pub fn overflow_len(&self) -> usize {
        self.exceed.len()
    }

    pub fn prepend_len(&self) -> usize {
        self.prepend.len()
    }

    pub fn items(&self) -> impl Iterator<Item = &TaskWrapper<M>> {
        self.items.iter()
    }

    pub fn overflow(&self) -> impl Iterator<Item = &TaskWrapper<M>> {
        self.exceed.iter()
    }

    pub fn prepended(&self) -> impl Iterator<Item = &TaskWrapper<M>> {
        self.prepend.iter()
    }

    /// Every task in run order: prepend, rotation, overflow.
    pub fn iter(&self) -> impl Iterator<Item = &TaskWrapper<M>> {
        self.prepend
            .iter()
            .chain(self.items.iter())
            .chain(self.exceed.iter())
    }

    pub fn find_uid(&self, uid: &str) -> Option<TaskId> {
        self.iter().find(|w| w.uid() == uid).map(|w| w.id)
    }

    pub fn region_of(&self, id: TaskId) -> Option<Region> {
        if self.prepend.iter().any(|w| w.id == id) {
            return Some(Region::Prepend);
        }
        if let Some(i) = self.items.iter().position(|w| w.id == id) {
            return Some(if i >= self.fresh_len() {
                Region::Aged
            } else {
                Region::Rotation
            });
        }
        self.exceed
            .iter()
            .any(|w| w.id == id)
            .then_some(Region::Overflow)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut TaskWrapper<M>> {
        self.prepend
            .iter_mut()
            .chain(self.items.iter_mut())
            .chain(self.exceed.iter_mut())
            .find(|w| w.id == id)
    }

    /// Add a rotation task after replacing any task with the same uid.
    ///
    /// Tasks dropped along the way are appended to `removed`.
    pub fn push(&mut self, task: TaskWrapper<M>, removed: &mut Vec<TaskWrapper<M>>) -> Region {
        self.remove_uid(task.uid(), removed);
        let region = self.place(task, removed);
        self.promote(removed);
        region
    }

    /// Add a one-shot task to run before anything else, including tasks
    /// unshifted earlier.
    pub fn unshift(&mut self, task: TaskWrapper<M>, removed: &mut Vec<TaskWrapper<M>>) {
        self.remove_uid(task.uid(), removed);
        self.prepend.push_front(task);
    }

    /// Pick the next task to run.
    ///
    /// One-shot tasks leave the queue. A rotation task moves to the tail
    /// and becomes aged, which may let overflow tasks in.
    pub fn shift(&mut self, removed: &mut Vec<TaskWrapper<M>>) -> Option<Shifted<M>> {
        if let Some(task) = self.prepend.pop_front() {
            return Some(Shifted {
                task,
                one_shot: true,
            });
        }

        let task = self.items.pop_front()?;
        self.items.push_back(task.clone());
        self.old = (self.old + 1).min(self.items.len());
        self.promote(removed);
        Some(Shifted {
            task,
            one_shot: false,
        })
    }

    /// Drop a task by identity from whichever region holds it.
    pub fn remove(
        &mut self,
        id: TaskId,
        removed: &mut Vec<TaskWrapper<M>>,
    ) -> Option<TaskWrapper<M>> {
        if let Some(i) = self.prepend.iter().position(|w| w.id == id) {
            return self.prepend.remove(i);
        }
        if let Some(i) = self.exceed.iter().position(|w| w.id == id) {
            return self.exceed.remove(i);
        }
        let i = self.items.iter().position(|w| w.id == id)?;
        if i >= self.fresh_len() {
            self.old -= 1;
        }
        let task = self.items.remove(i);
        self.promote(removed);
        task
    }

    fn fresh_len(&self) -> usize {
        self.items.len() - self.old
    }

    fn remove_uid(&mut self, uid: &str, removed: &mut Vec<TaskWrapper<M>>) {
        if let Some(id) = self.find_uid(uid) {
            if let Some(task) = self.remove(id, removed) {
                removed.insert(0, task);
            }
        }
    }

    fn place(&mut self, task: TaskWrapper<M>, removed: &mut Vec<TaskWrapper<M>>) -> Region {
        if self.items.len() < self.max {
            let at = self.fresh_len();
            self.items.insert(at, task);
            return Region::Rotation;
        }

        if self.old > 0 {
            let start = self.fresh_len();
            let oldest = (start..self.items.len())
                .min_by_key(|&i| (self.items[i].init_time, i))
                .unwrap_or(start);
            if let Some(evicted) = self.items.remove(oldest) {
                removed.push(evicted);
            }
            self.old -= 1;
            let at = self.fresh_len();
            self.items.insert(at, task);
            return Region::Rotation;
        }

        self.exceed.push_back(task);
        Region::Overflow
    }

    /// Move overflow tasks into the rotation while space can be made.
    fn promote(&mut self, removed: &mut Vec<TaskWrapper<M>>) {
        while !self.exceed.is_empty() && (self.old > 0 || self.items.len() < self.max) {
            if let Some(task) = self.exceed.pop_front() {
                self.place(task, removed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::task::Job;
    use proptest::prelude::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Track(String);

    impl TaskMetadata for Track {
        fn uid(&self) -> &str {
            &self.0
        }
    }

    fn task(id: TaskId, uid: &str) -> TaskWrapper<Track> {
        TaskWrapper::restore(id, Job::ready(json!(null)), Track(uid.into()), id as i64, 0)
    }

    fn uids<'a>(tasks: impl Iterator<Item = &'a TaskWrapper<Track>>) -> Vec<&'a str> {
        tasks.map(|w| w.uid()).collect()
    }

    fn check_invariants(r: &Rotation<Track>) {
        assert!(r.old <= r.items.len());
        assert!(r.items.len() <= r.max);
        let all: Vec<_> = r.iter().map(|w| w.uid().to_string()).collect();
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), all.len());
        assert_eq!(r.len(), r.items.len() - r.old + r.exceed.len() + r.prepend.len());
        if !r.exceed.is_empty() {
            assert_eq!(r.old, 0);
            assert_eq!(r.items.len(), r.max);
        }
    }

    #[test]
    fn test_rotates_in_order() {
        let mut r = Rotation::new(10);
        let mut removed = Vec::new();
        for (id, uid) in [(1, "a"), (2, "b"), (3, "c")] {
            r.push(task(id, uid), &mut removed);
        }

        let order: Vec<_> = (0..6)
            .map(|_| r.shift(&mut removed).unwrap().task.uid().to_string())
            .collect();
        assert_eq!(order, ["a", "b", "c", "a", "b", "c"]);
        assert!(removed.is_empty());
        // Everything has played: all aged, logical length zero
        assert_eq!(r.len(), 0);
        assert_eq!(r.aged(), 3);
    }

    #[test]
    fn test_new_task_plays_before_aged_ones() {
        let mut r = Rotation::new(10);
        let mut removed = Vec::new();
        r.push(task(1, "a"), &mut removed);
        r.push(task(2, "b"), &mut removed);
        r.shift(&mut removed);

        r.push(task(3, "c"), &mut removed);
        assert_eq!(uids(r.items()), ["b", "c", "a"]);
        assert_eq!(r.region_of(1), Some(Region::Aged));
        assert_eq!(r.region_of(3), Some(Region::Rotation));
    }

    #[test]
    fn test_overflow_is_fifo() {
        let mut r = Rotation::new(2);
        let mut removed = Vec::new();
        for (id, uid) in [(1, "a"), (2, "b"), (3, "c"), (4, "d")] {
            r.push(task(id, uid), &mut removed);
        }
        assert_eq!(uids(r.overflow()), ["c", "d"]);
        assert_eq!(r.region_of(4), Some(Region::Overflow));
        assert_eq!(r.len(), 4);
        check_invariants(&r);
    }

    #[test]
    fn test_promotion_after_shift() {
        let mut r = Rotation::new(2);
        let mut removed = Vec::new();
        for (id, uid) in [(1, "a"), (2, "b"), (3, "c")] {
            r.push(task(id, uid), &mut removed);
        }

        // a plays and ages, which lets c in by evicting a
        assert_eq!(r.shift(&mut removed).unwrap().task.uid(), "a");
        assert_eq!(uids(r.items()), ["b", "c"]);
        assert_eq!(r.overflow_len(), 0);
        assert_eq!(r.aged(), 0);
        assert_eq!(uids(removed.iter()), ["a"]);
        check_invariants(&r);

        removed.clear();
        assert_eq!(r.shift(&mut removed).unwrap().task.uid(), "b");
        assert_eq!(r.shift(&mut removed).unwrap().task.uid(), "c");
        assert_eq!(r.shift(&mut removed).unwrap().task.uid(), "b");
        assert!(removed.is_empty());
    }

    #[test]
    fn test_full_rotation_evicts_oldest_aged() {
        let mut r = Rotation::new(3);
        let mut removed = Vec::new();
        // Created out of order: c is the oldest
        r.push(TaskWrapper::restore(1, Job::ready(json!(null)), Track("a".into()), 50, 0), &mut removed);
        r.push(TaskWrapper::restore(2, Job::ready(json!(null)), Track("b".into()), 40, 0), &mut removed);
        r.push(TaskWrapper::restore(3, Job::ready(json!(null)), Track("c".into()), 10, 0), &mut removed);
        for _ in 0..3 {
            r.shift(&mut removed);
        }
        assert_eq!(r.aged(), 3);

        assert_eq!(r.push(task(4, "d"), &mut removed), Region::Rotation);
        assert_eq!(uids(removed.iter()), ["c"]);
        assert_eq!(uids(r.items()), ["d", "a", "b"]);
        assert_eq!(r.aged(), 2);
        check_invariants(&r);
    }

    #[test]
    fn test_uid_replaces_existing_task() {
        let mut r = Rotation::new(10);
        let mut removed = Vec::new();
        r.push(task(1, "a"), &mut removed);
        r.push(task(2, "b"), &mut removed);
        r.push(task(3, "a"), &mut removed);

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id(), 1);
        assert_eq!(r.find_uid("a"), Some(3));
        assert_eq!(uids(r.items()), ["b", "a"]);

        removed.clear();
        r.unshift(task(4, "b"), &mut removed);
        assert_eq!(removed[0].id(), 2);
        assert_eq!(r.region_of(4), Some(Region::Prepend));
    }

    #[test]
    fn test_prepend_runs_once_newest_first() {
        let mut r = Rotation::new(10);
        let mut removed = Vec::new();
        r.push(task(1, "song"), &mut removed);
        r.unshift(task(2, "ad-1"), &mut removed);
        r.unshift(task(3, "ad-2"), &mut removed);
        let order: Vec<_> = r.prepended().map(|w| w.uid().to_string()).collect();
        assert_eq!(order, vec!["ad-2", "ad-1"]);

        let first = r.shift(&mut removed).unwrap();
        assert!(first.one_shot);
        assert_eq!(first.task.uid(), "ad-2");
        assert_eq!(r.shift(&mut removed).unwrap().task.uid(), "ad-1");

        let third = r.shift(&mut removed).unwrap();
        assert!(!third.one_shot);
        assert_eq!(third.task.uid(), "song");
        assert_eq!(r.prepend_len(), 0);
        assert_eq!(r.find_uid("ad-1"), None);
    }

    #[test]
    fn test_remove_aged_item_adjusts_old() {
        let mut r = Rotation::new(10);
        let mut removed = Vec::new();
        r.push(task(1, "a"), &mut removed);
        r.push(task(2, "b"), &mut removed);
        r.shift(&mut removed);
        assert_eq!(r.aged(), 1);

        assert!(r.remove(1, &mut removed).is_some());
        assert_eq!(r.aged(), 0);
        assert_eq!(r.len(), 1);
        assert!(r.remove(1, &mut removed).is_none());
        check_invariants(&r);
    }

    #[test]
    fn test_remove_makes_room_for_overflow() {
        let mut r = Rotation::new(2);
        let mut removed = Vec::new();
        for (id, uid) in [(1, "a"), (2, "b"), (3, "c")] {
            r.push(task(id, uid), &mut removed);
        }
        r.remove(1, &mut removed);
        assert_eq!(uids(r.items()), ["b", "c"]);
        assert_eq!(r.overflow_len(), 0);
        assert!(removed.is_empty());
    }

    #[test]
    fn test_shift_empty() {
        let mut r: Rotation<Track> = Rotation::new(3);
        let mut removed = Vec::new();
        assert!(r.shift(&mut removed).is_none());
        assert!(r.is_empty());
    }

    #[test]
    fn test_from_parts_restores_invariants() {
        let items = vec![task(1, "a"), task(2, "b"), task(3, "c"), task(4, "a")];
        let r = Rotation::from_parts(2, items, 2, vec![task(5, "e")], vec![task(6, "b")]);
        // The second "a" and the prepended "b" are duplicates. "a" spills,
        // then takes the place of the aged "c"
        assert_eq!(uids(r.items()), ["b", "a"]);
        assert_eq!(r.aged(), 0);
        assert_eq!(uids(r.overflow()), ["e"]);
        assert_eq!(r.prepend_len(), 0);
        check_invariants(&r);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(u8),
        Unshift(u8),
        Shift,
        Remove(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..12).prop_map(Op::Push),
            (0u8..12).prop_map(Op::Unshift),
            Just(Op::Shift),
            (0u8..12).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn prop_invariants_hold(max in 1usize..5, ops in proptest::collection::vec(op_strategy(), 1..80)) {
            let mut r = Rotation::new(max);
            let mut next_id = 1;
            for op in ops {
                let mut removed = Vec::new();
                match op {
                    Op::Push(n) => {
                        r.push(task(next_id, &format!("t{}", n)), &mut removed);
                        next_id += 1;
                    }
                    Op::Unshift(n) => {
                        r.unshift(task(next_id, &format!("t{}", n)), &mut removed);
                        next_id += 1;
                    }
                    Op::Shift => {
                        r.shift(&mut removed);
                    }
                    Op::Remove(n) => {
                        if let Some(id) = r.find_uid(&format!("t{}", n)) {
                            prop_assert!(r.remove(id, &mut removed).is_some());
                        }
                    }
                }
                check_invariants(&r);
            }
        }
    }
}
