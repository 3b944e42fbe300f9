//! Ready and running lists.
//!
//! Each target has at most one action, so the lists hold target refs and
//! the action itself stays in its target's slot. New actions join the tail
//! of the ready list; resumed actions jump to its head so that suspended
//! work (including dismissed actions waiting to be discarded) drains before
//! freshly queued recoveries run.

use std::collections::VecDeque;

use erp_common::TargetRef;

#[derive(Debug, Clone, Default)]
pub struct ActionQueue {
    ready: VecDeque<TargetRef>,
    running: Vec<TargetRef>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, target: TargetRef) {
        self.ready.push_back(target);
    }

    pub fn pop_ready(&mut self) -> Option<TargetRef> {
        self.ready.pop_front()
    }

    pub fn to_running(&mut self, target: TargetRef) {
        if !self.running.contains(&target) {
            self.running.push(target);
        }
    }

    /// Move a suspended action back to the head of the ready list.
    /// Returns false if it is not running (already finished or resumed).
    pub fn resume(&mut self, target: TargetRef) -> bool {
        match self.running.iter().position(|t| *t == target) {
            Some(idx) => {
                self.running.remove(idx);
                self.ready.push_front(target);
                true
            }
            None => false,
        }
    }

    /// Drop `target` from whichever list holds it.
    pub fn remove(&mut self, target: TargetRef) -> bool {
        if let Some(idx) = self.running.iter().position(|t| *t == target) {
            self.running.remove(idx);
            return true;
        }
        if let Some(idx) = self.ready.iter().position(|t| *t == target) {
            self.ready.remove(idx);
            return true;
        }
        false
    }

    pub fn is_running(&self, target: TargetRef) -> bool {
        self.running.contains(&target)
    }

    pub fn is_ready(&self, target: TargetRef) -> bool {
        self.ready.contains(&target)
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.running.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ready.len() + self.running.len()
    }

    pub fn ready(&self) -> impl Iterator<Item = &TargetRef> {
        self.ready.iter()
    }

    pub fn running(&self) -> impl Iterator<Item = &TargetRef> {
        self.running.iter()
    }
}
