//! Task state (C2). One sub-goal for MAPF/IMAPF, two (pickup, delivery) for
//! MAPD.

#[derive(Debug, Clone)]
pub struct Task {
    pub id: usize,
    subgoals: Vec<usize>,
    progress: usize,
    pub start_time: usize,
    pub end_time: Option<usize>,
    open: bool,
}

impl Task {
    pub fn new(id: usize, subgoals: Vec<usize>, start_time: usize) -> Self {
        assert!(!subgoals.is_empty(), "task {id} has no sub-goals");
        Task {
            id,
            subgoals,
            progress: 0,
            start_time,
            end_time: None,
            open: true,
        }
    }

    pub fn mapf(id: usize, goal: usize, start_time: usize) -> Self {
        Task::new(id, vec![goal], start_time)
    }

    pub fn pickup_delivery(id: usize, pickup: usize, delivery: usize, start_time: usize) -> Self {
        Task::new(id, vec![pickup, delivery], start_time)
    }

    pub fn subgoals(&self) -> &[usize] {
        &self.subgoals
    }

    /// The sub-goal the assigned agent should currently be walking toward,
    /// or `None` once the task is completed.
    pub fn current_subgoal(&self) -> Option<usize> {
        self.subgoals.get(self.progress).copied()
    }

    pub fn progress(&self) -> usize {
        self.progress
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn completed(&self) -> bool {
        self.progress >= self.subgoals.len()
    }

    /// Advances progress if `current_node` matches the next sub-goal.
    /// Idempotent within a tick: calling this twice with the same
    /// `current_node` after the first advance is a no-op because the next
    /// sub-goal (if any) differs from `current_node` in the common case,
    /// and once `completed()` there is nothing left to advance.
    pub fn advance(&mut self, current_node: usize) {
        if self.completed() {
            return;
        }
        if self.subgoals[self.progress] == current_node {
            self.progress += 1;
        }
    }

    pub fn close(&mut self, time: usize) {
        self.open = false;
        self.end_time = Some(time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_monotonic_and_idempotent() {
        let mut t = Task::pickup_delivery(0, 5, 9, 0);
        assert_eq!(t.progress(), 0);
        t.advance(3); // not at pickup yet
        assert_eq!(t.progress(), 0);
        t.advance(5); // reach pickup
        assert_eq!(t.progress(), 1);
        t.advance(5); // idempotent: still at pickup node, next subgoal is delivery
        assert_eq!(t.progress(), 1);
        t.advance(9); // reach delivery
        assert_eq!(t.progress(), 2);
        assert!(t.completed());
        t.advance(9); // no-op once completed
        assert_eq!(t.progress(), 2);
    }

    #[test]
    fn mapf_task_completes_after_single_subgoal() {
        let mut t = Task::mapf(0, 7, 0);
        assert!(!t.completed());
        t.advance(7);
        assert!(t.completed());
    }
}
