//! Agent state (C2). Grounded on the reference `common.rs`'s `Agent`, but
//! carries goal/task/history bookkeeping since this engine supports
//! MAPF/IMAPF/MAPD rather than a single fixed-goal episode.

/// One per-tick snapshot appended to an agent's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub v: usize,
    pub goal: Option<usize>,
    pub task: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Agent {
    pub id: usize,
    v: usize,
    prev: usize,
    goal: Option<usize>,
    task: Option<usize>,
    goal_updated: bool,
    history: Vec<Snapshot>,
}

impl Agent {
    pub fn new(id: usize, start: usize) -> Self {
        Agent {
            id,
            v: start,
            prev: start,
            goal: None,
            task: None,
            goal_updated: false,
            history: Vec::new(),
        }
    }

    pub fn node(&self) -> usize {
        self.v
    }

    pub fn prev_node(&self) -> usize {
        self.prev
    }

    pub fn goal(&self) -> Option<usize> {
        self.goal
    }

    pub fn task(&self) -> Option<usize> {
        self.task
    }

    pub fn has_goal(&self) -> bool {
        self.goal.is_some()
    }

    pub fn has_task(&self) -> bool {
        self.task.is_some()
    }

    pub fn is_updated(&self) -> bool {
        self.goal_updated
    }

    pub fn is_at_goal(&self) -> bool {
        self.goal == Some(self.v)
    }

    /// Moves the agent to `to`. Invariant breach (spec §7 class 4): `to`
    /// must be the current node or a neighbor of it, otherwise this is a
    /// programming error in the calling solver, not recoverable input.
    pub fn set_node(&mut self, to: usize, neighbors: &[usize]) {
        assert!(
            to == self.v || neighbors.contains(&to),
            "agent {} attempted illegal move {} -> {to}",
            self.id,
            self.v
        );
        self.prev = self.v;
        self.v = to;
    }

    pub fn set_goal(&mut self, goal: usize) {
        self.goal = Some(goal);
        self.goal_updated = true;
    }

    pub fn set_task(&mut self, task_id: usize, first_subgoal: usize) {
        self.task = Some(task_id);
        self.goal = Some(first_subgoal);
        self.goal_updated = true;
    }

    /// Advances the task's current sub-goal without changing its open task
    /// assignment (used by TP/MAPD when a task moves from pickup to
    /// delivery but the `Agent` keeps the same `task` id).
    pub fn set_next_subgoal(&mut self, subgoal: usize) {
        self.goal = Some(subgoal);
        self.goal_updated = true;
    }

    pub fn release_task(&mut self) {
        self.task = None;
        self.goal = None;
        self.goal_updated = false;
    }

    /// Releases only the goal, keeping any task assignment intact (used by
    /// PIBT-family solvers when there is no pending task but the agent must
    /// still wander: spec §4.7's `allocate`).
    pub fn release_goal_only(&mut self) {
        self.goal = None;
        self.goal_updated = false;
    }

    pub fn clear_updated_flag(&mut self) {
        self.goal_updated = false;
    }

    pub fn history(&self) -> &[Snapshot] {
        &self.history
    }

    pub fn update_history(&mut self) {
        self.history.push(Snapshot {
            v: self.v,
            goal: self.goal,
            task: self.task,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "illegal move")]
    fn set_node_rejects_non_neighbor() {
        let mut a = Agent::new(0, 0);
        a.set_node(5, &[1, 2]);
    }

    #[test]
    fn set_node_allows_stay_and_neighbor() {
        let mut a = Agent::new(0, 0);
        a.set_node(0, &[1, 2]);
        assert_eq!(a.node(), 0);
        a.set_node(1, &[1, 2]);
        assert_eq!(a.node(), 1);
        assert_eq!(a.prev_node(), 0);
    }

    #[test]
    fn history_records_one_snapshot_per_tick() {
        let mut a = Agent::new(0, 0);
        a.set_goal(4);
        a.update_history();
        a.set_node(1, &[1]);
        a.update_history();
        assert_eq!(a.history().len(), 2);
        assert_eq!(a.history()[0].v, 0);
        assert_eq!(a.history()[1].v, 1);
    }
}
