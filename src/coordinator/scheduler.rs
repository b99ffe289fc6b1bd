//! Task state of a single job and the assignment policy.
//!
//! Every task moves `Unstarted -> InProgress -> Completed`, and back from
//! `InProgress` to `Unstarted` when it stalls. All state sits behind one
//! mutex; callers waiting for work park on a [`Notify`] that is signalled
//! on every state change.

use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use fnv::FnvHashMap;
use tokio::sync::Notify;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{Assignment, MrError, Result, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Unstarted,
    InProgress,
    Completed,
}

#[derive(Debug)]
struct Task {
    name: String,
    ordinal: u32,
    status: TaskStatus,
    /// Stamped every time the task moves to `InProgress`.
    started_at: Option<Instant>,
}

/// One phase's tasks, in ordinal order, with a name index.
///
/// A task's ordinal is its position in the list it was built from, so
/// skipped duplicates leave gaps.
#[derive(Debug)]
struct TaskSet {
    kind: TaskKind,
    tasks: Vec<Task>,
    by_name: FnvHashMap<String, usize>,
    remaining: usize,
}

impl TaskSet {
    fn new(kind: TaskKind, names: Vec<String>) -> Self {
        let mut by_name = FnvHashMap::default();
        let mut tasks = Vec::with_capacity(names.len());
        for (ordinal, name) in names.into_iter().enumerate() {
            if by_name.contains_key(&name) {
                warn!(task = %name, %kind, "duplicate task name ignored");
                continue;
            }
            by_name.insert(name.clone(), tasks.len());
            tasks.push(Task {
                ordinal: ordinal as u32,
                name,
                status: TaskStatus::Unstarted,
                started_at: None,
            });
        }
        let remaining = tasks.len();
        Self {
            kind,
            tasks,
            by_name,
            remaining,
        }
    }

    /// Moves the lowest unstarted task to `InProgress`.
    fn claim(&mut self, now: Instant) -> Option<(String, u32)> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.status == TaskStatus::Unstarted)?;
        task.status = TaskStatus::InProgress;
        task.started_at = Some(now);
        Some((task.name.clone(), task.ordinal))
    }

    /// Marks `name` completed. Returns whether this report changed anything.
    fn complete(&mut self, name: &str) -> Result<bool> {
        let idx = *self.by_name.get(name).ok_or_else(|| MrError::UnknownTask {
            kind: self.kind,
            name: name.to_string(),
        })?;
        let task = &mut self.tasks[idx];
        if task.status == TaskStatus::Completed {
            return Ok(false);
        }
        task.status = TaskStatus::Completed;
        self.remaining -= 1;
        Ok(true)
    }

    /// Resets every in-progress task older than `timeout`.
    fn reschedule_stalled(&mut self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut reset = Vec::new();
        for task in self.tasks.iter_mut() {
            if task.status != TaskStatus::InProgress {
                continue;
            }
            let stalled = task
                .started_at
                .map_or(true, |start| now.saturating_duration_since(start) > timeout);
            if stalled {
                task.status = TaskStatus::Unstarted;
                reset.push(task.name.clone());
            }
        }
        reset
    }

    fn status(&self, name: &str) -> Option<TaskStatus> {
        self.by_name.get(name).map(|idx| self.tasks[*idx].status)
    }
}

/// Outcome of one attempt to assign a task.
#[derive(Debug)]
enum Poll {
    Ready(Assignment),
    Wait,
    Exhausted,
}

/// Which phase the job is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Map,
    Reduce,
    Done,
}

/// A snapshot of the job's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub phase: Phase,
    pub maps_remaining: usize,
    pub reduces_remaining: usize,
}

#[derive(Debug)]
struct JobState {
    maps: TaskSet,
    reduces: TaskSet,
    n_reduce: u32,
}

impl JobState {
    fn phase(&self) -> Phase {
        if self.maps.remaining > 0 {
            Phase::Map
        } else if self.reduces.remaining > 0 {
            Phase::Reduce
        } else {
            Phase::Done
        }
    }

    fn active(&mut self) -> Option<&mut TaskSet> {
        match self.phase() {
            Phase::Map => Some(&mut self.maps),
            Phase::Reduce => Some(&mut self.reduces),
            Phase::Done => None,
        }
    }

    fn poll_assignment(&mut self, now: Instant) -> Poll {
        let n_reduce = self.n_reduce;
        let Some(set) = self.active() else {
            return Poll::Exhausted;
        };
        let kind = set.kind;
        match set.claim(now) {
            Some((name, ordinal)) => Poll::Ready(Assignment {
                name,
                ordinal,
                kind,
                n_reduce,
            }),
            None => Poll::Wait,
        }
    }

    fn set_mut(&mut self, kind: TaskKind) -> &mut TaskSet {
        match kind {
            TaskKind::Map => &mut self.maps,
            TaskKind::Reduce => &mut self.reduces,
        }
    }

    fn progress(&self) -> Progress {
        Progress {
            phase: self.phase(),
            maps_remaining: self.maps.remaining,
            reduces_remaining: self.reduces.remaining,
        }
    }
}

/// Owns all task state of one job.
#[derive(Debug)]
pub struct Scheduler {
    state: Mutex<JobState>,
    changed: Notify,
    task_timeout: Duration,
    wait_recheck: Duration,
}

impl Scheduler {
    /// Builds the job: one map task per distinct input file, `n_reduce`
    /// reduce tasks named `"0"`..`"n_reduce - 1"`.
    pub fn new(
        files: Vec<String>,
        n_reduce: u32,
        task_timeout: Duration,
        wait_recheck: Duration,
    ) -> Result<Self> {
        if n_reduce == 0 {
            return Err(MrError::InvalidJob {
                reason: "the number of reduce partitions must be positive".into(),
            });
        }
        let maps = TaskSet::new(TaskKind::Map, files);
        let reduces = TaskSet::new(
            TaskKind::Reduce,
            (0..n_reduce).map(|p| p.to_string()).collect(),
        );
        info!(
            maps = maps.tasks.len(),
            reduces = reduces.tasks.len(),
            "job created"
        );
        Ok(Self {
            state: Mutex::new(JobState {
                maps,
                reduces,
                n_reduce,
            }),
            changed: Notify::new(),
            task_timeout,
            wait_recheck,
        })
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hands out the next unstarted task of the active phase.
    ///
    /// Suspends while every remaining task of the phase is in progress and
    /// fails with [`MrError::NoMoreTasks`] once both phases are complete.
    /// Reduce tasks are never handed out while a map task is unfinished.
    pub async fn get_task(&self) -> Result<Assignment> {
        loop {
            // Register interest before looking at the state, so a change
            // between the check and the await still wakes us.
            let mut notified = pin!(self.changed.notified());
            notified.as_mut().enable();

            let poll = self.lock().poll_assignment(Instant::now());
            match poll {
                Poll::Ready(task) => {
                    info!(task = %task.name, kind = %task.kind, ordinal = task.ordinal, "task assigned");
                    return Ok(task);
                }
                Poll::Exhausted => return Err(MrError::NoMoreTasks),
                Poll::Wait => {}
            }

            // Bounded so a lost wakeup can only delay, never strand, a caller.
            let _ = tokio::time::timeout(self.wait_recheck, notified).await;
        }
    }

    /// Records that task `name` of `kind` completed.
    ///
    /// Reports for a task that is already complete are ignored, so a late
    /// straggler never counts twice. A report for a task that was reset to
    /// unstarted is accepted: its output is already in place.
    pub fn update_task_status(&self, name: &str, kind: TaskKind) -> Result<()> {
        let mut state = self.lock();
        let before = state.phase();
        if !state.set_mut(kind).complete(name)? {
            debug!(task = %name, %kind, "duplicate completion ignored");
            return Ok(());
        }
        let progress = state.progress();
        drop(state);

        info!(
            task = %name,
            %kind,
            maps_remaining = progress.maps_remaining,
            reduces_remaining = progress.reduces_remaining,
            "task completed"
        );
        if before != progress.phase {
            match progress.phase {
                Phase::Reduce => info!("map phase complete, starting reduce phase"),
                Phase::Done => info!("job complete"),
                Phase::Map => {}
            }
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// One scan of the active phase, resetting tasks in progress for longer
    /// than the timeout. Returns the names of the tasks reset.
    pub fn reschedule_stalled(&self) -> Vec<String> {
        let now = Instant::now();
        let timeout = self.task_timeout;
        let mut state = self.lock();
        let reset = match state.active() {
            Some(set) => {
                let kind = set.kind;
                let reset = set.reschedule_stalled(now, timeout);
                for name in &reset {
                    warn!(task = %name, %kind, "task timed out, rescheduling");
                }
                reset
            }
            None => Vec::new(),
        };
        drop(state);
        if !reset.is_empty() {
            self.changed.notify_waiters();
        }
        reset
    }

    /// Scans for stalled tasks every `period` until the job is done.
    pub async fn run_stall_detector(self: Arc<Self>, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.done() {
                break;
            }
            self.reschedule_stalled();
        }
        debug!("stall detector stopped");
        self.changed.notify_waiters();
    }

    /// True once every reduce task is complete. Stays true.
    pub fn done(&self) -> bool {
        self.lock().reduces.remaining == 0
    }

    pub fn progress(&self) -> Progress {
        self.lock().progress()
    }

    /// Current status of a task, if the job has it.
    pub fn status(&self, name: &str, kind: TaskKind) -> Option<TaskStatus> {
        self.lock().set_mut(kind).status(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const LONG: Duration = Duration::from_secs(60);

    fn files(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("pg-{i}.txt")).collect()
    }

    fn scheduler(n_files: usize, n_reduce: u32) -> Scheduler {
        Scheduler::new(files(n_files), n_reduce, LONG, Duration::from_millis(50)).unwrap()
    }

    #[test]
    fn rejects_zero_partitions() {
        let err = Scheduler::new(files(1), 0, LONG, LONG).unwrap_err();
        assert!(matches!(err, MrError::InvalidJob { .. }));
    }

    #[test]
    fn duplicate_inputs_collapse() {
        let s = Scheduler::new(
            vec!["a".into(), "b".into(), "a".into()],
            1,
            LONG,
            LONG,
        )
        .unwrap();
        assert_eq!(s.progress().maps_remaining, 2);
    }

    #[tokio::test]
    async fn map_ordinals_follow_the_input_list() {
        let s = Scheduler::new(
            vec!["a".into(), "a".into(), "b".into()],
            1,
            LONG,
            LONG,
        )
        .unwrap();
        let first = s.get_task().await.unwrap();
        let second = s.get_task().await.unwrap();
        assert_eq!((first.name.as_str(), first.ordinal), ("a", 0));
        assert_eq!((second.name.as_str(), second.ordinal), ("b", 2));
    }

    #[tokio::test]
    async fn maps_first_then_reduces_then_nothing() {
        let s = scheduler(2, 2);
        let m0 = s.get_task().await.unwrap();
        let m1 = s.get_task().await.unwrap();
        assert_eq!((m0.kind, m0.ordinal, m0.name.as_str()), (TaskKind::Map, 0, "pg-0.txt"));
        assert_eq!((m1.kind, m1.ordinal), (TaskKind::Map, 1));
        assert_eq!(m0.n_reduce, 2);

        s.update_task_status(&m0.name, TaskKind::Map).unwrap();
        s.update_task_status(&m1.name, TaskKind::Map).unwrap();
        assert_eq!(s.progress().phase, Phase::Reduce);

        let r0 = s.get_task().await.unwrap();
        let r1 = s.get_task().await.unwrap();
        assert_eq!((r0.kind, r0.name.as_str(), r0.ordinal), (TaskKind::Reduce, "0", 0));
        assert_eq!((r1.kind, r1.name.as_str(), r1.ordinal), (TaskKind::Reduce, "1", 1));
        assert!(!s.done());

        s.update_task_status("0", TaskKind::Reduce).unwrap();
        s.update_task_status("1", TaskKind::Reduce).unwrap();
        assert!(s.done());
        assert!(matches!(s.get_task().await, Err(MrError::NoMoreTasks)));
        assert!(s.done());
    }

    #[tokio::test]
    async fn empty_input_goes_straight_to_reduce() {
        let s = scheduler(0, 1);
        let task = s.get_task().await.unwrap();
        assert_eq!(task.kind, TaskKind::Reduce);
    }

    #[tokio::test]
    async fn duplicate_completion_counts_once() {
        let s = scheduler(2, 1);
        let m0 = s.get_task().await.unwrap();
        s.update_task_status(&m0.name, TaskKind::Map).unwrap();
        s.update_task_status(&m0.name, TaskKind::Map).unwrap();
        assert_eq!(s.progress().maps_remaining, 1);
        assert_eq!(s.status(&m0.name, TaskKind::Map), Some(TaskStatus::Completed));
    }

    #[test]
    fn unknown_task_is_an_error() {
        let s = scheduler(1, 1);
        let err = s.update_task_status("nope", TaskKind::Map).unwrap_err();
        assert!(matches!(err, MrError::UnknownTask { .. }));
        let err = s.update_task_status("1", TaskKind::Reduce).unwrap_err();
        assert!(matches!(err, MrError::UnknownTask { .. }));
    }

    #[tokio::test]
    async fn waiting_caller_wakes_on_reschedule() {
        let s = Arc::new(
            Scheduler::new(files(1), 1, Duration::from_millis(20), LONG).unwrap(),
        );
        let first = s.get_task().await.unwrap();

        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.get_task().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        assert_eq!(s.reschedule_stalled(), vec![first.name.clone()]);
        let second = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(second.name, first.name);
        assert_eq!(second.kind, TaskKind::Map);
    }

    #[tokio::test]
    async fn waiting_caller_wakes_on_phase_change() {
        let s = Arc::new(Scheduler::new(files(1), 1, LONG, LONG).unwrap());
        let map = s.get_task().await.unwrap();

        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.get_task().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        s.update_task_status(&map.name, TaskKind::Map).unwrap();

        let reduce = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reduce.kind, TaskKind::Reduce);
    }

    #[tokio::test]
    async fn waiting_caller_learns_the_job_is_over() {
        let s = Arc::new(Scheduler::new(Vec::new(), 1, LONG, LONG).unwrap());
        let reduce = s.get_task().await.unwrap();

        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.get_task().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        s.update_task_status(&reduce.name, TaskKind::Reduce).unwrap();

        let res = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(res, Err(MrError::NoMoreTasks)));
    }

    #[test]
    fn stall_scan_only_touches_the_active_phase() {
        let mut state = JobState {
            maps: TaskSet::new(TaskKind::Map, vec!["a".into()]),
            reduces: TaskSet::new(TaskKind::Reduce, vec!["0".into()]),
            n_reduce: 1,
        };
        let start = Instant::now();
        state.maps.claim(start);
        state.reduces.claim(start);

        let later = start + Duration::from_secs(11);
        let reset = state
            .active()
            .unwrap()
            .reschedule_stalled(later, Duration::from_secs(10));
        assert_eq!(reset, vec!["a".to_string()]);
        assert_eq!(state.reduces.status("0"), Some(TaskStatus::InProgress));
    }

    #[test]
    fn fresh_tasks_are_not_rescheduled() {
        let mut set = TaskSet::new(TaskKind::Map, vec!["a".into()]);
        let start = Instant::now();
        set.claim(start);
        let reset = set.reschedule_stalled(start + Duration::from_secs(9), Duration::from_secs(10));
        assert!(reset.is_empty());
        assert_eq!(set.status("a"), Some(TaskStatus::InProgress));
    }

    #[tokio::test]
    async fn late_report_after_reset_is_accepted_once() {
        let s = Scheduler::new(files(1), 1, Duration::ZERO, LONG).unwrap();
        let map = s.get_task().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(s.reschedule_stalled().len(), 1);
        assert_eq!(s.status(&map.name, TaskKind::Map), Some(TaskStatus::Unstarted));

        s.update_task_status(&map.name, TaskKind::Map).unwrap();
        s.update_task_status(&map.name, TaskKind::Map).unwrap();
        let progress = s.progress();
        assert_eq!(progress.maps_remaining, 0);
        assert_eq!(progress.phase, Phase::Reduce);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_never_share_a_task() {
        let s = Arc::new(scheduler(64, 1));
        let mut handles = Vec::new();
        for _ in 0..64 {
            let s = s.clone();
            handles.push(tokio::spawn(async move { s.get_task().await.unwrap() }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            let task = handle.await.unwrap();
            assert_eq!(task.kind, TaskKind::Map);
            assert!(seen.insert(task.ordinal), "task {} handed out twice", task.ordinal);
        }
        assert_eq!(seen.len(), 64);
    }

    #[tokio::test]
    async fn stall_detector_stops_when_done() {
        let s = Arc::new(scheduler(0, 1));
        let detector = tokio::spawn(s.clone().run_stall_detector(Duration::from_millis(5)));
        let reduce = s.get_task().await.unwrap();
        s.update_task_status(&reduce.name, TaskKind::Reduce).unwrap();
        tokio::time::timeout(Duration::from_secs(5), detector)
            .await
            .unwrap()
            .unwrap();
    }
}
