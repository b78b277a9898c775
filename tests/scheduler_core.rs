// tests/scheduler_core.rs

mod common;
use crate::common::init_tracing;

use std::error::Error;

use serde_json::{Value, json};

use taskfeed::engine::TaskEvent;
use taskfeed::errors::{SchedulingError, TaskError};
use taskfeed::scheduler::{TaskBody, TaskOptions, TaskScheduler};
use taskfeed::types::{TaskId, TaskState};

type TestResult = Result<(), Box<dyn Error>>;

fn noop() -> TaskBody {
    TaskBody::run(|| Ok(Value::Null))
}

fn add(s: &mut TaskScheduler, options: TaskOptions) -> TaskId {
    let (id, step) = s.add_task(noop(), options).expect("add_task");
    assert!(step.is_empty(), "unexpected step on add: {step:?}");
    id
}

/// Claim and complete tasks one at a time, returning the claim order.
fn drain(s: &mut TaskScheduler) -> Vec<TaskId> {
    let mut order = Vec::new();
    while let Some(task) = s.claim_next() {
        order.push(task.id);
        s.complete(task.id, Ok(Value::Null));
    }
    order
}

#[test]
fn claims_by_priority_then_submission_order() -> TestResult {
    init_tracing();
    let mut s = TaskScheduler::new(true);

    let a = add(&mut s, TaskOptions::new());
    let b = add(&mut s, TaskOptions::new().priority(5));
    let c = add(&mut s, TaskOptions::new().priority(-1));
    let d = add(&mut s, TaskOptions::new().priority(5));
    let e = add(&mut s, TaskOptions::new().priority(0));

    assert_eq!(drain(&mut s), vec![b, d, a, e, c]);
    assert!(s.is_idle());
    Ok(())
}

#[test]
fn paused_scheduler_claims_nothing() -> TestResult {
    init_tracing();
    let mut s = TaskScheduler::new(false);
    let a = add(&mut s, TaskOptions::new());

    assert!(s.claim_next().is_none());
    assert_eq!(s.pending_count(), 1);

    s.set_processing(true);
    let task = s.claim_next().expect("task should be claimable");
    assert_eq!(task.id, a);
    assert_eq!(s.state_of(a), Some(TaskState::Running));
    Ok(())
}

#[test]
fn unknown_upstream_is_rejected() -> TestResult {
    init_tracing();
    let mut s = TaskScheduler::new(true);
    let a = add(&mut s, TaskOptions::new());

    let err = s
        .add_task(noop(), TaskOptions::new().after(a).after(42))
        .unwrap_err();
    assert_eq!(err, SchedulingError::UnknownUpstream { upstream: 42 });

    // The rejected submission did not consume an id.
    let b = add(&mut s, TaskOptions::new());
    assert_eq!(b, a + 1);
    Ok(())
}

#[test]
fn blocked_task_waits_for_every_upstream() -> TestResult {
    init_tracing();
    let mut s = TaskScheduler::new(true);
    let a = add(&mut s, TaskOptions::new());
    let b = add(&mut s, TaskOptions::new());
    let c = add(&mut s, TaskOptions::new().priority(100).after(a).after(b));

    assert_eq!(s.state_of(c), Some(TaskState::Blocked));

    let first = s.claim_next().unwrap();
    assert_eq!(first.id, a);
    s.complete(a, Ok(json!({ "from_a": 1 })));
    assert_eq!(s.state_of(c), Some(TaskState::Blocked));

    let second = s.claim_next().unwrap();
    assert_eq!(second.id, b);
    s.complete(b, Ok(json!({ "from_b": 2, "from_a": 3 })));
    assert_eq!(s.state_of(c), Some(TaskState::Pending));

    let third = s.claim_next().unwrap();
    assert_eq!(third.id, c);
    assert_eq!(third.upstream.len(), 2);
    assert_eq!(third.upstream.get(a), Some(&json!({ "from_a": 1 })));
    // Later completions override earlier keys.
    assert_eq!(
        Value::Object(third.upstream.merged()),
        json!({ "from_a": 3, "from_b": 2 })
    );
    Ok(())
}

#[test]
fn counts_track_each_queue() -> TestResult {
    init_tracing();
    let mut s = TaskScheduler::new(true);
    let a = add(&mut s, TaskOptions::new());
    let b = add(&mut s, TaskOptions::new());
    add(&mut s, TaskOptions::new().after(a));
    add(&mut s, TaskOptions::new().after(a).after(b));

    assert_eq!(
        (s.pending_count(), s.running_count(), s.blocked_count()),
        (2, 0, 2)
    );

    let first = s.claim_next().unwrap();
    assert_eq!(first.id, a);
    assert_eq!(
        (s.pending_count(), s.running_count(), s.blocked_count()),
        (1, 1, 2)
    );

    s.complete(a, Ok(Value::Null));
    assert_eq!(
        (s.pending_count(), s.running_count(), s.blocked_count()),
        (2, 0, 1)
    );

    drain(&mut s);
    assert_eq!(
        (s.pending_count(), s.running_count(), s.blocked_count()),
        (0, 0, 0)
    );
    assert!(s.is_idle());
    Ok(())
}

#[test]
fn finished_tasks_keep_their_state_and_stay_usable_upstream() -> TestResult {
    init_tracing();
    let mut s = TaskScheduler::new(true);
    let done: Vec<TaskId> = (0..64).map(|_| add(&mut s, TaskOptions::new())).collect();
    drain(&mut s);

    let failing = add(&mut s, TaskOptions::new());
    let task = s.claim_next().unwrap();
    s.complete(task.id, Err(TaskError::new("broken")));

    assert!(s.is_idle());
    assert!(done.iter().all(|id| s.state_of(*id) == Some(TaskState::Completed)));
    assert_eq!(s.state_of(failing), Some(TaskState::Failed));

    // A late completion for a finished task changes nothing.
    assert!(s.complete(done[0], Ok(Value::Null)).is_empty());
    assert_eq!(s.state_of(done[0]), Some(TaskState::Completed));

    let after_done = add(&mut s, TaskOptions::new().after(done[0]).after(done[63]));
    assert_eq!(s.state_of(after_done), Some(TaskState::Pending));

    let (after_failed, step) = s.add_task(noop(), TaskOptions::new().after(failing))?;
    assert_eq!(step.cancelled, vec![after_failed]);
    assert_eq!(s.state_of(after_failed), Some(TaskState::Cancelled));
    Ok(())
}

#[test]
fn completed_upstream_does_not_block() -> TestResult {
    init_tracing();
    let mut s = TaskScheduler::new(true);
    let a = add(&mut s, TaskOptions::new());
    assert_eq!(drain(&mut s), vec![a]);

    let b = add(&mut s, TaskOptions::new().after(a));
    assert_eq!(s.state_of(b), Some(TaskState::Pending));
    Ok(())
}

#[test]
fn failure_cancels_transitive_dependents() -> TestResult {
    init_tracing();
    let mut s = TaskScheduler::new(true);
    let a = add(&mut s, TaskOptions::new());
    let b = add(&mut s, TaskOptions::new().after(a));
    let c = add(&mut s, TaskOptions::new().after(b));
    let unrelated = add(&mut s, TaskOptions::new().priority(-5));

    let task = s.claim_next().unwrap();
    assert_eq!(task.id, a);
    let step = s.complete(a, Err(TaskError::new("boom")));

    assert_eq!(
        step.events,
        vec![
            TaskEvent::Failed {
                id: a,
                group: None,
                error: TaskError::new("boom"),
            },
            TaskEvent::Cancelled {
                id: b,
                group: None,
                upstream: a,
            },
            TaskEvent::Cancelled {
                id: c,
                group: None,
                upstream: b,
            },
        ]
    );
    assert_eq!(s.state_of(a), Some(TaskState::Failed));
    assert_eq!(s.state_of(b), Some(TaskState::Cancelled));
    assert_eq!(s.state_of(c), Some(TaskState::Cancelled));

    assert_eq!(drain(&mut s), vec![unrelated]);
    Ok(())
}

#[test]
fn submitting_after_a_failed_upstream_cancels_immediately() -> TestResult {
    init_tracing();
    let mut s = TaskScheduler::new(true);
    let a = add(&mut s, TaskOptions::new());
    let task = s.claim_next().unwrap();
    s.complete(task.id, Err(TaskError::new("nope")));

    let (b, step) = s.add_task(noop(), TaskOptions::new().after(a))?;
    assert_eq!(
        step.events,
        vec![TaskEvent::Cancelled {
            id: b,
            group: None,
            upstream: a,
        }]
    );
    assert_eq!(s.state_of(b), Some(TaskState::Cancelled));
    assert!(s.claim_next().is_none());
    Ok(())
}

#[test]
fn group_finished_follows_last_member() -> TestResult {
    init_tracing();
    let mut s = TaskScheduler::new(true);
    let group = s.next_group_id();
    let a = add(&mut s, TaskOptions::new().in_group(group));
    let b = add(&mut s, TaskOptions::new().in_group(group));

    let first = s.claim_next().unwrap();
    let step = s.complete(first.id, Ok(json!(1)));
    assert_eq!(step.events.len(), 1);

    let second = s.claim_next().unwrap();
    assert_eq!((first.id, second.id), (a, b));
    let step = s.complete(second.id, Ok(json!(2)));
    assert_eq!(
        step.events,
        vec![
            TaskEvent::Completed {
                id: b,
                group: Some(group),
                result: json!(2),
            },
            TaskEvent::GroupFinished { group },
        ]
    );
    Ok(())
}

#[test]
fn cancel_group_drops_queued_and_running_members() -> TestResult {
    init_tracing();
    let mut s = TaskScheduler::new(true);
    let group = s.next_group_id();
    let running = add(&mut s, TaskOptions::new().priority(10).in_group(group));
    let queued = add(&mut s, TaskOptions::new().in_group(group));
    let inside = add(&mut s, TaskOptions::new().after(running).in_group(group));
    let outside = add(&mut s, TaskOptions::new().after(queued));
    let other = add(&mut s, TaskOptions::new().priority(-1));

    let claimed = s.claim_next().unwrap();
    assert_eq!(claimed.id, running);

    let step = s.cancel_group(group);
    // Members are cancelled silently; the outside dependent is reported.
    assert_eq!(
        step.events,
        vec![TaskEvent::Cancelled {
            id: outside,
            group: None,
            upstream: queued,
        }]
    );
    assert!(step.cancelled.contains(&queued));
    assert!(step.cancelled.contains(&inside));
    assert!(!step.cancelled.contains(&running));
    assert_eq!(s.state_of(running), Some(TaskState::Running));

    // The running member finishes, but nothing is reported for it.
    let step = s.complete(running, Ok(json!("late")));
    assert!(step.events.is_empty());
    assert_eq!(s.state_of(running), Some(TaskState::Cancelled));

    assert_eq!(drain(&mut s), vec![other]);
    Ok(())
}

#[test]
fn cancel_group_discards_undelivered_results() -> TestResult {
    init_tracing();
    let mut s = TaskScheduler::new(true);
    let group = s.next_group_id();
    add(&mut s, TaskOptions::new().in_group(group));
    add(&mut s, TaskOptions::new().in_group(group));

    let task = s.claim_next().unwrap();
    let step = s.complete(task.id, Ok(json!("done")));
    let completed = step.events[0].clone();

    s.cancel_group(group);
    assert!(!s.take_delivery(&completed));
    Ok(())
}

#[test]
fn delivered_results_are_accepted_once_recorded() -> TestResult {
    init_tracing();
    let mut s = TaskScheduler::new(true);
    add(&mut s, TaskOptions::new());
    let task = s.claim_next().unwrap();
    let step = s.complete(task.id, Ok(json!(7)));

    assert!(s.take_delivery(&step.events[0]));
    Ok(())
}

#[test]
fn cancel_all_leaves_nothing_to_run() -> TestResult {
    init_tracing();
    let mut s = TaskScheduler::new(true);
    let a = add(&mut s, TaskOptions::new());
    let b = add(&mut s, TaskOptions::new().after(a));
    add(&mut s, TaskOptions::new());

    let running = s.claim_next().unwrap();
    let step = s.cancel_all();
    assert!(step.events.is_empty());
    assert_eq!(step.cancelled.len(), 2);

    s.complete(running.id, Ok(Value::Null));
    assert_eq!(s.state_of(b), Some(TaskState::Cancelled));
    assert!(s.claim_next().is_none());
    assert!(s.is_idle());
    Ok(())
}

#[test]
fn cancel_task_reports_dependents() -> TestResult {
    init_tracing();
    let mut s = TaskScheduler::new(true);
    let a = add(&mut s, TaskOptions::new());
    let b = add(&mut s, TaskOptions::new().after(a));

    let step = s.cancel_task(a);
    assert_eq!(step.cancelled, vec![a, b]);
    assert_eq!(
        step.events,
        vec![TaskEvent::Cancelled {
            id: b,
            group: None,
            upstream: a,
        }]
    );
    Ok(())
}

#[test]
fn pass_through_merges_upstream_objects() -> TestResult {
    init_tracing();
    let mut s = TaskScheduler::new(true);
    let (a, _) = s.add_task(
        TaskBody::run(|| Ok(json!({ "shot": "sh010", "frame": 1 }))),
        TaskOptions::new(),
    )?;
    let mut own = serde_json::Map::new();
    own.insert("frame".into(), json!(0));
    own.insert("kind".into(), json!("thumb"));
    let (b, _) = s.add_task(TaskBody::pass_through(own), TaskOptions::new().after(a))?;

    let task = s.claim_next().unwrap();
    let result = task.body.execute(task.upstream)?;
    s.complete(a, Ok(result));

    let task = s.claim_next().unwrap();
    assert_eq!(task.id, b);
    let result = task.body.execute(task.upstream)?;
    assert_eq!(result, json!({ "shot": "sh010", "frame": 1, "kind": "thumb" }));
    Ok(())
}
