//! End-to-end rounds through the scheduler: offers in, launches and
//! declines out, job lifecycle driven by status updates.


use test_harness::{job, offer, TestCluster};

use mesa_lite::driver::{TaskState, TaskStatus};
use mesa_lite::planner::PlannerKind;
use mesa_lite::resources::ResourceQuantity;
use mesa_lite::scheduler::{Job, JobState};
use mesa_lite::{QueuePolicy, SchedulerConfig};

#[tokio::test]
async fn single_job_launches_on_a_fitting_offer() {
    let cluster = TestCluster::start(SchedulerConfig::default());
    let j = job(1, 128);
    let job_id = j.id;
    cluster.submit(j);

    cluster.scheduler.resource_offers(vec![offer("o1", "node-x", 2.0, 256)]);
    cluster.settle().await;

    let launches = cluster.driver.launches();
    assert_eq!(launches.len(), 1);
    let (offer_ids, tasks) = &launches[0];
    assert_eq!(offer_ids, &vec!["o1".to_string()]);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].job_id, job_id);
    assert_eq!(tasks[0].node_id, "node-x");
    assert!(cluster.driver.declined_offer_ids().is_empty());

    let stored = cluster.repo.get(job_id).unwrap();
    assert_eq!(stored.state, JobState::Starting);
    assert_eq!(stored.task_id.as_deref(), Some(tasks[0].task_id.as_str()));
}

#[tokio::test]
async fn duplicate_offers_for_one_node_leave_one_candidate() {
    let cluster = TestCluster::start(SchedulerConfig::default());
    cluster.submit(job(1, 128));

    // the resource manager re-sent node-x's offer before we used the first
    cluster.scheduler.resource_offers(vec![
        offer("o1", "node-x", 2.0, 256),
        offer("o2", "node-x", 2.0, 256),
    ]);
    cluster.settle().await;

    let declined = cluster.driver.declined_offer_ids();
    assert_eq!(declined.len(), 1);
    let launches = cluster.driver.launches();
    assert_eq!(launches.len(), 1);
    // the launch uses whichever offer survived the merge, never the declined one
    assert_ne!(launches[0].0, declined);
}

#[tokio::test]
async fn finished_status_records_a_zero_exit_code() {
    let cluster = TestCluster::start(SchedulerConfig::default());
    let j = job(1, 128);
    let job_id = j.id;
    cluster.submit(j);

    cluster.scheduler.resource_offers(vec![offer("o1", "node-x", 2.0, 256)]);
    cluster.settle().await;
    let task_id = cluster.repo.get(job_id).unwrap().task_id.unwrap();

    cluster
        .scheduler
        .status_update(TaskStatus::new(&task_id, TaskState::Running).on_node("node-x"));
    cluster
        .scheduler
        .status_update(TaskStatus::new(&task_id, TaskState::Finished));
    cluster.settle().await;

    let stored = cluster.repo.get(job_id).unwrap();
    assert_eq!(stored.state, JobState::Finished);
    assert_eq!(stored.result, Some(0));
    assert!(stored.finished_at.is_some());
}

#[tokio::test]
async fn failed_status_records_the_reason() {
    let cluster = TestCluster::start(SchedulerConfig::default());
    let j = job(1, 128);
    let job_id = j.id;
    cluster.submit(j);

    cluster.scheduler.resource_offers(vec![offer("o1", "node-x", 2.0, 256)]);
    cluster.settle().await;
    let task_id = cluster.repo.get(job_id).unwrap().task_id.unwrap();

    cluster
        .scheduler
        .status_update(TaskStatus::new(&task_id, TaskState::Running).on_node("node-x"));
    cluster.scheduler.status_update(
        TaskStatus::new(&task_id, TaskState::Failed).with_message("command exited 1"),
    );
    cluster.settle().await;

    let stored = cluster.repo.get(job_id).unwrap();
    assert_eq!(stored.state, JobState::Failed);
    assert_eq!(stored.reason.as_deref(), Some("command exited 1"));
}

#[tokio::test]
async fn lost_task_is_retried_on_a_stocked_offer() {
    let cluster = TestCluster::start(SchedulerConfig::default());
    let j = job(1, 128);
    let job_id = j.id;
    cluster.submit(j);

    cluster.scheduler.resource_offers(vec![offer("o1", "node-x", 2.0, 256)]);
    cluster.settle().await;
    let task_id = cluster.repo.get(job_id).unwrap().task_id.unwrap();
    cluster
        .scheduler
        .status_update(TaskStatus::new(&task_id, TaskState::Running).on_node("node-x"));
    cluster.settle().await;

    // an idle round leaves node-y's offer in stock
    cluster.scheduler.resource_offers(vec![offer("o2", "node-y", 2.0, 256)]);
    cluster.settle().await;
    assert_eq!(cluster.driver.launches().len(), 1);

    // the node dies under the task; the job goes back to the queue and is
    // relaunched immediately from stock
    cluster
        .scheduler
        .status_update(TaskStatus::new(&task_id, TaskState::Lost).with_message("node died"));
    cluster.settle().await;

    let launches = cluster.driver.launches();
    assert_eq!(launches.len(), 2);
    assert_eq!(launches[1].0, vec!["o2".to_string()]);
    let stored = cluster.repo.get(job_id).unwrap();
    assert_eq!(stored.state, JobState::Starting);
    assert!(!cluster.driver.aborted());
}

#[tokio::test]
async fn impossible_status_aborts_and_halts_scheduling() {
    let cluster = TestCluster::start(SchedulerConfig::default());
    let j = job(1, 128);
    let job_id = j.id;
    cluster.submit(j);

    cluster.scheduler.resource_offers(vec![offer("o1", "node-x", 2.0, 256)]);
    cluster.settle().await;
    let task_id = cluster.repo.get(job_id).unwrap().task_id.unwrap();
    cluster
        .scheduler
        .status_update(TaskStatus::new(&task_id, TaskState::Running).on_node("node-x"));
    cluster
        .scheduler
        .status_update(TaskStatus::new(&task_id, TaskState::Finished));
    cluster.settle().await;

    // a finished task being re-staged means the state table and the real
    // status space diverged
    cluster
        .scheduler
        .status_update(TaskStatus::new(&task_id, TaskState::Staging));
    cluster.settle().await;
    assert!(cluster.driver.aborted());

    // the core is halted: later rounds launch nothing
    cluster.submit(job(1, 128));
    cluster.scheduler.resource_offers(vec![offer("o2", "node-y", 2.0, 256)]);
    cluster.settle().await;
    assert_eq!(cluster.driver.launches().len(), 1);
    // the finished job is untouched
    assert_eq!(cluster.repo.get(job_id).unwrap().state, JobState::Finished);
}

#[tokio::test]
async fn unknown_task_status_is_dropped() {
    let cluster = TestCluster::start(SchedulerConfig::default());
    cluster
        .scheduler
        .status_update(TaskStatus::new("task-from-nowhere", TaskState::Finished));
    cluster.settle().await;

    assert!(cluster.driver.calls().is_empty());
    assert!(!cluster.driver.aborted());
}

#[tokio::test]
async fn round_is_skipped_at_the_running_ceiling() {
    let cluster = TestCluster::start(SchedulerConfig::default().with_max_simultaneous_jobs(0));
    let j = job(1, 128);
    let job_id = j.id;
    cluster.submit(j);

    cluster.scheduler.resource_offers(vec![offer("o1", "node-x", 2.0, 256)]);
    cluster.settle().await;

    assert!(cluster.driver.launches().is_empty());
    // offers stay in stock for the next round rather than being declined
    assert!(cluster.driver.declined_offer_ids().is_empty());
    assert_eq!(cluster.repo.get(job_id).unwrap().state, JobState::Queued);
}

#[tokio::test]
async fn gpu_jobs_are_cancelled_when_gpus_are_disabled() {
    // `All` pulls the job regardless of fit, so rejection happens in the
    // planner's pre-admission filter rather than at candidate selection
    let cluster = TestCluster::start(
        SchedulerConfig::default().with_queue_policy(QueuePolicy::All { limit: 10 }),
    );
    let j = Job::new("app", "true", ResourceQuantity::new(1, 128).with_gpus(1));
    let job_id = j.id;
    cluster.submit(j);

    cluster.scheduler.resource_offers(vec![offer("o1", "node-x", 2.0, 256)]);
    cluster.settle().await;

    assert!(cluster.driver.launches().is_empty());
    let stored = cluster.repo.get(job_id).unwrap();
    assert_eq!(stored.state, JobState::Killed);
    assert_eq!(stored.reason.as_deref(), Some("gpu support disabled"));
}

#[tokio::test]
async fn jobs_for_unknown_applications_are_cancelled() {
    let cluster = TestCluster::start(SchedulerConfig::default());
    let j = Job::new("no-such-app", "true", ResourceQuantity::new(1, 128));
    let job_id = j.id;
    cluster.submit(j);

    cluster.scheduler.resource_offers(vec![offer("o1", "node-x", 2.0, 256)]);
    cluster.settle().await;

    assert!(cluster.driver.launches().is_empty());
    let stored = cluster.repo.get(job_id).unwrap();
    assert_eq!(stored.state, JobState::Killed);
    assert_eq!(stored.reason.as_deref(), Some("application not found"));
}

#[tokio::test]
async fn invoke_now_defers_to_jobs_ahead_in_the_queue() {
    let cluster = TestCluster::start(SchedulerConfig::default());
    // too big for the offer, so it stays queued and the offer goes to stock
    cluster.submit(job(8, 128));

    cluster.scheduler.resource_offers(vec![offer("o1", "node-x", 4.0, 1024)]);
    cluster.settle().await;
    assert!(cluster.driver.launches().is_empty());

    let late = job(1, 128);
    cluster.submit(late.clone());
    cluster.scheduler.invoke_now(late);
    cluster.settle().await;

    // the older job is still queued ahead, so no out-of-band launch happens
    assert!(cluster.driver.launches().is_empty());
}

#[tokio::test]
async fn invoke_now_launches_a_lone_job_from_stock() {
    let cluster = TestCluster::start(SchedulerConfig::default());

    // idle round stocks the offer
    cluster.scheduler.resource_offers(vec![offer("o1", "node-x", 2.0, 256)]);
    cluster.settle().await;
    assert!(cluster.driver.launches().is_empty());

    let j = job(1, 128);
    let job_id = j.id;
    cluster.submit(j.clone());
    cluster.scheduler.invoke_now(j);
    cluster.settle().await;

    let launches = cluster.driver.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].0, vec!["o1".to_string()]);
    assert_eq!(cluster.repo.get(job_id).unwrap().state, JobState::Starting);
}

#[tokio::test]
async fn stock_is_bounded_and_overflow_is_declined() {
    let cluster = TestCluster::start(SchedulerConfig::default().with_max_stock_size(1));

    cluster.scheduler.resource_offers(vec![
        offer("o1", "a", 2.0, 256),
        offer("o2", "b", 2.0, 256),
        offer("o3", "c", 2.0, 256),
        offer("o4", "d", 2.0, 256),
    ]);
    cluster.settle().await;

    assert!(cluster.driver.launches().is_empty());
    assert_eq!(cluster.driver.declined_offer_ids().len(), 3);
}

#[tokio::test]
async fn stocked_offer_serves_a_later_round() {
    let cluster = TestCluster::start(SchedulerConfig::default());

    cluster.scheduler.resource_offers(vec![offer("o1", "node-x", 2.0, 256)]);
    cluster.settle().await;
    assert!(cluster.driver.launches().is_empty());

    // a round with no fresh offers still plans against the stock
    cluster.submit(job(1, 128));
    cluster.scheduler.resource_offers(vec![]);
    cluster.settle().await;

    let launches = cluster.driver.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].0, vec!["o1".to_string()]);
}

#[tokio::test]
async fn all_policy_pulls_up_to_the_limit() {
    let cluster = TestCluster::start(
        SchedulerConfig::default().with_queue_policy(QueuePolicy::All { limit: 1 }),
    );
    cluster.submit(job(1, 128));
    cluster.submit(job(1, 128));

    cluster.scheduler.resource_offers(vec![offer("o1", "node-x", 8.0, 4096)]);
    cluster.settle().await;

    // both fit, but only one candidate was pulled
    assert_eq!(cluster.driver.launched_tasks().len(), 1);
}

#[tokio::test]
async fn priority_planner_launches_urgent_jobs_first() {
    let cluster =
        TestCluster::start(SchedulerConfig::default().with_planner(PlannerKind::Priority));
    let low = job(1, 128).with_priority(0);
    let high = job(1, 128).with_priority(10);
    let high_id = high.id;
    cluster.submit(low);
    cluster.submit(high);

    // only one job fits the offer
    cluster.scheduler.resource_offers(vec![offer("o1", "node-x", 1.0, 256)]);
    cluster.settle().await;

    let tasks = cluster.driver.launched_tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].job_id, high_id);
}

#[tokio::test]
async fn node_loss_drops_the_stocked_offer_and_reconciles() {
    let cluster = TestCluster::start(SchedulerConfig::default());

    cluster.scheduler.resource_offers(vec![offer("o1", "node-x", 2.0, 256)]);
    cluster.settle().await;

    let j = job(1, 128);
    let job_id = j.id;
    cluster.submit(j);

    cluster.scheduler.node_lost("node-x");
    cluster.settle().await;

    // the dead node's stocked offer went back immediately
    assert_eq!(cluster.driver.declined_offer_ids(), vec!["o1".to_string()]);

    // the offer is gone: a later round has nothing to plan against
    cluster.scheduler.resource_offers(vec![]);
    cluster.settle().await;
    assert!(cluster.driver.launches().is_empty());
    assert_eq!(cluster.repo.get(job_id).unwrap().state, JobState::Queued);
}
