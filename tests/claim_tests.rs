
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::Rng;
use uuid::Uuid;

use heavy_worker::error::Result;
use heavy_worker::store::{InMemoryJobStore, JobStore};
use heavy_worker::worker::{
    ClaimEngine, CycleOutcome, FibonacciTask, InstanceId, LoopState, PollLoop,
};
use test_harness::{make_loop, seeded_store, test_config};

#[tokio::test]
async fn test_claim_stamps_instance() {
    let store = seeded_store(&[10]).await;
    let engine = ClaimEngine::new(store.clone(), InstanceId::new("host-a-42"));

    let job = engine.try_claim().await.unwrap().unwrap();
    assert!(job.claimed);
    assert_eq!(job.claimed_by.as_deref(), Some("host-a-42"));
    assert!(job.claimed_at.is_some());
    assert!(!job.completed);

    let stored = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored, job);
}

#[tokio::test]
async fn test_claim_empty_store_returns_none() {
    let store = Arc::new(InMemoryJobStore::new());
    let engine = ClaimEngine::new(store, InstanceId::new("w"));
    assert!(engine.try_claim().await.unwrap().is_none());
}

/// N concurrent claimers race over M < N jobs: every job is claimed exactly
/// once and exactly M claims succeed in total.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claimers_mutual_exclusion() {
    let mut rng = rand::thread_rng();

    for _round in 0..20 {
        let jobs: usize = rng.gen_range(1..=25);
        let claimers = rng.gen_range(jobs + 1..=jobs + 12);
        let payloads: Vec<i64> = (0..jobs as i64).collect();
        let store = seeded_store(&payloads).await;

        let mut handles = Vec::new();
        for c in 0..claimers {
            let engine = ClaimEngine::new(store.clone(), InstanceId::new(format!("claimer-{}", c)));
            handles.push(tokio::spawn(async move {
                let mut won = Vec::new();
                while let Some(job) = engine.try_claim().await.unwrap() {
                    won.push((job.id, engine.instance().to_string()));
                    tokio::task::yield_now().await;
                }
                won
            }));
        }

        let mut winners: HashMap<Uuid, String> = HashMap::new();
        let mut total = 0;
        for handle in handles {
            for (id, who) in handle.await.unwrap() {
                total += 1;
                assert!(
                    winners.insert(id, who).is_none(),
                    "job {} claimed twice",
                    id
                );
            }
        }

        assert_eq!(total, jobs, "exactly M claims should succeed");
        for job in store.list().await.unwrap() {
            assert!(job.claimed);
            assert_eq!(job.claimed_by.as_ref(), winners.get(&job.id));
        }
    }
}

/// Many whole poll loops sharing one store never run the same job twice.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_loops_partition_backlog() {
    let payloads: Vec<i64> = (0..30).map(|i| i % 15).collect();
    let store = seeded_store(&payloads).await;
    let config = test_config(2);

    let mut handles = Vec::new();
    for i in 0..6 {
        let mut poll = make_loop(
            &config,
            store.clone(),
            Arc::new(FibonacciTask::new(45)),
            &format!("worker-{}", i),
        );
        handles.push(tokio::spawn(async move {
            let mut claimed = 0;
            loop {
                let outcome = poll.run_cycle().await.unwrap();
                claimed += outcome.claimed();
                if matches!(outcome, CycleOutcome::NoWork { .. }) && poll.pool().is_idle() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            claimed
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }
    assert_eq!(total, 30);

    let jobs = store.list().await.unwrap();
    let owners: HashSet<&str> = jobs
        .iter()
        .filter_map(|j| j.claimed_by.as_deref())
        .collect();
    assert!(!owners.is_empty());
    assert!(jobs.iter().all(|j| j.claimed && j.completed));
}

/// Two single-slot instances start together against a single job: one claims
/// it, the other finds no work and goes idle.
#[tokio::test]
async fn test_two_instances_one_job() {
    let store = seeded_store(&[5]).await;
    let config = test_config(1);
    let mut a = make_loop(&config, store.clone(), Arc::new(FibonacciTask::new(45)), "a");
    let mut b = make_loop(&config, store.clone(), Arc::new(FibonacciTask::new(45)), "b");

    let (ra, rb) = tokio::join!(a.run_cycle(), b.run_cycle());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.claimed() + rb.claimed(), 1);
    let (loser, loser_outcome): (&mut PollLoop, Result<CycleOutcome>) = if ra.claimed() == 1 {
        (&mut b, Ok(rb))
    } else {
        (&mut a, Ok(ra))
    };
    assert_eq!(
        loser_outcome.as_ref().ok(),
        Some(&CycleOutcome::NoWork {
            claimed: 0,
            reported: 0
        })
    );
    let wait = loser.backoff(&loser_outcome);
    assert_eq!(loser.state(), LoopState::IdleWait);
    assert_eq!(wait, config.idle_interval());

    let job = &store.list().await.unwrap()[0];
    assert!(job.claimed);
    assert!(matches!(job.claimed_by.as_deref(), Some("a") | Some("b")));
}
