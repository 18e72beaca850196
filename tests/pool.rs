mod common;

use std::time::{Duration, Instant};

use fontgoggles::{
    worker::{COMPILE_UFO, SLEEP},
    CancelToken, PoolError,
};
use pretty_assertions::assert_eq;
use tokio::task::JoinSet;

async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(20);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn sleep_job_reports_progress() {
    let pool = common::pool(2);
    let mut lines = vec![];
    let error = pool
        .call_function(SLEEP, &["0.05".to_string()], |l| lines.push(l.to_string()))
        .await
        .unwrap();
    assert!(!error);
    assert_eq!(lines, vec!["sleeping 0.050s", "done sleeping"]);
    assert_eq!(pool.num_workers(), 1);
    pool.shutdown().await;
}

#[tokio::test]
async fn unknown_functions_are_errors() {
    let pool = common::pool(1);
    let mut lines = vec![];
    let error = pool
        .call_function("os.system", &["true".to_string()], |l| lines.push(l.to_string()))
        .await
        .unwrap();
    assert!(error);
    assert_eq!(lines, vec!["Unknown function \"os.system\""]);
    // The worker survives and takes the next job
    let error = pool.call_function(SLEEP, &["0".to_string()], |_| {}).await.unwrap();
    assert!(!error);
    assert_eq!(pool.num_workers(), 1);
    pool.shutdown().await;
}

#[tokio::test]
async fn seven_jobs_on_five_workers_cancel_cleanly() {
    let pool = common::pool(5);
    let cancel = CancelToken::new();
    let mut jobs = JoinSet::new();
    for _ in 0..7 {
        let pool = pool.clone();
        let cancel = cancel.clone();
        jobs.spawn(async move {
            pool.call_function_cancellable(SLEEP, &["30".to_string()], |_| {}, &cancel)
                .await
        });
    }

    wait_for(|| pool.num_busy() == 5).await;
    assert_eq!(pool.num_workers(), 5);
    assert_eq!(pool.num_idle(), 0);

    let started = Instant::now();
    cancel.cancel();
    let mut cancelled = 0;
    while let Some(result) = jobs.join_next().await {
        assert!(matches!(result.unwrap(), Err(PoolError::Cancelled)));
        cancelled += 1;
    }
    assert_eq!(cancelled, 7);
    assert!(started.elapsed() < Duration::from_secs(20));

    // Every worker went back to the pool and is still usable
    assert_eq!(pool.num_workers(), 5);
    assert_eq!(pool.num_idle(), 5);
    let error = pool.call_function(SLEEP, &["0".to_string()], |_| {}).await.unwrap();
    assert!(!error);
    assert_eq!(pool.num_workers(), 5);
    pool.shutdown().await;
    assert_eq!(pool.num_workers(), 0);
}

#[tokio::test]
async fn dropped_call_still_returns_its_worker() {
    let pool = common::pool(1);
    let args = ["30".to_string()];
    let call = pool.call_function(SLEEP, &args, |_| {});
    let timed_out = tokio::time::timeout(Duration::from_millis(500), call).await;
    assert!(timed_out.is_err());

    // The worker is interrupted and drained in the background
    wait_for(|| pool.num_idle() == 1).await;
    assert_eq!(pool.num_workers(), 1);
    let error = pool.call_function(SLEEP, &["0".to_string()], |_| {}).await.unwrap();
    assert!(!error);
    pool.shutdown().await;
}

fn arg(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn cancelling_one_compile_leaves_the_others_alone() {
    let dir = tempfile::tempdir().unwrap();
    let large = common::write_large_ufo(dir.path(), 5000);
    let liga = common::write_liga_ufo(dir.path());
    let pool = common::pool(5);

    let first = CancelToken::new();
    let mut jobs = JoinSet::new();
    for index in 0..7 {
        let pool = pool.clone();
        let cancel = if index == 0 { first.clone() } else { CancelToken::new() };
        let source = if index == 0 { &large } else { &liga };
        let out = dir.path().join(format!("out{index}.ttf"));
        let args = vec![arg(source), arg(&out)];
        jobs.spawn(async move {
            let result = pool
                .call_function_cancellable(COMPILE_UFO, &args, |_| {}, &cancel)
                .await;
            (index, result, out)
        });
    }

    wait_for(|| pool.num_workers() == 5).await;
    first.cancel();
    let mut succeeded = 0;
    while let Some(joined) = jobs.join_next().await {
        let (index, result, out) = joined.unwrap();
        if index == 0 {
            assert!(matches!(result, Err(PoolError::Cancelled)));
        } else {
            assert!(!result.unwrap(), "job {index} reported an error");
            assert!(out.exists());
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 6);
    assert_eq!(pool.num_workers(), 5);
    assert_eq!(pool.num_idle(), 5);
    pool.shutdown().await;
}

#[tokio::test]
async fn cancelled_compile_stops_early() {
    let dir = tempfile::tempdir().unwrap();
    let large = common::write_large_ufo(dir.path(), 20000);
    let out = dir.path().join("Large.ttf");
    let pool = common::pool(1);
    // Start the worker so the compile begins as soon as it is sent
    pool.call_function(SLEEP, &["0".to_string()], |_| {}).await.unwrap();

    let cancel = CancelToken::new();
    let args = [arg(&large), arg(&out)];
    let call = pool.call_function_cancellable(COMPILE_UFO, &args, |_| {}, &cancel);
    let canceller = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        Instant::now()
    };
    let (result, cancelled_at) = tokio::join!(call, canceller);
    assert!(matches!(result, Err(PoolError::Cancelled)));
    assert!(cancelled_at.elapsed() < Duration::from_secs(5));

    // The same worker takes the next job
    let error = pool.call_function(SLEEP, &["0".to_string()], |_| {}).await.unwrap();
    assert!(!error);
    assert_eq!(pool.num_workers(), 1);
    pool.shutdown().await;
}
