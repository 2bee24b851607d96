//! Pacing and load-profile shape tests, driven on the paused runtime clock.

use std::sync::atomic::{AtomicU64, Ordering};
use tempest::prelude::*;

struct AlwaysOk {
    accepted: AtomicU64,
}

#[async_trait]
impl Submitter for AlwaysOk {
    async fn submit(&self, _unit: WorkUnit) -> std::result::Result<(), SubmissionFailure> {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn generator(workers: usize) -> (Arc<AlwaysOk>, LoadGenerator) {
    let submitter = Arc::new(AlwaysOk { accepted: AtomicU64::new(0) });
    let generator = LoadGenerator::with_config(
        Arc::clone(&submitter) as Arc<dyn Submitter>,
        LoadGeneratorConfig::default().with_workers(workers),
    );
    (submitter, generator)
}

#[tokio::test(start_paused = true)]
async fn sustained_1000_tps_yields_60k_requests() {
    let (submitter, generator) = generator(10);
    generator
        .start(LoadProfile::Sustained { tps: 1000.0 }, Duration::from_secs(60))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;
    generator.stop().await;

    let total = submitter.accepted.load(Ordering::Relaxed) as f64;
    let expected = 60_000.0;
    assert!(
        (total - expected).abs() <= expected * 0.05,
        "total {total} not within 5% of {expected}"
    );

    let stats = generator.statistics();
    assert_eq!(stats.error_rate, 0.0);
    assert!(
        (stats.achieved_rate - 1000.0).abs() <= 50.0,
        "achieved rate {} should converge on 1000",
        stats.achieved_rate
    );
}

#[tokio::test(start_paused = true)]
async fn ramp_up_target_is_monotone_then_flat() {
    let (_, generator) = generator(4);
    // 120s run: ramp window is min(60, 40) = 40 seconds.
    generator
        .start(
            LoadProfile::RampUp { start_tps: 100.0, peak_tps: 900.0 },
            Duration::from_secs(120),
        )
        .unwrap();

    let mut observed = Vec::new();
    tokio::time::sleep(Duration::from_millis(500)).await;
    for _ in 0..60 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        observed.push(generator.statistics().target_rate);
    }
    generator.stop().await;

    for pair in observed.windows(2) {
        assert!(
            pair[1] >= pair[0] - 1e-6,
            "ramp target decreased: {} -> {}",
            pair[0],
            pair[1]
        );
    }
    // Beyond the ramp window the target holds at peak.
    assert_eq!(*observed.last().unwrap(), 900.0);
    assert!(observed[0] < 900.0);
}

#[tokio::test(start_paused = true)]
async fn wave_target_never_negative() {
    let (_, generator) = generator(2);
    // Amplitude far above the sustained rate; the floor keeps it at zero.
    generator
        .start(
            LoadProfile::Wave {
                sustained_tps: 50.0,
                amplitude: 400.0,
                period: Duration::from_secs(20),
            },
            Duration::from_secs(60),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let target = generator.statistics().target_rate;
        assert!(target >= 0.0, "negative target rate {target}");
    }
    generator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn burst_profile_reaches_burst_rate() {
    let (_, generator) = generator(4);
    generator
        .start(
            LoadProfile::Burst {
                sustained_tps: 100.0,
                burst_tps: 500.0,
                burst_duration: Duration::from_secs(10),
                burst_interval: Duration::from_secs(20),
            },
            Duration::from_secs(60),
        )
        .unwrap();

    let mut targets = Vec::new();
    tokio::time::sleep(Duration::from_millis(500)).await;
    for _ in 0..55 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        targets.push(generator.statistics().target_rate);
    }
    generator.stop().await;

    assert!(targets.iter().any(|&t| t == 100.0), "sustained phase observed");
    assert!(targets.iter().any(|&t| t == 500.0), "burst phase observed");
}

#[tokio::test(start_paused = true)]
async fn chaos_profile_stays_in_bounds() {
    let (_, generator) = generator(2);
    generator
        .start(
            LoadProfile::Chaos {
                min_tps: 50.0,
                max_tps: 300.0,
                change_interval: Duration::from_secs(5),
            },
            Duration::from_secs(60),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let target = generator.statistics().target_rate;
        assert!(
            (50.0..=300.0).contains(&target),
            "chaos target {target} outside [50, 300]"
        );
    }
    generator.stop().await;
}
