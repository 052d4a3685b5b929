//! Scheduler timing tests. Tokio's paused clock makes every `advance` and
//! sleep deterministic.

use std::time::Duration;

use realmgate_tick::{TickConfig, TickScheduler};

const PERIOD: Duration = Duration::from_millis(50);

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_twenty_hz_fifty_ms_period() {
    let config = TickConfig::default();
    assert_eq!(config.tick_rate_hz, 20);
    assert_eq!(config.period(), PERIOD);
    assert_eq!(config.start_jitter_ms, 0);
}

#[test]
fn test_validated_rate_clamped_to_supported_range() {
    assert_eq!(TickConfig::with_rate(0).validated().tick_rate_hz, 1);
    assert_eq!(
        TickConfig::with_rate(500).validated().tick_rate_hz,
        TickConfig::MAX_TICK_RATE_HZ
    );
}

#[test]
fn test_validated_slow_ratio_clamped() {
    let config = TickConfig {
        slow_update_ratio: -2.0,
        ..TickConfig::default()
    }
    .validated();
    assert_eq!(config.slow_update_ratio, 0.0);
}

#[test]
fn test_from_toml_partial_table_keeps_defaults() {
    let config: TickConfig = toml::from_str("tick_rate_hz = 10").unwrap();
    assert_eq!(config.period(), Duration::from_millis(100));
    assert_eq!(config.slow_update_ratio, 0.8);
}

// =========================================================================
// wait_for_tick
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_on_time_reports_one_period() {
    let mut scheduler = TickScheduler::with_rate(20);

    let first = scheduler.wait_for_tick().await;
    assert_eq!(first.tick, 1);
    assert_eq!(first.elapsed, PERIOD);
    assert!(!first.late);
    assert_eq!(first.missed, 0);

    let second = scheduler.wait_for_tick().await;
    assert_eq!(second.tick, 2);
    assert_eq!(second.elapsed, PERIOD);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_after_stall_reports_full_gap() {
    let mut scheduler = TickScheduler::with_rate(20);

    // A world update that blocked for 230 ms.
    tokio::time::advance(Duration::from_millis(230)).await;
    let tick = scheduler.wait_for_tick().await;

    assert!(tick.late);
    assert_eq!(tick.elapsed, Duration::from_millis(230));
    assert_eq!(tick.missed, 3);
    assert_eq!(scheduler.stats().late_ticks, 1);
    assert_eq!(scheduler.stats().missed_slots, 3);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_after_stall_no_burst() {
    let mut scheduler = TickScheduler::with_rate(20);
    tokio::time::advance(Duration::from_millis(230)).await;
    scheduler.wait_for_tick().await;

    let before = tokio::time::Instant::now();
    let next = scheduler.wait_for_tick().await;
    assert_eq!(before.elapsed(), PERIOD);
    assert_eq!(next.elapsed, PERIOD);
    assert!(!next.late);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_cancelled_schedule_unchanged() {
    let mut scheduler = TickScheduler::with_rate(20);

    let cancelled =
        tokio::time::timeout(Duration::from_millis(20), scheduler.wait_for_tick()).await;
    assert!(cancelled.is_err());
    assert_eq!(scheduler.ticks(), 0);

    let tick = scheduler.wait_for_tick().await;
    assert_eq!(tick.tick, 1);
    assert_eq!(tick.elapsed, PERIOD);
}

#[tokio::test(start_paused = true)]
async fn test_start_jitter_delays_first_tick_within_bound() {
    let mut scheduler = TickScheduler::new(TickConfig {
        start_jitter_ms: 30,
        ..TickConfig::with_rate(20)
    });

    let tick = scheduler.wait_for_tick().await;
    assert!(tick.elapsed >= PERIOD);
    assert!(tick.elapsed < PERIOD + Duration::from_millis(30));
}

// =========================================================================
// end_update
// =========================================================================

#[test]
fn test_end_update_without_tick_records_nothing() {
    let mut scheduler = TickScheduler::with_rate(20);
    assert_eq!(scheduler.end_update(), Duration::ZERO);
    assert_eq!(scheduler.stats().slowest_update, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_end_update_measures_wall_clock_work() {
    let mut scheduler = TickScheduler::with_rate(20);
    scheduler.wait_for_tick().await;

    // Wall-clock work; the paused Tokio clock does not move.
    std::thread::sleep(Duration::from_millis(2));
    let spent = scheduler.end_update();

    assert!(spent >= Duration::from_millis(2));
    assert_eq!(scheduler.stats().slowest_update, spent);
    assert!(scheduler.stats().last_load > 0.0);
    // A second call has no open update.
    assert_eq!(scheduler.end_update(), Duration::ZERO);
}

// =========================================================================
// Loop shape
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_select_loop_ticks_until_shutdown() {
    let mut scheduler = TickScheduler::with_rate(20);
    let shutdown = tokio::time::sleep(Duration::from_millis(175));
    tokio::pin!(shutdown);

    let mut total = Duration::ZERO;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            tick = scheduler.wait_for_tick() => {
                total += tick.elapsed;
                scheduler.end_update();
            }
        }
    }

    assert_eq!(scheduler.ticks(), 3);
    assert_eq!(total, Duration::from_millis(150));
}
