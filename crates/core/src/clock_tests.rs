// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn fake_clock_advances_both_views() {
    let clock = FakeClock::new();
    let start_instant = clock.now();
    let start_ms = clock.epoch_ms();

    clock.advance(Duration::from_secs(90));

    assert_eq!(clock.now() - start_instant, Duration::from_secs(90));
    assert_eq!(clock.epoch_ms() - start_ms, 90_000);
}

#[test]
fn now_utc_tracks_epoch_ms() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_767_225_600_000);
    assert_eq!(clock.now_utc().to_rfc3339(), "2026-01-01T00:00:00+00:00");
}

#[test]
fn system_clock_is_monotonic() {
    let clock = SystemClock;
    let a = clock.now();
    let b = clock.now();
    assert!(b >= a);
}
