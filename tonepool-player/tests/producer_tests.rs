//! Producer loop tests against a manually completed device

mod helpers;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use helpers::{wired_pool, ManualDeviceState};
use tonepool_player::audio::{Partial, Sample, ToneMix};
use tonepool_player::playback::Producer;
use tonepool_player::Error;

const RATE: u32 = 44_100;

#[test]
fn test_sample_limit_ends_loop_on_whole_buffers() {
    let wired = wired_pool(4, 100);
    let state = ManualDeviceState::new();
    let device = state.device(wired.handler.clone());

    // 250 samples rounds up to three buffers of 100
    let mut producer = Producer::new(ToneMix::default(), RATE).with_sample_limit(Some(250));
    producer.run(&wired.pool, &device).unwrap();

    assert_eq!(producer.cursor(), 300);
    assert_eq!(state.submitted_sequences(), vec![0, 1, 2]);
    assert_eq!(wired.pool.stats().in_flight, 3);
}

#[test]
fn test_producer_paced_by_completions() {
    let wired = wired_pool(2, 64);
    let state = ManualDeviceState::new();
    let device = state.device(wired.handler.clone());
    let pool = Arc::clone(&wired.pool);

    let producer_thread = thread::spawn(move || {
        let mut producer = Producer::new(ToneMix::default(), RATE).with_sample_limit(Some(64 * 6));
        let result = producer.run(&pool, &device);
        (producer.cursor(), result)
    });

    // Only the pool's two buffers can be out before anything completes
    assert!(state.wait_for_submissions(2, Duration::from_secs(5)));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(state.submitted_sequences().len(), 2);

    for expected in 3..=6 {
        state.complete_next().unwrap();
        assert!(state.wait_for_submissions(expected, Duration::from_secs(5)));
    }

    let (cursor, result) = producer_thread.join().unwrap();
    result.unwrap();
    assert_eq!(cursor, 64 * 6);
    assert_eq!(state.submitted_sequences(), (0..6).collect::<Vec<_>>());
}

#[test]
fn test_played_samples_form_one_continuous_signal() {
    let mix = ToneMix::new(vec![Partial::new(1200.0, 5000.0), Partial::new(210.0, 4000.0)]);
    let wired = wired_pool(2, 50);
    let state = ManualDeviceState::new();
    let device = state.device(wired.handler.clone());
    let pool = Arc::clone(&wired.pool);

    let producer_mix = mix.clone();
    let producer_thread = thread::spawn(move || {
        Producer::new(producer_mix, RATE)
            .with_sample_limit(Some(200))
            .run(&pool, &device)
    });

    let mut completed = 0;
    while completed < 4 {
        if state.complete_next().is_some() {
            completed += 1;
        } else {
            state.wait_for_submissions(completed + 1, Duration::from_secs(5));
        }
    }
    producer_thread.join().unwrap().unwrap();

    let mut reference = vec![0 as Sample; 200];
    Producer::new(mix, RATE).fill(&mut reference);
    assert_eq!(state.played_samples(), reference);
}

#[test]
fn test_rejected_submit_rolls_back_and_returns_io() {
    let wired = wired_pool(4, 32);
    let state = ManualDeviceState::new();
    let device = state.device(wired.handler.clone());
    state.reject_next_submit();

    let mut producer = Producer::new(ToneMix::default(), RATE);
    let err = producer.run(&wired.pool, &device).unwrap_err();
    assert!(matches!(err, Error::Io(_)));

    let stats = wired.pool.stats();
    assert_eq!(stats.free, 4);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.rejected_total, 1);
    assert!(stats.is_consistent());
    assert_eq!(state.rejected_count(), 1);
    assert!(state.submitted_sequences().is_empty());
}

#[test]
fn test_shutdown_while_blocked_ends_loop_cleanly() {
    let wired = wired_pool(1, 16);
    let state = ManualDeviceState::new();
    let device = state.device(wired.handler.clone());
    let pool = Arc::clone(&wired.pool);

    let producer_thread = thread::spawn(move || Producer::new(ToneMix::default(), RATE).run(&pool, &device));

    assert!(state.wait_for_submissions(1, Duration::from_secs(5)));
    thread::sleep(Duration::from_millis(50));
    wired.control.request_shutdown();

    producer_thread.join().unwrap().unwrap();
    assert_eq!(wired.pool.stats().in_flight, 1);
    assert!(!wired.control.has_fault());
}

#[test]
fn test_partition_holds_while_completions_race_the_producer() {
    const BUFFERS: u64 = 2_000;
    let wired = wired_pool(3, 16);
    let state = ManualDeviceState::new();
    let device = state.device(wired.handler.clone());
    let done = Arc::new(AtomicBool::new(false));

    let producer_thread = {
        let pool = Arc::clone(&wired.pool);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let result = Producer::new(ToneMix::default(), RATE)
                .with_sample_limit(Some(16 * BUFFERS))
                .run(&pool, &device);
            done.store(true, Ordering::SeqCst);
            result
        })
    };

    let completer = {
        let state = Arc::clone(&state);
        let done = Arc::clone(&done);
        thread::spawn(move || loop {
            if state.complete_next().is_none() {
                if done.load(Ordering::SeqCst) && state.pending_count() == 0 {
                    break;
                }
                thread::yield_now();
            }
        })
    };

    let mut samples = 0u64;
    while !done.load(Ordering::SeqCst) {
        let stats = wired.pool.stats();
        assert!(stats.is_consistent(), "partition broken: {:?}", stats);
        assert!(stats.leased <= 1);
        samples += 1;
    }

    producer_thread.join().unwrap().unwrap();
    completer.join().unwrap();

    let stats = wired.pool.stats();
    assert!(samples > 0);
    assert!(stats.is_consistent());
    assert_eq!(stats.submitted_total, BUFFERS);
    assert_eq!(stats.completed_total, BUFFERS);
    assert_eq!(stats.free, 3);
    assert_eq!(state.submitted_sequences(), (0..BUFFERS).collect::<Vec<_>>());
}
