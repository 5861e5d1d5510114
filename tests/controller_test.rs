//! Controller lifecycle and shutdown behaviour

mod test_helpers;

use hpi_localization::{
    controller::{ControllerState, HpiController, PushOutcome},
    simulation::{default_head_positions, measurement_info},
    stream_buffer::DataBlock,
};
use nalgebra::DMatrix;
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
};
use test_helpers::{create_test_source, signed_config};

const TIMEOUT: Duration = Duration::from_secs(60);

#[test]
fn test_stop_releases_running_producer() {
    let mut source = create_test_source(0.01).unwrap();
    let controller = HpiController::new(signed_config()).unwrap();
    controller.set_measurement_info(source.measurement_info().clone()).unwrap();
    controller.start().unwrap();
    assert!(controller.wait_for_state(ControllerState::Streaming, TIMEOUT));

    let queued = AtomicUsize::new(0);
    thread::scope(|s| {
        let producer = &controller;
        let counter = &queued;
        s.spawn(move || loop {
            match producer.push_block(source.next_block()).unwrap() {
                PushOutcome::Queued => {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                PushOutcome::Discarded => break,
            }
        });

        assert!(controller.wait_for_version(1, TIMEOUT).is_some());
        controller.stop();
    });

    assert_eq!(controller.state(), ControllerState::Stopped);
    assert!(queued.load(Ordering::Relaxed) >= 10);
}

#[test]
fn test_stop_while_waiting_for_geometry() {
    let controller = HpiController::new(signed_config()).unwrap();
    controller.start().unwrap();
    assert!(controller.wait_for_state(ControllerState::WaitGeometry, TIMEOUT));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(controller.state(), ControllerState::WaitGeometry);

    controller.stop();
    assert_eq!(controller.state(), ControllerState::Stopped);
}

#[test]
fn test_stop_while_worker_waits_for_data() {
    let mut source = create_test_source(0.0).unwrap();
    let controller = HpiController::new(signed_config()).unwrap();
    controller.set_measurement_info(source.measurement_info().clone()).unwrap();
    controller.start().unwrap();
    assert!(controller.wait_for_state(ControllerState::Streaming, TIMEOUT));

    // Create the buffer, then leave the worker parked on an empty queue
    controller.push_block(source.next_block()).unwrap();
    thread::sleep(Duration::from_millis(50));

    controller.stop();
    assert_eq!(controller.state(), ControllerState::Stopped);
}

#[test]
fn test_geometry_arrives_after_start() {
    let mut source = create_test_source(0.01).unwrap();
    let controller = HpiController::new(signed_config()).unwrap();
    controller.start().unwrap();
    assert!(controller.wait_for_state(ControllerState::WaitGeometry, TIMEOUT));

    assert_eq!(controller.push_block(source.next_block()).unwrap(), PushOutcome::Discarded);

    controller.set_measurement_info(source.measurement_info().clone()).unwrap();
    assert!(controller.wait_for_state(ControllerState::Streaming, TIMEOUT));

    for _ in 0..10 {
        assert_eq!(controller.push_block(source.next_block()).unwrap(), PushOutcome::Queued);
    }
    assert!(controller.wait_for_version(1, TIMEOUT).is_some());
    controller.stop();
}

#[test]
fn test_restart_continues_publishing() {
    let mut source = create_test_source(0.01).unwrap();
    let controller = HpiController::new(signed_config()).unwrap();
    controller.set_measurement_info(source.measurement_info().clone()).unwrap();

    controller.start().unwrap();
    assert!(controller.wait_for_state(ControllerState::Streaming, TIMEOUT));
    for _ in 0..10 {
        controller.push_block(source.next_block()).unwrap();
    }
    assert!(controller.wait_for_version(1, TIMEOUT).is_some());
    controller.stop();

    // Blocks pushed while stopped are dropped
    assert_eq!(controller.push_block(source.next_block()).unwrap(), PushOutcome::Discarded);

    controller.start().unwrap();
    assert!(controller.wait_for_state(ControllerState::Streaming, TIMEOUT));
    for _ in 0..10 {
        controller.push_block(source.next_block()).unwrap();
    }
    let latest = controller.wait_for_version(2, TIMEOUT).expect("second localization");
    assert_eq!(latest.version, 2);
    controller.stop();
}

#[test]
fn test_inconsistent_geometry_stops_worker() {
    let mut info = measurement_info(&default_head_positions(), 1000.0);
    info.channels.retain(|ch| ch.name != "TRG016");

    let controller = HpiController::new(signed_config()).unwrap();
    controller.set_measurement_info(info).unwrap();
    controller.start().unwrap();

    assert!(controller.wait_for_state(ControllerState::Stopped, TIMEOUT));
    assert!(!controller.is_running());
    controller.stop();
}

#[test]
fn test_rejects_blocks_with_wrong_channel_count() {
    let source = create_test_source(0.0).unwrap();
    let controller = HpiController::new(signed_config()).unwrap();
    controller.set_measurement_info(source.measurement_info().clone()).unwrap();

    let result = controller.push_block(DataBlock::new(DMatrix::zeros(5, 100)));
    assert!(result.is_err());
}

#[test]
fn test_drop_stops_running_controller() {
    let mut source = create_test_source(0.0).unwrap();
    let controller = HpiController::new(signed_config()).unwrap();
    controller.set_measurement_info(source.measurement_info().clone()).unwrap();
    controller.start().unwrap();
    assert!(controller.wait_for_state(ControllerState::Streaming, TIMEOUT));
    controller.push_block(source.next_block()).unwrap();

    let dropper = thread::spawn(move || drop(controller));
    dropper.join().unwrap();
}
