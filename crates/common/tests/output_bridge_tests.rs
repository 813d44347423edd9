//! Output Bridge Integration Tests
//!
//! Tests for the async channel bridge between Tokio runtime and the output
//! worker thread.
//!
//! # Test Scenarios
//! - Command/response message flow
//! - Fire-and-forget channel writes
//! - Event delivery
//! - Worker shutdown
//!
//! Run with: `cargo test -p common --test output_bridge_tests`

use common::{OutputCommand, OutputEvent, create_output_bridge};
use protocol::OutputSummary;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn summary(index: u32) -> OutputSummary {
    OutputSummary {
        index,
        name: format!("SUIDI U{}", index + 1),
        universe: index as u8,
        info: "Device not in use".to_string(),
    }
}

// ============================================================================
// Command Flow Tests
// ============================================================================

#[tokio::test]
async fn test_list_outputs_command_flow() {
    let (bridge, worker) = create_output_bridge();

    let handle = thread::spawn(move || {
        let cmd = worker.recv_command().expect("Failed to receive command");
        if let OutputCommand::ListOutputs { response } = cmd {
            response
                .send(vec![summary(0), summary(1)])
                .expect("Failed to send response");
            true
        } else {
            false
        }
    });

    let (tx, rx) = oneshot::channel();
    bridge
        .send_command(OutputCommand::ListOutputs { response: tx })
        .await
        .expect("Failed to send command");

    let outputs = timeout(TEST_TIMEOUT, rx)
        .await
        .expect("Timed out")
        .expect("Failed to receive response");
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[1].name, "SUIDI U2");

    assert!(handle.join().expect("Worker thread panicked"));
}

#[tokio::test]
async fn test_open_output_command_flow() {
    let (bridge, worker) = create_output_bridge();

    let handle = thread::spawn(move || {
        let cmd = worker.recv_command().expect("Failed to receive command");
        match cmd {
            OutputCommand::OpenOutput { output, response } => {
                let _ = response.send(output == 3);
            }
            other => panic!("Unexpected command: {:?}", other),
        }
    });

    let (tx, rx) = oneshot::channel();
    bridge
        .send_command(OutputCommand::OpenOutput {
            output: 3,
            response: tx,
        })
        .await
        .unwrap();

    assert!(timeout(TEST_TIMEOUT, rx).await.unwrap().unwrap());
    handle.join().unwrap();
}

#[tokio::test]
async fn test_write_universe_preserves_order() {
    let (bridge, worker) = create_output_bridge();

    for level in 0..10u8 {
        bridge
            .send_command(OutputCommand::WriteUniverse {
                output: 0,
                data: vec![level; 512],
            })
            .await
            .unwrap();
    }
    bridge.send_command(OutputCommand::Shutdown).await.unwrap();

    let handle = thread::spawn(move || {
        let mut levels = Vec::new();
        while let Ok(cmd) = worker.recv_command() {
            match cmd {
                OutputCommand::WriteUniverse { data, .. } => levels.push(data[0]),
                OutputCommand::Shutdown => break,
                _ => {}
            }
        }
        levels
    });

    let levels = handle.join().unwrap();
    assert_eq!(levels, (0..10).collect::<Vec<u8>>());
}

// ============================================================================
// Event Tests
// ============================================================================

#[tokio::test]
async fn test_configuration_changed_event() {
    let (bridge, worker) = create_output_bridge();

    thread::spawn(move || {
        worker
            .send_event(OutputEvent::ConfigurationChanged {
                outputs: vec!["SUIDI 2 U1".to_string(), "SUIDI 2 U2".to_string()],
            })
            .unwrap();
    })
    .join()
    .unwrap();

    let event = timeout(TEST_TIMEOUT, bridge.recv_event())
        .await
        .unwrap()
        .unwrap();

    match event {
        OutputEvent::ConfigurationChanged { outputs } => assert_eq!(outputs.len(), 2),
    }
}

#[tokio::test]
async fn test_recv_event_fails_after_worker_drop() {
    let (bridge, worker) = create_output_bridge();
    drop(worker);
    assert!(bridge.recv_event().await.is_err());
}

#[tokio::test]
async fn test_send_command_fails_after_worker_drop() {
    let (bridge, worker) = create_output_bridge();
    drop(worker);
    let result = bridge.send_command(OutputCommand::Shutdown).await;
    assert!(matches!(result, Err(common::Error::Channel(_))));
}
