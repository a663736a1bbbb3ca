//! View change scenarios: a silent primary must not stall the network.

use palisade_bft::PbftConfig;
use palisade_simulation::{NetworkConfig, NodeIndex, SimulationRunner};
use palisade_types::ViewNumber;
use std::time::Duration;
use tracing_test::traced_test;

fn fast_config() -> PbftConfig {
    PbftConfig {
        round_interval: Duration::from_millis(500),
        health_interval: Duration::from_millis(500),
        fail_threshold: 2,
        ..Default::default()
    }
}

fn four_validators() -> NetworkConfig {
    NetworkConfig {
        num_validators: 4,
        latency: Duration::from_millis(30),
        jitter_fraction: 0.1,
        ..Default::default()
    }
}

/// The node index holding the primary role for a view.
fn primary_node(runner: &SimulationRunner, view: u64) -> NodeIndex {
    let primary = runner.node(0).registry().primary_for(ViewNumber(view));
    (0..4)
        .find(|&i| runner.validator_id(i) == primary)
        .expect("primary is one of the nodes")
}

#[traced_test]
#[test]
fn test_silent_primary_is_rotated_past() {
    let mut runner = SimulationRunner::with_pbft_config(four_validators(), fast_config(), 23);

    // Silence the primary for the first round before anything starts.
    let silent = primary_node(&runner, 1);
    runner.network_mut().isolate_node(silent);
    runner.start();

    runner.run_until(Duration::from_secs(15));

    // The remaining three rotated the view and kept confirming.
    for node in 0..4 {
        if node == silent {
            continue;
        }
        assert!(
            runner.committed_height(node) >= 1,
            "node {} never got past the silent primary (height {})",
            node,
            runner.committed_height(node)
        );
        assert!(
            runner.node(node).pbft().stats().view_changes >= 1,
            "node {} confirmed without a view change",
            node
        );
    }
}

#[traced_test]
#[test]
fn test_view_change_does_not_fork() {
    let mut runner = SimulationRunner::with_pbft_config(four_validators(), fast_config(), 29);
    let silent = primary_node(&runner, 1);
    runner.network_mut().isolate_node(silent);
    runner.start();
    runner.run_until(Duration::from_secs(15));

    runner.network_mut().heal_all();
    runner.run_until(Duration::from_secs(30));

    // Everyone converges on one chain, silent primary included.
    let reference_height = (0..4).map(|i| runner.committed_height(i)).min().unwrap();
    assert!(reference_height >= 1);
    for height in 1..=reference_height {
        let seq = palisade_types::SeqNumber(height);
        let reference = runner.storage(0).block_at(seq).unwrap().hash();
        for node in 1..4 {
            assert_eq!(
                runner.storage(node).block_at(seq).unwrap().hash(),
                reference,
                "fork at height {} on node {}",
                height,
                node
            );
        }
    }
}

#[traced_test]
#[test]
fn test_primary_returning_after_view_change_catches_up() {
    let mut runner = SimulationRunner::with_pbft_config(four_validators(), fast_config(), 31);
    let silent = primary_node(&runner, 1);
    runner.network_mut().isolate_node(silent);
    runner.start();
    runner.run_until(Duration::from_secs(12));
    let quorum_height = (0..4)
        .filter(|&i| i != silent)
        .map(|i| runner.committed_height(i))
        .min()
        .unwrap();
    assert!(quorum_height >= 1);

    runner.network_mut().heal_all();
    runner.run_until(Duration::from_secs(30));

    assert!(
        runner.committed_height(silent) >= quorum_height,
        "returned primary stuck at {}",
        runner.committed_height(silent)
    );
}
