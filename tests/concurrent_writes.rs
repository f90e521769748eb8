//! One-in-flight-per-name discipline: concurrent writes fail fast,
//! concurrent reads share the outcome.

mod common;

use std::time::Duration;

use common::{connected_client, default_params, SimOptions};
use px4param::error::OperationError;

#[tokio::test]
async fn second_concurrent_write_fails_fast() {
    let opts = SimOptions {
        echo_delay: Duration::from_millis(300),
        ..Default::default()
    };
    let (client, _sim, _sent) = connected_client(default_params(), opts).await;
    client.await_parameters().await;

    let (first, second) = tokio::join!(
        client.write("MC_ROLLRATE_P", 0.2, Default::default()),
        client.write("MC_ROLLRATE_P", 0.3, Default::default()),
    );

    assert!(first.is_ok());
    assert!(matches!(
        second.unwrap_err(),
        OperationError::AlreadyPending(_)
    ));

    // Once the first write resolved, the name is free again.
    let retry = client.write("MC_ROLLRATE_P", 0.3, Default::default()).await;
    assert!(retry.is_ok());

    client.disconnect().await;
}

#[tokio::test]
async fn writes_to_different_names_run_concurrently() {
    let opts = SimOptions {
        echo_delay: Duration::from_millis(200),
        ..Default::default()
    };
    let (client, sim, _sent) = connected_client(default_params(), opts).await;
    client.await_parameters().await;

    let (a, b) = tokio::join!(
        client.write("MC_ROLLRATE_P", 0.2, Default::default()),
        client.write("MC_PITCHRATE_P", 0.3, Default::default()),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(sim.value_of("MC_ROLLRATE_P"), Some(0.2));
    assert_eq!(sim.value_of("MC_PITCHRATE_P"), Some(0.3));

    client.disconnect().await;
}

#[tokio::test]
async fn concurrent_fresh_reads_both_resolve() {
    let (client, _sim, _sent) = connected_client(default_params(), SimOptions::default()).await;
    client.await_parameters().await;

    let (a, b) = tokio::join!(
        client.read_fresh("EKF2_AID_MASK"),
        client.read_fresh("EKF2_AID_MASK"),
    );
    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.value, b.value);
    assert_eq!(a.name, "EKF2_AID_MASK");

    client.disconnect().await;
}
