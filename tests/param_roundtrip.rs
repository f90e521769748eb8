//! End-to-end read/write behavior against the scripted vehicle.

mod common;

use common::{connected_client, default_params, SimOptions};
use mavlink::common::{MavMessage, MavParamType};
use px4param::error::OperationError;

#[tokio::test]
async fn write_then_read_roundtrip() {
    let (client, sim, _sent) = connected_client(default_params(), SimOptions::default()).await;

    let outcome = client
        .write("MC_ROLLRATE_P", 0.25, Default::default())
        .await
        .unwrap();
    assert!((outcome.record.value - 0.25).abs() < 1e-6);
    assert!(outcome.warning.is_none());

    // The echoed value is already cached by the time the write resolves.
    let cached = client.cached("MC_ROLLRATE_P").expect("echo is cached");
    assert!((cached.value - 0.25).abs() < 1e-6);

    // Cached read serves the verified value without another request.
    let record = client.read("MC_ROLLRATE_P").await.unwrap();
    assert!((record.value - 0.25).abs() < 1e-6);

    // The vehicle really holds it.
    assert_eq!(sim.value_of("MC_ROLLRATE_P"), Some(0.25));

    client.disconnect().await;
}

#[tokio::test]
async fn declared_uint16_type_is_reused_on_write() {
    let (client, _sim, sent) = connected_client(default_params(), SimOptions::default()).await;

    // Let the background download land so the declared type is known.
    let outcome = client.await_parameters().await;
    assert!(outcome.stabilized);

    client
        .write("SYS_AUTOSTART", 4010.0, Default::default())
        .await
        .unwrap();

    let set = sent
        .lock()
        .unwrap()
        .iter()
        .find_map(|m| match m {
            MavMessage::PARAM_SET(d) => Some(d.clone()),
            _ => None,
        })
        .expect("a PARAM_SET went over the wire");
    assert_eq!(set.param_type, MavParamType::MAV_PARAM_TYPE_UINT16);
    assert_eq!(set.param_value, 4010.0);

    client.disconnect().await;
}

#[tokio::test]
async fn unknown_name_is_reported_once_list_is_complete() {
    let (client, _sim, _sent) = connected_client(default_params(), SimOptions::default()).await;

    let outcome = client.await_parameters().await;
    assert!(outcome.stabilized);

    let err = client.read_fresh("NOT_A_PARAM").await.unwrap_err();
    assert!(matches!(err, OperationError::UnknownParameter(_)));

    client.disconnect().await;
}

#[tokio::test]
async fn fresh_read_bypasses_cache() {
    let (client, sim, _sent) = connected_client(default_params(), SimOptions::default()).await;
    client.await_parameters().await;

    // Change the value behind the client's back.
    {
        let mut params = sim.params.lock().unwrap();
        params
            .iter_mut()
            .find(|p| p.name == "MC_PITCHRATE_P")
            .unwrap()
            .value = 0.42;
    }

    let stale = client.read("MC_PITCHRATE_P").await.unwrap();
    assert!((stale.value - 0.15).abs() < 1e-6);

    let fresh = client.read_fresh("MC_PITCHRATE_P").await.unwrap();
    assert!((fresh.value - 0.42).abs() < 1e-6);

    client.disconnect().await;
}
