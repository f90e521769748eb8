//! The SYS_AUTOSTART / SYS_AUTOCONFIG coupling: selecting an airframe only
//! applies on the next boot if SYS_AUTOCONFIG is set alongside it.

mod common;

use common::{connected_client, default_params, SimOptions};
use mavlink::common::MavMessage;
use px4param::link::wire;

#[tokio::test]
async fn airframe_write_also_sets_autoconfig() {
    let (client, sim, sent) = connected_client(default_params(), SimOptions::default()).await;
    client.await_parameters().await;

    let outcome = client
        .write("SYS_AUTOSTART", 4010.0, Default::default())
        .await
        .unwrap();
    assert!(outcome.warning.is_none());

    assert_eq!(sim.value_of("SYS_AUTOSTART"), Some(4010.0));
    assert_eq!(sim.value_of("SYS_AUTOCONFIG"), Some(1.0));

    // Both went over the wire as their own PARAM_SET, in order.
    let set_names: Vec<String> = sent
        .lock()
        .unwrap()
        .iter()
        .filter_map(|m| match m {
            MavMessage::PARAM_SET(d) => Some(wire::decode_param_id(&d.param_id)),
            _ => None,
        })
        .collect();
    assert_eq!(set_names, vec!["SYS_AUTOSTART", "SYS_AUTOCONFIG"]);

    client.disconnect().await;
}

#[tokio::test]
async fn companion_failure_is_a_warning_not_an_error() {
    let opts = SimOptions {
        drop_set_for: vec!["SYS_AUTOCONFIG".to_string()],
        ..Default::default()
    };
    let (client, sim, _sent) = connected_client(default_params(), opts).await;
    client.await_parameters().await;

    let outcome = client
        .write("SYS_AUTOSTART", 4020.0, Default::default())
        .await
        .unwrap();

    // The airframe change stuck even though the companion write was lost.
    assert!(outcome.warning.is_some());
    assert_eq!(sim.value_of("SYS_AUTOSTART"), Some(4020.0));
    assert_eq!(sim.value_of("SYS_AUTOCONFIG"), Some(0.0));

    client.disconnect().await;
}

#[tokio::test]
async fn ordinary_writes_have_no_companion() {
    let (client, _sim, sent) = connected_client(default_params(), SimOptions::default()).await;
    client.await_parameters().await;

    client
        .write("MC_ROLLRATE_P", 0.2, Default::default())
        .await
        .unwrap();

    let set_count = sent
        .lock()
        .unwrap()
        .iter()
        .filter(|m| matches!(m, MavMessage::PARAM_SET(_)))
        .count();
    assert_eq!(set_count, 1);

    client.disconnect().await;
}
