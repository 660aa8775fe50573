//! Remote proxy driver against a real hub served on loopback.

#![cfg(feature = "remote")]

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use rotator_hub::config::{HttpConfig, RotatorConfig, WsConfig};
use rotator_hub::hal::{MockRotator, RemoteRotator};
use rotator_hub::messages::Heading;
use rotator_hub::services::{serve_http, Hub};
use rotator_hub::traits::{EventSink, Rotator};
use rotator_hub::Error;

async fn serve(rotators: &[&str]) -> (Arc<Hub>, Vec<Arc<MockRotator>>, u16) {
    let hub = Hub::new(EventSink::default(), WsConfig::default());
    let mut mocks = Vec::new();
    for name in rotators {
        let mock = MockRotator::with_config(
            RotatorConfig::builder(*name)
                .with_azimuth_range(0, 450)
                .with_elevation(true)
                .build()
                .unwrap(),
        );
        hub.add_rotator(mock.clone()).await.unwrap();
        mocks.push(mock);
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server_hub = Arc::clone(&hub);
    tokio::spawn(async move { serve_http(server_hub, listener, &HttpConfig::default()).await });
    (hub, mocks, port)
}

#[tokio::test]
async fn test_mirrors_metadata() {
    let (_hub, _mocks, port) = serve(&["roof"]).await;

    let (remote, _fatal) = RemoteRotator::connect("127.0.0.1", port, EventSink::default())
        .await
        .unwrap();

    assert_eq!(remote.name(), "roof");
    assert!(remote.has_elevation());
    assert_eq!(remote.config().azimuth_max, 450);
}

#[tokio::test]
async fn test_commands_become_http_calls() {
    let (_hub, mocks, port) = serve(&["roof"]).await;
    let (remote, _fatal) = RemoteRotator::connect("127.0.0.1", port, EventSink::default())
        .await
        .unwrap();

    remote.set_azimuth(90).await.unwrap();
    remote.set_elevation(45).await.unwrap();
    remote.stop_azimuth().await.unwrap();
    remote.stop().await.unwrap();

    assert_eq!(
        mocks[0].calls(),
        vec!["set_azimuth(90)", "set_elevation(45)", "stop_azimuth", "stop"]
    );
}

#[tokio::test]
async fn test_remote_errors_surface() {
    let (_hub, mocks, port) = serve(&["roof"]).await;
    let (remote, _fatal) = RemoteRotator::connect("127.0.0.1", port, EventSink::default())
        .await
        .unwrap();

    mocks[0].set_failing(true);
    let err = remote.set_azimuth(90).await.unwrap_err();
    assert!(matches!(err, Error::Remote(ref msg) if msg.starts_with("500")), "{err}");
}

#[tokio::test]
async fn test_heading_updates_mirrored() {
    let (hub, _mocks, port) = serve(&["roof"]).await;
    let sink = EventSink::default();
    let mut updates = sink.subscribe();
    let (remote, _fatal) = RemoteRotator::connect("127.0.0.1", port, sink).await.unwrap();

    let heading = Heading { azimuth: 33, az_preset: 90, elevation: 5, el_preset: 5 };
    for _ in 0..100 {
        hub.sink().publish("roof", heading);
        hub.sink().publish("other", Heading::default());
        if remote.heading() == heading {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remote.heading(), heading);

    let update = updates.recv().await.unwrap();
    assert_eq!(update.rotator_name, "roof");
    assert_eq!(update.heading, heading);
}

#[tokio::test]
async fn test_removal_is_fatal() {
    let (hub, _mocks, port) = serve(&["roof"]).await;
    let (remote, fatal) = RemoteRotator::connect("127.0.0.1", port, EventSink::default())
        .await
        .unwrap();

    // Give the remote hub time to register the proxy's WebSocket.
    tokio::time::sleep(Duration::from_millis(100)).await;
    hub.remove_rotator("roof").await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(2), fatal)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(err, Error::ConnectionLost));
    assert!(matches!(remote.stop().await, Err(Error::Closed)));
}

#[tokio::test]
async fn test_requires_single_rotator() {
    let (_hub, _mocks, port) = serve(&["a", "b"]).await;

    let err = RemoteRotator::connect("127.0.0.1", port, EventSink::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::Remote(_)));
}

#[tokio::test]
async fn test_unreachable_hub() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = RemoteRotator::connect("127.0.0.1", port, EventSink::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::Remote(_)));
}
