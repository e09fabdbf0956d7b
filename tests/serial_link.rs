use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use ecocity::{
    buildings::BuildingKind,
    city::{CityState, MetricsDelta},
    serial::{ConnectionStatus, SerialInputDecoder, SerialLink, SerialSource},
};
use tokio::{
    io::{duplex, AsyncWriteExt},
    net::TcpListener,
    sync::watch,
};

fn shared_city() -> Arc<Mutex<CityState>> {
    Arc::new(Mutex::new(CityState::new()))
}

#[tokio::test]
async fn pump_feeds_device_bytes_into_the_city() {
    let city = shared_city();
    let (status_tx, _status_rx) = watch::channel(ConnectionStatus::Idle);
    let mut link = SerialLink::new(
        SerialSource::Device("/dev/null".into()),
        SerialInputDecoder::new(),
        city.clone(),
        status_tx,
        Duration::from_millis(10),
    );

    let (mut device, host) = duplex(8);
    let writer = tokio::spawn(async move {
        device.write_all(b"12,300\n13,4").await.unwrap();
        device.write_all(b"0\n14,178\n9,2").await.unwrap();
        // Dropping the device closes the stream with "9,2" still unterminated.
    });

    link.pump(host).await.unwrap();
    writer.await.unwrap();

    let city = city.lock().unwrap();
    let kinds: Vec<_> = city.occupied_cells().map(|(_, _, b)| b.kind).collect();
    assert_eq!(
        kinds,
        vec![BuildingKind::WindTurbine, BuildingKind::House, BuildingKind::Tree]
    );
    assert!(city.cell(4, 3).unwrap().is_empty());
}

#[tokio::test]
async fn device_input_is_ignored_once_the_game_is_over() {
    let city = shared_city();
    city.lock().unwrap().apply_delta(MetricsDelta {
        pollution: 100,
        ..MetricsDelta::default()
    });
    assert!(city.lock().unwrap().metrics().game_over);

    let (status_tx, _status_rx) = watch::channel(ConnectionStatus::Idle);
    let mut link = SerialLink::new(
        SerialSource::Device("/dev/null".into()),
        SerialInputDecoder::new(),
        city.clone(),
        status_tx,
        Duration::from_millis(10),
    );
    let (mut device, host) = duplex(64);
    device.write_all(b"12,40
").await.unwrap();
    drop(device);
    link.pump(host).await.unwrap();

    let city = city.lock().unwrap();
    assert_eq!(city.occupied_cells().count(), 0);
    assert_eq!(city.metrics().budget, 100_000);
}

#[tokio::test]
async fn link_reports_connection_status_for_tcp_bridges() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let city = shared_city();
    let (status_tx, mut status_rx) = watch::channel(ConnectionStatus::Idle);
    let link = SerialLink::new(
        format!("tcp://{addr}").parse().unwrap(),
        SerialInputDecoder::new(),
        city.clone(),
        status_tx,
        Duration::from_secs(60),
    );
    let task = tokio::spawn(link.run());

    let (mut socket, _) = listener.accept().await.unwrap();
    status_rx
        .wait_for(|status| *status == ConnectionStatus::Connected)
        .await
        .unwrap();
    socket.write_all(b"20,20\n").await.unwrap();
    drop(socket);

    tokio::time::timeout(
        Duration::from_secs(5),
        status_rx.wait_for(|status| *status == ConnectionStatus::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();
    task.abort();

    let city = city.lock().unwrap();
    let building = city.cell(0, 0).and_then(|cell| cell.building()).unwrap();
    assert_eq!(building.kind, BuildingKind::Residential);
}

#[test]
fn serial_sources_parse_from_config_strings() {
    assert_eq!(
        "tcp://localhost:7000".parse::<SerialSource>().unwrap(),
        SerialSource::Tcp("localhost:7000".into())
    );
    assert_eq!(
        " /dev/ttyUSB0 ".parse::<SerialSource>().unwrap(),
        SerialSource::Device("/dev/ttyUSB0".into())
    );
}
