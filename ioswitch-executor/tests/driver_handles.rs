//! Driver ingress/egress handles.

mod common;

use common::{collect, take_collected, TestCluster};
use ioswitch_core::{ByteRange, ByteStream, PlanId, ScalarValue};
use ioswitch_executor::dag::{Graph, NodeEnv, NodeKind};
use ioswitch_executor::exec::{Driver, DriverReadStream, DriverSignal, DriverWriteStream};
use ioswitch_executor::plan::{generate, PlanBuilder};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn start(cluster: &TestCluster, graph: &mut Graph) -> Driver {
    let mut builder = PlanBuilder::new();
    generate(graph, &mut builder).unwrap();
    Driver::execute(
        builder.build(PlanId::new()),
        cluster.transport(),
        Arc::clone(&cluster.config),
    )
}

fn alphabet() -> Vec<u8> {
    (b'a'..=b'z').collect()
}

#[test]
fn handles_resolve_during_lowering() {
    let write = DriverWriteStream::new();
    let read = DriverReadStream::new();
    assert_eq!(write.var_id().unwrap_err().code(), "E203");

    let mut graph = Graph::new();
    let (_, s) = graph.from_driver(write.clone()).unwrap();
    graph.to_driver(read.clone(), s).unwrap();
    generate(&mut graph, &mut PlanBuilder::new()).unwrap();

    // Same variable on both ends, no op needed.
    assert_eq!(write.var_id().unwrap(), read.var_id().unwrap());
}

#[tokio::test]
async fn write_is_cut_to_the_handle_range() {
    let cluster = TestCluster::new(1);
    let write = DriverWriteStream::with_range(ByteRange::new(3, 4));

    let mut graph = Graph::new();
    let (_, s) = graph.from_driver(write.clone()).unwrap();
    collect(&mut graph, s, "handle_range", cluster.env(0));

    let driver = start(&cluster, &mut graph);
    driver
        .begin_write(&write, ByteStream::from_bytes(alphabet()))
        .unwrap();
    driver.wait().await.unwrap();
    assert_eq!(take_collected("handle_range"), Some(b"defg".to_vec()));
}

#[tokio::test]
async fn ranged_write_is_relative_to_the_provided_window() {
    let cluster = TestCluster::new(0);
    let write = DriverWriteStream::with_range(ByteRange::new(10, 5));

    let mut graph = Graph::new();
    let (_, s) = graph.from_driver(write.clone()).unwrap();
    collect(&mut graph, s, "ranged_window", NodeEnv::Driver);

    let driver = start(&cluster, &mut graph);
    // The caller only has bytes 8..26 of the data.
    let window = alphabet()[8..].to_vec();
    driver
        .begin_write_ranged(&write, ByteStream::from_bytes(window), ByteRange::new(8, 18))
        .unwrap();

    let store = driver.wait().await.unwrap();
    assert_eq!(store.get("ranged_window"), Some(&ScalarValue::Int(5)));
    assert_eq!(take_collected("ranged_window"), Some(b"klmno".to_vec()));
}

#[tokio::test]
async fn ranged_write_outside_the_window_is_rejected() {
    let cluster = TestCluster::new(0);
    let write = DriverWriteStream::with_range(ByteRange::new(2, 5));

    let mut graph = Graph::new();
    let (_, s) = graph.from_driver(write.clone()).unwrap();
    graph.drop_stream(s).unwrap();

    let driver = start(&cluster, &mut graph);
    let err = driver
        .begin_write_ranged(&write, ByteStream::from_bytes(alphabet()), ByteRange::new(4, 10))
        .unwrap_err();
    assert_eq!(err.code(), "E102");
    driver.cancel();
    assert!(driver.wait().await.unwrap_err().is_cancellation());
}

#[tokio::test]
async fn read_returns_a_worker_stream() {
    let cluster = TestCluster::new(1);
    let write = DriverWriteStream::new();
    let read = DriverReadStream::new();

    // driver -> worker -> driver
    let mut graph = Graph::new();
    let (_, s) = graph.from_driver(write.clone()).unwrap();
    let (begin, republished, started) = graph.on_stream_begin(s).unwrap();
    graph.pin_env(begin, cluster.env(0)).unwrap();
    graph.to_driver(read.clone(), republished).unwrap();
    graph.store(started, "started").unwrap();

    let driver = start(&cluster, &mut graph);
    driver
        .begin_write(&write, ByteStream::from_bytes(alphabet()))
        .unwrap();
    let stream = driver.begin_read(&read).await.unwrap();
    // The worker plan is done by now; the relayed stream must stay open.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stream.read_all().await.unwrap(), alphabet());

    let store = driver.wait().await.unwrap();
    assert_eq!(store.get("started"), Some(&ScalarValue::Signal));
}

#[tokio::test]
async fn read_can_be_issued_before_the_write() {
    let cluster = TestCluster::new(0);
    let write = DriverWriteStream::new();
    let read = DriverReadStream::new();

    let mut graph = Graph::new();
    let (_, s) = graph.from_driver(write.clone()).unwrap();
    graph.to_driver(read.clone(), s).unwrap();

    let driver = Arc::new(start(&cluster, &mut graph));
    let reader = {
        let driver = Arc::clone(&driver);
        tokio::spawn(async move {
            let stream = driver.begin_read(&read).await.unwrap();
            stream.read_all().await.unwrap()
        })
    };

    // Nothing to run locally, so the execution is already complete.
    let store = driver.wait().await.unwrap();
    assert!(store.is_empty());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!reader.is_finished());

    driver
        .begin_write(&write, ByteStream::from_bytes(alphabet()))
        .unwrap();
    assert_eq!(reader.await.unwrap(), alphabet());
    assert!(!driver.is_cancelled());
}

#[tokio::test]
async fn signal_releases_a_hold() {
    let cluster = TestCluster::new(0);
    let signal = DriverSignal::new();

    let mut graph = Graph::new();
    let (_, go) = graph.driver_signal(signal.clone()).unwrap();
    let (_, v) = graph
        .const_value(ScalarValue::Int(9), NodeEnv::Driver)
        .unwrap();
    let hold = graph.add_pinned(NodeKind::HoldUntil { waits: 1 }, NodeEnv::Driver);
    graph.connect(go, hold, 0).unwrap();
    graph.connect(v, hold, 1).unwrap();
    let released = graph.new_output_value(hold).unwrap();
    graph.store(released, "released").unwrap();

    let driver = start(&cluster, &mut graph);
    let started = Instant::now();
    tokio::time::sleep(Duration::from_millis(30)).await;
    driver.signal(&signal).unwrap();

    let store = driver.wait().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(store.get("released"), Some(&ScalarValue::Int(9)));
}
