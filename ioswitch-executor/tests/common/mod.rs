//! Common test utilities for integration tests.

#![allow(dead_code)]

use ioswitch_core::error::{Result, SwitchError};
use ioswitch_core::{ByteStream, ScalarValue, SwitchConfig, VarId, VarValue, WorkerInfo};
use ioswitch_executor::dag::{CustomNode, Graph, Node, NodeEnv, NodeId};
use ioswitch_executor::exec::{ExecContext, Executor, Worker};
use ioswitch_executor::ops::{register_op, Op, OpFuture, RegisteredOp};
use ioswitch_executor::transport::{LocalTransport, Transport};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};

/// Bytes collected by [`CollectBytes`], keyed by the op's key.
static SINK: Lazy<Mutex<HashMap<String, Vec<u8>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Take what [`CollectBytes`] recorded under `key`.
pub fn take_collected(key: &str) -> Option<Vec<u8>> {
    SINK.lock().remove(key)
}

/// Deterministic payload of `len` bytes.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Publishes a generated stream.
#[derive(Debug, Serialize, Deserialize)]
pub struct EmitBytes {
    pub output: VarId,
    pub len: usize,
    pub seed: u8,
}

impl RegisteredOp for EmitBytes {
    const KIND: &'static str = "test_emit_bytes";
}

impl Op for EmitBytes {
    fn execute<'a>(&'a self, _ctx: &'a ExecContext, exec: &'a Executor) -> OpFuture<'a> {
        Box::pin(async move {
            let stream = ByteStream::from_bytes(pattern(self.len, self.seed));
            exec.put_var(self.output, VarValue::Stream(stream))
        })
    }
}

/// Reads a stream to EOF, records its bytes in the sink and its length in
/// the result store.
#[derive(Debug, Serialize, Deserialize)]
pub struct CollectBytes {
    pub input: VarId,
    pub key: String,
}

impl RegisteredOp for CollectBytes {
    const KIND: &'static str = "test_collect_bytes";
}

impl Op for CollectBytes {
    fn execute<'a>(&'a self, ctx: &'a ExecContext, exec: &'a Executor) -> OpFuture<'a> {
        Box::pin(async move {
            let stream = exec.bind_stream(&ctx.cancel, self.input).await?;
            let bytes = ctx.cancellable(stream.read_all()).await??;
            exec.store(self.key.clone(), ScalarValue::Int(bytes.len() as i64));
            SINK.lock().insert(self.key.clone(), bytes);
            Ok(())
        })
    }
}

/// Fails after a delay.
#[derive(Debug, Serialize, Deserialize)]
pub struct FailAfter {
    pub delay_ms: u64,
}

impl RegisteredOp for FailAfter {
    const KIND: &'static str = "test_fail_after";
}

impl Op for FailAfter {
    fn execute<'a>(&'a self, ctx: &'a ExecContext, _exec: &'a Executor) -> OpFuture<'a> {
        Box::pin(async move {
            ctx.cancellable(tokio::time::sleep(Duration::from_millis(self.delay_ms)))
                .await?;
            Err(SwitchError::Io(io::Error::other("injected failure")))
        })
    }
}

/// Sleeps, returning early with a cancellation error.
#[derive(Debug, Serialize, Deserialize)]
pub struct Sleep {
    pub ms: u64,
}

impl RegisteredOp for Sleep {
    const KIND: &'static str = "test_sleep";
}

impl Op for Sleep {
    fn execute<'a>(&'a self, ctx: &'a ExecContext, _exec: &'a Executor) -> OpFuture<'a> {
        Box::pin(async move {
            ctx.cancellable(tokio::time::sleep(Duration::from_millis(self.ms)))
                .await
        })
    }
}

/// Register the test op kinds with the process-wide registry.
pub fn register_test_ops() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        register_op::<EmitBytes>();
        register_op::<CollectBytes>();
        register_op::<FailAfter>();
        register_op::<Sleep>();
    });
}

/// Graph node producing a generated stream.
#[derive(Debug)]
pub struct Emit {
    pub len: usize,
    pub seed: u8,
}

impl CustomNode for Emit {
    fn name(&self) -> &str {
        "emit"
    }

    fn generate_op(&self, node: &Node, graph: &Graph) -> Result<Option<Box<dyn Op>>> {
        Ok(Some(Box::new(EmitBytes {
            output: node.output_stream_var(graph, 0)?,
            len: self.len,
            seed: self.seed,
        })))
    }
}

/// Graph node collecting a stream.
#[derive(Debug)]
pub struct Collect {
    pub key: String,
}

impl CustomNode for Collect {
    fn name(&self) -> &str {
        "collect"
    }

    fn generate_op(&self, node: &Node, graph: &Graph) -> Result<Option<Box<dyn Op>>> {
        Ok(Some(Box::new(CollectBytes {
            input: node.input_stream_var(graph, 0)?,
            key: self.key.clone(),
        })))
    }
}

/// Graph node wrapping an edge-less op.
#[derive(Debug)]
pub enum Standalone {
    Sleep(u64),
    FailAfter(u64),
}

impl CustomNode for Standalone {
    fn name(&self) -> &str {
        match self {
            Self::Sleep(_) => "sleep",
            Self::FailAfter(_) => "fail_after",
        }
    }

    fn generate_op(&self, _node: &Node, _graph: &Graph) -> Result<Option<Box<dyn Op>>> {
        Ok(Some(match *self {
            Self::Sleep(ms) => Box::new(Sleep { ms }),
            Self::FailAfter(delay_ms) => Box::new(FailAfter { delay_ms }),
        }))
    }
}

/// Add an [`Emit`] node in `env`, returning the node and its stream.
pub fn emit(
    graph: &mut Graph,
    len: usize,
    seed: u8,
    env: NodeEnv,
) -> (NodeId, ioswitch_executor::dag::DagVarId) {
    let id = graph.custom(Emit { len, seed }, env).unwrap();
    let out = graph.new_output_stream(id).unwrap();
    (id, out)
}

/// Add a [`Collect`] node in `env` reading `input`.
pub fn collect(
    graph: &mut Graph,
    input: ioswitch_executor::dag::DagVarId,
    key: &str,
    env: NodeEnv,
) -> NodeId {
    let id = graph
        .custom(
            Collect {
                key: key.to_string(),
            },
            env,
        )
        .unwrap();
    graph.add_input(input, id).unwrap();
    id
}

/// Reader producing `remaining` zero bytes and counting what was read.
pub struct CountingReader {
    remaining: usize,
    counter: Arc<AtomicUsize>,
}

impl CountingReader {
    pub fn new(len: usize) -> (Self, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let reader = Self {
            remaining: len,
            counter: Arc::clone(&counter),
        };
        (reader, counter)
    }
}

impl AsyncRead for CountingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let n = buf.remaining().min(self.remaining).min(16 * 1024);
        buf.put_slice(&vec![0u8; n]);
        self.remaining -= n;
        self.counter.fetch_add(n, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

/// Workers sharing one in-process transport.
pub struct TestCluster {
    pub transport: Arc<LocalTransport>,
    pub workers: Vec<Arc<Worker>>,
    pub config: Arc<SwitchConfig>,
}

impl TestCluster {
    /// Start `count` workers with the default test config.
    pub fn new(count: usize) -> Self {
        Self::with_config(count, test_config())
    }

    /// Start `count` workers with `config`.
    pub fn with_config(count: usize, config: SwitchConfig) -> Self {
        register_test_ops();
        let config = Arc::new(config);
        let transport = Arc::new(LocalTransport::new());
        let workers = (1..=count as u64)
            .map(|id| {
                let info = WorkerInfo::new(id, format!("127.0.0.1:{}", 5000 + id));
                let worker = Worker::new(info, transport_handle(&transport), Arc::clone(&config));
                transport.register(&worker);
                worker
            })
            .collect();
        Self {
            transport,
            workers,
            config,
        }
    }

    /// Environment of worker `index` (0-based).
    pub fn env(&self, index: usize) -> NodeEnv {
        NodeEnv::Worker(self.workers[index].info().clone())
    }

    /// The transport as a trait object.
    pub fn transport(&self) -> Arc<dyn Transport> {
        transport_handle(&self.transport)
    }
}

fn transport_handle(transport: &Arc<LocalTransport>) -> Arc<dyn Transport> {
    Arc::clone(transport) as Arc<dyn Transport>
}

/// Config with a short plan lookup so misrouted requests fail fast.
pub fn test_config() -> SwitchConfig {
    SwitchConfig::default().with_plan_lookup_timeout_ms(2_000)
}
