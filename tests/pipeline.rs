//! End-to-end pipeline tests over loopback sockets.

use std::io;
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crc::{CRC_32_MPEG_2, Crc};

use udpts_ingest::{
    CapabilityManager, IngestError, IngestionConfig, IngestionPipeline, MulticastLock, NullLock,
    PipelineEvent, PipelineState,
};

const CRC_MPEG: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);
const H264: u8 = 0x1B;

fn ts_packet(pid: u16, pusi: bool, cc: u8, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= 184);
    let mut pkt = Vec::with_capacity(188);
    pkt.push(0x47);
    pkt.push(if pusi { 0x40 } else { 0x00 } | ((pid >> 8) as u8 & 0x1F));
    pkt.push(pid as u8);
    pkt.push(0x10 | (cc & 0x0F));
    pkt.extend_from_slice(payload);
    pkt.resize(188, 0xFF);
    pkt
}

fn section(table_id: u8, ext: u16, body: &[u8]) -> Vec<u8> {
    let section_len = 5 + body.len() + 4;
    let mut out = vec![0x00];
    out.push(table_id);
    out.push(0xB0 | ((section_len >> 8) as u8 & 0x0F));
    out.push(section_len as u8);
    out.extend_from_slice(&ext.to_be_bytes());
    out.push(0xC1);
    out.push(0x00);
    out.push(0x00);
    out.extend_from_slice(body);
    let crc = CRC_MPEG.checksum(&out[1..]);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

fn pat_packet(program: u16, pmt_pid: u16) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&program.to_be_bytes());
    body.push(0xE0 | (pmt_pid >> 8) as u8);
    body.push(pmt_pid as u8);
    ts_packet(0x0000, true, 0, &section(0x00, 1, &body))
}

fn pmt_packet(pmt_pid: u16, program: u16, es_pid: u16) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(0xE0 | (es_pid >> 8) as u8);
    body.push(es_pid as u8);
    body.extend_from_slice(&[0xF0, 0x00]);
    body.push(H264);
    body.push(0xE0 | (es_pid >> 8) as u8);
    body.push(es_pid as u8);
    body.extend_from_slice(&[0xF0, 0x00]);
    ts_packet(pmt_pid, true, 0, &section(0x02, program, &body))
}

fn encode_pts(pts: u64) -> [u8; 5] {
    [
        0x20 | (((pts >> 30) as u8 & 0x07) << 1) | 0x01,
        (pts >> 22) as u8,
        (((pts >> 15) as u8 & 0x7F) << 1) | 0x01,
        (pts >> 7) as u8,
        ((pts as u8 & 0x7F) << 1) | 0x01,
    ]
}

fn idr_pes_packet(es_pid: u16, cc: u8, pts: u64) -> Vec<u8> {
    let mut pes = vec![0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0x80, 0x05];
    pes.extend_from_slice(&encode_pts(pts));
    pes.extend_from_slice(&[0x00, 0x00, 0x01, 0x65, 0xAB, 0xCD]);
    ts_packet(es_pid, true, cc, &pes)
}

struct CountingLock {
    acquires: AtomicUsize,
    releases: AtomicUsize,
}

impl CountingLock {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }
}

// Orphan rule forbids `impl MulticastLock for Arc<CountingLock>` outside
// the library crate, so delegate through a local newtype instead.
struct LockHandle(Arc<CountingLock>);

impl MulticastLock for LockHandle {
    fn acquire(&self) -> io::Result<()> {
        self.0.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        self.0.releases.fetch_add(1, Ordering::SeqCst);
    }
}

struct DenyingLock;

impl MulticastLock for DenyingLock {
    fn acquire(&self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "multicast receive denied",
        ))
    }

    fn release(&self) {
        panic!("release of a capability that was never granted");
    }
}

#[tokio::test]
async fn unicast_end_to_end() {
    let capability = Arc::new(CapabilityManager::new(NullLock));
    let config = IngestionConfig::default()
        .with_connection_timeout(Duration::from_millis(2_000));
    let mut pipeline =
        IngestionPipeline::build("udp://127.0.0.1:0", config, &capability).unwrap();
    assert_eq!(pipeline.state(), PipelineState::Streaming);
    assert_eq!(capability.held_count(), 0, "unicast must not take the capability");

    let addr = pipeline.local_addr().unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(&pat_packet(1, 0x1000), addr).unwrap();
    sender.send_to(&pmt_packet(0x1000, 1, 0x100), addr).unwrap();
    sender.send_to(&idr_pes_packet(0x100, 0, 90_000), addr).unwrap();
    sender.send_to(&idr_pes_packet(0x100, 1, 93_600), addr).unwrap();
    sender.send_to(&idr_pes_packet(0x100, 2, 97_200), addr).unwrap();

    let mut units = Vec::new();
    while units.len() < 2 {
        match pipeline.next_access_unit().await.unwrap() {
            PipelineEvent::AccessUnit(unit) => units.push(unit),
            PipelineEvent::Timeout => panic!("datagrams were sent, poll should not time out"),
            PipelineEvent::EndOfStream => panic!("premature end of stream"),
        }
    }

    assert_eq!(units[0].pid, 0x100);
    assert_eq!(units[0].stream_type, H264);
    assert_eq!(units[0].pts, Some(90_000));
    assert!(units[0].is_random_access);
    assert_eq!(units[1].pts, Some(93_600));
    assert_eq!(&units[0].data[..], &[0x00, 0x00, 0x01, 0x65, 0xAB, 0xCD]);

    pipeline.dispose();
    assert_eq!(pipeline.state(), PipelineState::Disposed);
}

#[tokio::test]
async fn multiple_pipelines_demux_independently() {
    let capability = Arc::new(CapabilityManager::new(NullLock));
    let config = IngestionConfig::default()
        .with_connection_timeout(Duration::from_millis(2_000));

    let mut first =
        IngestionPipeline::build("udp://127.0.0.1:0", config.clone(), &capability).unwrap();
    let mut second =
        IngestionPipeline::build("udp://127.0.0.1:0", config, &capability).unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    for pipeline in [&first, &second] {
        let addr = pipeline.local_addr().unwrap();
        sender.send_to(&pat_packet(1, 0x1000), addr).unwrap();
        sender.send_to(&pmt_packet(0x1000, 1, 0x100), addr).unwrap();
        sender.send_to(&idr_pes_packet(0x100, 0, 90_000), addr).unwrap();
        sender.send_to(&idr_pes_packet(0x100, 1, 93_600), addr).unwrap();
    }

    for pipeline in [&mut first, &mut second] {
        match pipeline.next_access_unit().await.unwrap() {
            PipelineEvent::AccessUnit(unit) => assert_eq!(unit.pts, Some(90_000)),
            other => panic!("expected a unit, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn multicast_build_takes_and_returns_capability() {
    let lock = CountingLock::new();
    let capability = Arc::new(CapabilityManager::new(LockHandle(Arc::clone(&lock))));
    let config = IngestionConfig::default()
        .with_connection_timeout(Duration::from_millis(100))
        .with_ttl(1);

    // spec scenario: udp://239.0.0.1:5000 classifies as multicast and
    // holds the capability for the pipeline's lifetime. Environments
    // without a multicast-capable interface fail the join; the unwind
    // invariant must hold either way.
    match IngestionPipeline::build("udp://239.0.0.1:5000", config, &capability) {
        Ok(mut pipeline) => {
            assert_eq!(pipeline.state(), PipelineState::Streaming);
            assert_eq!(capability.held_count(), 1);
            assert_eq!(lock.acquires.load(Ordering::SeqCst), 1);

            pipeline.dispose();
            assert_eq!(pipeline.state(), PipelineState::Disposed);
            assert_eq!(capability.held_count(), 0);
            assert_eq!(lock.releases.load(Ordering::SeqCst), 1);
        }
        Err(err) => {
            assert!(matches!(err, IngestError::Open { .. }));
            assert_eq!(capability.held_count(), 0, "failed open must release the token");
            assert_eq!(
                lock.acquires.load(Ordering::SeqCst),
                lock.releases.load(Ordering::SeqCst)
            );
        }
    }
}

#[tokio::test]
async fn capability_denial_aborts_build_cleanly() {
    let capability = Arc::new(CapabilityManager::new(DenyingLock));
    let err = IngestionPipeline::build(
        "udp://239.0.0.1:5000",
        IngestionConfig::default(),
        &capability,
    )
    .err()
    .expect("denied capability must abort the build");
    assert!(matches!(err, IngestError::Capability(_)));
    assert_eq!(capability.held_count(), 0);
}

#[tokio::test]
async fn timeout_is_reported_not_hung() {
    let capability = Arc::new(CapabilityManager::new(NullLock));
    let config = IngestionConfig::default()
        .with_connection_timeout(Duration::from_millis(50));
    let mut pipeline =
        IngestionPipeline::build("udp://127.0.0.1:0", config, &capability).unwrap();

    let poll = tokio::time::timeout(Duration::from_millis(500), pipeline.next_access_unit())
        .await
        .expect("poll must resolve, not hang")
        .unwrap();
    assert!(matches!(poll, PipelineEvent::Timeout));
}

#[tokio::test]
async fn dispose_from_another_task_unblocks_poll() {
    let capability = Arc::new(CapabilityManager::new(NullLock));
    let config = IngestionConfig::default()
        .with_connection_timeout(Duration::from_secs(30));
    let mut pipeline =
        IngestionPipeline::build("udp://127.0.0.1:0", config, &capability).unwrap();
    let closer = pipeline.closer().expect("streaming pipeline has a closer");

    let poller = tokio::spawn(async move {
        let event = pipeline.next_access_unit().await.unwrap();
        (pipeline, event)
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    closer.close();

    let (mut pipeline, event) = tokio::time::timeout(Duration::from_millis(500), poller)
        .await
        .expect("close must unblock the poll")
        .unwrap();
    assert!(matches!(event, PipelineEvent::EndOfStream));
    pipeline.dispose();
    assert_eq!(capability.held_count(), 0);
}

#[tokio::test]
async fn error_listener_sees_demux_escalation() {
    let capability = Arc::new(CapabilityManager::new(NullLock));
    let config = IngestionConfig::default()
        .with_connection_timeout(Duration::from_millis(100));
    let mut pipeline =
        IngestionPipeline::build("udp://127.0.0.1:0", config, &capability).unwrap();

    let notified = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&notified);
    pipeline.add_error_listener(move |err| {
        assert!(matches!(err, IngestError::Demux(_)));
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let addr = pipeline.local_addr().unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(&pat_packet(1, 0x1000), addr).unwrap();
    sender.send_to(&pmt_packet(0x1000, 1, 0x100), addr).unwrap();
    // continuation packets that never complete a unit, sent in batches
    // with a poll in between so the receive buffer never overflows
    // (7 x 188 = 1316 bytes per datagram)
    let mut flood = Vec::new();
    for i in 0..7 {
        flood.extend(ts_packet(0x100, false, (i % 16) as u8, &[0x00; 184]));
    }

    let mut saw_error = false;
    'outer: for _ in 0..40 {
        for _ in 0..10 {
            sender.send_to(&flood, addr).unwrap();
        }
        loop {
            match pipeline.next_access_unit().await {
                Ok(PipelineEvent::AccessUnit(_)) => panic!("no unit should complete"),
                Ok(PipelineEvent::Timeout) => break,
                Ok(PipelineEvent::EndOfStream) => break 'outer,
                Err(err) => {
                    assert!(matches!(err, IngestError::Demux(_)));
                    saw_error = true;
                    break 'outer;
                }
            }
        }
    }
    assert!(saw_error, "sustained demux failure must escalate");
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}
