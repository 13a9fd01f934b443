use bytes::Bytes;
use chunkswarm::chunk::hash_chunk;
use chunkswarm::node::DownloadPhase;
use chunkswarm::protocol::{self, FileSuccessKind, Message};
use chunkswarm::{Node, NodeConfig, NodeHandle, TrackerServer};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

async fn start_tracker() -> (SocketAddr, watch::Sender<bool>, JoinHandle<()>) {
    let server = TrackerServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        server.run(shutdown_rx).await.unwrap();
    });
    (addr, shutdown_tx, task)
}

async fn start_node(tracker: SocketAddr, download_dir: &Path) -> NodeHandle {
    let config = NodeConfig {
        port: 0,
        download_dir: download_dir.to_path_buf(),
        identity: None,
    };
    Node::new(config).start(tracker).await.unwrap()
}

async fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while !done() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_download_between_two_nodes() {
    let temp = TempDir::new().unwrap();
    let shared = temp.path().join("shared");
    std::fs::create_dir_all(&shared).unwrap();
    let data = content(100_000);
    std::fs::write(shared.join("movie.bin"), &data).unwrap();

    let (tracker, tracker_shutdown, tracker_task) = start_tracker().await;
    let seeder = start_node(tracker, &temp.path().join("seeder")).await;
    let leecher = start_node(tracker, &temp.path().join("leecher")).await;

    let names = seeder.publish(&shared).await.unwrap();
    assert_eq!(names, vec!["movie.bin".to_string()]);
    wait_until("publish confirmation", || {
        seeder.status().published == ["movie.bin"]
    })
    .await;

    leecher.request("movie.bin").await.unwrap();
    let status = leecher.status();
    assert_eq!(status.downloading.len(), 1);
    assert!(matches!(
        status.downloading[0].phase,
        DownloadPhase::AwaitingMetadata | DownloadPhase::Downloading
    ));

    wait_until("download", || leecher.status().published == ["movie.bin"]).await;

    let downloaded = tokio::fs::read(temp.path().join("leecher").join("movie.bin"))
        .await
        .unwrap();
    assert_eq!(downloaded, data);
    assert!(leecher.status().downloading.is_empty());
    assert_eq!(leecher.statistics().downloaded, 100_000);
    assert!(seeder.statistics().uploaded >= 100_000);

    leecher.shutdown().await;
    seeder.shutdown().await;
    tracker_shutdown.send(true).unwrap();
    tracker_task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_file_is_dropped() {
    let temp = TempDir::new().unwrap();
    let (tracker, tracker_shutdown, tracker_task) = start_tracker().await;
    let node = start_node(tracker, temp.path()).await;

    node.request("missing.bin").await.unwrap();
    wait_until("not found", || node.status().downloading.is_empty()).await;

    node.shutdown().await;
    tracker_shutdown.send(true).unwrap();
    tracker_task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_second_publisher_is_rejected() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("a.bin");
    std::fs::write(&file, content(20_000)).unwrap();

    let (tracker, tracker_shutdown, tracker_task) = start_tracker().await;
    let first = start_node(tracker, &temp.path().join("first")).await;
    let second = start_node(tracker, &temp.path().join("second")).await;

    first.publish(&file).await.unwrap();
    wait_until("first publish", || first.status().published == ["a.bin"]).await;

    second.publish(&file).await.unwrap();
    wait_until("rejection", || second.status().pending.is_empty()).await;
    assert!(second.status().published.is_empty());

    first.remove("a.bin").await.unwrap();
    assert!(first.status().published.is_empty());

    first.shutdown().await;
    second.shutdown().await;
    tracker_shutdown.send(true).unwrap();
    tracker_task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_removed_mid_download_is_dropped() {
    let temp = TempDir::new().unwrap();
    let data = content(100_000);
    let (tracker, tracker_shutdown, tracker_task) = start_tracker().await;

    let (mut reader, mut writer) = protocol::split(TcpStream::connect(tracker).await.unwrap());
    writer
        .send(&Message::Init {
            identity: "127.0.0.1".into(),
            port: 9,
        })
        .await
        .unwrap();
    writer
        .send(&Message::PublishFile {
            name: "held.bin".into(),
            size: data.len() as u64,
            file_hash: hash_chunk(&data),
            chunk_hashes: data.chunks(16_000).map(hash_chunk).collect(),
        })
        .await
        .unwrap();
    assert_eq!(
        reader.receive().await.unwrap(),
        Message::FileSuccess {
            name: "held.bin".into(),
            kind: FileSuccessKind::Publish,
        }
    );
    // Holds nothing, so the node never gets an answer for any chunk.
    writer
        .send(&Message::UpdateChunks {
            name: "held.bin".into(),
            bitfield: Bytes::from_static(&[0x00]),
        })
        .await
        .unwrap();
    writer
        .send(&Message::RequestFile {
            name: "held.bin".into(),
        })
        .await
        .unwrap();
    assert!(matches!(
        reader.receive().await.unwrap(),
        Message::AnswerNodes(_)
    ));

    let node = start_node(tracker, temp.path()).await;
    node.request("held.bin").await.unwrap();
    wait_until("metadata", || {
        node.status()
            .downloading
            .first()
            .is_some_and(|status| status.phase == DownloadPhase::Downloading)
    })
    .await;

    writer
        .send(&Message::RemoveFile {
            name: "held.bin".into(),
        })
        .await
        .unwrap();
    assert_eq!(
        reader.receive().await.unwrap(),
        Message::FileSuccess {
            name: "held.bin".into(),
            kind: FileSuccessKind::Remove,
        }
    );

    wait_until("refresh", || node.status().downloading.is_empty()).await;
    assert!(node.status().published.is_empty());
    let partial = std::fs::metadata(temp.path().join("held.bin")).unwrap();
    assert_eq!(partial.len(), 100_000);

    node.shutdown().await;
    tracker_shutdown.send(true).unwrap();
    tracker_task.await.unwrap();
}
