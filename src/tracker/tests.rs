use super::*;
use crate::bitfield;
use crate::chunk::hash_chunk;
use crate::protocol::{self, FileSuccessKind, Message};
use bytes::Bytes;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;

fn sample_file(name: &str) -> TrackedFile {
    TrackedFile {
        name: name.to_string(),
        size: 100_000,
        file_hash: hash_chunk(b"whole"),
        chunk_hashes: (0..7u8).map(|i| hash_chunk(&[i])).collect(),
    }
}

#[test]
fn test_publish_twice_then_remove() {
    let registry = Registry::new();
    let peer = registry.register_peer("10.0.0.1", 9091);

    assert_eq!(
        registry.publish_file(peer, sample_file("a.bin")).unwrap(),
        PublishOutcome::Accepted
    );
    assert_eq!(
        registry.publish_file(peer, sample_file("a.bin")).unwrap(),
        PublishOutcome::AlreadyExists
    );

    assert_eq!(registry.remove(peer, "a.bin"), RemoveOutcome::Removed);
    assert_eq!(registry.remove(peer, "a.bin"), RemoveOutcome::NotFound);

    assert_eq!(
        registry.publish_file(peer, sample_file("a.bin")).unwrap(),
        PublishOutcome::Accepted
    );
}

#[test]
fn test_names_are_case_sensitive() {
    let registry = Registry::new();
    let peer = registry.register_peer("10.0.0.1", 9091);

    registry.publish_file(peer, sample_file("a.bin")).unwrap();
    assert_eq!(
        registry.publish_file(peer, sample_file("A.bin")).unwrap(),
        PublishOutcome::Accepted
    );
    assert_eq!(registry.file_count(), 2);
}

#[test]
fn test_publish_requires_registered_peer() {
    let registry = Registry::new();
    assert!(matches!(
        registry.publish_file(42, sample_file("a.bin")),
        Err(TrackerError::PeerNotRegistered(42))
    ));
}

#[test]
fn test_publish_rejects_inconsistent_metadata() {
    let registry = Registry::new();
    let peer = registry.register_peer("10.0.0.1", 9091);

    let mut empty = sample_file("empty");
    empty.size = 0;
    assert!(matches!(
        registry.publish_file(peer, empty),
        Err(TrackerError::InvalidFile { .. })
    ));

    let mut short = sample_file("short");
    short.chunk_hashes.pop();
    assert!(matches!(
        registry.publish_file(peer, short),
        Err(TrackerError::InvalidFile { .. })
    ));
}

#[test]
fn test_query_lists_only_peers_with_chunks() {
    let registry = Registry::new();
    let seeder = registry.register_peer("10.0.0.1", 9091);
    let leecher = registry.register_peer("10.0.0.2", 9092);
    let idle = registry.register_peer("10.0.0.3", 9093);

    registry.publish_file(seeder, sample_file("a.bin")).unwrap();

    let answer = registry.query("a.bin").unwrap();
    assert_eq!(answer.size, 100_000);
    assert_eq!(answer.chunk_hashes.len(), 7);
    assert_eq!(answer.peers.len(), 1);
    assert_eq!(answer.peers[0].identity, "10.0.0.1");
    assert_eq!(answer.peers[0].port, 9091);
    assert_eq!(answer.peers[0].bitfield.as_ref(), &[0xFE]);

    assert!(registry.update_bitfield(leecher, "a.bin", &bitfield::encode([2, 4])));
    assert!(registry.update_bitfield(idle, "a.bin", &Bytes::from_static(&[0x00])));

    let answer = registry.query("a.bin").unwrap();
    let identities: Vec<_> = answer.peers.iter().map(|p| p.identity.as_str()).collect();
    assert_eq!(identities, vec!["10.0.0.1", "10.0.0.2"]);
    assert_eq!(bitfield::decode(&answer.peers[1].bitfield), vec![2, 4]);
}

#[test]
fn test_query_unknown_file() {
    let registry = Registry::new();
    assert!(registry.query("missing").is_none());
}

#[test]
fn test_update_bitfield_ignores_untracked_file() {
    let registry = Registry::new();
    let peer = registry.register_peer("10.0.0.1", 9091);
    assert!(!registry.update_bitfield(peer, "missing", &bitfield::encode([0])));
}

#[test]
fn test_update_bitfield_masks_out_of_range_bits() {
    let registry = Registry::new();
    let seeder = registry.register_peer("10.0.0.1", 9091);
    let other = registry.register_peer("10.0.0.2", 9091);
    registry.publish_file(seeder, sample_file("a.bin")).unwrap();

    // Only bit 7 set, which is past the last of 7 chunks.
    registry.update_bitfield(other, "a.bin", &Bytes::from_static(&[0x01]));
    assert_eq!(registry.query("a.bin").unwrap().peers.len(), 1);
}

#[test]
fn test_unregister_drops_peer_bitfields() {
    let registry = Registry::new();
    let seeder = registry.register_peer("10.0.0.1", 9091);
    registry.publish_file(seeder, sample_file("a.bin")).unwrap();

    registry.unregister(seeder);

    assert_eq!(registry.peer_count(), 0);
    let answer = registry.query("a.bin").unwrap();
    assert!(answer.peers.is_empty());
}

#[test]
fn test_remove_clears_every_peer() {
    let registry = Registry::new();
    let seeder = registry.register_peer("10.0.0.1", 9091);
    let other = registry.register_peer("10.0.0.2", 9092);
    registry.publish_file(seeder, sample_file("a.bin")).unwrap();
    registry.update_bitfield(other, "a.bin", &bitfield::encode([0]));

    registry.remove(other, "a.bin");
    registry.publish_file(other, sample_file("a.bin")).unwrap();

    let answer = registry.query("a.bin").unwrap();
    assert_eq!(answer.peers.len(), 1);
    assert_eq!(answer.peers[0].identity, "10.0.0.2");
}

#[test]
fn test_registrations_get_fresh_ids() {
    let registry = Registry::new();
    let a = registry.register_peer("10.0.0.1", 9091);
    let b = registry.register_peer("10.0.0.1", 9091);
    assert_ne!(a, b);
    assert_eq!(registry.peer_count(), 2);
}

#[test]
fn test_concurrent_updates_and_queries() {
    let registry = Arc::new(Registry::new());
    let written: Vec<Vec<usize>> = vec![(0..7).collect(), vec![0, 1, 2], vec![3, 4, 5, 6]];

    let writers: Vec<_> = (0..4u16)
        .map(|t| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                let peer = registry.register_peer(format!("10.0.0.{}", t), 9000 + t);
                let name = format!("file-{}", t);
                registry.publish_file(peer, sample_file(&name)).unwrap();
                for step in 0..500 {
                    let bits = if step % 2 == 0 {
                        bitfield::encode([0, 1, 2])
                    } else {
                        bitfield::encode([3, 4, 5, 6])
                    };
                    assert!(registry.update_bitfield(peer, &name, &bits));
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4u16)
        .map(|_| {
            let registry = registry.clone();
            let written = written.clone();
            std::thread::spawn(move || {
                for step in 0..500 {
                    let t = step % 4;
                    let Some(answer) = registry.query(&format!("file-{}", t)) else {
                        continue;
                    };
                    assert_eq!(answer.chunk_hashes.len(), 7);
                    assert_eq!(answer.peers.len(), 1);
                    let entry = &answer.peers[0];
                    assert_eq!(entry.identity, format!("10.0.0.{}", t));
                    assert_eq!(entry.port, 9000 + t);
                    assert!(written.contains(&bitfield::decode(&entry.bitfield)));
                }
            })
        })
        .collect();

    for thread in writers.into_iter().chain(readers) {
        thread.join().unwrap();
    }

    assert_eq!(registry.peer_count(), 4);
    assert_eq!(registry.file_count(), 4);
    for t in 0..4 {
        let answer = registry.query(&format!("file-{}", t)).unwrap();
        assert_eq!(bitfield::decode(&answer.peers[0].bitfield), vec![3, 4, 5, 6]);
    }
}

async fn start_server() -> (std::net::SocketAddr, Arc<Registry>, watch::Sender<bool>) {
    let server = TrackerServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let registry = server.registry();
    let (tx, rx) = watch::channel(false);
    tokio::spawn(server.run(rx));
    (addr, registry, tx)
}

#[tokio::test]
async fn test_server_publish_and_query() {
    let (addr, _registry, _shutdown) = start_server().await;

    let (mut reader, mut writer) = protocol::split(TcpStream::connect(addr).await.unwrap());
    writer
        .send(&Message::Init {
            identity: "10.0.0.1".into(),
            port: 9091,
        })
        .await
        .unwrap();

    let file = sample_file("a.bin");
    let publish = Message::PublishFile {
        name: file.name.clone(),
        size: file.size,
        file_hash: file.file_hash,
        chunk_hashes: file.chunk_hashes.clone(),
    };
    writer.send(&publish).await.unwrap();
    assert_eq!(
        reader.receive().await.unwrap(),
        Message::FileSuccess {
            name: "a.bin".into(),
            kind: FileSuccessKind::Publish,
        }
    );

    writer.send(&publish).await.unwrap();
    assert_eq!(
        reader.receive().await.unwrap(),
        Message::AlreadyExists {
            name: "a.bin".into()
        }
    );

    writer
        .send(&Message::RequestFile {
            name: "a.bin".into(),
        })
        .await
        .unwrap();
    match reader.receive().await.unwrap() {
        Message::AnswerNodes(answer) => {
            assert_eq!(answer.name, "a.bin");
            assert_eq!(answer.peers.len(), 1);
            assert_eq!(answer.peers[0].bitfield.as_ref(), &[0xFE]);
        }
        other => panic!("unexpected reply {:?}", other),
    }

    writer
        .send(&Message::RequestFile {
            name: "missing".into(),
        })
        .await
        .unwrap();
    assert_eq!(
        reader.receive().await.unwrap(),
        Message::NotFound {
            name: "missing".into()
        }
    );

    writer
        .send(&Message::RemoveFile {
            name: "a.bin".into(),
        })
        .await
        .unwrap();
    assert_eq!(
        reader.receive().await.unwrap(),
        Message::FileSuccess {
            name: "a.bin".into(),
            kind: FileSuccessKind::Remove,
        }
    );
}

#[tokio::test]
async fn test_server_answers_invalid_publish() {
    let (addr, registry, _shutdown) = start_server().await;

    let (mut reader, mut writer) = protocol::split(TcpStream::connect(addr).await.unwrap());
    writer
        .send(&Message::Init {
            identity: "10.0.0.1".into(),
            port: 9091,
        })
        .await
        .unwrap();

    let file = sample_file("bad.bin");
    writer
        .send(&Message::PublishFile {
            name: file.name.clone(),
            size: file.size,
            file_hash: file.file_hash,
            chunk_hashes: file.chunk_hashes[..3].to_vec(),
        })
        .await
        .unwrap();
    assert_eq!(
        reader.receive().await.unwrap(),
        Message::NotFound {
            name: "bad.bin".into()
        }
    );

    writer
        .send(&Message::PublishFile {
            name: "empty.bin".into(),
            size: 0,
            file_hash: file.file_hash,
            chunk_hashes: Vec::new(),
        })
        .await
        .unwrap();
    assert_eq!(
        reader.receive().await.unwrap(),
        Message::NotFound {
            name: "empty.bin".into()
        }
    );
    assert_eq!(registry.file_count(), 0);
}

#[tokio::test]
async fn test_server_ignores_requests_before_init() {
    let (addr, registry, _shutdown) = start_server().await;

    let (mut reader, mut writer) = protocol::split(TcpStream::connect(addr).await.unwrap());
    writer
        .send(&Message::RequestFile {
            name: "a.bin".into(),
        })
        .await
        .unwrap();
    writer
        .send(&Message::Init {
            identity: String::new(),
            port: 9091,
        })
        .await
        .unwrap();
    writer
        .send(&Message::RequestFile {
            name: "a.bin".into(),
        })
        .await
        .unwrap();

    // Only the request sent after init is answered.
    assert_eq!(
        reader.receive().await.unwrap(),
        Message::NotFound {
            name: "a.bin".into()
        }
    );
    assert_eq!(registry.peer_count(), 1);
}

#[tokio::test]
async fn test_server_unregisters_on_disconnect() {
    let (addr, registry, _shutdown) = start_server().await;

    let (mut reader, mut writer) = protocol::split(TcpStream::connect(addr).await.unwrap());
    writer
        .send(&Message::Init {
            identity: "10.0.0.1".into(),
            port: 9091,
        })
        .await
        .unwrap();
    writer
        .send(&Message::RequestFile {
            name: "x".into(),
        })
        .await
        .unwrap();
    reader.receive().await.unwrap();
    assert_eq!(registry.peer_count(), 1);

    drop(writer);
    drop(reader);

    for _ in 0..100 {
        if registry.peer_count() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(registry.peer_count(), 0);
}

#[tokio::test]
async fn test_server_shutdown() {
    let server = TrackerServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(server.run(rx));

    let _conn = TcpStream::connect(addr).await.unwrap();
    tx.send(true).unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
