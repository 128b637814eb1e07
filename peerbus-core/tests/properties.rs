//! Property tests for subscriptions and log flushing

use peerbus_core::core_logbuf::LogBuffers;
use peerbus_core::core_transport::MeshNetwork;
use peerbus_core::core_wire::{Data, LogWrite, Message, Topic};
use peerbus_core::test_utils::simulated_manager;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::convert::Infallible;

fn record(seq: u64) -> Data {
    Message::LogWrite(LogWrite {
        stream: "Conn::LOG".into(),
        writer: "Log::WRITER_ASCII".into(),
        path: "conn".into(),
        values: vec![Data::Count(seq)],
    })
    .into_data()
}

fn batch_seqs(batch: Data) -> Vec<u64> {
    let Ok(Message::Batch(messages)) = Message::from_data(batch) else {
        panic!("flush did not produce a batch");
    };
    messages
        .into_iter()
        .map(|m| match m {
            Message::LogWrite(w) => w.values[0].as_count().unwrap_or(u64::MAX),
            other => panic!("unexpected message in batch: {:?}", other),
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_subscribe_then_unsubscribe_restores_set(
        existing in prop::collection::btree_set("[a-z/]{0,6}", 0..5),
        prefix in "[a-z/]{0,6}",
    ) {
        prop_assume!(!existing.contains(&prefix));
        let network = MeshNetwork::new();
        let mut mgr = simulated_manager(&network);
        for p in &existing {
            mgr.subscribe(p);
        }
        let before: BTreeSet<String> = mgr.subscriptions().map(String::from).collect();

        prop_assert!(mgr.subscribe(&prefix));
        prop_assert!(mgr.unsubscribe(&prefix));

        let after: BTreeSet<String> = mgr.subscriptions().map(String::from).collect();
        prop_assert_eq!(before, after);
    }

    #[test]
    fn prop_log_flush_sends_each_record_once(
        batch_size in 1usize..50,
        writes in prop::collection::vec(0usize..3, 0..300),
    ) {
        let mut buffers = LogBuffers::new(batch_size, None);
        let topics = ["logs/a", "logs/b", "logs/c"];
        for (seq, t) in writes.iter().enumerate() {
            buffers.push("Conn::LOG", Topic::new(topics[*t]), record(seq as u64)).unwrap();
        }

        let mut seen: HashSet<u64> = HashSet::new();
        let mut per_topic: Vec<Vec<u64>> = vec![Vec::new(); topics.len()];
        let mut total = 0;
        loop {
            let sent = buffers
                .flush(|topic, batch| {
                    let seqs = batch_seqs(batch);
                    assert!(seqs.len() <= batch_size);
                    let i = topics.iter().position(|t| *t == topic.as_str()).unwrap_or(0);
                    per_topic[i].extend(seqs.iter().copied());
                    for seq in seqs {
                        assert!(seen.insert(seq), "record {} sent twice", seq);
                    }
                    Ok::<(), Infallible>(())
                })
                .unwrap_or(0);
            if sent == 0 {
                break;
            }
            total += sent;
        }

        prop_assert_eq!(total, writes.len());
        prop_assert!(buffers.is_empty());
        for seqs in per_topic {
            let mut sorted = seqs.clone();
            sorted.sort_unstable();
            prop_assert_eq!(seqs, sorted);
        }
    }
}
