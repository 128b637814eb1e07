/*
    LogBuffers - batching of outgoing log writes

    Log writes are serialized immediately but only sent when the buffers are
    flushed. Records are queued per stream and per topic, in write order.

    A flush sends at most `batch_size` records per topic as one batch
    message and removes exactly the records that were handed to the sink.
    Anything beyond the batch size stays queued for the next flush, so every
    record is sent once and only once.

    Each stream may hold at most `max_buffered` unsent records; writes past
    the cap are rejected.
*/

use crate::core_wire::{batch_data, Data, Topic};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogBufferError {
    #[error("log buffer for stream '{stream}' is full ({capacity} records)")]
    Full { stream: String, capacity: usize },
}

/// A flush the sink cut short
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("log flush stopped after {sent} records: {error}")]
pub struct FlushError<E> {
    pub sent: usize,
    pub error: E,
}

#[derive(Debug, Default)]
struct StreamBuffer {
    topics: BTreeMap<Topic, VecDeque<Data>>,
    message_count: usize,
}

#[derive(Debug)]
pub struct LogBuffers {
    streams: BTreeMap<String, StreamBuffer>,
    batch_size: usize,
    max_buffered: Option<usize>,
}

impl LogBuffers {
    pub fn new(batch_size: usize, max_buffered: Option<usize>) -> Self {
        Self {
            streams: BTreeMap::new(),
            batch_size: batch_size.max(1),
            max_buffered,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Queue an encoded log-write message. Returns the number of records now
    /// buffered for the stream.
    pub fn push(&mut self, stream: &str, topic: Topic, message: Data) -> Result<usize, LogBufferError> {
        let buffer = self.streams.entry(stream.to_string()).or_default();
        if let Some(capacity) = self.max_buffered {
            if buffer.message_count >= capacity {
                return Err(LogBufferError::Full {
                    stream: stream.to_string(),
                    capacity,
                });
            }
        }
        buffer.topics.entry(topic).or_default().push_back(message);
        buffer.message_count += 1;
        Ok(buffer.message_count)
    }

    /// Hand one batch per (stream, topic) to `send`. A batch the sink
    /// rejects stays queued and the flush stops there; the error carries the
    /// records already sent.
    pub fn flush<E>(
        &mut self,
        mut send: impl FnMut(&Topic, Data) -> Result<(), E>,
    ) -> Result<usize, FlushError<E>> {
        let mut sent = 0;
        let mut failure = None;

        for (stream, buffer) in self.streams.iter_mut() {
            let mut emptied = Vec::new();
            for (topic, queue) in buffer.topics.iter_mut() {
                let n = queue.len().min(self.batch_size);
                if n == 0 {
                    emptied.push(topic.clone());
                    continue;
                }
                let batch: Vec<Data> = queue.iter().take(n).cloned().collect();
                if let Err(error) = send(topic, batch_data(batch)) {
                    failure = Some(error);
                    break;
                }

                queue.drain(..n);
                buffer.message_count -= n;
                sent += n;
                trace!(%stream, %topic, records = n, remaining = queue.len(), "flushed log batch");
                if queue.is_empty() {
                    emptied.push(topic.clone());
                }
            }
            for topic in emptied {
                buffer.topics.remove(&topic);
            }
            if failure.is_some() {
                break;
            }
        }
        self.streams.retain(|_, b| b.message_count > 0);

        if sent > 0 {
            debug!(records = sent, "log buffers flushed");
        }
        match failure {
            Some(error) => Err(FlushError { sent, error }),
            None => Ok(sent),
        }
    }

    pub fn pending(&self) -> usize {
        self.streams.values().map(|b| b.message_count).sum()
    }

    pub fn pending_for(&self, stream: &str) -> usize {
        self.streams.get(stream).map(|b| b.message_count).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_wire::{LogWrite, Message};
    use std::convert::Infallible;

    fn record(i: u64) -> Data {
        Message::LogWrite(LogWrite {
            stream: "Conn::LOG".into(),
            writer: "Log::WRITER_ASCII".into(),
            path: "conn".into(),
            values: vec![Data::Count(i)],
        })
        .into_data()
    }

    fn collect(buffers: &mut LogBuffers) -> Vec<(Topic, usize)> {
        let mut out = Vec::new();
        buffers
            .flush(|topic, data| {
                let n = match Message::from_data(data) {
                    Ok(Message::Batch(items)) => items.len(),
                    _ => 0,
                };
                out.push((topic.clone(), n));
                Ok::<(), Infallible>(())
            })
            .unwrap();
        out
    }

    #[test]
    fn test_flush_respects_batch_size() {
        let mut buffers = LogBuffers::new(2, None);
        let topic = Topic::new("peerbus/logs/conn");
        for i in 0..5 {
            buffers.push("conn", topic.clone(), record(i)).unwrap();
        }

        let mut batches = Vec::new();
        let sent = buffers
            .flush(|_, data| {
                batches.push(data);
                Ok::<(), Infallible>(())
            })
            .unwrap();
        assert_eq!(sent, 2);
        assert_eq!(buffers.pending_for("conn"), 3);

        assert_eq!(buffers.flush(|_, _| Ok::<(), Infallible>(())).unwrap(), 2);
        assert_eq!(buffers.flush(|_, _| Ok::<(), Infallible>(())).unwrap(), 1);
        assert_eq!(buffers.flush(|_, _| Ok::<(), Infallible>(())).unwrap(), 0);
        assert!(buffers.is_empty());
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn test_one_batch_per_topic() {
        let mut buffers = LogBuffers::new(10, None);
        buffers.push("conn", Topic::new("a"), record(1)).unwrap();
        buffers.push("conn", Topic::new("b"), record(2)).unwrap();
        buffers.push("dns", Topic::new("a"), record(3)).unwrap();

        let flushed = collect(&mut buffers);
        assert_eq!(flushed.len(), 3);
        assert!(flushed.iter().all(|(_, n)| *n == 1));
        assert_eq!(buffers.pending(), 0);
    }

    #[test]
    fn test_failed_send_keeps_records() {
        let mut buffers = LogBuffers::new(10, None);
        buffers.push("conn", Topic::new("a"), record(1)).unwrap();

        let result = buffers.flush(|_, _| Err("offline"));
        assert_eq!(
            result,
            Err(FlushError {
                sent: 0,
                error: "offline"
            })
        );
        assert_eq!(buffers.pending(), 1);
    }

    #[test]
    fn test_interrupted_flush_reports_sent_records() {
        let mut buffers = LogBuffers::new(10, None);
        buffers.push("conn", Topic::new("a"), record(1)).unwrap();
        buffers.push("conn", Topic::new("a"), record(2)).unwrap();
        buffers.push("conn", Topic::new("b"), record(3)).unwrap();

        let err = buffers
            .flush(|topic, _| {
                if topic.as_str() == "b" {
                    Err("offline")
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert_eq!(err.sent, 2);
        assert_eq!(buffers.pending(), 1);

        assert_eq!(collect(&mut buffers), vec![(Topic::new("b"), 1)]);
        assert!(buffers.is_empty());
    }

    #[test]
    fn test_cap_rejects_writes() {
        let mut buffers = LogBuffers::new(10, Some(2));
        let topic = Topic::new("a");
        buffers.push("conn", topic.clone(), record(1)).unwrap();
        buffers.push("conn", topic.clone(), record(2)).unwrap();

        let err = buffers.push("conn", topic.clone(), record(3)).unwrap_err();
        assert_eq!(
            err,
            LogBufferError::Full {
                stream: "conn".into(),
                capacity: 2
            }
        );
        // Other streams have their own budget
        buffers.push("dns", topic, record(4)).unwrap();
    }
}
