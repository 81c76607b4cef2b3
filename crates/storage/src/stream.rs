//! Record storage for a single stream
//!
//! A stream is an ordered map of sequence → record plus a per-subject index.
//! Limits are enforced on append:
//! - per-subject history (`max_msgs_per_subject`, oldest evicted first)
//! - total bytes (`max_bytes`, evict oldest or reject depending on discard)
//! - record payload size (`max_msg_size`)
//!
//! Age limits are evaluated lazily: callers invoke [`StreamStore::expire`]
//! before reading.

use std::collections::{BTreeMap, HashMap, VecDeque};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use strata_kv_core::{LogError, LogResult};
use strata_kv_wire::{
    subject_matches, DeliverPolicy, DiscardPolicy, Headers, PublishOptions, PurgeOptions,
    StoredMessage, StreamConfig, StreamInfo, StreamState,
};
use tokio::sync::watch;

/// Status code used when a discard-new stream is full
const STATUS_STREAM_FULL: u16 = 503;

fn record_size(msg: &StoredMessage) -> u64 {
    (msg.subject.len() + msg.headers.encoded_len() + msg.data.len()) as u64
}

fn filter_matches(filter: Option<&str>, subject: &str) -> bool {
    filter.map_or(true, |f| subject_matches(f, subject))
}

/// Records and limits of one stream
#[derive(Debug)]
pub(crate) struct StreamStore {
    config: StreamConfig,
    created: DateTime<Utc>,
    messages: BTreeMap<u64, StoredMessage>,
    by_subject: HashMap<String, VecDeque<u64>>,
    last_seq: u64,
    bytes: u64,
    appended: watch::Sender<u64>,
}

impl StreamStore {
    pub(crate) fn new(config: StreamConfig, now: DateTime<Utc>) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            config,
            created: now,
            messages: BTreeMap::new(),
            by_subject: HashMap::new(),
            last_seq: 0,
            bytes: 0,
            appended,
        }
    }

    pub(crate) fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub(crate) fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Whether any of the stream's subjects captures `subject`
    pub(crate) fn captures(&self, subject: &str) -> bool {
        self.config
            .subjects
            .iter()
            .any(|filter| subject_matches(filter, subject))
    }

    pub(crate) fn info(&self, consumer_count: usize) -> StreamInfo {
        StreamInfo {
            config: self.config.clone(),
            state: StreamState {
                messages: self.messages.len() as u64,
                bytes: self.bytes,
                first_seq: self.messages.keys().next().copied().unwrap_or(0),
                last_seq: self.last_seq,
                consumer_count,
            },
            created: self.created,
        }
    }

    /// Receiver that observes the last assigned sequence
    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.appended.subscribe()
    }

    /// Append a record, enforcing preconditions and limits
    pub(crate) fn append(
        &mut self,
        subject: &str,
        data: Bytes,
        headers: Headers,
        options: PublishOptions,
        now: DateTime<Utc>,
    ) -> LogResult<u64> {
        if let Some(max) = self.config.max_msg_size {
            if data.len() > max {
                return Err(LogError::MaxPayloadExceeded {
                    size: data.len(),
                    max,
                });
            }
        }

        if let Some(expected) = options.expected_last_subject_seq {
            let actual = self.last_seq_for_subject(subject);
            if actual != expected {
                return Err(LogError::SequenceMismatch { expected, actual });
            }
        }

        let seq = self.last_seq + 1;
        let msg = StoredMessage {
            subject: subject.to_string(),
            seq,
            headers,
            data,
            time: now,
        };
        let size = record_size(&msg);

        if let (Some(max_bytes), DiscardPolicy::New) = (self.config.max_bytes, self.config.discard)
        {
            if self.bytes + size > max_bytes {
                return Err(LogError::Status {
                    code: STATUS_STREAM_FULL,
                    description: "maximum bytes exceeded".to_string(),
                });
            }
        }

        self.last_seq = seq;
        self.bytes += size;
        self.messages.insert(seq, msg);
        self.by_subject
            .entry(subject.to_string())
            .or_default()
            .push_back(seq);

        self.enforce_subject_limit(subject);
        if let Some(max_bytes) = self.config.max_bytes {
            while self.bytes > max_bytes {
                match self.messages.keys().next().copied() {
                    Some(oldest) if oldest != seq => self.remove(oldest),
                    _ => break,
                }
            }
        }

        self.appended.send_replace(seq);
        Ok(seq)
    }

    fn enforce_subject_limit(&mut self, subject: &str) {
        let limit = self.config.max_msgs_per_subject;
        if limit == 0 {
            return;
        }
        let evicted: Vec<u64> = match self.by_subject.get(subject) {
            Some(seqs) if seqs.len() as u64 > limit => seqs
                .iter()
                .take(seqs.len() - usize::try_from(limit).unwrap_or(usize::MAX))
                .copied()
                .collect(),
            _ => return,
        };
        for seq in evicted {
            self.remove(seq);
        }
    }

    fn remove(&mut self, seq: u64) {
        let Some(msg) = self.messages.remove(&seq) else {
            return;
        };
        self.bytes = self.bytes.saturating_sub(record_size(&msg));
        if let Some(seqs) = self.by_subject.get_mut(&msg.subject) {
            seqs.retain(|s| *s != seq);
            if seqs.is_empty() {
                self.by_subject.remove(&msg.subject);
            }
        }
    }

    /// Drop records older than the configured age limit
    pub(crate) fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let Some(max_age) = self
            .config
            .max_age
            .and_then(|age| chrono::Duration::from_std(age).ok())
        else {
            return 0;
        };
        let cutoff = now - max_age;
        let expired: Vec<u64> = self
            .messages
            .values()
            .take_while(|msg| msg.time <= cutoff)
            .map(|msg| msg.seq)
            .collect();
        for seq in &expired {
            self.remove(*seq);
        }
        expired.len()
    }

    fn last_seq_for_subject(&self, subject: &str) -> u64 {
        self.by_subject
            .get(subject)
            .and_then(|seqs| seqs.back().copied())
            .unwrap_or(0)
    }

    pub(crate) fn get(&self, seq: u64) -> Option<&StoredMessage> {
        self.messages.get(&seq)
    }

    /// Newest record stored for an exact subject
    pub(crate) fn last_for_subject(&self, subject: &str) -> Option<&StoredMessage> {
        self.by_subject
            .get(subject)
            .and_then(|seqs| seqs.back())
            .and_then(|seq| self.messages.get(seq))
    }

    /// First record after `after` whose subject matches `filter`
    pub(crate) fn next_after(&self, after: u64, filter: Option<&str>) -> Option<&StoredMessage> {
        self.messages
            .range(after.saturating_add(1)..)
            .map(|(_, msg)| msg)
            .find(|msg| filter_matches(filter, &msg.subject))
    }

    /// Number of records after `after` whose subject matches `filter`
    pub(crate) fn count_after(&self, after: u64, filter: Option<&str>) -> u64 {
        self.messages
            .range(after.saturating_add(1)..)
            .filter(|(_, msg)| filter_matches(filter, &msg.subject))
            .count() as u64
    }

    /// Sequences a new consumer replays before switching to live delivery
    pub(crate) fn backlog(&self, policy: DeliverPolicy, filter: Option<&str>) -> VecDeque<u64> {
        match policy {
            DeliverPolicy::All => self
                .messages
                .values()
                .filter(|msg| filter_matches(filter, &msg.subject))
                .map(|msg| msg.seq)
                .collect(),
            DeliverPolicy::LastPerSubject => {
                let mut seqs: Vec<u64> = self
                    .by_subject
                    .iter()
                    .filter(|(subject, _)| filter_matches(filter, subject))
                    .filter_map(|(_, seqs)| seqs.back().copied())
                    .collect();
                seqs.sort_unstable();
                seqs.into()
            }
            DeliverPolicy::Last => self
                .messages
                .values()
                .rev()
                .find(|msg| filter_matches(filter, &msg.subject))
                .map(|msg| msg.seq)
                .into_iter()
                .collect(),
            DeliverPolicy::New => VecDeque::new(),
        }
    }

    /// Remove records per the purge options; returns how many were removed
    pub(crate) fn purge(&mut self, options: &PurgeOptions) -> u64 {
        let filter = options.filter.as_deref();
        let candidates: Vec<u64> = self
            .messages
            .values()
            .filter(|msg| filter_matches(filter, &msg.subject))
            .map(|msg| msg.seq)
            .collect();

        let doomed: Vec<u64> = if let Some(below) = options.seq {
            candidates.into_iter().filter(|seq| *seq < below).collect()
        } else if let Some(keep) = options.keep {
            let cut = candidates
                .len()
                .saturating_sub(usize::try_from(keep).unwrap_or(usize::MAX));
            candidates.into_iter().take(cut).collect()
        } else {
            candidates
        };

        for seq in &doomed {
            self.remove(*seq);
        }
        doomed.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn store(history: u64) -> StreamStore {
        let mut config = StreamConfig::new("KV_t", vec!["$KV.t.>".to_string()]);
        config.max_msgs_per_subject = history;
        StreamStore::new(config, Utc::now())
    }

    fn put(store: &mut StreamStore, subject: &str, data: &'static [u8]) -> LogResult<u64> {
        store.append(
            subject,
            Bytes::from_static(data),
            Headers::new(),
            PublishOptions::default(),
            Utc::now(),
        )
    }

    #[test]
    fn test_sequences_increase() {
        let mut s = store(10);
        assert_eq!(put(&mut s, "$KV.t.a", b"1").unwrap(), 1);
        assert_eq!(put(&mut s, "$KV.t.b", b"2").unwrap(), 2);
        assert_eq!(s.last_seq(), 2);
        assert_eq!(s.info(0).state.messages, 2);
    }

    #[test]
    fn test_subject_history_is_trimmed() {
        let mut s = store(2);
        put(&mut s, "$KV.t.a", b"1").unwrap();
        put(&mut s, "$KV.t.a", b"2").unwrap();
        put(&mut s, "$KV.t.b", b"x").unwrap();
        put(&mut s, "$KV.t.a", b"3").unwrap();

        assert!(s.get(1).is_none());
        assert_eq!(s.info(0).state.messages, 3);
        assert_eq!(s.last_for_subject("$KV.t.a").unwrap().data, Bytes::from_static(b"3"));
        assert_eq!(s.info(0).state.first_seq, 2);
    }

    #[test]
    fn test_expected_last_subject_seq() {
        let mut s = store(5);
        let first = s
            .append(
                "$KV.t.a",
                Bytes::from_static(b"1"),
                Headers::new(),
                PublishOptions {
                    expected_last_subject_seq: Some(0),
                },
                Utc::now(),
            )
            .unwrap();
        put(&mut s, "$KV.t.other", b"o").unwrap();

        let err = s
            .append(
                "$KV.t.a",
                Bytes::from_static(b"2"),
                Headers::new(),
                PublishOptions {
                    expected_last_subject_seq: Some(0),
                },
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            LogError::SequenceMismatch {
                expected: 0,
                actual: first
            }
        );

        // other subjects do not affect the precondition
        assert!(s
            .append(
                "$KV.t.a",
                Bytes::from_static(b"2"),
                Headers::new(),
                PublishOptions {
                    expected_last_subject_seq: Some(first),
                },
                Utc::now(),
            )
            .is_ok());
    }

    #[test]
    fn test_max_msg_size() {
        let mut config = StreamConfig::new("KV_t", vec!["$KV.t.>".to_string()]);
        config.max_msg_size = Some(2);
        let mut s = StreamStore::new(config, Utc::now());
        assert!(put(&mut s, "$KV.t.a", b"ok").is_ok());
        assert_eq!(
            put(&mut s, "$KV.t.a", b"big").unwrap_err(),
            LogError::MaxPayloadExceeded { size: 3, max: 2 }
        );
    }

    #[test]
    fn test_max_bytes_discards_old() {
        let mut config = StreamConfig::new("KV_t", vec!["$KV.t.>".to_string()]);
        config.max_msgs_per_subject = 0;
        config.max_bytes = Some(20);
        let mut s = StreamStore::new(config, Utc::now());
        for _ in 0..4 {
            put(&mut s, "$KV.t.a", b"12345").unwrap();
        }
        let state = s.info(0).state;
        assert!(state.bytes <= 20);
        assert_eq!(state.last_seq, 4);
        assert!(s.get(4).is_some());
        assert!(s.get(1).is_none());
    }

    #[test]
    fn test_max_bytes_discard_new_rejects() {
        let mut config = StreamConfig::new("KV_t", vec!["$KV.t.>".to_string()]);
        config.max_bytes = Some(10);
        config.discard = DiscardPolicy::New;
        config.max_msgs_per_subject = 0;
        let mut s = StreamStore::new(config, Utc::now());
        put(&mut s, "$KV.t.a", b"1").unwrap();
        let err = put(&mut s, "$KV.t.a", b"1").unwrap_err();
        assert!(matches!(err, LogError::Status { code: 503, .. }));
    }

    #[test]
    fn test_expire() {
        let mut config = StreamConfig::new("KV_t", vec!["$KV.t.>".to_string()]);
        config.max_age = Some(Duration::from_secs(60));
        let mut s = StreamStore::new(config, Utc::now());
        let old = Utc::now() - ChronoDuration::seconds(120);
        s.append(
            "$KV.t.a",
            Bytes::from_static(b"old"),
            Headers::new(),
            PublishOptions::default(),
            old,
        )
        .unwrap();
        put(&mut s, "$KV.t.b", b"new").unwrap();

        assert_eq!(s.expire(Utc::now()), 1);
        assert!(s.last_for_subject("$KV.t.a").is_none());
        assert!(s.last_for_subject("$KV.t.b").is_some());
    }

    #[test]
    fn test_backlog_policies() {
        let mut s = store(10);
        put(&mut s, "$KV.t.a", b"1").unwrap();
        put(&mut s, "$KV.t.b", b"1").unwrap();
        put(&mut s, "$KV.t.a", b"2").unwrap();

        assert_eq!(
            s.backlog(DeliverPolicy::All, None),
            VecDeque::from(vec![1, 2, 3])
        );
        assert_eq!(
            s.backlog(DeliverPolicy::LastPerSubject, None),
            VecDeque::from(vec![2, 3])
        );
        assert_eq!(
            s.backlog(DeliverPolicy::All, Some("$KV.t.a")),
            VecDeque::from(vec![1, 3])
        );
        assert_eq!(s.backlog(DeliverPolicy::Last, None), VecDeque::from(vec![3]));
        assert!(s.backlog(DeliverPolicy::New, None).is_empty());
        assert_eq!(s.count_after(1, Some("$KV.t.a")), 1);
        assert_eq!(s.next_after(1, None).unwrap().seq, 2);
    }

    #[test]
    fn test_purge_options() {
        let mut s = store(10);
        for _ in 0..3 {
            put(&mut s, "$KV.t.a", b"a").unwrap();
        }
        put(&mut s, "$KV.t.b", b"b").unwrap();

        let keep_one = PurgeOptions {
            filter: Some("$KV.t.a".into()),
            keep: Some(1),
            seq: None,
        };
        assert_eq!(s.purge(&keep_one), 2);
        assert_eq!(s.info(0).state.messages, 2);

        let below = PurgeOptions {
            filter: None,
            keep: None,
            seq: Some(4),
        };
        assert_eq!(s.purge(&below), 1);
        assert_eq!(s.purge(&PurgeOptions::default()), 1);
        assert_eq!(s.info(0).state.messages, 0);
        assert_eq!(s.last_seq(), 4);
    }
}
