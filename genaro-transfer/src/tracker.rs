//! Upload-side shard state

use crate::pointer::FarmerPointer;
use crate::report::{ExchangeRecord, ExchangeReport};
use genaro_core::{PreparedShard, ShardMeta};
use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardStatus {
    Pending,
    PushSuccess,
    PushFailed,
}

/// Transfer state of one shard for the lifetime of an upload
#[derive(Debug, Clone)]
pub struct ShardTracker {
    pub index: usize,
    pub pointer: Option<FarmerPointer>,
    pub meta: ShardMeta,
    pub data: Bytes,
    pub uploaded_size: u64,
    pub push_count: u32,
    pub has_tried_to_push: bool,
    pub status: ShardStatus,
    pub report: ExchangeReport,
    /// Farmers that failed a push of this shard
    pub excluded: Vec<String>,
}

impl ShardTracker {
    pub fn new(shard: PreparedShard) -> Self {
        Self {
            index: shard.meta.index,
            pointer: None,
            meta: shard.meta,
            data: shard.data,
            uploaded_size: 0,
            push_count: 0,
            has_tried_to_push: false,
            status: ShardStatus::Pending,
            report: ExchangeReport::default(),
            excluded: Vec::new(),
        }
    }

    /// Give up on the current farmer and remember not to ask for it again
    pub fn exclude_current_farmer(&mut self) {
        if let Some(pointer) = self.pointer.take() {
            if !self.excluded.contains(&pointer.farmer.node_id) {
                self.excluded.push(pointer.farmer.node_id);
            }
        }
    }

    /// Report of the latest push attempt, if one was made to a farmer
    pub fn exchange_record(&self) -> Option<ExchangeRecord> {
        self.pointer.as_ref().map(|p| ExchangeRecord {
            data_hash: self.meta.hash.to_hex(),
            farmer_id: p.farmer.node_id.clone(),
            report: self.report.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::{Farmer, Operation};

    fn tracker() -> ShardTracker {
        let data = Bytes::from_static(b"encrypted shard");
        ShardTracker::new(PreparedShard {
            meta: ShardMeta::generate(0, false, &data, 2),
            data,
        })
    }

    #[test]
    fn test_exclusion_is_deduplicated() {
        let mut t = tracker();
        for _ in 0..2 {
            t.pointer = Some(FarmerPointer {
                token: "t".into(),
                operation: Operation::Push,
                farmer: Farmer::new("127.0.0.1", 1, "bad-node"),
            });
            t.exclude_current_farmer();
        }
        assert_eq!(t.excluded, vec!["bad-node".to_string()]);
        assert!(t.pointer.is_none());
        assert!(t.exchange_record().is_none());
    }
}
