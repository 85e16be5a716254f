//! Shard pointers and their health state machine
//!
//! A pointer starts as `Created` when the bridge hands it out with a farmer
//! assignment. Each failed transfer moves it one step back towards `Error`;
//! a pointer in `Error`, or one that never had an assignment, needs a
//! replacement farmer from the bridge. A successful replacement marks it
//! `Replaced` until the next attempt resets it to `Created`. Once its request
//! or replacement budget is spent it becomes `Missing` and is never tried
//! again.

use crate::report::ExchangeReport;
use genaro_core::{GenaroError, Result, ShardHash};
use serde::{Deserialize, Serialize};

/// A peer host storing shards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Farmer {
    pub address: String,
    pub port: u16,
    #[serde(rename = "nodeID")]
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

impl Farmer {
    pub fn new(address: impl Into<String>, port: u16, node_id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            node_id: node_id.into(),
            protocol: None,
            user_agent: None,
            last_seen: None,
        }
    }

    /// Base URL of the farmer's shard endpoint
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

/// Direction a farmer token authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Push,
    Pull,
}

/// A farmer assignment: token, operation and farmer are only ever present
/// together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FarmerPointer {
    pub token: String,
    pub operation: Operation,
    pub farmer: Farmer,
}

/// Pointer as the bridge returns it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointerRecord {
    pub index: usize,
    pub hash: String,
    pub size: u64,
    #[serde(default)]
    pub parity: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub operation: Option<Operation>,
    #[serde(default)]
    pub farmer: Option<Farmer>,
}

impl PointerRecord {
    /// The farmer assignment, if the bridge supplied a complete one
    pub fn assignment(&self) -> Option<FarmerPointer> {
        match (&self.token, &self.farmer) {
            (Some(token), Some(farmer)) => Some(FarmerPointer {
                token: token.clone(),
                operation: self.operation.unwrap_or(Operation::Pull),
                farmer: farmer.clone(),
            }),
            _ => None,
        }
    }
}

/// Health of a pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerStatus {
    Created,
    ErrorReported,
    Error,
    Missing,
    Replaced,
}

/// One shard's current known location and health
#[derive(Debug, Clone)]
pub struct Pointer {
    pub index: usize,
    pub hash: ShardHash,
    pub size: u64,
    pub is_parity: bool,
    assignment: Option<FarmerPointer>,
    pub status: PointerStatus,
    pub request_count: u32,
    pub replace_count: u32,
    pub downloaded_size: u64,
    pub report: ExchangeReport,
}

impl Pointer {
    /// Build a pointer from a bridge record. A record without a farmer
    /// assignment starts as `ErrorReported` so it gets replaced before use.
    pub fn from_record(record: PointerRecord) -> Result<Self> {
        let hash = ShardHash::from_hex(&record.hash).map_err(|_| GenaroError::BridgeJson)?;
        let assignment = record.assignment();
        let status = if assignment.is_some() {
            PointerStatus::Created
        } else {
            PointerStatus::ErrorReported
        };

        Ok(Self {
            index: record.index,
            hash,
            size: record.size,
            is_parity: record.parity,
            assignment,
            status,
            request_count: 0,
            replace_count: 0,
            downloaded_size: 0,
            report: ExchangeReport::default(),
        })
    }

    pub fn assignment(&self) -> Option<&FarmerPointer> {
        self.assignment.as_ref()
    }

    pub fn farmer(&self) -> Option<&Farmer> {
        self.assignment.as_ref().map(|a| &a.farmer)
    }

    pub fn token(&self) -> Option<&str> {
        self.assignment.as_ref().map(|a| a.token.as_str())
    }

    /// A failed transfer: one more request spent, one step towards `Error`
    pub fn record_failure(&mut self) {
        self.request_count += 1;
        self.status = match self.status {
            PointerStatus::Created | PointerStatus::Replaced => PointerStatus::ErrorReported,
            PointerStatus::ErrorReported | PointerStatus::Error => PointerStatus::Error,
            PointerStatus::Missing => PointerStatus::Missing,
        };
    }

    /// Whether the next attempt must wait for a new farmer
    pub fn needs_replacement(&self) -> bool {
        self.assignment.is_none() || self.status == PointerStatus::Error
    }

    /// Swap in a new farmer assignment. Only the assignment changes; index,
    /// hash and size stay as they are.
    pub fn apply_replacement(&mut self, assignment: FarmerPointer) {
        self.assignment = Some(assignment);
        self.replace_count += 1;
        self.status = PointerStatus::Replaced;
    }

    /// The bridge could not supply a replacement
    pub fn note_replace_failure(&mut self) {
        self.replace_count += 1;
        if self.status != PointerStatus::Missing {
            self.status = PointerStatus::Error;
        }
    }

    /// Called right before a transfer attempt
    pub fn begin_attempt(&mut self) {
        if self.status == PointerStatus::Replaced {
            self.status = PointerStatus::Created;
        }
        self.downloaded_size = 0;
    }

    /// Whether the retry budgets rule out any further attempt
    pub fn is_exhausted(&self, max_requests: u32, max_replacements: u32) -> bool {
        self.request_count >= max_requests
            || (self.needs_replacement() && self.replace_count >= max_replacements)
    }

    pub fn mark_missing(&mut self) {
        self.status = PointerStatus::Missing;
    }

    pub fn is_missing(&self) -> bool {
        self.status == PointerStatus::Missing
    }

    /// Node ids to exclude when asking the bridge for another farmer
    pub fn excluded_farmer(&self) -> Option<String> {
        self.farmer().map(|f| f.node_id.clone())
    }
}
