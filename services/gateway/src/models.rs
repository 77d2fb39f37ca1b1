use feed::ChangeOp;
use serde::Serialize;
use std::collections::BTreeMap;
use types::record::RecordKey;

#[derive(Debug, Clone, Serialize)]
pub struct UpsertRecordResponse {
    pub address: RecordKey,
    pub op: ChangeOp,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: usize,
    pub records: usize,
    pub metrics: BTreeMap<String, u64>,
}
