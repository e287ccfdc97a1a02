//! Request Record Log
//!
//! Append-only log of request records with a most-recent-index per id.
//! Redirect chains reuse one protocol id across hops; "the record for id X"
//! always means the newest record carrying that id, and superseded records
//! are never touched again.

use std::collections::HashMap;

use crate::protocol::{Headers, Initiator, RequestId, ResourceType, Timestamp};

/// One hop of one network request.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub id: RequestId,
    pub url: String,
    pub method: Option<String>,
    pub resource_type: Option<ResourceType>,
    pub initiator: Initiator,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub request_headers: Option<Headers>,
    pub response_headers: Option<Headers>,
    pub status: Option<u16>,
    pub remote_ip_address: Option<String>,
    pub size: Option<u64>,
    pub failure_reason: Option<String>,
    pub redirected_from: Option<String>,
    pub redirected_to: Option<String>,
    pub post_data: Option<String>,
    pub response_body_hash: Option<String>,
}

impl RequestRecord {
    pub fn new(id: RequestId, url: String, initiator: Initiator) -> Self {
        Self {
            id,
            url,
            initiator,
            method: None,
            resource_type: None,
            start_time: None,
            end_time: None,
            request_headers: None,
            response_headers: None,
            status: None,
            remote_ip_address: None,
            size: None,
            failure_reason: None,
            redirected_from: None,
            redirected_to: None,
            post_data: None,
            response_body_hash: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct RequestLog {
    records: Vec<RequestRecord>,
    latest: HashMap<RequestId, usize>,
}

impl RequestLog {
    /// Appends a record and makes it the current hop for its id.
    pub fn push(&mut self, record: RequestRecord) {
        self.latest.insert(record.id.clone(), self.records.len());
        self.records.push(record);
    }

    /// Current (most recently appended) record for an id.
    pub fn latest_for(&self, id: &str) -> Option<&RequestRecord> {
        self.latest.get(id).map(|&index| &self.records[index])
    }

    pub fn latest_for_mut(&mut self, id: &str) -> Option<&mut RequestRecord> {
        match self.latest.get(id) {
            Some(&index) => self.records.get_mut(index),
            None => None,
        }
    }

    /// All records in arrival order.
    pub fn records(&self) -> &[RequestRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
