//! Transaction table.
//!
//! Live transactions are indexed twice: by id, and by Call-ID for matching.
//! Each Call-ID bucket holds a snapshot of the fields matching needs
//! ([`MatchInfo`]) so inbound messages are matched without locking any
//! transaction.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::error::{Error, Result};
use crate::transaction::{Transaction, TransactionId, TransactionKey};

/// Matching view of a live transaction
#[derive(Debug, Clone)]
pub(crate) struct MatchInfo {
    pub key: TransactionKey,
    /// Server: sent-by of the request's top Via
    pub sent_by: Option<String>,
    pub cseq: Option<u32>,
    /// Server: To tag of our responses
    pub local_tag: Option<String>,
    /// Server INVITE: RSeq of the reliable provisional response awaiting PRACK
    pub awaiting_prack: Option<u32>,
}

#[derive(Debug, Clone)]
pub(crate) struct TableEntry {
    pub id: TransactionId,
    pub info: MatchInfo,
}

#[derive(Default)]
pub(crate) struct TransactionTable {
    by_call_id: DashMap<String, Vec<TableEntry>>,
    by_id: DashMap<TransactionId, Arc<Transaction>>,
    /// Slots taken against the limit, including inserts still in progress
    reserved: AtomicUsize,
}

impl TransactionTable {
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn get(&self, id: TransactionId) -> Option<Arc<Transaction>> {
        self.by_id.get(&id).map(|entry| entry.value().clone())
    }

    pub fn all(&self) -> Vec<Arc<Transaction>> {
        self.by_id.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Adds a transaction. Keys are unique; `limit` bounds the table size.
    pub fn insert(&self, transaction: Arc<Transaction>, info: MatchInfo, limit: usize) -> Result<()> {
        if self.by_id.contains_key(&transaction.id()) {
            return Ok(());
        }
        self.reserve(limit)?;

        let id = transaction.id();
        let mut bucket = self.by_call_id.entry(info.key.call_id.clone()).or_default();
        if bucket.iter().any(|entry| entry.info.key == info.key) {
            self.reserved.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::InvalidArgument(format!(
                "a transaction with key {} already exists",
                info.key
            )));
        }
        trace!(%id, key = %info.key, "transaction added");
        bucket.push(TableEntry { id, info });
        drop(bucket);
        self.by_id.insert(id, transaction);
        Ok(())
    }

    fn reserve(&self, limit: usize) -> Result<()> {
        self.reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |taken| {
                (taken < limit).then_some(taken + 1)
            })
            .map(|_| ())
            .map_err(|_| Error::OutOfResources(format!("transaction limit of {} reached", limit)))
    }

    pub fn remove(&self, id: TransactionId) -> Option<Arc<Transaction>> {
        let (_, transaction) = self.by_id.remove(&id)?;
        self.reserved.fetch_sub(1, Ordering::SeqCst);
        let call_id = transaction.key().call_id;
        if let Some(mut bucket) = self.by_call_id.get_mut(&call_id) {
            bucket.retain(|entry| entry.id != id);
        }
        self.by_call_id.remove_if(&call_id, |_, bucket| bucket.is_empty());
        trace!(%id, "transaction removed");
        Some(transaction)
    }

    /// First live transaction of `call_id` whose match info satisfies `predicate`
    pub fn find(
        &self,
        call_id: &str,
        predicate: impl Fn(&MatchInfo) -> bool,
    ) -> Option<Arc<Transaction>> {
        let id = {
            let bucket = self.by_call_id.get(call_id)?;
            bucket
                .iter()
                .find(|entry| predicate(&entry.info))
                .map(|entry| entry.id)?
        };
        self.get(id)
    }

    pub fn any(&self, call_id: &str, predicate: impl Fn(&MatchInfo) -> bool) -> bool {
        self.by_call_id
            .get(call_id)
            .is_some_and(|bucket| bucket.iter().any(|entry| predicate(&entry.info)))
    }

    /// Applies `change` to the match info of `id`
    pub fn update(&self, id: TransactionId, change: impl FnOnce(&mut MatchInfo)) {
        let Some(transaction) = self.get(id) else {
            return;
        };
        let call_id = transaction.key().call_id;
        if let Some(mut bucket) = self.by_call_id.get_mut(&call_id) {
            if let Some(entry) = bucket.iter_mut().find(|entry| entry.id == id) {
                change(&mut entry.info);
            }
        }
    }
}
