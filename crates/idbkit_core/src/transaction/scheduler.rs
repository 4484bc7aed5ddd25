//! Transaction start ordering.
//!
//! A transaction may start once no earlier-created unfinished transaction
//! on the same database has an overlapping scope, unless both only read.
//! Transaction ids grow with creation order, so walking the map in key
//! order is walking in creation order.

use crate::transaction::TxnRecord;
use crate::types::{TransactionId, TransactionMode};
use std::collections::BTreeMap;

/// Whether `earlier` keeps `later` from starting.
pub(crate) fn blocks(earlier: &TxnRecord, later: &TxnRecord) -> bool {
    !earlier.state.is_finished()
        && earlier.database == later.database
        && (earlier.mode != TransactionMode::ReadOnly || later.mode != TransactionMode::ReadOnly)
        && earlier.scope.overlaps(&later.scope)
}

/// Transactions that are waiting and may start now, oldest first.
pub(crate) fn startable(transactions: &BTreeMap<TransactionId, TxnRecord>) -> Vec<TransactionId> {
    transactions
        .iter()
        .filter(|(_, txn)| !txn.started && !txn.state.is_finished())
        .filter(|(id, txn)| {
            !transactions
                .range(..**id)
                .any(|(_, earlier)| blocks(earlier, txn))
        })
        .map(|(id, _)| *id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConnectionShared;
    use crate::transaction::Scope;
    use crate::types::{ConnectionId, Durability, StoreId, TransactionState};

    fn txn(id: u64, db: &str, stores: &[u64], mode: TransactionMode) -> TxnRecord {
        TxnRecord::new(
            TransactionId::new(id),
            ConnectionShared::new(ConnectionId::new(1), db),
            Scope::stores(stores.iter().copied().map(StoreId::new)),
            mode,
            Durability::Default,
        )
    }

    fn map(txns: Vec<TxnRecord>) -> BTreeMap<TransactionId, TxnRecord> {
        txns.into_iter().map(|t| (t.id, t)).collect()
    }

    #[test]
    fn overlapping_writers_start_in_creation_order() {
        let mut txns = map(vec![
            txn(1, "db", &[1], TransactionMode::ReadWrite),
            txn(2, "db", &[1, 2], TransactionMode::ReadWrite),
            txn(3, "db", &[2], TransactionMode::ReadOnly),
        ]);
        assert_eq!(startable(&txns), vec![TransactionId::new(1)]);

        txns.get_mut(&TransactionId::new(1)).unwrap().started = true;
        assert!(startable(&txns).is_empty());

        txns.get_mut(&TransactionId::new(1)).unwrap().state = TransactionState::Committed;
        assert_eq!(startable(&txns), vec![TransactionId::new(2)]);
    }

    #[test]
    fn readers_share_scopes() {
        let txns = map(vec![
            txn(1, "db", &[1], TransactionMode::ReadOnly),
            txn(2, "db", &[1], TransactionMode::ReadOnly),
        ]);
        assert_eq!(startable(&txns).len(), 2);
    }

    #[test]
    fn disjoint_scopes_and_databases_run_together() {
        let txns = map(vec![
            txn(1, "db", &[1], TransactionMode::ReadWrite),
            txn(2, "db", &[2], TransactionMode::ReadWrite),
            txn(3, "other", &[1], TransactionMode::ReadWrite),
        ]);
        assert_eq!(startable(&txns).len(), 3);
    }

    #[test]
    fn version_change_scope_covers_everything() {
        let mut upgrade = txn(1, "db", &[], TransactionMode::VersionChange);
        upgrade.scope = Scope::All;
        let txns = map(vec![upgrade, txn(2, "db", &[9], TransactionMode::ReadOnly)]);
        assert_eq!(startable(&txns), vec![TransactionId::new(1)]);
    }
}
