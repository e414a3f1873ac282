//! Property-based test generators using proptest.
//!
//! Keys are drawn from small pools so that generated operations collide,
//! overwrite and evict each other often.

use crate::fixtures::{Cell, Record, Sample, SampleStorage};
use keeldb_core::{Abort, ReadWrite, TransactionOutcome};
use proptest::prelude::*;

/// One operation on a [`Sample`].
#[derive(Debug, Clone)]
pub enum Op {
    /// Add or overwrite a record.
    AddRecord(Record),
    /// Erase a record by name.
    EraseRecord(String),
    /// Add a delta to a record's value.
    PatchRecord(String, i64),
    /// Add to `uone_to_uone`.
    AddPair(Cell),
    /// Erase one `uone_to_uone` cell.
    ErasePair(u32, String),
    /// Add to `owners`.
    AddOwner(Cell),
    /// Erase a whole `owners` row.
    EraseOwnerRow(u32),
    /// Add to `links`.
    AddLink(Cell),
    /// Erase a whole `links` column.
    EraseLinkCol(String),
    /// Set a transaction meta field.
    SetMeta(String, String),
}

/// How a planned transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// Return normally.
    Commit,
    /// Return `Abort::Rollback`.
    Rollback,
    /// Return `Abort::Fail`.
    Fail,
    /// Panic inside the body.
    Panic,
}

/// A transaction to run against a [`SampleStorage`].
#[derive(Debug, Clone)]
pub struct TxnPlan {
    /// Operations in order.
    pub ops: Vec<Op>,
    /// How the body ends.
    pub ending: Ending,
}

/// Applies `op` inside a read-write transaction.
pub fn apply(txn: &mut ReadWrite<'_, Sample>, op: &Op) {
    match op {
        Op::AddRecord(record) => txn.records.add(record.clone()),
        Op::EraseRecord(name) => txn.records.erase(name),
        Op::PatchRecord(name, delta) => {
            txn.records.patch(name, *delta);
        }
        Op::AddPair(cell) => txn.uone_to_uone.add(cell.clone()),
        Op::ErasePair(row, col) => txn.uone_to_uone.erase(row, col),
        Op::AddOwner(cell) => txn.owners.add(cell.clone()),
        Op::EraseOwnerRow(row) => txn.owners.erase_row(row),
        Op::AddLink(cell) => txn.links.add(cell.clone()),
        Op::EraseLinkCol(col) => txn.links.erase_col(col),
        Op::SetMeta(key, value) => txn.set_meta_field(key.clone(), value.clone()),
    }
}

/// Submits `plan` and waits for its outcome.
pub fn run_plan(storage: &SampleStorage, plan: &TxnPlan) -> TransactionOutcome<()> {
    let ops = plan.ops.clone();
    let ending = plan.ending;
    storage
        .read_write(move |txn| {
            for op in &ops {
                apply(txn, op);
            }
            match ending {
                Ending::Commit => Ok(()),
                Ending::Rollback => Err(Abort::rollback()),
                Ending::Fail => Err(Abort::fail("planned failure")),
                Ending::Panic => panic!("planned panic"),
            }
        })
        .wait()
}

/// Strategy for record names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "d"]).prop_map(str::to_string)
}

/// Strategy for matrix rows.
pub fn row_strategy() -> impl Strategy<Value = u32> {
    0u32..4
}

/// Strategy for matrix columns.
pub fn col_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["w", "x", "y", "z"]).prop_map(str::to_string)
}

/// Strategy for records.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    (name_strategy(), -100i64..100).prop_map(|(name, value)| Record::new(name, value))
}

/// Strategy for cells.
pub fn cell_strategy() -> impl Strategy<Value = Cell> {
    (row_strategy(), col_strategy(), -100i64..100)
        .prop_map(|(row, col, value)| Cell::new(row, col, value))
}

/// Strategy for single operations.
pub fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => record_strategy().prop_map(Op::AddRecord),
        1 => name_strategy().prop_map(Op::EraseRecord),
        2 => (name_strategy(), -10i64..10).prop_map(|(name, delta)| Op::PatchRecord(name, delta)),
        3 => cell_strategy().prop_map(Op::AddPair),
        1 => (row_strategy(), col_strategy()).prop_map(|(row, col)| Op::ErasePair(row, col)),
        2 => cell_strategy().prop_map(Op::AddOwner),
        1 => row_strategy().prop_map(Op::EraseOwnerRow),
        2 => cell_strategy().prop_map(Op::AddLink),
        1 => col_strategy().prop_map(Op::EraseLinkCol),
        1 => (name_strategy(), "[a-z]{0,4}").prop_map(|(key, value)| Op::SetMeta(key, value)),
    ]
}

/// Strategy for transaction endings, weighted towards commits.
pub fn ending_strategy() -> impl Strategy<Value = Ending> {
    prop_oneof![
        6 => Just(Ending::Commit),
        2 => Just(Ending::Rollback),
        1 => Just(Ending::Fail),
        1 => Just(Ending::Panic),
    ]
}

/// Strategy for planned transactions.
pub fn plan_strategy() -> impl Strategy<Value = TxnPlan> {
    (prop::collection::vec(op_strategy(), 0..8), ending_strategy())
        .prop_map(|(ops, ending)| TxnPlan { ops, ending })
}

/// Strategy for transactions that abort one way or another.
pub fn aborting_plan_strategy() -> impl Strategy<Value = TxnPlan> {
    (
        prop::collection::vec(op_strategy(), 1..8),
        prop_oneof![
            Just(Ending::Rollback),
            Just(Ending::Fail),
            Just(Ending::Panic)
        ],
    )
        .prop_map(|(ops, ending)| TxnPlan { ops, ending })
}
