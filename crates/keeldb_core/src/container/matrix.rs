//! Entries addressed by `(row, col)`.
//!
//! A matrix keeps two indexes: row to columns and column to rows. Both are
//! updated by the same two primitives, so they never disagree. The shape of
//! the matrix decides which side is unique:
//!
//! | Shape        | Row unique | Col unique |
//! |--------------|------------|------------|
//! | `ManyToMany` | no         | no         |
//! | `OneToMany`  | no         | yes        |
//! | `OneToOne`   | yes        | yes        |
//!
//! Adding `(r, c)` to a shape with a unique side evicts the previous occupant
//! of that side. Row eviction is journaled before column eviction, which is
//! journaled before the new entry.

use super::index::{IndexKind, KeyMap, Ordered};
use super::{Container, Journal, MatrixEntry};
use crate::clock::Micros;
use crate::mutation::{Deleted, MatrixChange, Updated};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Uniqueness rules of a matrix shape.
pub trait Relation: Send + Sync + 'static {
    /// At most one column per row.
    const ROW_UNIQUE: bool;
    /// At most one row per column.
    const COL_UNIQUE: bool;
    /// Human readable name.
    const NAME: &'static str;
}

/// Shapes in which a row has at most one entry.
pub trait RowUnique: Relation {}

/// Shapes in which a column has at most one entry.
pub trait ColUnique: Relation {}

/// No uniqueness constraint.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManyToMany;

/// Each column belongs to at most one row.
#[derive(Debug, Clone, Copy, Default)]
pub struct OneToMany;

/// Each row and each column has at most one entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct OneToOne;

impl Relation for ManyToMany {
    const ROW_UNIQUE: bool = false;
    const COL_UNIQUE: bool = false;
    const NAME: &'static str = "many_to_many";
}

impl Relation for OneToMany {
    const ROW_UNIQUE: bool = false;
    const COL_UNIQUE: bool = true;
    const NAME: &'static str = "one_to_many";
}

impl Relation for OneToOne {
    const ROW_UNIQUE: bool = true;
    const COL_UNIQUE: bool = true;
    const NAME: &'static str = "one_to_one";
}

impl ColUnique for OneToMany {}
impl ColUnique for OneToOne {}
impl RowUnique for OneToOne {}

/// Matrix without uniqueness constraints.
pub type ManyToManyMatrix<E, RO = Ordered, CO = Ordered> = Matrix<E, ManyToMany, RO, CO>;

/// Matrix where each column maps to at most one row.
pub type OneToManyMatrix<E, RO = Ordered, CO = Ordered> = Matrix<E, OneToMany, RO, CO>;

/// Matrix where rows and columns are both unique.
pub type OneToOneMatrix<E, RO = Ordered, CO = Ordered> = Matrix<E, OneToOne, RO, CO>;

struct Restore<E: MatrixEntry> {
    row: E::Row,
    col: E::Col,
    previous: Option<E>,
    previous_modified: Option<Micros>,
}

struct Pending<E: MatrixEntry> {
    seq: u64,
    change: MatrixChange<E>,
    undo: Restore<E>,
}

type CellKey<E> = (<E as MatrixEntry>::Row, <E as MatrixEntry>::Col);

/// A set of entries addressed by `(row, col)`.
pub struct Matrix<E: MatrixEntry, R: Relation, RO: IndexKind = Ordered, CO: IndexKind = Ordered> {
    name: &'static str,
    journal: Journal,
    rows: RO::Map<E::Row, CO::Map<E::Col, E>>,
    cols: CO::Map<E::Col, RO::Map<E::Row, ()>>,
    len: usize,
    last_modified: HashMap<CellKey<E>, Micros>,
    pending: Vec<Pending<E>>,
    _relation: PhantomData<R>,
}

impl<E: MatrixEntry, R: Relation, RO: IndexKind, CO: IndexKind> Matrix<E, R, RO, CO> {
    /// Creates an empty matrix named `name`.
    #[must_use]
    pub fn new(journal: &Journal, name: &'static str) -> Self {
        Self {
            name,
            journal: journal.clone(),
            rows: Default::default(),
            cols: Default::default(),
            len: 0,
            last_modified: HashMap::new(),
            pending: Vec::new(),
            _relation: PhantomData,
        }
    }

    /// Adds an entry, evicting whatever the shape no longer allows.
    pub fn add(&mut self, entry: E) {
        let us = self.journal.now_us();
        let row = entry.row();
        let col = entry.col();

        if R::ROW_UNIQUE {
            let stale: Vec<E::Col> = self
                .row(&row)
                .map(MatrixEntry::col)
                .filter(|c| *c != col)
                .collect();
            for c in stale {
                self.evict(row.clone(), c, us);
            }
        }
        if R::COL_UNIQUE {
            let stale: Vec<E::Row> = self
                .col(&col)
                .map(MatrixEntry::row)
                .filter(|r| *r != row)
                .collect();
            for r in stale {
                self.evict(r, col.clone(), us);
            }
        }

        let previous = self.insert_slot(entry.clone());
        let previous_modified = self.last_modified.insert((row.clone(), col.clone()), us);
        self.record(
            MatrixChange::Updated(Updated { us, data: entry }),
            Restore {
                row,
                col,
                previous,
                previous_modified,
            },
        );
    }

    /// Removes the entry at `(row, col)`, if any.
    pub fn erase(&mut self, row: &E::Row, col: &E::Col) {
        if !self.has(row, col) {
            return;
        }
        let us = self.journal.now_us();
        self.evict(row.clone(), col.clone(), us);
    }

    /// Removes every entry in `row`, in column index order.
    pub fn erase_row(&mut self, row: &E::Row) {
        let cols: Vec<E::Col> = self.row(row).map(MatrixEntry::col).collect();
        if cols.is_empty() {
            return;
        }
        let us = self.journal.now_us();
        for col in cols {
            self.evict(row.clone(), col, us);
        }
    }

    /// Removes every entry in `col`, in row index order.
    pub fn erase_col(&mut self, col: &E::Col) {
        let rows: Vec<E::Row> = self.col(col).map(MatrixEntry::row).collect();
        if rows.is_empty() {
            return;
        }
        let us = self.journal.now_us();
        for row in rows {
            self.evict(row, col.clone(), us);
        }
    }

    /// Returns the entry at `(row, col)`.
    #[must_use]
    pub fn get(&self, row: &E::Row, col: &E::Col) -> Option<&E> {
        self.rows.get(row).and_then(|inner| inner.get(col))
    }

    /// Returns true if an entry exists at `(row, col)`.
    #[must_use]
    pub fn has(&self, row: &E::Row, col: &E::Col) -> bool {
        self.get(row, col).is_some()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the matrix is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Timestamp of the latest change touching `(row, col)`, evictions included.
    #[must_use]
    pub fn last_modified(&self, row: &E::Row, col: &E::Col) -> Option<Micros> {
        self.last_modified.get(&(row.clone(), col.clone())).copied()
    }

    /// Iterates over non-empty rows.
    pub fn rows(&self) -> impl Iterator<Item = &E::Row> + '_ {
        self.rows.iter().map(|(row, _)| row)
    }

    /// Iterates over non-empty columns.
    pub fn cols(&self) -> impl Iterator<Item = &E::Col> + '_ {
        self.cols.iter().map(|(col, _)| col)
    }

    /// Iterates over the entries of one row.
    pub fn row<'a>(&'a self, row: &E::Row) -> impl Iterator<Item = &'a E> + 'a {
        self.rows
            .get(row)
            .into_iter()
            .flat_map(|inner| inner.iter().map(|(_, entry)| entry))
    }

    /// Iterates over the entries of one column.
    pub fn col<'a>(&'a self, col: &'a E::Col) -> impl Iterator<Item = &'a E> + 'a {
        self.cols
            .get(col)
            .into_iter()
            .flat_map(move |rows| rows.iter().filter_map(move |(row, _)| self.get(row, col)))
    }

    /// Number of entries in `row`.
    #[must_use]
    pub fn row_len(&self, row: &E::Row) -> usize {
        self.rows.get(row).map_or(0, |inner| inner.len())
    }

    /// Number of entries in `col`.
    #[must_use]
    pub fn col_len(&self, col: &E::Col) -> usize {
        self.cols.get(col).map_or(0, |inner| inner.len())
    }

    /// Returns true if `row` has at least one entry.
    #[must_use]
    pub fn has_row(&self, row: &E::Row) -> bool {
        self.rows.contains_key(row)
    }

    /// Returns true if `col` has at least one entry.
    #[must_use]
    pub fn has_col(&self, col: &E::Col) -> bool {
        self.cols.contains_key(col)
    }

    /// Iterates over all entries, row by row.
    pub fn iter(&self) -> impl Iterator<Item = &E> + '_ {
        self.rows
            .iter()
            .flat_map(|(_, inner)| inner.iter().map(|(_, entry)| entry))
    }

    /// Applies a logged `Updated` change.
    ///
    /// Evictions were logged as their own `Deleted` changes, so no
    /// uniqueness rule is applied here.
    pub fn replay_updated(&mut self, change: &Updated<E>) {
        let key = (change.data.row(), change.data.col());
        self.insert_slot(change.data.clone());
        self.last_modified.insert(key, change.us);
    }

    /// Applies a logged `Deleted` change.
    pub fn replay_deleted(&mut self, change: &Deleted<CellKey<E>>) {
        let (row, col) = &change.key;
        self.remove_slot(row, col);
        self.last_modified.insert(change.key.clone(), change.us);
    }

    fn evict(&mut self, row: E::Row, col: E::Col, us: Micros) {
        let Some(removed) = self.remove_slot(&row, &col) else {
            return;
        };
        let previous_modified = self.last_modified.insert((row.clone(), col.clone()), us);
        self.record(
            MatrixChange::Deleted(Deleted {
                us,
                key: (row.clone(), col.clone()),
            }),
            Restore {
                row,
                col,
                previous: Some(removed),
                previous_modified,
            },
        );
    }

    fn record(&mut self, change: MatrixChange<E>, undo: Restore<E>) {
        let seq = self.journal.next_seq();
        self.pending.push(Pending { seq, change, undo });
    }

    fn insert_slot(&mut self, entry: E) -> Option<E> {
        let row = entry.row();
        let col = entry.col();
        let previous = match self.rows.get_mut(&row) {
            Some(inner) => inner.insert(col.clone(), entry),
            None => {
                let mut inner: CO::Map<E::Col, E> = Default::default();
                inner.insert(col.clone(), entry);
                self.rows.insert(row.clone(), inner);
                None
            }
        };
        if previous.is_none() {
            self.len += 1;
            match self.cols.get_mut(&col) {
                Some(rows) => {
                    rows.insert(row, ());
                }
                None => {
                    let mut rows: RO::Map<E::Row, ()> = Default::default();
                    rows.insert(row, ());
                    self.cols.insert(col, rows);
                }
            }
        }
        previous
    }

    fn remove_slot(&mut self, row: &E::Row, col: &E::Col) -> Option<E> {
        let inner = self.rows.get_mut(row)?;
        let removed = inner.remove(col)?;
        if inner.is_empty() {
            self.rows.remove(row);
        }
        if let Some(rows) = self.cols.get_mut(col) {
            rows.remove(row);
            if rows.is_empty() {
                self.cols.remove(col);
            }
        }
        self.len -= 1;
        Some(removed)
    }
}

impl<E: MatrixEntry, R: RowUnique, RO: IndexKind, CO: IndexKind> Matrix<E, R, RO, CO> {
    /// Returns the single entry of `row`.
    #[must_use]
    pub fn get_entry_by_row(&self, row: &E::Row) -> Option<&E> {
        self.row(row).next()
    }
}

impl<E: MatrixEntry, R: ColUnique, RO: IndexKind, CO: IndexKind> Matrix<E, R, RO, CO> {
    /// Returns the single entry of `col`.
    #[must_use]
    pub fn get_entry_by_col(&self, col: &E::Col) -> Option<&E> {
        let (row, _) = self.cols.get(col)?.iter().next()?;
        self.get(row, col)
    }
}

impl<E: MatrixEntry, R: Relation, RO: IndexKind, CO: IndexKind> Container
    for Matrix<E, R, RO, CO>
{
    type Change = MatrixChange<E>;

    fn field_name(&self) -> &'static str {
        self.name
    }

    fn len(&self) -> usize {
        self.len
    }

    fn pending_changes(&self) -> Vec<(u64, MatrixChange<E>)> {
        self.pending
            .iter()
            .map(|pending| (pending.seq, pending.change.clone()))
            .collect()
    }

    fn commit(&mut self) {
        self.pending.clear();
    }

    fn rollback(&mut self) {
        while let Some(Pending { undo, .. }) = self.pending.pop() {
            self.remove_slot(&undo.row, &undo.col);
            if let Some(previous) = undo.previous {
                self.insert_slot(previous);
            }
            let key = (undo.row, undo.col);
            match undo.previous_modified {
                Some(us) => self.last_modified.insert(key, us),
                None => self.last_modified.remove(&key),
            };
        }
    }

    fn replay(&mut self, change: &MatrixChange<E>) {
        match change {
            MatrixChange::Updated(c) => self.replay_updated(c),
            MatrixChange::Deleted(c) => self.replay_deleted(c),
        }
    }
}

impl<E: MatrixEntry, R: Relation, RO: IndexKind, CO: IndexKind> fmt::Debug
    for Matrix<E, R, RO, CO>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matrix")
            .field("name", &self.name)
            .field("relation", &R::NAME)
            .field("len", &self.len)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
