//! Nested transactions.
//!
//! The connection keeps a transaction depth. Only the outermost level
//! issues `begin`/`commit`; inner levels are named savepoints. A savepoint
//! name encodes the depth it was opened at (`S<random>D<depth>`), so
//! releasing or rolling back to it restores the counter.

use std::sync::atomic::Ordering;

use rand::RngExt;
use synctrack_core::ResultCode;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{OrmError, Result};

impl Connection {
    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        self.transaction_depth.load(Ordering::SeqCst) > 0
    }

    /// Begins the outermost transaction.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::InvalidOperation`] when a transaction is already
    /// open, or the storage error of `begin`.
    pub fn begin_transaction(&self) -> Result<()> {
        if self
            .transaction_depth
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(OrmError::InvalidOperation(
                "Cannot begin a transaction while already in a transaction.".to_string(),
            ));
        }
        let sql = self.dialect().begin_sql();
        if let Err(err) = self.exec(&sql, &[]) {
            self.recover(&err);
            return Err(err);
        }
        debug!("Began transaction");
        Ok(())
    }

    /// Opens a savepoint and returns its name.
    ///
    /// Outside a transaction this starts one.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the savepoint statement.
    pub fn save_transaction_point(&self) -> Result<String> {
        let depth = self.transaction_depth.fetch_add(1, Ordering::SeqCst);
        let name = format!("S{}D{depth}", rand::rng().random_range(0..i16::MAX));
        let sql = self.dialect().savepoint_sql(&name, depth);
        if let Err(err) = self.exec(&sql, &[]) {
            self.recover(&err);
            return Err(err);
        }
        debug!(savepoint = %name, depth, "Opened savepoint");
        Ok(name)
    }

    /// Releases a savepoint, keeping its work in the enclosing level.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::InvalidSavepoint`] for a name not produced by
    /// [`Connection::save_transaction_point`] at a still-open level, or the
    /// storage error of the release.
    pub fn release(&self, savepoint: &str) -> Result<()> {
        let depth = self.savepoint_depth(savepoint)?;
        self.transaction_depth.store(depth, Ordering::SeqCst);
        match self.dialect().release_sql(savepoint, depth) {
            Some(sql) => self.exec_at_savepoint(&sql),
            None => Ok(()),
        }
    }

    /// Rolls back to a savepoint; an empty name rolls back everything.
    ///
    /// # Errors
    ///
    /// See [`Connection::release`].
    pub fn rollback_to(&self, savepoint: &str) -> Result<()> {
        if savepoint.is_empty() {
            return self.rollback();
        }
        let depth = self.savepoint_depth(savepoint)?;
        self.transaction_depth.store(depth, Ordering::SeqCst);
        self.forget_history();
        let sql = self.dialect().rollback_to_sql(savepoint);
        self.exec_at_savepoint(&sql)
    }

    /// Rolls back the whole transaction, if one is open.
    ///
    /// # Errors
    ///
    /// Returns the storage error of `rollback`.
    pub fn rollback(&self) -> Result<()> {
        if self.transaction_depth.swap(0, Ordering::SeqCst) > 0 {
            self.forget_history();
            self.exec(&self.dialect().rollback_sql(), &[])?;
            debug!("Rolled back transaction");
        }
        Ok(())
    }

    /// Commits the whole transaction, if one is open.
    ///
    /// A failed commit is followed by a best-effort rollback.
    ///
    /// # Errors
    ///
    /// Returns the storage error of `commit`.
    pub fn commit(&self) -> Result<()> {
        if self.transaction_depth.swap(0, Ordering::SeqCst) == 0 {
            return Ok(());
        }
        if let Err(err) = self.exec(&self.dialect().commit_sql(), &[]) {
            warn!(error = %err, "Commit failed; rolling back");
            self.quiet_rollback();
            return Err(err);
        }
        debug!("Committed transaction");
        Ok(())
    }

    /// Runs `f` inside a savepoint.
    ///
    /// The savepoint is released when `f` succeeds. On failure the whole
    /// transaction is rolled back and the error returned.
    ///
    /// # Errors
    ///
    /// Returns the error of `f` or of the transaction statements.
    pub fn run_in_transaction<R>(&self, f: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        let savepoint = self.save_transaction_point()?;
        match f(self).and_then(|value| self.release(&savepoint).map(|()| value)) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(error = %err, savepoint = %savepoint, "Rolling back transaction");
                self.quiet_rollback();
                Err(err)
            }
        }
    }

    fn savepoint_depth(&self, savepoint: &str) -> Result<usize> {
        let current = self.transaction_depth.load(Ordering::SeqCst);
        savepoint
            .find('D')
            .filter(|&at| at >= 2)
            .and_then(|at| savepoint[at + 1..].parse::<usize>().ok())
            .filter(|&depth| depth < current)
            .ok_or_else(|| OrmError::InvalidSavepoint(savepoint.to_string()))
    }

    fn exec_at_savepoint(&self, sql: &str) -> Result<()> {
        match self.exec(sql, &[]) {
            Ok(_) => Ok(()),
            Err(err) => {
                if err.code() == ResultCode::Busy {
                    warn!(sql, "Busy at savepoint; rolling back");
                    self.quiet_rollback();
                }
                Err(err)
            }
        }
    }

    /// Restores the counter after a failed begin or savepoint.
    fn recover(&self, err: &OrmError) {
        match err {
            OrmError::Storage(storage) if storage.code.forces_rollback() => {
                warn!(code = %storage.code, "Forcing rollback");
                self.quiet_rollback();
            }
            _ => {
                let _ = self.transaction_depth.fetch_update(
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                    |depth| Some(depth.saturating_sub(1)),
                );
            }
        }
    }

    /// A rollback may undo the lazy creation of the ledger table.
    fn forget_history(&self) {
        self.history_ready.store(false, Ordering::SeqCst);
    }

    /// Rolls back everything, ignoring a failure of the rollback itself.
    fn quiet_rollback(&self) {
        self.transaction_depth.store(0, Ordering::SeqCst);
        self.forget_history();
        if let Err(err) = self.exec(&self.dialect().rollback_sql(), &[]) {
            debug!(error = %err, "Ignoring failed rollback");
        }
    }
}
