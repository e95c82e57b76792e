//! Briefcase-limited id sequences backed by `be_Local`.

use mgraft_error::{GraftError, Result};
use mgraft_types::EcId;
use rusqlite::Connection;

/// `be_Local` key of the element id sequence.
pub const ELEMENT_ID_SEQUENCE: &str = "bis_elementidsequence";

/// `be_Local` key of the aspect/relationship instance id sequence.
pub const INSTANCE_ID_SEQUENCE: &str = "ec_instanceidsequence";

/// A monotonically increasing id counter.
///
/// `be_Local` stores the last id handed out. The counter lives in memory
/// during a transform and is written back at finalize; briefcase-local
/// overflow is checked on every allocation.
#[derive(Debug)]
pub struct IdSequence {
    name: &'static str,
    last: u64,
}

impl IdSequence {
    /// Load a sequence from `db.be_Local`.
    pub fn load(conn: &Connection, db: &str, name: &'static str) -> Result<Self> {
        let last: Option<i64> = conn
            .query_row(
                &format!("SELECT Val FROM {db}.be_Local WHERE Name = ?1"),
                [name],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    GraftError::internal(format!("missing id sequence '{name}' in {db}.be_Local"))
                }
                other => other.into(),
            })?;
        let last = last
            .map(EcId::from_i64)
            .ok_or_else(|| GraftError::internal(format!("id sequence '{name}' holds NULL")))?;
        Ok(Self {
            name,
            last: last.get(),
        })
    }

    /// Allocate the next id.
    pub fn next(&mut self) -> Result<EcId> {
        let next = self.last + 1;
        let max = EcId::new(self.last).briefcase_base() | EcId::LOCAL_MASK;
        if next > max {
            return Err(GraftError::SequenceOverflow {
                sequence: self.name.to_owned(),
                next,
                max,
            });
        }
        self.last = next;
        Ok(EcId::new(next))
    }

    /// The last id handed out.
    pub const fn last(&self) -> EcId {
        EcId::new(self.last)
    }

    /// Ensure future allocations land above `id`.
    pub fn advance_past(&mut self, id: EcId) {
        if id.get() > self.last {
            self.last = id.get();
        }
    }

    /// Write the counter back to `db.be_Local`.
    pub fn save(&self, conn: &Connection, db: &str) -> Result<()> {
        conn.execute(
            &format!("UPDATE {db}.be_Local SET Val = ?1 WHERE Name = ?2"),
            rusqlite::params![EcId::new(self.last).as_i64(), self.name],
        )?;
        Ok(())
    }
}
