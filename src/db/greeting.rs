//! Greeting ledger repository

use chrono::{NaiveDate, Utc};

use super::DbPool;
use crate::greeting::GreetingLedger;
use crate::{Error, Result};

/// Date format stored in the `greeted_on` column
const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite-backed greeting ledger
#[derive(Clone)]
pub struct GreetingRepo {
    pool: DbPool,
}

impl GreetingRepo {
    /// Create a new greeting repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl GreetingLedger for GreetingRepo {
    fn last_greeted(&self, user_id: &str) -> Result<Option<NaiveDate>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT greeted_on FROM greetings WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .ok();

        Ok(stored.and_then(|s| match NaiveDate::parse_from_str(&s, DATE_FORMAT) {
            Ok(date) => Some(date),
            Err(e) => {
                tracing::warn!(user_id, value = %s, error = %e, "ignoring malformed greeting date");
                None
            }
        }))
    }

    fn record_greeting(&self, user_id: &str, date: NaiveDate) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let day = date.format(DATE_FORMAT).to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO greetings (user_id, greeted_on, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET greeted_on = ?2, updated_at = ?3",
            [user_id, day.as_str(), now.as_str()],
        )?;

        tracing::debug!(user_id, day = %day, "recorded greeting");
        Ok(())
    }
}
