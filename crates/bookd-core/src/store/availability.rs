//! Availability rule and exception persistence.

use chrono::{DateTime, Utc, Weekday};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::appointments::{exceptions_overlapping_conn, rules_for_conn};
use super::{Store, StoreError};
use crate::availability::{AvailabilityException, AvailabilityRule, ExceptionKind};

/// Weekday as stored: 0 = Monday .. 6 = Sunday.
pub(super) fn weekday_to_index(weekday: Weekday) -> i64 {
    i64::from(weekday.num_days_from_monday())
}

pub(super) fn weekday_from_index(index: i64) -> Result<Weekday, StoreError> {
    Ok(match index {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        6 => Weekday::Sun,
        other => {
            return Err(StoreError::corrupt(format!("weekday index {other} out of range")))
        }
    })
}

impl Store {
    /// All rules of a provider (active and inactive).
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure or a corrupt row.
    pub fn rules_for(&self, provider_id: Uuid) -> Result<Vec<AvailabilityRule>, StoreError> {
        rules_for_conn(&self.conn(), provider_id)
    }

    /// Insert an availability rule.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure.
    pub fn insert_rule(&self, rule: &AvailabilityRule) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO availability_rules \
             (id, provider_id, weekday, start_minute, end_minute, slot_minutes, active) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rule.id,
                rule.provider_id,
                weekday_to_index(rule.weekday),
                i64::from(rule.start_minute),
                i64::from(rule.end_minute),
                i64::from(rule.slot_minutes),
                rule.active,
            ],
        )?;
        Ok(())
    }

    /// Fetch one rule by id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure or a corrupt row.
    pub fn get_rule(&self, rule_id: Uuid) -> Result<Option<AvailabilityRule>, StoreError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, provider_id, weekday, start_minute, end_minute, slot_minutes, active \
                 FROM availability_rules WHERE id = ?1",
                params![rule_id],
                |row| {
                    Ok((
                        row.get::<_, Uuid>(0)?,
                        row.get::<_, Uuid>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, bool>(6)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, provider_id, weekday, start_minute, end_minute, slot_minutes, active)| {
            Ok(AvailabilityRule {
                id,
                provider_id,
                weekday: weekday_from_index(weekday)?,
                start_minute: start_minute as u32,
                end_minute: end_minute as u32,
                slot_minutes: slot_minutes as u32,
                active,
            })
        })
        .transpose()
    }

    /// Delete one rule; `false` when it did not exist.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure.
    pub fn delete_rule(&self, rule_id: Uuid) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute("DELETE FROM availability_rules WHERE id = ?1", params![rule_id])?;
        Ok(affected > 0)
    }

    /// Exceptions of a provider overlapping `[from, to)`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure or a corrupt row.
    pub fn exceptions_overlapping(
        &self,
        provider_id: Uuid,
        from_utc: DateTime<Utc>,
        to_utc: DateTime<Utc>,
    ) -> Result<Vec<AvailabilityException>, StoreError> {
        exceptions_overlapping_conn(&self.conn(), provider_id, from_utc, to_utc)
    }

    /// Insert an availability exception.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure.
    pub fn insert_exception(&self, exception: &AvailabilityException) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO availability_exceptions \
             (id, provider_id, kind, starts_at_utc, ends_at_utc, reason) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                exception.id,
                exception.provider_id,
                exception.kind.as_str(),
                exception.starts_at_utc,
                exception.ends_at_utc,
                exception.reason,
            ],
        )?;
        Ok(())
    }

    /// Fetch one exception by id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure or a corrupt row.
    pub fn get_exception(
        &self,
        exception_id: Uuid,
    ) -> Result<Option<AvailabilityException>, StoreError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, provider_id, kind, starts_at_utc, ends_at_utc, reason \
                 FROM availability_exceptions WHERE id = ?1",
                params![exception_id],
                |row| {
                    Ok((
                        row.get::<_, Uuid>(0)?,
                        row.get::<_, Uuid>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, DateTime<Utc>>(3)?,
                        row.get::<_, DateTime<Utc>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, provider_id, kind, starts_at_utc, ends_at_utc, reason)| {
            let kind = ExceptionKind::parse(&kind)
                .ok_or_else(|| StoreError::corrupt(format!("unknown exception kind '{kind}'")))?;
            Ok(AvailabilityException { id, provider_id, kind, starts_at_utc, ends_at_utc, reason })
        })
        .transpose()
    }

    /// Delete one exception; `false` when it did not exist.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure.
    pub fn delete_exception(&self, exception_id: Uuid) -> Result<bool, StoreError> {
        let affected = self.conn().execute(
            "DELETE FROM availability_exceptions WHERE id = ?1",
            params![exception_id],
        )?;
        Ok(affected > 0)
    }
}
