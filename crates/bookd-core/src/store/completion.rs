//! Completion term persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{Store, StoreError};
use crate::completion::{AcceptanceMethod, CompletionTerm, TermStatus};

const TERM_COLUMNS: &str = "\
    id, service_request_id, appointment_id, provider_id, client_id, status, \
    accepted_with, pin_hash, pin_expires_at_utc, pin_failed_attempts, \
    accepted_at_utc, accepted_signature_name, contested_at_utc, \
    contest_reason, escalated_at_utc, summary, created_at, updated_at";

fn row_to_term(row: &Row<'_>) -> Result<CompletionTerm, StoreError> {
    let status: String = row.get(5)?;
    let accepted_with: Option<String> = row.get(6)?;
    let attempts: i64 = row.get(9)?;

    Ok(CompletionTerm {
        id: row.get(0)?,
        service_request_id: row.get(1)?,
        appointment_id: row.get(2)?,
        provider_id: row.get(3)?,
        client_id: row.get(4)?,
        status: TermStatus::parse(&status)
            .ok_or_else(|| StoreError::corrupt(format!("unknown term status '{status}'")))?,
        accepted_with: accepted_with
            .as_deref()
            .map(|m| {
                AcceptanceMethod::parse(m).ok_or_else(|| {
                    StoreError::corrupt(format!("unknown acceptance method '{m}'"))
                })
            })
            .transpose()?,
        pin_hash: row.get(7)?,
        pin_expires_at_utc: row.get::<_, Option<DateTime<Utc>>>(8)?,
        pin_failed_attempts: attempts.max(0) as u32,
        accepted_at_utc: row.get(10)?,
        accepted_signature_name: row.get(11)?,
        contested_at_utc: row.get(12)?,
        contest_reason: row.get(13)?,
        escalated_at_utc: row.get(14)?,
        summary: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

impl Store {
    /// The completion term of an appointment, if one exists (at most one).
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure or a corrupt row.
    pub fn term_for_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<CompletionTerm>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TERM_COLUMNS} FROM completion_terms WHERE appointment_id = ?1"
        ))?;
        let mut rows = stmt.query(params![appointment_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_term(row)?)),
            None => Ok(None),
        }
    }

    /// Insert a completion term.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure (including the
    /// one-term-per-appointment uniqueness constraint).
    pub fn insert_term(&self, term: &CompletionTerm) -> Result<(), StoreError> {
        self.conn().execute(
            &format!(
                "INSERT INTO completion_terms ({TERM_COLUMNS}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
            ),
            params![
                term.id,
                term.service_request_id,
                term.appointment_id,
                term.provider_id,
                term.client_id,
                term.status.as_str(),
                term.accepted_with.map(AcceptanceMethod::as_str),
                term.pin_hash,
                term.pin_expires_at_utc,
                i64::from(term.pin_failed_attempts),
                term.accepted_at_utc,
                term.accepted_signature_name,
                term.contested_at_utc,
                term.contest_reason,
                term.escalated_at_utc,
                term.summary,
                term.created_at,
                term.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Persist a mutated completion term.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure.
    pub fn update_term(&self, term: &CompletionTerm) -> Result<(), StoreError> {
        self.conn().execute(
            "UPDATE completion_terms SET \
             status = ?2, accepted_with = ?3, pin_hash = ?4, pin_expires_at_utc = ?5, \
             pin_failed_attempts = ?6, accepted_at_utc = ?7, accepted_signature_name = ?8, \
             contested_at_utc = ?9, contest_reason = ?10, escalated_at_utc = ?11, \
             updated_at = ?12 \
             WHERE id = ?1",
            params![
                term.id,
                term.status.as_str(),
                term.accepted_with.map(AcceptanceMethod::as_str),
                term.pin_hash,
                term.pin_expires_at_utc,
                i64::from(term.pin_failed_attempts),
                term.accepted_at_utc,
                term.accepted_signature_name,
                term.contested_at_utc,
                term.contest_reason,
                term.escalated_at_utc,
                term.updated_at,
            ],
        )?;
        Ok(())
    }
}
