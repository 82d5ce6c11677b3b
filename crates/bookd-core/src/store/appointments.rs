//! Appointment and history persistence, including the transactional
//! calendar-conflict checks.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{Store, StoreError};
use crate::appointment::entity::{Appointment, AppointmentHistory, HistoryMetadata};
use crate::appointment::state::{ActorRole, AppointmentStatus, OperationalStatus};
use crate::availability::{self, AvailabilityException, AvailabilityRule, ExceptionKind};
use crate::risk::RiskLevel;

/// Result of a transactional appointment insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Inserted; the window was free at commit time.
    Created,
    /// The request already has a non-terminal appointment.
    RequestAlreadyBooked,
    /// The window failed the availability predicate at commit time.
    SlotUnavailable,
}

/// Result of a transactional reschedule commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescheduleOutcome {
    /// The proposed window was committed.
    Committed,
    /// Another appointment claimed the window meanwhile.
    SlotUnavailable,
}

const APPOINTMENT_COLUMNS: &str = "\
    id, service_request_id, client_id, provider_id, \
    window_start_utc, window_end_utc, status, expires_at_utc, reason, \
    proposed_window_start_utc, proposed_window_end_utc, \
    reschedule_requested_at_utc, reschedule_requested_by_role, \
    reschedule_request_reason, confirmed_at_utc, arrived_at_utc, \
    arrived_latitude, arrived_longitude, arrived_accuracy_meters, \
    arrived_manual_reason, started_at_utc, rejected_at_utc, \
    cancelled_at_utc, completed_at_utc, operational_status, \
    operational_status_updated_at_utc, operational_status_reason, \
    client_presence_confirmed, client_presence_responded_at_utc, \
    client_presence_reason, provider_presence_confirmed, \
    provider_presence_responded_at_utc, provider_presence_reason, \
    no_show_risk_score, no_show_risk_level, no_show_risk_reasons, \
    no_show_risk_calculated_at_utc, created_at, updated_at";

fn parse_status(value: &str) -> Result<AppointmentStatus, StoreError> {
    AppointmentStatus::parse(value)
        .ok_or_else(|| StoreError::corrupt(format!("unknown appointment status '{value}'")))
}

fn parse_role(value: &str) -> Result<ActorRole, StoreError> {
    ActorRole::parse(value)
        .ok_or_else(|| StoreError::corrupt(format!("unknown actor role '{value}'")))
}

fn parse_operational(value: &str) -> Result<OperationalStatus, StoreError> {
    OperationalStatus::parse(value)
        .ok_or_else(|| StoreError::corrupt(format!("unknown operational status '{value}'")))
}

fn parse_risk_level(value: &str) -> Result<RiskLevel, StoreError> {
    RiskLevel::parse(value)
        .ok_or_else(|| StoreError::corrupt(format!("unknown risk level '{value}'")))
}

fn row_to_appointment(row: &Row<'_>) -> Result<Appointment, StoreError> {
    let status: String = row.get(6)?;
    let reschedule_role: Option<String> = row.get(12)?;
    let operational: Option<String> = row.get(24)?;
    let risk_score: Option<i64> = row.get(33)?;
    let risk_level: Option<String> = row.get(34)?;

    Ok(Appointment {
        id: row.get(0)?,
        service_request_id: row.get(1)?,
        client_id: row.get(2)?,
        provider_id: row.get(3)?,
        window_start_utc: row.get(4)?,
        window_end_utc: row.get(5)?,
        status: parse_status(&status)?,
        expires_at_utc: row.get(7)?,
        reason: row.get(8)?,
        proposed_window_start_utc: row.get(9)?,
        proposed_window_end_utc: row.get(10)?,
        reschedule_requested_at_utc: row.get(11)?,
        reschedule_requested_by_role: reschedule_role.as_deref().map(parse_role).transpose()?,
        reschedule_request_reason: row.get(13)?,
        confirmed_at_utc: row.get(14)?,
        arrived_at_utc: row.get(15)?,
        arrived_latitude: row.get(16)?,
        arrived_longitude: row.get(17)?,
        arrived_accuracy_meters: row.get(18)?,
        arrived_manual_reason: row.get(19)?,
        started_at_utc: row.get(20)?,
        rejected_at_utc: row.get(21)?,
        cancelled_at_utc: row.get(22)?,
        completed_at_utc: row.get(23)?,
        operational_status: operational.as_deref().map(parse_operational).transpose()?,
        operational_status_updated_at_utc: row.get(25)?,
        operational_status_reason: row.get(26)?,
        client_presence_confirmed: row.get(27)?,
        client_presence_responded_at_utc: row.get(28)?,
        client_presence_reason: row.get(29)?,
        provider_presence_confirmed: row.get(30)?,
        provider_presence_responded_at_utc: row.get(31)?,
        provider_presence_reason: row.get(32)?,
        no_show_risk_score: risk_score.map(|s| s.clamp(0, 100) as u8),
        no_show_risk_level: risk_level.as_deref().map(parse_risk_level).transpose()?,
        no_show_risk_reasons: row.get(35)?,
        no_show_risk_calculated_at_utc: row.get(36)?,
        created_at: row.get(37)?,
        updated_at: row.get(38)?,
    })
}

fn insert_appointment(conn: &Connection, a: &Appointment) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT INTO appointments ({APPOINTMENT_COLUMNS}) VALUES (\
             ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, \
             ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, \
             ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34, ?35, ?36, ?37, ?38, ?39)"
        ),
        params![
            a.id,
            a.service_request_id,
            a.client_id,
            a.provider_id,
            a.window_start_utc,
            a.window_end_utc,
            a.status.as_str(),
            a.expires_at_utc,
            a.reason,
            a.proposed_window_start_utc,
            a.proposed_window_end_utc,
            a.reschedule_requested_at_utc,
            a.reschedule_requested_by_role.map(ActorRole::as_str),
            a.reschedule_request_reason,
            a.confirmed_at_utc,
            a.arrived_at_utc,
            a.arrived_latitude,
            a.arrived_longitude,
            a.arrived_accuracy_meters,
            a.arrived_manual_reason,
            a.started_at_utc,
            a.rejected_at_utc,
            a.cancelled_at_utc,
            a.completed_at_utc,
            a.operational_status.map(OperationalStatus::as_str),
            a.operational_status_updated_at_utc,
            a.operational_status_reason,
            a.client_presence_confirmed,
            a.client_presence_responded_at_utc,
            a.client_presence_reason,
            a.provider_presence_confirmed,
            a.provider_presence_responded_at_utc,
            a.provider_presence_reason,
            a.no_show_risk_score.map(i64::from),
            a.no_show_risk_level.map(RiskLevel::as_str),
            a.no_show_risk_reasons,
            a.no_show_risk_calculated_at_utc,
            a.created_at,
            a.updated_at,
        ],
    )?;
    Ok(())
}

fn insert_history(conn: &Connection, h: &AppointmentHistory) -> Result<(), StoreError> {
    let metadata = h
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StoreError::corrupt(format!("unserializable history metadata: {e}")))?;

    conn.execute(
        "INSERT INTO appointment_history (\
         id, appointment_id, previous_status, new_status, actor_user_id, \
         actor_role, reason, previous_operational_status, \
         new_operational_status, metadata, occurred_at_utc) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            h.id,
            h.appointment_id,
            h.previous_status.map(AppointmentStatus::as_str),
            h.new_status.as_str(),
            h.actor_user_id,
            h.actor_role.as_str(),
            h.reason,
            h.previous_operational_status.map(OperationalStatus::as_str),
            h.new_operational_status.map(OperationalStatus::as_str),
            metadata,
            h.occurred_at_utc,
        ],
    )?;
    Ok(())
}

pub(super) fn rules_for_conn(
    conn: &Connection,
    provider_id: Uuid,
) -> Result<Vec<AvailabilityRule>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, provider_id, weekday, start_minute, end_minute, slot_minutes, active \
         FROM availability_rules WHERE provider_id = ?1",
    )?;
    let rows = stmt.query_map(params![provider_id], |row| {
        Ok((
            row.get::<_, Uuid>(0)?,
            row.get::<_, Uuid>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, i64>(5)?,
            row.get::<_, bool>(6)?,
        ))
    })?;

    let mut rules = Vec::new();
    for row in rows {
        let (id, provider_id, weekday, start_minute, end_minute, slot_minutes, active) = row?;
        rules.push(AvailabilityRule {
            id,
            provider_id,
            weekday: super::availability::weekday_from_index(weekday)?,
            start_minute: start_minute as u32,
            end_minute: end_minute as u32,
            slot_minutes: slot_minutes as u32,
            active,
        });
    }
    Ok(rules)
}

pub(super) fn exceptions_overlapping_conn(
    conn: &Connection,
    provider_id: Uuid,
    from_utc: DateTime<Utc>,
    to_utc: DateTime<Utc>,
) -> Result<Vec<AvailabilityException>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, provider_id, kind, starts_at_utc, ends_at_utc, reason \
         FROM availability_exceptions \
         WHERE provider_id = ?1 AND starts_at_utc < ?3 AND ends_at_utc > ?2",
    )?;
    let rows = stmt.query_map(params![provider_id, from_utc, to_utc], |row| {
        Ok((
            row.get::<_, Uuid>(0)?,
            row.get::<_, Uuid>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, DateTime<Utc>>(3)?,
            row.get::<_, DateTime<Utc>>(4)?,
            row.get::<_, Option<String>>(5)?,
        ))
    })?;

    let mut exceptions = Vec::new();
    for row in rows {
        let (id, provider_id, kind, starts_at_utc, ends_at_utc, reason) = row?;
        let kind = ExceptionKind::parse(&kind)
            .ok_or_else(|| StoreError::corrupt(format!("unknown exception kind '{kind}'")))?;
        exceptions.push(AvailabilityException {
            id,
            provider_id,
            kind,
            starts_at_utc,
            ends_at_utc,
            reason,
        });
    }
    Ok(exceptions)
}

fn blocking_windows_conn(
    conn: &Connection,
    provider_id: Uuid,
    from_utc: DateTime<Utc>,
    to_utc: DateTime<Utc>,
    exclude: Option<Uuid>,
) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, StoreError> {
    let terminal = terminal_status_list();
    let sql = format!(
        "SELECT id, window_start_utc, window_end_utc FROM appointments \
         WHERE provider_id = ?1 AND window_start_utc < ?3 AND window_end_utc > ?2 \
         AND status NOT IN ({terminal})"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![provider_id, from_utc, to_utc], |row| {
        Ok((
            row.get::<_, Uuid>(0)?,
            row.get::<_, DateTime<Utc>>(1)?,
            row.get::<_, DateTime<Utc>>(2)?,
        ))
    })?;

    let mut windows = Vec::new();
    for row in rows {
        let (id, start, end) = row?;
        if exclude != Some(id) {
            windows.push((start, end));
        }
    }
    Ok(windows)
}

fn terminal_status_list() -> String {
    [
        AppointmentStatus::Completed,
        AppointmentStatus::RejectedByProvider,
        AppointmentStatus::ExpiredWithoutProviderAction,
        AppointmentStatus::CancelledByClient,
        AppointmentStatus::CancelledByProvider,
    ]
    .iter()
    .map(|s| format!("'{}'", s.as_str()))
    .collect::<Vec<_>>()
    .join(", ")
}

fn window_free_conn(
    conn: &Connection,
    provider_id: Uuid,
    window_start_utc: DateTime<Utc>,
    window_end_utc: DateTime<Utc>,
    exclude: Option<Uuid>,
) -> Result<bool, StoreError> {
    let rules = rules_for_conn(conn, provider_id)?;
    let exceptions =
        exceptions_overlapping_conn(conn, provider_id, window_start_utc, window_end_utc)?;
    let busy =
        blocking_windows_conn(conn, provider_id, window_start_utc, window_end_utc, exclude)?;
    Ok(availability::window_is_free(
        &rules,
        &exceptions,
        &busy,
        window_start_utc,
        window_end_utc,
    ))
}

impl Store {
    /// Insert an appointment plus its creation history row, re-checking the
    /// uniqueness and availability predicates inside the same transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure; conflicts surface as
    /// [`CreateOutcome`] variants.
    pub fn create_appointment_if_free(
        &self,
        appointment: &Appointment,
        creation_history: &AppointmentHistory,
    ) -> Result<CreateOutcome, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let terminal = terminal_status_list();
        let existing: Option<Uuid> = tx
            .query_row(
                &format!(
                    "SELECT id FROM appointments \
                     WHERE service_request_id = ?1 AND status NOT IN ({terminal}) LIMIT 1"
                ),
                params![appointment.service_request_id],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(CreateOutcome::RequestAlreadyBooked);
        }

        if !window_free_conn(
            &tx,
            appointment.provider_id,
            appointment.window_start_utc,
            appointment.window_end_utc,
            None,
        )? {
            return Ok(CreateOutcome::SlotUnavailable);
        }

        insert_appointment(&tx, appointment)?;
        insert_history(&tx, creation_history)?;
        tx.commit()?;
        Ok(CreateOutcome::Created)
    }

    /// Commit an accepted reschedule: re-check the proposed window against
    /// the provider's calendar (excluding this appointment), then persist
    /// the updated row and its history entry atomically.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure; a lost race surfaces
    /// as [`RescheduleOutcome::SlotUnavailable`].
    pub fn commit_reschedule_if_free(
        &self,
        appointment: &Appointment,
        history: &AppointmentHistory,
    ) -> Result<RescheduleOutcome, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        if !window_free_conn(
            &tx,
            appointment.provider_id,
            appointment.window_start_utc,
            appointment.window_end_utc,
            Some(appointment.id),
        )? {
            return Ok(RescheduleOutcome::SlotUnavailable);
        }

        update_appointment_conn(&tx, appointment)?;
        insert_history(&tx, history)?;
        tx.commit()?;
        Ok(RescheduleOutcome::Committed)
    }

    /// Fetch an appointment by id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure or a corrupt row.
    pub fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"
        ))?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_appointment(row)?)),
            None => Ok(None),
        }
    }

    /// Persist an updated appointment together with one history row, in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure.
    pub fn update_appointment_with_history(
        &self,
        appointment: &Appointment,
        history: &AppointmentHistory,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        update_appointment_conn(&tx, appointment)?;
        insert_history(&tx, history)?;
        tx.commit()?;
        Ok(())
    }

    /// Persist an updated appointment without a history row (used when the
    /// scorer refreshes risk fields with an unchanged assessment).
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure.
    pub fn update_appointment(&self, appointment: &Appointment) -> Result<(), StoreError> {
        update_appointment_conn(&self.conn(), appointment)
    }

    /// Append one history row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure.
    pub fn append_history(&self, history: &AppointmentHistory) -> Result<(), StoreError> {
        insert_history(&self.conn(), history)
    }

    /// The audit trail of an appointment, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure or a corrupt row.
    pub fn history_for(&self, appointment_id: Uuid) -> Result<Vec<AppointmentHistory>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, appointment_id, previous_status, new_status, actor_user_id, \
             actor_role, reason, previous_operational_status, new_operational_status, \
             metadata, occurred_at_utc \
             FROM appointment_history WHERE appointment_id = ?1 ORDER BY occurred_at_utc",
        )?;
        let mut rows = stmt.query(params![appointment_id])?;

        let mut history = Vec::new();
        while let Some(row) = rows.next()? {
            let previous_status: Option<String> = row.get(2)?;
            let new_status: String = row.get(3)?;
            let actor_role: String = row.get(5)?;
            let previous_op: Option<String> = row.get(7)?;
            let new_op: Option<String> = row.get(8)?;
            let metadata: Option<String> = row.get(9)?;

            history.push(AppointmentHistory {
                id: row.get(0)?,
                appointment_id: row.get(1)?,
                previous_status: previous_status.as_deref().map(parse_status).transpose()?,
                new_status: parse_status(&new_status)?,
                actor_user_id: row.get(4)?,
                actor_role: parse_role(&actor_role)?,
                reason: row.get(6)?,
                previous_operational_status: previous_op
                    .as_deref()
                    .map(parse_operational)
                    .transpose()?,
                new_operational_status: new_op.as_deref().map(parse_operational).transpose()?,
                metadata: metadata
                    .as_deref()
                    .map(serde_json::from_str::<HistoryMetadata>)
                    .transpose()
                    .map_err(|e| StoreError::corrupt(format!("bad history metadata: {e}")))?,
                occurred_at_utc: row.get(10)?,
            });
        }
        Ok(history)
    }

    /// The non-terminal appointment for a request, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure or a corrupt row.
    pub fn find_active_by_request(
        &self,
        service_request_id: Uuid,
    ) -> Result<Option<Appointment>, StoreError> {
        let conn = self.conn();
        let terminal = terminal_status_list();
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments \
             WHERE service_request_id = ?1 AND status NOT IN ({terminal}) LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![service_request_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_appointment(row)?)),
            None => Ok(None),
        }
    }

    /// Appointments where the given user is a party, optionally bounded to
    /// windows intersecting `[from, to)`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure or a corrupt row.
    pub fn list_for_party(
        &self,
        user_id: Uuid,
        from_utc: Option<DateTime<Utc>>,
        to_utc: Option<DateTime<Utc>>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let from = from_utc.unwrap_or_else(|| {
            DateTime::from_timestamp(0, 0).expect("epoch is representable")
        });
        let to = to_utc.unwrap_or_else(|| {
            // 9999-12-31T23:59:59Z.
            DateTime::from_timestamp(253_402_300_799, 0).expect("year 9999 is representable")
        });

        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments \
             WHERE (client_id = ?1 OR provider_id = ?1) \
             AND window_end_utc > ?2 AND window_start_utc < ?3 \
             ORDER BY window_start_utc"
        ))?;
        let mut rows = stmt.query(params![user_id, from, to])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_appointment(row)?);
        }
        Ok(out)
    }

    /// Windows of appointments blocking the provider's calendar over a
    /// range, optionally excluding one appointment (its own window must not
    /// block a reschedule of itself).
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure.
    pub fn blocking_windows(
        &self,
        provider_id: Uuid,
        from_utc: DateTime<Utc>,
        to_utc: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, StoreError> {
        blocking_windows_conn(&self.conn(), provider_id, from_utc, to_utc, exclude)
    }

    /// One page of pending appointments whose confirmation deadline passed.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure or a corrupt row.
    pub fn expired_pending(
        &self,
        now_utc: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Appointment>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments \
             WHERE status = ?1 AND expires_at_utc IS NOT NULL AND expires_at_utc <= ?2 \
             ORDER BY expires_at_utc LIMIT ?3"
        ))?;
        let mut rows = stmt.query(params![
            AppointmentStatus::PendingProviderConfirmation.as_str(),
            now_utc,
            i64::from(limit),
        ])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_appointment(row)?);
        }
        Ok(out)
    }

    /// One page of risk-sweep candidates: calendar-blocking appointments
    /// whose window starts inside `[from, to)`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure or a corrupt row.
    pub fn risk_candidates(
        &self,
        from_utc: DateTime<Utc>,
        to_utc: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Appointment>, StoreError> {
        let conn = self.conn();
        let terminal = terminal_status_list();
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments \
             WHERE status NOT IN ({terminal}) \
             AND window_start_utc >= ?1 AND window_start_utc < ?2 \
             ORDER BY window_start_utc LIMIT ?3"
        ))?;
        let mut rows = stmt.query(params![from_utc, to_utc, i64::from(limit)])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_appointment(row)?);
        }
        Ok(out)
    }

    /// Client-fault risk events (cancellations) inside a lookback range.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure.
    pub fn count_client_risk_events(
        &self,
        client_id: Uuid,
        from_utc: DateTime<Utc>,
        to_utc: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM appointments \
             WHERE client_id = ?1 AND status = ?2 \
             AND cancelled_at_utc >= ?3 AND cancelled_at_utc < ?4",
            params![
                client_id,
                AppointmentStatus::CancelledByClient.as_str(),
                from_utc,
                to_utc
            ],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u32)
    }

    /// Provider-fault risk events (cancellations and silent expiries)
    /// inside a lookback range.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure.
    pub fn count_provider_risk_events(
        &self,
        provider_id: Uuid,
        from_utc: DateTime<Utc>,
        to_utc: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM appointments \
             WHERE provider_id = ?1 AND status IN (?2, ?3) \
             AND COALESCE(cancelled_at_utc, updated_at, created_at) >= ?4 \
             AND COALESCE(cancelled_at_utc, updated_at, created_at) < ?5",
            params![
                provider_id,
                AppointmentStatus::CancelledByProvider.as_str(),
                AppointmentStatus::ExpiredWithoutProviderAction.as_str(),
                from_utc,
                to_utc
            ],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u32)
    }
}

fn update_appointment_conn(conn: &Connection, a: &Appointment) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE appointments SET \
         window_start_utc = ?2, window_end_utc = ?3, status = ?4, \
         expires_at_utc = ?5, reason = ?6, proposed_window_start_utc = ?7, \
         proposed_window_end_utc = ?8, reschedule_requested_at_utc = ?9, \
         reschedule_requested_by_role = ?10, reschedule_request_reason = ?11, \
         confirmed_at_utc = ?12, arrived_at_utc = ?13, arrived_latitude = ?14, \
         arrived_longitude = ?15, arrived_accuracy_meters = ?16, \
         arrived_manual_reason = ?17, started_at_utc = ?18, rejected_at_utc = ?19, \
         cancelled_at_utc = ?20, completed_at_utc = ?21, operational_status = ?22, \
         operational_status_updated_at_utc = ?23, operational_status_reason = ?24, \
         client_presence_confirmed = ?25, client_presence_responded_at_utc = ?26, \
         client_presence_reason = ?27, provider_presence_confirmed = ?28, \
         provider_presence_responded_at_utc = ?29, provider_presence_reason = ?30, \
         no_show_risk_score = ?31, no_show_risk_level = ?32, \
         no_show_risk_reasons = ?33, no_show_risk_calculated_at_utc = ?34, \
         updated_at = ?35 \
         WHERE id = ?1",
        params![
            a.id,
            a.window_start_utc,
            a.window_end_utc,
            a.status.as_str(),
            a.expires_at_utc,
            a.reason,
            a.proposed_window_start_utc,
            a.proposed_window_end_utc,
            a.reschedule_requested_at_utc,
            a.reschedule_requested_by_role.map(ActorRole::as_str),
            a.reschedule_request_reason,
            a.confirmed_at_utc,
            a.arrived_at_utc,
            a.arrived_latitude,
            a.arrived_longitude,
            a.arrived_accuracy_meters,
            a.arrived_manual_reason,
            a.started_at_utc,
            a.rejected_at_utc,
            a.cancelled_at_utc,
            a.completed_at_utc,
            a.operational_status.map(OperationalStatus::as_str),
            a.operational_status_updated_at_utc,
            a.operational_status_reason,
            a.client_presence_confirmed,
            a.client_presence_responded_at_utc,
            a.client_presence_reason,
            a.provider_presence_confirmed,
            a.provider_presence_responded_at_utc,
            a.provider_presence_reason,
            a.no_show_risk_score.map(i64::from),
            a.no_show_risk_level.map(RiskLevel::as_str),
            a.no_show_risk_reasons,
            a.no_show_risk_calculated_at_utc,
            a.updated_at,
        ],
    )?;
    Ok(())
}
