//! No-show queue persistence: idempotent upsert and indexed triage reads.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{Store, StoreError};
use crate::risk::{NoShowQueueItem, QueueFilter, QueuePage, QueueStatus, RiskLevel};

const QUEUE_COLUMNS: &str = "\
    id, appointment_id, risk_level, score, reasons_csv, status, city, \
    category, first_detected_at_utc, last_detected_at_utc, resolved_at_utc, \
    resolved_by, resolution_note";

fn row_to_item(row: &Row<'_>) -> Result<NoShowQueueItem, StoreError> {
    let level: String = row.get(2)?;
    let score: i64 = row.get(3)?;
    let status: String = row.get(5)?;

    Ok(NoShowQueueItem {
        id: row.get(0)?,
        appointment_id: row.get(1)?,
        risk_level: RiskLevel::parse(&level)
            .ok_or_else(|| StoreError::corrupt(format!("unknown risk level '{level}'")))?,
        score: score.clamp(0, 100) as u8,
        reasons_csv: row.get(4)?,
        status: QueueStatus::parse(&status)
            .ok_or_else(|| StoreError::corrupt(format!("unknown queue status '{status}'")))?,
        city: row.get(6)?,
        category: row.get(7)?,
        first_detected_at_utc: row.get(8)?,
        last_detected_at_utc: row.get(9)?,
        resolved_at_utc: row.get(10)?,
        resolved_by: row.get(11)?,
        resolution_note: row.get(12)?,
    })
}

impl Store {
    /// The Open/InProgress queue item for an appointment, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure or a corrupt row.
    pub fn active_queue_item(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<NoShowQueueItem>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM no_show_queue \
             WHERE appointment_id = ?1 AND status IN ('open', 'in_progress') LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![appointment_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_item(row)?)),
            None => Ok(None),
        }
    }

    /// Fetch one queue item by id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure or a corrupt row.
    pub fn get_queue_item(&self, item_id: Uuid) -> Result<Option<NoShowQueueItem>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {QUEUE_COLUMNS} FROM no_show_queue WHERE id = ?1"))?;
        let mut rows = stmt.query(params![item_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_item(row)?)),
            None => Ok(None),
        }
    }

    /// Insert a queue item.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure.
    pub fn insert_queue_item(&self, item: &NoShowQueueItem) -> Result<(), StoreError> {
        self.conn().execute(
            &format!(
                "INSERT INTO no_show_queue ({QUEUE_COLUMNS}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                item.id,
                item.appointment_id,
                item.risk_level.as_str(),
                i64::from(item.score),
                item.reasons_csv,
                item.status.as_str(),
                item.city,
                item.category,
                item.first_detected_at_utc,
                item.last_detected_at_utc,
                item.resolved_at_utc,
                item.resolved_by,
                item.resolution_note,
            ],
        )?;
        Ok(())
    }

    /// Persist a mutated queue item.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure.
    pub fn update_queue_item(&self, item: &NoShowQueueItem) -> Result<(), StoreError> {
        self.conn().execute(
            "UPDATE no_show_queue SET \
             risk_level = ?2, score = ?3, reasons_csv = ?4, status = ?5, \
             city = ?6, category = ?7, last_detected_at_utc = ?8, \
             resolved_at_utc = ?9, resolved_by = ?10, resolution_note = ?11 \
             WHERE id = ?1",
            params![
                item.id,
                item.risk_level.as_str(),
                i64::from(item.score),
                item.reasons_csv,
                item.status.as_str(),
                item.city,
                item.category,
                item.last_detected_at_utc,
                item.resolved_at_utc,
                item.resolved_by,
                item.resolution_note,
            ],
        )?;
        Ok(())
    }

    /// Resolve any active queue item of an appointment (used on terminal
    /// booking transitions). Returns whether an item was resolved.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure.
    pub fn resolve_queue_for_appointment(
        &self,
        appointment_id: Uuid,
        note: &str,
        now_utc: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let affected = self.conn().execute(
            "UPDATE no_show_queue SET status = 'resolved', resolved_at_utc = ?2, \
             resolution_note = ?3 \
             WHERE appointment_id = ?1 AND status IN ('open', 'in_progress')",
            params![appointment_id, now_utc, note],
        )?;
        Ok(affected > 0)
    }

    /// Filtered, paginated triage read, newest detections first.
    ///
    /// The filter columns ride the `(status, risk_level,
    /// last_detected_at_utc)` index; city/category narrow the scan.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure or a corrupt row.
    pub fn list_queue_items(&self, filter: &QueueFilter) -> Result<QueuePage, StoreError> {
        let mut clauses: Vec<&'static str> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(status.as_str().to_owned());
        }
        if let Some(level) = filter.risk_level {
            clauses.push("risk_level = ?");
            values.push(level.as_str().to_owned());
        }
        if let Some(city) = &filter.city {
            clauses.push("city = ?");
            values.push(city.clone());
        }
        if let Some(category) = &filter.category {
            clauses.push("category = ?");
            values.push(category.clone());
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let conn = self.conn();

        let count_sql = format!("SELECT COUNT(*) FROM no_show_queue{where_clause}");
        let total: i64 = conn.query_row(
            &count_sql,
            rusqlite::params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let page_sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM no_show_queue{where_clause} \
             ORDER BY last_detected_at_utc DESC LIMIT {} OFFSET {}",
            filter.effective_limit(),
            filter.effective_offset(),
        );
        let mut stmt = conn.prepare(&page_sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(values.iter()))?;

        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(row_to_item(row)?);
        }

        Ok(QueuePage { items, total: total.max(0) as u64 })
    }
}
