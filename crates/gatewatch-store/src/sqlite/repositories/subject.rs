//! Subject repository; resolution of candidate keys to persisted
//! subjects, plus batched resolution for the bulk-ingest path.

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, params};

use gatewatch_core::{SubjectKey, new_id, now_rfc3339};

use crate::errors::Result;
use crate::sqlite::row_types::SubjectRow;

fn row_to_subject(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubjectRow> {
    Ok(SubjectRow {
        id: row.get(0)?,
        employee_no: row.get(1)?,
        display_name: row.get(2)?,
        active: row.get(3)?,
        created_at: row.get(4)?,
    })
}

const SELECT_COLS: &str = "id, employee_no, display_name, active, created_at";

/// Subject repository; stateless, every method takes `&Connection`.
pub struct SubjectRepo;

impl SubjectRepo {
    /// Get subject by store ID.
    pub fn get_by_id(conn: &Connection, subject_id: &str) -> Result<Option<SubjectRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLS} FROM subjects WHERE id = ?1"),
                params![subject_id],
                row_to_subject,
            )
            .optional()?;
        Ok(row)
    }

    /// Resolve one candidate key: external-id mapping first, then direct
    /// employee-number match.
    pub fn resolve(conn: &Connection, key: &SubjectKey) -> Result<Option<SubjectRow>> {
        let row = match key {
            SubjectKey::EmployeeNo { no } => conn
                .query_row(
                    &format!("SELECT {SELECT_COLS} FROM subjects WHERE employee_no = ?1"),
                    params![no],
                    row_to_subject,
                )
                .optional()?,
            SubjectKey::External { system, id } => conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLS} FROM subjects s
                         JOIN subject_external_ids x ON x.subject_id = s.id
                         WHERE x.system = ?1 AND x.external_id = ?2"
                    ),
                    params![system, id],
                    row_to_subject,
                )
                .optional()?,
        };
        Ok(row)
    }

    /// Resolve many distinct keys with at most one query per key shape.
    ///
    /// The bulk-ingest path depends on this: per-event sequential lookups
    /// are the dominant cost at scale.
    pub fn resolve_many(
        conn: &Connection,
        keys: &[SubjectKey],
    ) -> Result<HashMap<SubjectKey, SubjectRow>> {
        let mut out = HashMap::new();

        let employee_nos: Vec<&str> = keys
            .iter()
            .filter_map(|k| match k {
                SubjectKey::EmployeeNo { no } => Some(no.as_str()),
                SubjectKey::External { .. } => None,
            })
            .collect();
        if !employee_nos.is_empty() {
            let placeholders = vec!["?"; employee_nos.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLS} FROM subjects WHERE employee_no IN ({placeholders})"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(&employee_nos), row_to_subject)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for row in rows {
                if let Some(no) = row.employee_no.clone() {
                    let _ = out.insert(SubjectKey::EmployeeNo { no }, row);
                }
            }
        }

        // SQLite has no tuple IN; match on a joined token. System and
        // external id never contain '\u{1f}'.
        let externals: Vec<String> = keys
            .iter()
            .filter_map(|k| match k {
                SubjectKey::External { system, id } => Some(format!("{system}\u{1f}{id}")),
                SubjectKey::EmployeeNo { .. } => None,
            })
            .collect();
        if !externals.is_empty() {
            let placeholders = vec!["?"; externals.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLS}, x.system, x.external_id
                 FROM subjects s
                 JOIN subject_external_ids x ON x.subject_id = s.id
                 WHERE x.system || char(31) || x.external_id IN ({placeholders})"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(&externals), |row| {
                    let subject = row_to_subject(row)?;
                    let system: String = row.get(5)?;
                    let external_id: String = row.get(6)?;
                    Ok((subject, system, external_id))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for (subject, system, id) in rows {
                let _ = out.insert(SubjectKey::External { system, id }, subject);
            }
        }

        Ok(out)
    }

    /// Create a subject, optionally with an external-id mapping.
    ///
    /// Used by seeding and by pull-source auto-provisioning (when
    /// enabled in settings).
    pub fn create(
        conn: &Connection,
        employee_no: Option<&str>,
        display_name: Option<&str>,
        external: Option<(&str, &str)>,
    ) -> Result<SubjectRow> {
        let id = new_id("subj");
        let now = now_rfc3339();
        let _ = conn.execute(
            "INSERT INTO subjects (id, employee_no, display_name, active, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![id, employee_no, display_name, now],
        )?;
        if let Some((system, external_id)) = external {
            let _ = conn.execute(
                "INSERT INTO subject_external_ids (subject_id, system, external_id)
                 VALUES (?1, ?2, ?3)",
                params![id, system, external_id],
            )?;
        }
        Ok(SubjectRow {
            id,
            employee_no: employee_no.map(String::from),
            display_name: display_name.map(String::from),
            active: true,
            created_at: now,
        })
    }

    /// Add an external-id mapping to an existing subject.
    pub fn add_external_id(
        conn: &Connection,
        subject_id: &str,
        system: &str,
        external_id: &str,
    ) -> Result<()> {
        let _ = conn.execute(
            "INSERT OR IGNORE INTO subject_external_ids (subject_id, system, external_id)
             VALUES (?1, ?2, ?3)",
            params![subject_id, system, external_id],
        )?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::sqlite::migrations::run_migrations;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn resolve_by_employee_no() {
        let conn = setup();
        let created = SubjectRepo::create(&conn, Some("E-100"), Some("Anvar K."), None).unwrap();

        let found = SubjectRepo::resolve(&conn, &SubjectKey::employee_no("E-100"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
    }

    #[test]
    fn resolve_by_external_id() {
        let conn = setup();
        let created =
            SubjectRepo::create(&conn, Some("E-200"), None, Some(("EXAM_PORTAL", "4711"))).unwrap();

        let found = SubjectRepo::resolve(&conn, &SubjectKey::external("EXAM_PORTAL", "4711"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
    }

    #[test]
    fn resolve_unknown_key_is_none() {
        let conn = setup();
        assert!(
            SubjectRepo::resolve(&conn, &SubjectKey::employee_no("nobody"))
                .unwrap()
                .is_none()
        );
        assert!(
            SubjectRepo::resolve(&conn, &SubjectKey::external("X", "1"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn resolve_many_mixed_keys() {
        let conn = setup();
        let a = SubjectRepo::create(&conn, Some("E-1"), None, None).unwrap();
        let b = SubjectRepo::create(&conn, Some("E-2"), None, Some(("PORTAL", "77"))).unwrap();
        SubjectRepo::create(&conn, Some("E-3"), None, None).unwrap();

        let keys = vec![
            SubjectKey::employee_no("E-1"),
            SubjectKey::external("PORTAL", "77"),
            SubjectKey::employee_no("missing"),
        ];
        let resolved = SubjectRepo::resolve_many(&conn, &keys).unwrap();

        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[&SubjectKey::employee_no("E-1")].id, a.id);
        assert_eq!(resolved[&SubjectKey::external("PORTAL", "77")].id, b.id);
        assert!(!resolved.contains_key(&SubjectKey::employee_no("missing")));
    }

    #[test]
    fn duplicate_employee_no_fails() {
        let conn = setup();
        SubjectRepo::create(&conn, Some("E-1"), None, None).unwrap();
        assert!(SubjectRepo::create(&conn, Some("E-1"), None, None).is_err());
    }

    #[test]
    fn add_external_id_is_idempotent() {
        let conn = setup();
        let s = SubjectRepo::create(&conn, Some("E-1"), None, None).unwrap();
        SubjectRepo::add_external_id(&conn, &s.id, "PORTAL", "9").unwrap();
        SubjectRepo::add_external_id(&conn, &s.id, "PORTAL", "9").unwrap();

        let found = SubjectRepo::resolve(&conn, &SubjectKey::external("PORTAL", "9"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, s.id);
    }
}
