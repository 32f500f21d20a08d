//! Versioned schema of `server.db`.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Runs and schedules
// =============================================================================

const JOB_RUNS_TABLE_V1: Table = Table {
    name: "job_runs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("finished_at", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_job_runs_job_id_started", "job_id, started_at DESC")],
    unique_constraints: &[],
};

const JOB_SCHEDULES_TABLE_V1: Table = Table {
    name: "job_schedules",
    columns: &[
        sqlite_column!("job_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("next_run_at", &SqlType::Text, non_null = true),
        sqlite_column!("last_run_at", &SqlType::Text),
    ],
    indices: &[],
    unique_constraints: &[],
};

// =============================================================================
// Version 2 - Audit trail
// =============================================================================

const JOB_AUDIT_LOG_TABLE_V2: Table = Table {
    name: "job_audit_log",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("event_type", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp", &SqlType::Text, non_null = true),
        sqlite_column!("duration_ms", &SqlType::Integer),
        sqlite_column!("details", &SqlType::Text),
        sqlite_column!("error", &SqlType::Text),
    ],
    indices: &[("idx_job_audit_log_job_id", "job_id, timestamp DESC")],
    unique_constraints: &[],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    JOB_AUDIT_LOG_TABLE_V2.create(conn)
}

// =============================================================================
// Version 3 - Run summaries
// =============================================================================

/// Same as V1 plus `summary`, the JSON counters reported by a completed run.
const JOB_RUNS_TABLE_V3: Table = Table {
    name: "job_runs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("finished_at", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
        sqlite_column!("summary", &SqlType::Text),
    ],
    indices: &[("idx_job_runs_job_id_started", "job_id, started_at DESC")],
    unique_constraints: &[],
};

fn migrate_v2_to_v3(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    conn.execute("ALTER TABLE job_runs ADD COLUMN summary TEXT", [])?;
    Ok(())
}

pub const SERVER_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[JOB_RUNS_TABLE_V1, JOB_SCHEDULES_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            JOB_RUNS_TABLE_V1,
            JOB_SCHEDULES_TABLE_V1,
            JOB_AUDIT_LOG_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
    VersionedSchema {
        version: 3,
        tables: &[
            JOB_RUNS_TABLE_V3,
            JOB_SCHEDULES_TABLE_V1,
            JOB_AUDIT_LOG_TABLE_V2,
        ],
        migration: Some(migrate_v2_to_v3),
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn every_version_creates_and_validates() {
        for schema in SERVER_VERSIONED_SCHEMAS {
            let conn = Connection::open_in_memory().unwrap();
            schema.create(&conn).unwrap();
            schema.validate(&conn).unwrap();
        }
    }

    #[test]
    fn v1_database_migrates_to_latest() {
        let conn = Connection::open_in_memory().unwrap();
        SERVER_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
        conn.execute(
            "INSERT INTO job_runs (job_id, started_at, status, triggered_by)
             VALUES ('student_activity_sweep', '2024-01-01T00:00:00.000Z', 'completed', 'schedule')",
            [],
        )
        .unwrap();

        migrate_v1_to_v2(&conn).unwrap();
        migrate_v2_to_v3(&conn).unwrap();
        SERVER_VERSIONED_SCHEMAS[2].validate(&conn).unwrap();

        let summary: Option<String> = conn
            .query_row("SELECT summary FROM job_runs", [], |r| r.get(0))
            .unwrap();
        assert!(summary.is_none());
    }
}
