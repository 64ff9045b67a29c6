// SPDX-License-Identifier: Apache-2.0

//! Read-only inspection commands over the log store and the relation
//! store. These never start a run of their own.

use rusqlite::{params, Connection, OpenFlags};
use seqlink_core::{Config, ExitCode};
use seqlink_store::DblinkReader;
use std::collections::BTreeMap;

fn open_log_db(config: &Config) -> Result<Connection, String> {
    let path = config.log_db_path();
    if !path.exists() {
        return Err(format!("log store not found: {}", path.display()));
    }
    Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(|e| e.to_string())
}

fn latest_run_id(db: &Connection) -> Result<Option<String>, String> {
    let mut stmt = db
        .prepare("SELECT run_id FROM runs ORDER BY started_at DESC LIMIT 1")
        .map_err(|e| e.to_string())?;
    let mut rows = stmt.query([]).map_err(|e| e.to_string())?;
    match rows.next().map_err(|e| e.to_string())? {
        Some(row) => Ok(Some(row.get(0).map_err(|e| e.to_string())?)),
        None => Ok(None),
    }
}

pub fn show_log(
    config: &Config,
    run_id: Option<&str>,
    level: Option<&str>,
    limit: usize,
) -> ExitCode {
    match show_log_inner(config, run_id, level, limit) {
        Ok(()) => ExitCode::Success,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::StepFailed
        }
    }
}

fn show_log_inner(
    config: &Config,
    run_id: Option<&str>,
    level: Option<&str>,
    limit: usize,
) -> Result<(), String> {
    let db = open_log_db(config)?;
    let run_id = match run_id {
        Some(id) => id.to_string(),
        None => latest_run_id(&db)?.ok_or_else(|| "no runs recorded".to_string())?,
    };
    let level_filter = level.map(str::to_ascii_uppercase);

    let mut stmt = db
        .prepare(
            "SELECT ts, level, msg, file, accession, source, debug_category, error
             FROM records WHERE run_id = ?1 AND (?2 IS NULL OR level = ?2)
             ORDER BY ts LIMIT ?3",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![run_id, level_filter, limit as i64], |row| {
            Ok(serde_json::json!({
                "ts": row.get::<_, String>(0)?,
                "level": row.get::<_, String>(1)?,
                "run_id": run_id.as_str(),
                "msg": row.get::<_, Option<String>>(2)?,
                "file": row.get::<_, Option<String>>(3)?,
                "accession": row.get::<_, Option<String>>(4)?,
                "source": row.get::<_, Option<String>>(5)?,
                "debug_category": row.get::<_, Option<String>>(6)?,
                "error": row.get::<_, Option<String>>(7)?,
            }))
        })
        .map_err(|e| e.to_string())?;
    for row in rows {
        let value = row.map_err(|e| e.to_string())?;
        println!("{value}");
    }
    Ok(())
}

pub fn show_log_summary(config: &Config, run_id: Option<&str>) -> ExitCode {
    match show_log_summary_inner(config, run_id) {
        Ok(()) => ExitCode::Success,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::StepFailed
        }
    }
}

fn show_log_summary_inner(config: &Config, run_id: Option<&str>) -> Result<(), String> {
    let db = open_log_db(config)?;
    let run_id = match run_id {
        Some(id) => id.to_string(),
        None => latest_run_id(&db)?.ok_or_else(|| "no runs recorded".to_string())?,
    };

    let (run_name, started_at, ended_at, status): (String, String, Option<String>, String) = db
        .query_row(
            "SELECT run_name, started_at, ended_at, status FROM runs WHERE run_id = ?1",
            params![run_id],
            |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            },
        )
        .map_err(|e| format!("unknown run {run_id}: {e}"))?;

    let mut level_counts: BTreeMap<String, i64> = BTreeMap::new();
    let mut stmt = db
        .prepare("SELECT level, COUNT(*) FROM records WHERE run_id = ?1 GROUP BY level")
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(|e| e.to_string())?;
    for row in rows {
        let (level, count) = row.map_err(|e| e.to_string())?;
        level_counts.insert(level, count);
    }

    let mut category_counts: BTreeMap<String, i64> = BTreeMap::new();
    let mut stmt = db
        .prepare(
            "SELECT debug_category, COUNT(*) FROM records
             WHERE run_id = ?1 AND debug_category IS NOT NULL GROUP BY debug_category",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(|e| e.to_string())?;
    for row in rows {
        let (category, count) = row.map_err(|e| e.to_string())?;
        category_counts.insert(category, count);
    }

    let duration = match (&ended_at, seqlink_core::time::parse_flexible(&started_at)) {
        (Some(ended), Some(start)) => seqlink_core::time::parse_flexible(ended)
            .map(|end| format!("{}s", (end - start).num_seconds())),
        _ => None,
    };

    let summary = serde_json::json!({
        "run_id": run_id,
        "run_name": run_name,
        "status": status,
        "started_at": started_at,
        "ended_at": ended_at,
        "duration": duration,
        "level_counts": level_counts,
        "debug_category_counts": category_counts,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?
    );
    Ok(())
}

pub fn show_dblink_counts(config: &Config) -> ExitCode {
    match show_dblink_counts_inner(config) {
        Ok(()) => ExitCode::Success,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::StepFailed
        }
    }
}

fn show_dblink_counts_inner(config: &Config) -> Result<(), String> {
    let reader = DblinkReader::open(config).map_err(|e| e.to_string())?;
    let counts = reader.counts().map_err(|e| e.to_string())?;
    let mut total = 0u64;
    for (src_type, dst_type, count) in &counts {
        println!("{src_type}\t{dst_type}\t{count}");
        total += count;
    }
    println!("total\t\t{total}");
    Ok(())
}
