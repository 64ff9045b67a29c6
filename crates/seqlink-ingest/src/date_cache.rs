// SPDX-License-Identifier: Apache-2.0

//! Date-cache construction from the archive's relational database.
//!
//! One bulk query per family projects `(accession, create, modified,
//! release)` out of the submission tables; the rows land in the sqlite
//! cache that the BP/BS emitters read. A connection failure aborts the
//! step: the cache is a hard prerequisite downstream.

use crate::IngestError;
use chrono::NaiveDateTime;
use seqlink_core::time::format_utc;
use seqlink_core::{Config, LogTarget, RunLogger};
use seqlink_store::date_cache::{DateCacheWriter, DateFamily, DateRow};

const BP_QUERY: &str = "
    SELECT s.accession, p.create_date, p.modified_date, p.release_date
    FROM mass.bioproject_summary s
    INNER JOIN mass.project p ON s.submission_id = p.submission_id
";

const BS_QUERY: &str = "
    SELECT s.accession_id, p.create_date, p.modified_date, p.release_date
    FROM mass.biosample_summary s
    INNER JOIN (
        SELECT DISTINCT ON (submission_id)
            submission_id, create_date, modified_date, release_date
        FROM mass.sample
        ORDER BY submission_id
    ) p ON s.submission_id = p.submission_id
";

pub fn build_bp_bs_date_cache(config: &Config, log: &RunLogger) -> Result<(), IngestError> {
    let url = config
        .postgres_url
        .as_deref()
        .ok_or_else(|| IngestError("POSTGRES_URL is not set".to_string()))?;

    let mut writer = DateCacheWriter::init(config)?;

    for (family, query, label) in [
        (DateFamily::Bioproject, BP_QUERY, "bp"),
        (DateFamily::Biosample, BS_QUERY, "bs"),
    ] {
        log.info(
            &format!("fetching all {label} dates from postgresql"),
            LogTarget::default(),
        );
        let rows = fetch_date_rows(url, query)?;
        let count = writer.insert(family, rows.into_iter())?;
        log.info(
            &format!("inserted {count} {label}_date rows"),
            LogTarget::default(),
        );
    }

    writer.finalize(config)?;
    log.info("date cache build completed", LogTarget::default());
    Ok(())
}

fn fetch_date_rows(url: &str, query: &str) -> Result<Vec<DateRow>, IngestError> {
    let mut client = postgres::Client::connect(url, postgres::NoTls)
        .map_err(|e| IngestError(format!("postgres connection failed: {e}")))?;
    let rows = client
        .query(query, &[])
        .map_err(|e| IngestError(format!("date query failed: {e}")))?;
    Ok(rows
        .into_iter()
        .map(|row| DateRow {
            accession: row.get(0),
            date_created: format_opt(row.get(1)),
            date_modified: format_opt(row.get(2)),
            date_published: format_opt(row.get(3)),
        })
        .collect())
}

fn format_opt(value: Option<NaiveDateTime>) -> Option<String> {
    value.map(|naive| format_utc(chrono::TimeZone::from_utc_datetime(&chrono::Utc, &naive)))
}
