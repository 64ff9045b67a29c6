// SPDX-License-Identifier: Apache-2.0

//! The DBLink relation store.
//!
//! One table, `relation(src_type, src_accession, dst_type, dst_accession)`,
//! holding the undirected graph in canonical edge form. The store is
//! built in a `.tmp` file with a single writer; extractors feed edge
//! batches through a bounded channel into [`drain_edges`], and
//! [`finalize`] canonicalizes, prunes blacklisted endpoints, dedups,
//! indexes, and renames the file into place. Readers open the final file
//! read-only.

use crate::{Blacklists, StoreError, StoreErrorCode};
use crossbeam_channel::Receiver;
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use seqlink_core::accession::ALL_ACCESSION_TYPES;
use seqlink_core::{AccessionType, Config, RelationEdge};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Edges per serializer transaction. Producers batch at this size too,
/// so one received batch is one transaction.
pub const EDGE_TX_SIZE: usize = 50_000;

const SQLITE_IN_BATCH: usize = 400;

pub struct DblinkWriter {
    conn: Connection,
}

impl DblinkWriter {
    /// Create a fresh tmp store, discarding any previous one.
    pub fn init(config: &Config) -> Result<Self, StoreError> {
        let tmp = config.dblink_tmp_db_path();
        if let Some(parent) = tmp.parent() {
            fs::create_dir_all(parent)?;
        }
        if tmp.exists() {
            fs::remove_file(&tmp)?;
        }
        let conn = Connection::open(&tmp)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=OFF;
            PRAGMA temp_store=MEMORY;
            PRAGMA cache_size=-64000;
            CREATE TABLE relation (
              src_type TEXT NOT NULL,
              src_accession TEXT NOT NULL,
              dst_type TEXT NOT NULL,
              dst_accession TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self { conn })
    }

    /// Open the existing tmp store for a subsequent extractor step.
    pub fn open_tmp(config: &Config) -> Result<Self, StoreError> {
        let tmp = config.dblink_tmp_db_path();
        if !tmp.exists() {
            return Err(StoreError::new(
                StoreErrorCode::NotFound,
                format!("dblink tmp store not found (run init_dblink_db first): {}", tmp.display()),
            ));
        }
        let conn = Connection::open(&tmp)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=OFF;")?;
        Ok(Self { conn })
    }

    /// Append one batch of edges inside a single transaction. Edges are
    /// stored in canonical form; duplicates are resolved at finalize.
    pub fn append(&mut self, edges: &[RelationEdge]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO relation (src_type, src_accession, dst_type, dst_accession)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for edge in edges {
                let canonical = edge.clone().canonicalize();
                stmt.execute(params![
                    canonical.src_type.as_str(),
                    canonical.src_accession,
                    canonical.dst_type.as_str(),
                    canonical.dst_accession,
                ])?;
            }
        }
        tx.commit()?;
        Ok(edges.len())
    }
}

/// Serializer loop: the single writer drains edge batches until every
/// producer has hung up. Returns the number of edges written.
pub fn drain_edges(
    writer: &mut DblinkWriter,
    rx: &Receiver<Vec<RelationEdge>>,
) -> Result<u64, StoreError> {
    let mut total = 0u64;
    for batch in rx.iter() {
        total += writer.append(&batch)? as u64;
    }
    Ok(total)
}

/// Finalize the tmp store: canonicalize and dedup every edge, delete
/// edges touching a blacklisted accession, build the secondary indices,
/// and rename tmp -> final.
pub fn finalize(config: &Config, blacklists: &Blacklists) -> Result<u64, StoreError> {
    let tmp = config.dblink_tmp_db_path();
    if !tmp.exists() {
        return Err(StoreError::new(
            StoreErrorCode::NotFound,
            format!("dblink tmp store not found: {}", tmp.display()),
        ));
    }
    let conn = Connection::open(&tmp)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=OFF;")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS type_rank (type TEXT PRIMARY KEY, rank INTEGER NOT NULL);",
    )?;
    {
        let mut stmt =
            conn.prepare("INSERT OR REPLACE INTO type_rank (type, rank) VALUES (?1, ?2)")?;
        for ty in ALL_ACCESSION_TYPES {
            stmt.execute(params![ty.as_str(), i64::from(ty.ordinal())])?;
        }
    }

    // Appenders already canonicalize, but the store contract is enforced
    // here regardless of what was loaded.
    conn.execute_batch(
        "
        CREATE TABLE relation_final AS
        SELECT DISTINCT
          CASE WHEN keep THEN src_type ELSE dst_type END AS src_type,
          CASE WHEN keep THEN src_accession ELSE dst_accession END AS src_accession,
          CASE WHEN keep THEN dst_type ELSE src_type END AS dst_type,
          CASE WHEN keep THEN dst_accession ELSE src_accession END AS dst_accession
        FROM (
          SELECT r.*,
                 (sr.rank < dr.rank OR (sr.rank = dr.rank AND r.src_accession <= r.dst_accession)) AS keep
          FROM relation r
          JOIN type_rank sr ON sr.type = r.src_type
          JOIN type_rank dr ON dr.type = r.dst_type
        );
        ",
    )?;

    conn.execute_batch(
        "CREATE TABLE blacklist_acc (accession TEXT PRIMARY KEY) WITHOUT ROWID;",
    )?;
    {
        let tx_like = &conn;
        let mut stmt =
            tx_like.prepare("INSERT OR IGNORE INTO blacklist_acc (accession) VALUES (?1)")?;
        for acc in blacklists.union() {
            stmt.execute(params![acc])?;
        }
    }
    conn.execute_batch(
        "
        DELETE FROM relation_final
        WHERE src_accession IN (SELECT accession FROM blacklist_acc)
           OR dst_accession IN (SELECT accession FROM blacklist_acc);
        DROP TABLE relation;
        DROP TABLE blacklist_acc;
        DROP TABLE type_rank;
        ALTER TABLE relation_final RENAME TO relation;
        CREATE UNIQUE INDEX idx_relation_unique
          ON relation (src_type, src_accession, dst_type, dst_accession);
        CREATE INDEX idx_relation_src ON relation (src_type, src_accession);
        CREATE INDEX idx_relation_dst ON relation (dst_type, dst_accession);
        ",
    )?;
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM relation", [], |r| r.get(0))?;
    let total = total as u64;
    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
    drop(conn);

    let final_path = config.dblink_db_path();
    if final_path.exists() {
        fs::remove_file(&final_path)?;
    }
    fs::rename(&tmp, &final_path)?;
    Ok(total)
}

pub struct DblinkReader {
    conn: Connection,
}

impl DblinkReader {
    pub fn open(config: &Config) -> Result<Self, StoreError> {
        Self::open_path(&config.dblink_db_path())
    }

    pub fn open_path(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::new(
                StoreErrorCode::NotFound,
                format!("dblink store not found: {}", path.display()),
            ));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn })
    }

    /// Neighbors of each queried accession, in either stored orientation.
    pub fn related_bulk(
        &self,
        ty: AccessionType,
        accessions: &[String],
    ) -> Result<BTreeMap<String, Vec<(AccessionType, String)>>, StoreError> {
        let mut result: BTreeMap<String, Vec<(AccessionType, String)>> = BTreeMap::new();
        for chunk in accessions.chunks(SQLITE_IN_BATCH) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let forward = format!(
                "SELECT src_accession, dst_type, dst_accession FROM relation
                 WHERE src_type = '{}' AND src_accession IN ({placeholders})",
                ty.as_str()
            );
            let mut stmt = self.conn.prepare(&forward)?;
            let mut rows = stmt.query(params_from_iter(chunk.iter()))?;
            while let Some(row) = rows.next()? {
                collect_neighbor(&mut result, row)?;
            }

            let backward = format!(
                "SELECT dst_accession, src_type, src_accession FROM relation
                 WHERE dst_type = '{}' AND dst_accession IN ({placeholders})",
                ty.as_str()
            );
            let mut stmt = self.conn.prepare(&backward)?;
            let mut rows = stmt.query(params_from_iter(chunk.iter()))?;
            while let Some(row) = rows.next()? {
                collect_neighbor(&mut result, row)?;
            }
        }
        for neighbors in result.values_mut() {
            neighbors.sort_by(|a, b| a.1.cmp(&b.1));
            neighbors.dedup();
        }
        Ok(result)
    }

    /// Export one `(type_a, type_b)` pair as a two-column TSV in the
    /// file's orientation, sorted by the first column then the second.
    /// The stored orientation is canonical and may be the reverse; the
    /// CASE projection unswaps endpoints.
    pub fn export_pair(
        &self,
        type_a: AccessionType,
        type_b: AccessionType,
        out_path: &Path,
    ) -> Result<u64, StoreError> {
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut stmt = self.conn.prepare(
            "SELECT
               CASE WHEN src_type = ?1 THEN src_accession ELSE dst_accession END AS a_accession,
               CASE WHEN src_type = ?1 THEN dst_accession ELSE src_accession END AS b_accession
             FROM relation
             WHERE (src_type = ?1 AND dst_type = ?2)
                OR (src_type = ?2 AND dst_type = ?1)
             ORDER BY 1, 2",
        )?;
        let mut rows = stmt.query(params![type_a.as_str(), type_b.as_str()])?;
        let tmp_path = out_path.with_extension("tsv.tmp");
        let mut file = std::io::BufWriter::new(fs::File::create(&tmp_path)?);
        let mut count = 0u64;
        while let Some(row) = rows.next()? {
            let a: String = row.get(0)?;
            let b: String = row.get(1)?;
            writeln!(file, "{a}\t{b}").map_err(StoreError::from)?;
            count += 1;
        }
        file.flush().map_err(StoreError::from)?;
        file.into_inner()
            .map_err(|e| StoreError::new(StoreErrorCode::Io, e.to_string()))?
            .sync_all()?;
        fs::rename(&tmp_path, out_path)?;
        Ok(count)
    }

    /// Edge counts per stored `(src_type, dst_type)` pair.
    pub fn counts(&self) -> Result<Vec<(String, String, u64)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT src_type, dst_type, COUNT(*) FROM relation
             GROUP BY src_type, dst_type ORDER BY src_type, dst_type",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? as u64,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn collect_neighbor(
    result: &mut BTreeMap<String, Vec<(AccessionType, String)>>,
    row: &rusqlite::Row<'_>,
) -> Result<(), StoreError> {
    let key: String = row.get(0)?;
    let neighbor_type: String = row.get(1)?;
    let neighbor_acc: String = row.get(2)?;
    if let Some(ty) = AccessionType::parse(&neighbor_type) {
        result.entry(key).or_default().push((ty, neighbor_acc));
    }
    Ok(())
}
