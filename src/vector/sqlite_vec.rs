//! SqliteVecIndex — persistent vector storage via sqlite-vec
//!
//! Implements `VectorIndex` on a vec0 virtual table. Vectors are
//! L2-normalized on insert so L2 distance from vec0 converts to cosine
//! similarity: `sim = 1 - dist² / 2`. Filters are applied after the KNN
//! query, which oversamples to compensate.

use super::{IdFilter, VectorError, VectorHit, VectorIndex};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Mutex;

/// Register the sqlite-vec extension globally (safe under parallel tests).
fn register_vec_extension() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Reinterpret a `&[f32]` slice as raw bytes for sqlite-vec blob parameters.
///
/// # Safety
/// f32 has no padding and a fixed layout; this is a trivial reinterpretation.
fn f32_slice_as_bytes(slice: &[f32]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(slice.as_ptr() as *const u8, slice.len() * 4) }
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Persistent vector index backed by sqlite-vec.
pub struct SqliteVecIndex {
    conn: Mutex<Connection>,
    dimensions: usize,
}

impl SqliteVecIndex {
    /// Open a persistent index at the given path.
    pub fn open(path: &Path, dimensions: usize) -> Result<Self, VectorError> {
        register_vec_extension();
        let conn = Connection::open(path).map_err(|e| VectorError::Backend(e.to_string()))?;
        Self::init_connection(conn, dimensions)
    }

    /// Open an in-memory index (for tests).
    pub fn open_in_memory(dimensions: usize) -> Result<Self, VectorError> {
        register_vec_extension();
        let conn =
            Connection::open_in_memory().map_err(|e| VectorError::Backend(e.to_string()))?;
        Self::init_connection(conn, dimensions)
    }

    fn init_connection(conn: Connection, dimensions: usize) -> Result<Self, VectorError> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| VectorError::Backend(e.to_string()))?;
        let create_sql = format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_embeddings USING vec0(\
                 vec_id TEXT,\
                 embedding float[{}]\
             )",
            dimensions
        );
        conn.execute_batch(&create_sql)
            .map_err(|e| VectorError::Backend(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
        })
    }
}

impl VectorIndex for SqliteVecIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<(), VectorError> {
        if vector.len() != self.dimensions {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        let mut normalized = vector;
        l2_normalize(&mut normalized);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM vec_embeddings WHERE vec_id = ?1",
            rusqlite::params![id],
        )
        .map_err(|e| VectorError::Backend(e.to_string()))?;
        conn.execute(
            "INSERT INTO vec_embeddings(vec_id, embedding) VALUES (?1, ?2)",
            rusqlite::params![id, f32_slice_as_bytes(&normalized)],
        )
        .map_err(|e| VectorError::Backend(e.to_string()))?;
        Ok(())
    }

    fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&IdFilter>,
    ) -> Result<Vec<VectorHit>, VectorError> {
        if vector.len() != self.dimensions {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        let mut normalized = vector.to_vec();
        l2_normalize(&mut normalized);
        let conn = self.conn.lock().unwrap();

        // Oversample so post-query filtering still fills k
        let knn_k = (k.max(1) * 4).max(64);
        let mut stmt = conn
            .prepare(
                "SELECT vec_id, distance FROM vec_embeddings \
                 WHERE embedding MATCH ?1 AND k = ?2",
            )
            .map_err(|e| VectorError::Backend(e.to_string()))?;
        let rows: Vec<(String, f32)> = stmt
            .query_map(
                rusqlite::params![f32_slice_as_bytes(&normalized), knn_k as i64],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, f32>(1)?)),
            )
            .map_err(|e| VectorError::Backend(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();

        let mut hits: Vec<VectorHit> = rows
            .into_iter()
            .filter(|(id, _)| filter.map_or(true, |f| f.matches(id)))
            .map(|(id, distance)| VectorHit {
                id,
                // L2 distance on unit vectors → cosine similarity
                score: 1.0 - (distance * distance) / 2.0,
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    fn get(&self, id: &str) -> Result<Option<Vec<f32>>, VectorError> {
        let conn = self.conn.lock().unwrap();
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM vec_embeddings WHERE vec_id = ?1",
                rusqlite::params![id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(VectorError::Backend(other.to_string())),
            })?;
        Ok(blob.map(|bytes| {
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        }))
    }
}
