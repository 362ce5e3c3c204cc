//! Content-addressable store of prior successful geocode results.
//!
//! Keyed by sha256 of the normalized address; values are the serialized
//! `GeocodeResult` snapshots; rows expire after the configured TTL. Only
//! successful results are stored. Store trouble after open degrades
//! silently to "no cache": a broken backing store must never fail a
//! geocode request.

use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::common::error::Result;
use crate::domain::{GeocodeResult, GeocodeStatus, ProviderId};
use crate::parsing::normalizer::cache_key;

pub struct GeocodeCache {
    conn: Mutex<Connection>,
    ttl: Duration,
}

impl GeocodeCache {
    /// Open (or create) the backing store. Failure here is reported to the
    /// caller, which treats it as "caching disabled".
    pub fn open<P: AsRef<Path>>(path: P, ttl: Duration) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS geocode_cache (
                address_hash TEXT PRIMARY KEY,
                payload      TEXT NOT NULL,
                cached_at    INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn), ttl })
    }

    /// Look up a normalized address. A hit comes back with `cached = true`
    /// and `provider = cache`; an expired row is deleted and reported as a
    /// miss. Store errors degrade to a miss.
    pub fn get(&self, normalized: &str) -> Option<GeocodeResult> {
        match self.try_get(normalized) {
            Ok(hit) => hit,
            Err(e) => {
                warn!("cache read failed, treating as miss: {}", e);
                None
            }
        }
    }

    /// Store a successful result. Non-success results are ignored; store
    /// errors are logged and swallowed.
    pub fn put(&self, normalized: &str, result: &GeocodeResult) {
        if result.status != GeocodeStatus::Success {
            return;
        }
        if let Err(e) = self.try_put(normalized, result) {
            warn!("cache write failed, continuing without: {}", e);
        }
    }

    /// Delete every expired row, returning how many went.
    pub fn purge_expired(&self) -> usize {
        let cutoff = Utc::now().timestamp() - self.ttl.as_secs() as i64;
        let conn = self.conn.lock().expect("cache lock poisoned");
        match conn.execute("DELETE FROM geocode_cache WHERE cached_at < ?1", params![cutoff]) {
            Ok(count) => count,
            Err(e) => {
                warn!("cache purge failed: {}", e);
                0
            }
        }
    }

    fn try_get(&self, normalized: &str) -> Result<Option<GeocodeResult>> {
        let key = cache_key(normalized);
        let conn = self.conn.lock().expect("cache lock poisoned");
        let mut stmt =
            conn.prepare("SELECT payload, cached_at FROM geocode_cache WHERE address_hash = ?1")?;
        let mut rows = stmt.query(params![key])?;
        let row = match rows.next()? {
            Some(row) => row,
            None => return Ok(None),
        };
        let payload: String = row.get(0)?;
        let cached_at: i64 = row.get(1)?;
        drop(rows);
        drop(stmt);

        let age = Utc::now().timestamp() - cached_at;
        if age < 0 || age as u64 > self.ttl.as_secs() {
            debug!("cache entry expired for hash {}", key);
            conn.execute("DELETE FROM geocode_cache WHERE address_hash = ?1", params![key])?;
            return Ok(None);
        }

        let mut result: GeocodeResult = serde_json::from_str(&payload)?;
        result.cached = true;
        result.provider = ProviderId::Cache;
        Ok(Some(result))
    }

    fn try_put(&self, normalized: &str, result: &GeocodeResult) -> Result<()> {
        let key = cache_key(normalized);
        let payload = serde_json::to_string(result)?;
        let conn = self.conn.lock().expect("cache lock poisoned");
        conn.execute(
            "INSERT INTO geocode_cache (address_hash, payload, cached_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(address_hash) DO UPDATE SET payload=excluded.payload, cached_at=excluded.cached_at",
            params![key, payload, Utc::now().timestamp()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Coordinates, Precision};

    fn success_result() -> GeocodeResult {
        GeocodeResult {
            coordinates: Some(Coordinates { latitude: 34.1016, longitude: -118.3387 }),
            formatted_address: "1234 N HIGHLAND AVE, LOS ANGELES, CA 90028".to_string(),
            confidence_score: 0.9,
            provider: ProviderId::Osm,
            status: GeocodeStatus::Success,
            parsed: None,
            precision: Some(Precision::Rooftop),
            response_time_ms: 120,
            cached: false,
            timestamp: Utc::now(),
        }
    }

    fn temp_cache(ttl: Duration) -> (tempfile::TempDir, GeocodeCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = GeocodeCache::open(dir.path().join("geocode.db"), ttl).unwrap();
        (dir, cache)
    }

    #[test]
    fn roundtrip_marks_result_as_cached() {
        let (_dir, cache) = temp_cache(Duration::from_secs(3600));
        let normalized = "1234 N HIGHLAND AVE, LOS ANGELES, CA 90028";

        assert!(cache.get(normalized).is_none());
        let original = success_result();
        cache.put(normalized, &original);

        let hit = cache.get(normalized).expect("cache hit");
        assert!(hit.cached);
        assert_eq!(hit.provider, ProviderId::Cache);
        assert_eq!(hit.coordinates, original.coordinates);
        assert_eq!(hit.confidence_score, original.confidence_score);
        assert_eq!(hit.status, GeocodeStatus::Success);
    }

    #[test]
    fn failures_are_never_stored() {
        let (_dir, cache) = temp_cache(Duration::from_secs(3600));
        let failed = GeocodeResult::unresolved(ProviderId::Osm, GeocodeStatus::Failed);
        cache.put("1 NOWHERE LN", &failed);
        assert!(cache.get("1 NOWHERE LN").is_none());
    }

    #[test]
    fn expired_entries_read_as_misses() {
        let (_dir, cache) = temp_cache(Duration::from_secs(0));
        let normalized = "1234 N HIGHLAND AVE";
        cache.put(normalized, &success_result());
        // TTL of zero: anything written in a prior second has expired. Force
        // the row's timestamp into the past to avoid timing flakes.
        {
            let conn = cache.conn.lock().unwrap();
            conn.execute("UPDATE geocode_cache SET cached_at = cached_at - 10", [])
                .unwrap();
        }
        assert!(cache.get(normalized).is_none());
        // And the expired row is gone.
        let conn = cache.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM geocode_cache", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn purge_expired_reports_deleted_rows() {
        let (_dir, cache) = temp_cache(Duration::from_secs(60));
        cache.put("A ST", &success_result());
        cache.put("B ST", &success_result());
        {
            let conn = cache.conn.lock().unwrap();
            conn.execute("UPDATE geocode_cache SET cached_at = cached_at - 120", [])
                .unwrap();
        }
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.get("A ST").is_none());
    }

    #[test]
    fn distinct_addresses_do_not_collide() {
        let (_dir, cache) = temp_cache(Duration::from_secs(3600));
        cache.put("1 FIRST ST", &success_result());
        assert!(cache.get("2 SECOND ST").is_none());
        assert!(cache.get("1 FIRST ST").is_some());
    }
}
