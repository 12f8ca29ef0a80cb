//! Integrity-checked format cache
//!
//! A bounded LRU of format results keyed by a canonical fingerprint over
//! `(message id, attribute, args, locale, isolation flag)`. Every entry
//! carries a BLAKE2b-128 checksum recomputed and verified on each read;
//! all variable-length components are length-prefixed (so `("ab","c")` and
//! `("a","bc")` cannot collide) and absent fields hash as sentinel bytes.
//! Optional write-once semantics tolerate idempotent concurrent writes and
//! reject content-altering ones; an optional audit log records mutations
//! with privacy-preserving key hashes.

use crate::error::FluentError;
use crate::value::{FluentArgs, FluentValue};
use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use lru::LruCache;
use serde::Serialize;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

type Blake2b128 = Blake2b<U16>;

/// Monotonic seconds since the first cache operation in this process.
/// Wall-clock steps cannot perturb checksums.
fn monotonic_now() -> f64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Cache tuning knobs
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// LRU capacity in entries
    pub size: usize,
    /// Reject content-altering writes to existing keys
    pub write_once: bool,
    /// Raise on corruption and write-once conflicts; otherwise evict/log
    pub integrity_strict: bool,
    /// Keep a WriteLogEntry trail
    pub enable_audit: bool,
    /// Approximate per-entry size bound in bytes
    pub max_entry_weight: usize,
    /// Entries carrying more errors than this are not stored
    pub max_errors_per_entry: usize,
    /// Audit log bound; oldest entries are dropped first
    pub max_audit_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            size: 1000,
            write_once: false,
            integrity_strict: true,
            enable_audit: false,
            max_entry_weight: 65_536,
            max_errors_per_entry: 32,
            max_audit_entries: 1024,
        }
    }
}

/// System-level cache failures (never ordinary misses)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cache entry {key_hash} failed integrity verification")]
    Corruption { key_hash: String },

    #[error("write-once violation on {key_hash}: existing entry holds different content")]
    WriteOnceConflict { key_hash: String },

    #[error("cache mutex poisoned")]
    Poisoned,
}

/// Opaque canonical cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<u8>);

impl CacheKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Privacy-preserving digest used in audit entries and errors
    pub fn key_hash(&self) -> String {
        let mut hasher = Blake2b128::new();
        hasher.update(&self.0);
        hex::encode(hasher.finalize())
    }
}

/// Canonical fingerprint over one format request.
///
/// Values are type-tagged so lookalikes stay distinct: `1`, `1.0`, `true`,
/// and `Decimal(1.00)` produce four different keys.
pub fn fingerprint(
    message_id: &str,
    attribute: Option<&str>,
    args: &FluentArgs,
    locale: &str,
    use_isolating: bool,
) -> CacheKey {
    let mut buf = Vec::with_capacity(64);
    write_field(&mut buf, b"id", message_id.as_bytes());
    match attribute {
        None => buf.push(0x00),
        Some(a) => {
            buf.push(0x01);
            write_field(&mut buf, b"attr", a.as_bytes());
        }
    }
    write_field(&mut buf, b"locale", locale.as_bytes());
    buf.push(if use_isolating { 0x01 } else { 0x00 });
    buf.extend_from_slice(&(args.len() as u32).to_be_bytes());
    for (name, value) in args {
        write_field(&mut buf, b"arg", name.as_bytes());
        encode_value(&mut buf, value);
    }
    CacheKey(buf)
}

fn write_field(buf: &mut Vec<u8>, tag: &[u8], bytes: &[u8]) {
    buf.extend_from_slice(tag);
    buf.push(b':');
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn encode_value(buf: &mut Vec<u8>, value: &FluentValue) {
    match value {
        FluentValue::Str(s) => write_field(buf, b"str", s.as_bytes()),
        FluentValue::Int(i) => {
            buf.extend_from_slice(b"int:");
            buf.extend_from_slice(&i.to_be_bytes());
        }
        FluentValue::Float(f) => {
            // NaN payloads collapse to one sentinel so NaN-keyed entries
            // stay retrievable.
            let bits = if f.is_nan() {
                0x7ff8_0000_0000_0000u64
            } else {
                f.to_bits()
            };
            buf.extend_from_slice(b"float:");
            buf.extend_from_slice(&bits.to_be_bytes());
        }
        FluentValue::Bool(b) => {
            buf.extend_from_slice(b"bool:");
            buf.push(*b as u8);
        }
        FluentValue::Decimal(d) => write_field(buf, b"decimal", d.to_string().as_bytes()),
        FluentValue::Date(d) => {
            write_field(buf, b"date", d.format("%Y-%m-%d").to_string().as_bytes())
        }
        FluentValue::DateTime(dt) => {
            // Same instant in different zones keys differently.
            buf.extend_from_slice(b"dt:(");
            write_field(buf, b"iso", dt.to_rfc3339().as_bytes());
            write_field(buf, b"tz", dt.offset().to_string().as_bytes());
            buf.push(b')');
        }
        FluentValue::Number(n) => {
            buf.extend_from_slice(b"num:(");
            write_field(buf, b"value", n.value.to_string().as_bytes());
            match &n.formatted {
                None => buf.push(0x00),
                Some(f) => {
                    buf.push(0x01);
                    write_field(buf, b"formatted", f.as_bytes());
                }
            }
            match n.precision {
                None => buf.push(0x00),
                Some(p) => {
                    buf.push(0x01);
                    buf.extend_from_slice(&p.to_be_bytes());
                }
            }
            match &n.currency {
                None => buf.push(0x00),
                Some(c) => {
                    buf.push(0x01);
                    write_field(buf, b"currency", c.as_bytes());
                }
            }
            buf.push(n.use_grouping as u8);
            buf.push(b')');
        }
        FluentValue::Seq(items) => {
            buf.extend_from_slice(b"seq:(");
            buf.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                encode_value(buf, item);
            }
            buf.push(b')');
        }
        FluentValue::Map(map) => {
            // BTreeMap iterates sorted, so the encoding is order-canonical.
            buf.extend_from_slice(b"map:(");
            buf.extend_from_slice(&(map.len() as u32).to_be_bytes());
            for (k, v) in map {
                write_field(buf, b"key", k.as_bytes());
                encode_value(buf, v);
            }
            buf.push(b')');
        }
        FluentValue::Null => buf.extend_from_slice(b"null"),
    }
}

/// One cached format result
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub formatted: String,
    pub errors: Vec<FluentError>,
    /// BLAKE2b-128 over all fields below plus `formatted`/`errors`
    pub checksum: [u8; 16],
    /// Monotonic seconds at store time
    pub created_at: f64,
    /// Total write order across the cache's lifetime
    pub sequence: i64,
    /// Hash over content only (`formatted`, `errors`); backs idempotent
    /// write detection
    content_hash: [u8; 16],
}

impl CacheEntry {
    fn new(formatted: String, errors: Vec<FluentError>, created_at: f64, sequence: i64) -> Self {
        let content_hash = content_only_hash(&formatted, &errors);
        let checksum = full_checksum(&formatted, &errors, created_at, sequence);
        CacheEntry {
            formatted,
            errors,
            checksum,
            created_at,
            sequence,
            content_hash,
        }
    }

    pub fn content_hash(&self) -> &[u8; 16] {
        &self.content_hash
    }

    /// Recompute the checksum and every error's own content hash
    pub fn verify(&self) -> bool {
        if full_checksum(&self.formatted, &self.errors, self.created_at, self.sequence)
            != self.checksum
        {
            return false;
        }
        if content_only_hash(&self.formatted, &self.errors) != self.content_hash {
            return false;
        }
        self.errors.iter().all(|e| e.verify_hash())
    }
}

fn feed_content(hasher: &mut Blake2b128, formatted: &str, errors: &[FluentError]) {
    let bytes = formatted.as_bytes();
    hasher.update((bytes.len() as u32).to_be_bytes());
    hasher.update(bytes);
    hasher.update((errors.len() as u32).to_be_bytes());
    for error in errors {
        hasher.update(error.content_hash());
    }
}

fn content_only_hash(formatted: &str, errors: &[FluentError]) -> [u8; 16] {
    let mut hasher = Blake2b128::new();
    feed_content(&mut hasher, formatted, errors);
    hasher.finalize().into()
}

fn full_checksum(formatted: &str, errors: &[FluentError], created_at: f64, sequence: i64) -> [u8; 16] {
    let mut hasher = Blake2b128::new();
    feed_content(&mut hasher, formatted, errors);
    hasher.update(created_at.to_bits().to_be_bytes());
    hasher.update(sequence.to_be_bytes());
    hasher.finalize().into()
}

/// Audit operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOp {
    Put,
    IdempotentPut,
    Evict,
    IntegrityEvict,
    Clear,
}

/// One immutable audit record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteLogEntry {
    pub op: AuditOp,
    /// Hash of the key, never the key itself
    pub key_hash: String,
    pub timestamp: f64,
    pub sequence: i64,
    pub checksum_hex: String,
}

/// Counter snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    /// Writes refused by the weight or error-count bounds
    pub rejected: u64,
    pub idempotent_writes: u64,
    pub integrity_evictions: u64,
    pub write_once_conflicts: u64,
    /// Last assigned sequence number
    pub sequence: i64,
}

struct CacheInner {
    entries: LruCache<Vec<u8>, CacheEntry>,
    sequence: i64,
    stats: CacheStats,
    audit: VecDeque<WriteLogEntry>,
}

/// Thread-safe integrity cache. All methods take `&self`; an internal
/// mutex serializes access independently of any bundle lock.
pub struct IntegrityCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

impl IntegrityCache {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.size.max(1)).unwrap();
        IntegrityCache {
            config,
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                sequence: 0,
                stats: CacheStats::default(),
                audit: VecDeque::new(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CacheInner>, CacheError> {
        self.inner.lock().map_err(|_| CacheError::Poisoned)
    }

    fn audit(inner: &mut CacheInner, config: &CacheConfig, op: AuditOp, key_hash: String, sequence: i64, checksum: &[u8; 16]) {
        if !config.enable_audit {
            return;
        }
        if inner.audit.len() >= config.max_audit_entries {
            inner.audit.pop_front();
        }
        inner.audit.push_back(WriteLogEntry {
            op,
            key_hash,
            timestamp: monotonic_now(),
            sequence,
            checksum_hex: hex::encode(checksum),
        });
    }

    /// Store a format result. Oversized or error-heavy entries are counted
    /// as rejected and not stored. Under write-once, an identical rewrite
    /// is an idempotent success; a different one raises (strict) or is
    /// counted and dropped (lenient).
    pub fn put(
        &self,
        key: &CacheKey,
        formatted: String,
        errors: Vec<FluentError>,
    ) -> Result<(), CacheError> {
        let weight = formatted.len()
            + errors
                .iter()
                .map(|e| e.message().len() + 16)
                .sum::<usize>();
        let mut inner = self.lock()?;
        if weight > self.config.max_entry_weight || errors.len() > self.config.max_errors_per_entry
        {
            inner.stats.rejected += 1;
            tracing::debug!(
                key = %key.key_hash(),
                weight,
                errors = errors.len(),
                "cache entry rejected by size bounds"
            );
            return Ok(());
        }

        if self.config.write_once {
            if let Some(existing) = inner.entries.peek(key.as_bytes()) {
                if *existing.content_hash() == content_only_hash(&formatted, &errors) {
                    let (seq, checksum) = (existing.sequence, existing.checksum);
                    inner.stats.idempotent_writes += 1;
                    Self::audit(
                        &mut inner,
                        &self.config,
                        AuditOp::IdempotentPut,
                        key.key_hash(),
                        seq,
                        &checksum,
                    );
                    return Ok(());
                }
                inner.stats.write_once_conflicts += 1;
                if self.config.integrity_strict {
                    return Err(CacheError::WriteOnceConflict {
                        key_hash: key.key_hash(),
                    });
                }
                tracing::warn!(
                    key = %key.key_hash(),
                    "write-once conflict ignored (lenient mode); keeping original entry"
                );
                return Ok(());
            }
        }

        inner.sequence += 1;
        let sequence = inner.sequence;
        inner.stats.sequence = sequence;
        let entry = CacheEntry::new(formatted, errors, monotonic_now(), sequence);
        let checksum = entry.checksum;
        if let Some((evicted_key, evicted)) = inner.entries.push(key.as_bytes().to_vec(), entry) {
            // `push` returns the displaced LRU victim (a different key).
            if evicted_key != *key.as_bytes() {
                tracing::debug!("cache evicted least-recently-used entry");
                let victim_hash = CacheKey(evicted_key).key_hash();
                let (seq, sum) = (evicted.sequence, evicted.checksum);
                Self::audit(
                    &mut inner,
                    &self.config,
                    AuditOp::Evict,
                    victim_hash,
                    seq,
                    &sum,
                );
            }
        }
        inner.stats.stores += 1;
        Self::audit(
            &mut inner,
            &self.config,
            AuditOp::Put,
            key.key_hash(),
            sequence,
            &checksum,
        );
        Ok(())
    }

    /// Look up a key, verifying entry integrity. Corruption raises in
    /// strict mode; in lenient mode the entry is evicted and the lookup
    /// misses.
    pub fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let mut inner = self.lock()?;
        let Some(entry) = inner.entries.get(key.as_bytes()) else {
            inner.stats.misses += 1;
            return Ok(None);
        };

        if entry.verify() {
            let entry = entry.clone();
            inner.stats.hits += 1;
            return Ok(Some(entry));
        }

        let (seq, checksum) = (entry.sequence, entry.checksum);
        inner.entries.pop(key.as_bytes());
        inner.stats.integrity_evictions += 1;
        Self::audit(
            &mut inner,
            &self.config,
            AuditOp::IntegrityEvict,
            key.key_hash(),
            seq,
            &checksum,
        );
        if self.config.integrity_strict {
            return Err(CacheError::Corruption {
                key_hash: key.key_hash(),
            });
        }
        tracing::debug!(key = %key.key_hash(), "corrupted cache entry evicted");
        inner.stats.misses += 1;
        Ok(None)
    }

    /// Remove all entries. Counters, the audit log, and the sequence
    /// counter survive; sequence numbers keep increasing monotonically.
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut inner = self.lock()?;
        inner.entries.clear();
        let seq = inner.sequence;
        Self::audit(
            &mut inner,
            &self.config,
            AuditOp::Clear,
            String::new(),
            seq,
            &[0u8; 16],
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.inner
            .lock()
            .map(|i| i.stats.clone())
            .unwrap_or_default()
    }

    pub fn audit_log(&self) -> Vec<WriteLogEntry> {
        self.inner
            .lock()
            .map(|i| i.audit.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Test support: mutate a stored entry in place to simulate storage
    /// corruption.
    #[doc(hidden)]
    pub fn tamper(&self, key: &CacheKey, f: impl FnOnce(&mut CacheEntry)) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        match inner.entries.get_mut(key.as_bytes()) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for IntegrityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityCache")
            .field("config", &self.config)
            .field("len", &self.len())
            .finish()
    }
}
