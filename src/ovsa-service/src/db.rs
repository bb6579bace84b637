//! The license store: one relational table, one row per issued license.
//!
//! Ingestion verifies the customer license offline and extracts the columns
//! the validation path needs. Validation reads rows freely; the only write
//! on the hot path is the usage-count decrement, which runs as a single
//! conditional UPDATE so two concurrent validations of a quota-1 license
//! resolve to exactly one success.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use ovsa_core::{CustomerLicense, LicensePolicy, OvsaError, TcbSignature};

use crate::error::ServiceError;

/// Lifecycle state of a license row. Terminal states have no outgoing
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseStatus {
    /// Usable, subject to policy checks.
    Active,
    /// UsageCount quota fully consumed.
    Exhausted,
    /// TimeLimit expiry passed.
    Expired,
    /// Administratively revoked.
    Revoked,
}

impl LicenseStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Exhausted => "exhausted",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    fn parse(s: &str) -> Result<Self, ServiceError> {
        match s {
            "active" => Ok(Self::Active),
            "exhausted" => Ok(Self::Exhausted),
            "expired" => Ok(Self::Expired),
            "revoked" => Ok(Self::Revoked),
            other => Err(ServiceError::Core(OvsaError::invalid(format!(
                "unknown license status {other:?}"
            )))),
        }
    }

    /// Whether this state permits validation to proceed.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// One license row as the validator sees it.
#[derive(Debug, Clone)]
pub struct LicenseRecord {
    /// Primary key.
    pub license_guid: String,
    /// SPKI fingerprint the connecting client must present.
    pub customer_primary_fingerprint: String,
    /// Standby fingerprint, empty when not registered.
    pub customer_secondary_fingerprint: String,
    /// The policy variant from the license.
    pub policy: LicensePolicy,
    /// The TCB signature the license is bound to.
    pub tcb: TcbSignature,
    /// Bundle GUID.
    pub model_guid: String,
    /// Bundle hash the runtime must present.
    pub model_hash: String,
    /// Remaining validations for UsageCount policies.
    pub remaining_quota: Option<u32>,
    /// Unix expiry for TimeLimit policies.
    pub expiry_timestamp: Option<i64>,
    /// Current lifecycle state.
    pub status: LicenseStatus,
}

/// Outcome of a usage-count consumption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// One unit consumed; `now_exhausted` reports whether this consumption
    /// drained the quota.
    Consumed {
        /// The decrement reached zero and the row is now exhausted.
        now_exhausted: bool,
    },
    /// Nothing left to consume (or the row left Active concurrently).
    Denied,
}

/// The file-backed license store.
pub struct LicenseDb {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS licenses (
    license_guid                   TEXT PRIMARY KEY,
    customer_primary_fingerprint   TEXT NOT NULL,
    customer_secondary_fingerprint TEXT NOT NULL,
    license_policy                 TEXT NOT NULL,
    tcb_signature                  TEXT NOT NULL,
    model_guid                     TEXT NOT NULL,
    model_hash                     TEXT NOT NULL,
    remaining_quota                INTEGER,
    expiry_timestamp               INTEGER,
    status                         TEXT NOT NULL
        CHECK (status IN ('active', 'exhausted', 'expired', 'revoked'))
);
";

impl LicenseDb {
    /// Open (creating if needed) the store at `path`.
    ///
    /// `synchronous=FULL` keeps committed transactions flushed to disk.
    pub fn open(path: &Path) -> Result<Self, ServiceError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (tests, dry runs).
    pub fn open_in_memory() -> Result<Self, ServiceError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Verify and insert a customer license (the offline admin path).
    ///
    /// The license signature is checked against its embedded issuer
    /// certificate before anything reaches the table. Initial state is
    /// Active.
    pub fn ingest(&self, license: &CustomerLicense) -> Result<(), ServiceError> {
        license.verify(&license.payload.isv_certificate)?;
        license.payload.license_config.validate()?;

        let creation = chrono::DateTime::parse_from_rfc3339(&license.payload.creation_date)
            .map_err(|e| {
                ServiceError::Core(OvsaError::invalid(format!("creation date: {e}")))
            })?
            .with_timezone(&chrono::Utc);
        let policy = license.payload.license_config;
        let policy_json = serde_json::to_string(&policy)
            .map_err(|e| ServiceError::Core(OvsaError::invalid(e.to_string())))?;
        let tcb_json = serde_json::to_string(&license.payload.tcb)
            .map_err(|e| ServiceError::Core(OvsaError::invalid(e.to_string())))?;

        let conn = self.conn.lock().expect("db lock poisoned");
        conn.execute(
            "INSERT INTO licenses (
                license_guid, customer_primary_fingerprint,
                customer_secondary_fingerprint, license_policy, tcb_signature,
                model_guid, model_hash, remaining_quota, expiry_timestamp,
                status
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'active')",
            params![
                license.payload.license_guid,
                license.payload.customer_primary_fingerprint,
                license.payload.customer_secondary_fingerprint,
                policy_json,
                tcb_json,
                license.payload.model_guid,
                license.payload.model_hash,
                policy.initial_quota(),
                policy.expiry_from(creation),
            ],
        )?;
        info!(license_guid = %license.payload.license_guid, "license ingested");
        Ok(())
    }

    /// Fetch one row by GUID.
    pub fn lookup(&self, license_guid: &str) -> Result<Option<LicenseRecord>, ServiceError> {
        let conn = self.conn.lock().expect("db lock poisoned");
        conn.query_row(
            "SELECT license_guid, customer_primary_fingerprint,
                    customer_secondary_fingerprint, license_policy,
                    tcb_signature, model_guid, model_hash, remaining_quota,
                    expiry_timestamp, status
             FROM licenses WHERE license_guid = ?1",
            params![license_guid],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<u32>>(7)?,
                    row.get::<_, Option<i64>>(8)?,
                    row.get::<_, String>(9)?,
                ))
            },
        )
        .optional()?
        .map(|raw| {
            Ok(LicenseRecord {
                license_guid: raw.0,
                customer_primary_fingerprint: raw.1,
                customer_secondary_fingerprint: raw.2,
                policy: serde_json::from_str(&raw.3)
                    .map_err(|e| ServiceError::Core(OvsaError::invalid(e.to_string())))?,
                tcb: serde_json::from_str(&raw.4)
                    .map_err(|e| ServiceError::Core(OvsaError::invalid(e.to_string())))?,
                model_guid: raw.5,
                model_hash: raw.6,
                remaining_quota: raw.7,
                expiry_timestamp: raw.8,
                status: LicenseStatus::parse(&raw.9)?,
            })
        })
        .transpose()
    }

    /// Atomically consume one usage unit.
    ///
    /// The conditional UPDATE is the row-level serialization point: it only
    /// succeeds while the row is Active with quota remaining, and it flips
    /// the row to Exhausted in the same statement when the quota hits zero.
    pub fn consume_usage(&self, license_guid: &str) -> Result<ConsumeOutcome, ServiceError> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let changed = conn.execute(
            "UPDATE licenses
             SET remaining_quota = remaining_quota - 1,
                 status = CASE WHEN remaining_quota - 1 = 0
                               THEN 'exhausted' ELSE status END
             WHERE license_guid = ?1
               AND status = 'active'
               AND remaining_quota > 0",
            params![license_guid],
        )?;
        if changed == 0 {
            debug!(%license_guid, "usage consumption denied");
            return Ok(ConsumeOutcome::Denied);
        }
        let remaining: u32 = conn.query_row(
            "SELECT remaining_quota FROM licenses WHERE license_guid = ?1",
            params![license_guid],
            |row| row.get(0),
        )?;
        Ok(ConsumeOutcome::Consumed {
            now_exhausted: remaining == 0,
        })
    }

    /// Administratively revoke a license. Terminal states stay terminal.
    pub fn revoke(&self, license_guid: &str) -> Result<bool, ServiceError> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let changed = conn.execute(
            "UPDATE licenses SET status = 'revoked'
             WHERE license_guid = ?1 AND status = 'active'",
            params![license_guid],
        )?;
        Ok(changed == 1)
    }

    /// Housekeeping: mark Active TimeLimit rows whose expiry has passed.
    /// Run by the admin path, never by a validation.
    pub fn expire_overdue(&self, now: i64) -> Result<usize, ServiceError> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let changed = conn.execute(
            "UPDATE licenses SET status = 'expired'
             WHERE status = 'active'
               AND expiry_timestamp IS NOT NULL
               AND expiry_timestamp < ?1",
            params![now],
        )?;
        Ok(changed)
    }
}
