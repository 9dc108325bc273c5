/// kwhmon_service: hourly electricity usage collector for a co-op's
/// customer portal.
///
/// # Module structure
///
/// ```text
/// kwhmon_service
/// ├── model       — shared data types (UsagePoint, StatisticRow, MonitoringState, PortalError, …)
/// ├── config      — service configuration loader (kwhmon.toml + env overrides)
/// ├── portal      — customer portal client: login form replay, session, usage requests
/// │   ├── login   — hidden form field extraction and login payload
/// │   ├── usage   — request bodies and hourly response parsing
/// │   └── fixtures (test only) — representative portal pages and payloads
/// ├── reconcile   — gap detection over the lookback window and backfill
/// ├── store       — statistics store trait
/// │   ├── pg      — PostgreSQL implementation (energy schema)
/// │   └── memory  — in-process implementation
/// ├── db          — database connection and schema validation
/// ├── daemon      — main daemon loop (restore state, reconcile, record outcome)
/// └── endpoint    — HTTP status endpoint
/// ```

/// Public modules
pub mod config;
pub mod daemon;
pub mod db;
pub mod endpoint;
pub mod model;
pub mod portal;
pub mod reconcile;
pub mod store;
