//! SQL migration definitions for the modcrawl database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: index_entries, packages, crawl_runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per published version seen on the index feed
CREATE TABLE IF NOT EXISTS index_entries (
    path      TEXT NOT NULL,
    version   TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    PRIMARY KEY (path, version)
);

CREATE INDEX IF NOT EXISTS idx_index_entries_timestamp ON index_entries(timestamp);

-- Latest enrichment per package path
CREATE TABLE IF NOT EXISTS packages (
    path                        TEXT PRIMARY KEY,
    version                     TEXT,
    license                     TEXT,
    repository                  TEXT,
    is_module                   INTEGER NOT NULL DEFAULT 0,
    is_latest_version           INTEGER NOT NULL DEFAULT 0,
    is_valid_manifest           INTEGER NOT NULL DEFAULT 0,
    has_redistributable_license INTEGER NOT NULL DEFAULT 0,
    is_tagged_version           INTEGER NOT NULL DEFAULT 0,
    is_stable_version           INTEGER NOT NULL DEFAULT 0,
    std_imports                 TEXT NOT NULL DEFAULT '[]',
    imports                     TEXT NOT NULL DEFAULT '[]',
    imported_by                 TEXT NOT NULL DEFAULT '[]',
    captured_at                 INTEGER NOT NULL
);

-- Crawl and enrichment run history
CREATE TABLE IF NOT EXISTS crawl_runs (
    id          TEXT PRIMARY KEY,
    kind        TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
