/// Tables are created idempotently on open
pub(super) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS customers (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    email       TEXT NOT NULL,
    base_url    TEXT NOT NULL,
    sitemap_url TEXT,
    crawl_limit INTEGER,
    active      INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS targets (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id TEXT NOT NULL REFERENCES customers(id),
    url         TEXT NOT NULL,
    label       TEXT,
    UNIQUE (customer_id, url)
);

CREATE TABLE IF NOT EXISTS snapshots (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id  TEXT NOT NULL,
    url          TEXT NOT NULL,
    status_code  INTEGER,
    final_url    TEXT NOT NULL,
    content_hash TEXT,
    fetched_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_snapshots_customer_url ON snapshots (customer_id, url);

CREATE TABLE IF NOT EXISTS artifacts (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id  TEXT NOT NULL,
    kind         TEXT NOT NULL,
    subject      TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    raw_content  TEXT NOT NULL,
    fetched_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_artifacts_baseline ON artifacts (customer_id, kind, subject, fetched_at);

CREATE TABLE IF NOT EXISTS findings (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id TEXT NOT NULL,
    run_id      TEXT NOT NULL,
    run_type    TEXT NOT NULL,
    severity    TEXT NOT NULL,
    category    TEXT NOT NULL,
    title       TEXT NOT NULL,
    details     TEXT NOT NULL,
    url         TEXT NOT NULL,
    dedupe_key  TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_findings_customer ON findings (customer_id, created_at);
CREATE INDEX IF NOT EXISTS idx_findings_run ON findings (run_id);

CREATE TABLE IF NOT EXISTS run_coverage (
    customer_id       TEXT NOT NULL,
    run_id            TEXT NOT NULL,
    run_type          TEXT NOT NULL,
    total_urls        INTEGER NOT NULL DEFAULT 0,
    sampled_urls      INTEGER NOT NULL DEFAULT 0,
    success_count     INTEGER NOT NULL DEFAULT 0,
    error_count       INTEGER NOT NULL DEFAULT 0,
    http_429_count    INTEGER NOT NULL DEFAULT 0,
    http_404_count    INTEGER NOT NULL DEFAULT 0,
    broken_link_count INTEGER NOT NULL DEFAULT 0,
    updated_at        TEXT NOT NULL,
    UNIQUE (customer_id, run_id, run_type)
);

CREATE TABLE IF NOT EXISTS deliveries (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id   TEXT NOT NULL,
    run_id        TEXT NOT NULL,
    run_type      TEXT NOT NULL,
    finding_count INTEGER NOT NULL,
    delivered_at  TEXT NOT NULL
);
"#;
