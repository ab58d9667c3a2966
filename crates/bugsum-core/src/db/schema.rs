//! Canonical SQLite schema for the bug summary.
//!
//! - `bug_summary` holds the rolled-up count per location key
//! - `bug_summary_journal` holds signed deltas not yet rolled up
//! - `summary_meta` tracks schema version and the last rollup watermark
//!
//! Both count tables share the same key columns. Nullable key columns are
//! wrapped in `COALESCE(col, '')` inside the unique index so that two rows
//! differing only by `NULL`s still collide. The sentinel is TEXT: SQLite
//! never compares TEXT equal to INTEGER, so no id value can alias `NULL`.

/// Migration v1: aggregate, journal and metadata tables.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS bug_summary (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    count INTEGER NOT NULL DEFAULT 0,
    product INTEGER,
    productseries INTEGER,
    distribution INTEGER,
    distroseries INTEGER,
    sourcepackagename INTEGER,
    ociproject INTEGER,
    viewed_by INTEGER,
    access_policy INTEGER,
    tag TEXT CHECK (tag IS NULL OR length(trim(tag)) > 0),
    status TEXT NOT NULL CHECK (status IN (
        'new', 'incomplete', 'opinion', 'invalid', 'wontfix', 'expired',
        'confirmed', 'triaged', 'inprogress', 'deferred', 'fixcommitted',
        'fixreleased', 'doesnotexist', 'unknown'
    )),
    milestone INTEGER,
    importance TEXT NOT NULL CHECK (importance IN (
        'unknown', 'undecided', 'critical', 'high', 'medium', 'low', 'wishlist'
    )),
    has_patch INTEGER NOT NULL CHECK (has_patch IN (0, 1)),
    CHECK (
        (product IS NOT NULL) + (productseries IS NOT NULL)
        + (distribution IS NOT NULL) + (distroseries IS NOT NULL) = 1
    ),
    CHECK (viewed_by IS NULL OR access_policy IS NULL)
);

CREATE UNIQUE INDEX IF NOT EXISTS bug_summary__unique ON bug_summary (
    COALESCE(product, ''),
    COALESCE(productseries, ''),
    COALESCE(distribution, ''),
    COALESCE(distroseries, ''),
    COALESCE(sourcepackagename, ''),
    COALESCE(ociproject, ''),
    COALESCE(viewed_by, ''),
    COALESCE(access_policy, ''),
    COALESCE(tag, ''),
    status,
    COALESCE(milestone, ''),
    importance,
    has_patch
);

CREATE TABLE IF NOT EXISTS bug_summary_journal (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    count INTEGER NOT NULL CHECK (count <> 0),
    product INTEGER,
    productseries INTEGER,
    distribution INTEGER,
    distroseries INTEGER,
    sourcepackagename INTEGER,
    ociproject INTEGER,
    viewed_by INTEGER,
    access_policy INTEGER,
    tag TEXT,
    status TEXT NOT NULL,
    milestone INTEGER,
    importance TEXT NOT NULL,
    has_patch INTEGER NOT NULL CHECK (has_patch IN (0, 1))
);

CREATE TABLE IF NOT EXISTS summary_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    last_rollup_at_us INTEGER,
    last_watermark INTEGER
);

INSERT OR IGNORE INTO summary_meta (id, schema_version, last_rollup_at_us, last_watermark)
VALUES (1, 1, NULL, NULL);
";

/// Migration v2: read-path indexes and the combined view.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS bug_summary__product
    ON bug_summary(product, tag);

CREATE INDEX IF NOT EXISTS bug_summary__distroseries
    ON bug_summary(distroseries, sourcepackagename, tag);

CREATE INDEX IF NOT EXISTS bug_summary__distribution
    ON bug_summary(distribution, sourcepackagename, tag);

CREATE INDEX IF NOT EXISTS bug_summary__viewed_by
    ON bug_summary(viewed_by);

CREATE INDEX IF NOT EXISTS bug_summary__count
    ON bug_summary(count);

CREATE INDEX IF NOT EXISTS bug_summary_journal__product
    ON bug_summary_journal(product, tag);

CREATE VIEW IF NOT EXISTS combined_bug_summary AS
SELECT
    'aggregate' AS source, id, count,
    product, productseries, distribution, distroseries,
    sourcepackagename, ociproject, viewed_by, access_policy,
    tag, status, milestone, importance, has_patch
FROM bug_summary
UNION ALL
SELECT
    'journal' AS source, id, count,
    product, productseries, distribution, distroseries,
    sourcepackagename, ociproject, viewed_by, access_policy,
    tag, status, milestone, importance, has_patch
FROM bug_summary_journal;

UPDATE summary_meta
SET schema_version = 2
WHERE id = 1;
";

/// Indexes expected by the filter and rollup paths.
pub const REQUIRED_INDEXES: &[&str] = &[
    "bug_summary__unique",
    "bug_summary__product",
    "bug_summary__distroseries",
    "bug_summary__distribution",
    "bug_summary__viewed_by",
    "bug_summary__count",
    "bug_summary_journal__product",
];
