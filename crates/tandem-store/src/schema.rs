/// SQL DDL for the tandem database.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS topics (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    display_order INTEGER NOT NULL,
    is_rankable INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS subtopics (
    id INTEGER PRIMARY KEY,
    topic_id INTEGER NOT NULL REFERENCES topics(id),
    name TEXT NOT NULL,
    round_order INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    role_label TEXT,
    topic_ranking TEXT NOT NULL DEFAULT '[]',
    push_token TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pairing_requests (
    id TEXT PRIMARY KEY,
    from_account TEXT NOT NULL,
    to_account TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS partnership_progress (
    partnership_id TEXT PRIMARY KEY,
    primary_account TEXT NOT NULL,
    secondary_account TEXT NOT NULL,
    combined_topic_order TEXT NOT NULL,
    current_round INTEGER NOT NULL DEFAULT 1,
    is_complete INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS progress_completed_subtopics (
    partnership_id TEXT NOT NULL REFERENCES partnership_progress(partnership_id),
    subtopic_id INTEGER NOT NULL,
    completed_at TEXT NOT NULL,
    PRIMARY KEY (partnership_id, subtopic_id)
);

CREATE TABLE IF NOT EXISTS daily_assignments (
    partnership_id TEXT NOT NULL,
    date TEXT NOT NULL,
    subtopic_id INTEGER NOT NULL,
    user_completion TEXT NOT NULL DEFAULT '{}',
    both_completed INTEGER NOT NULL DEFAULT 0,
    both_completed_at TEXT,
    next_scheduled_date TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (partnership_id, date)
);

CREATE TABLE IF NOT EXISTS reminder_log (
    account_id TEXT NOT NULL,
    partnership_id TEXT NOT NULL,
    last_sent_at TEXT NOT NULL,
    PRIMARY KEY (account_id, partnership_id)
);

CREATE TABLE IF NOT EXISTS document_changes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    document_id TEXT NOT NULL,
    operation TEXT NOT NULL,
    before_json TEXT,
    after_json TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    acked_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_subtopics_topic ON subtopics(topic_id);
CREATE INDEX IF NOT EXISTS idx_pairing_to ON pairing_requests(to_account, status);
CREATE INDEX IF NOT EXISTS idx_progress_complete ON partnership_progress(is_complete);
CREATE INDEX IF NOT EXISTS idx_assignments_open
    ON daily_assignments(partnership_id, both_completed);
CREATE INDEX IF NOT EXISTS idx_changes_pending ON document_changes(acked_at, seq);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
