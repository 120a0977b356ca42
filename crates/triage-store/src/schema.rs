/// SQL DDL for the triage log database.
/// Columns suffixed `_enc` hold base64 nonce‖ciphertext.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS triage_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL,
    client_id TEXT NOT NULL,
    referral_text_enc TEXT NOT NULL,
    referral_pages INTEGER NOT NULL DEFAULT 0,
    referral_word_count INTEGER NOT NULL DEFAULT 0,
    agent_init_ms REAL,
    llm_call_ms REAL,
    rule_processing_ms REAL,
    total_ms REAL,
    tools_used TEXT NOT NULL DEFAULT '[]',
    tool_call_count INTEGER NOT NULL DEFAULT 0,
    patient_history_used INTEGER NOT NULL DEFAULT 0,
    llm_prompt_enc TEXT,
    llm_response_enc TEXT,
    llm_model TEXT,
    specialty TEXT NOT NULL,
    urgency INTEGER NOT NULL,
    confidence REAL NOT NULL,
    evidence_enc TEXT NOT NULL,
    matched_rule TEXT,
    urgency_criteria TEXT,
    success INTEGER NOT NULL DEFAULT 1,
    failure_kind TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_triage_logs_client ON triage_logs(client_id);
CREATE INDEX IF NOT EXISTS idx_triage_logs_request ON triage_logs(request_id);
CREATE INDEX IF NOT EXISTS idx_triage_logs_specialty ON triage_logs(specialty);
CREATE INDEX IF NOT EXISTS idx_triage_logs_created ON triage_logs(created_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
