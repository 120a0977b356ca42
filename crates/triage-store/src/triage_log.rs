use std::collections::BTreeMap;

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use triage_core::events::AnalysisRecord;

use crate::database::Database;
use crate::error::StoreError;
use crate::secrets::FieldCipher;

/// A stored analysis with its encrypted columns opened.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DecryptedTriageLog {
    pub id: i64,
    pub request_id: String,
    pub client_id: String,
    pub created_at: String,
    pub referral_text: Vec<String>,
    pub llm_prompt: Option<String>,
    pub llm_response: Option<String>,
    pub evidence: String,
    pub referral_pages: i64,
    pub specialty: String,
    pub urgency: u8,
    pub confidence: f64,
    pub llm_model: Option<String>,
    pub tools_used: Vec<String>,
    pub matched_rule: Option<String>,
    pub success: bool,
    pub failure_kind: Option<String>,
    pub total_ms: Option<f64>,
}

/// Aggregates over stored analyses.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TriageStats {
    pub total: i64,
    pub successful: i64,
    pub failed: i64,
    pub urgent: i64,
    pub non_urgent: i64,
    pub by_specialty: BTreeMap<String, i64>,
    pub average_total_ms: f64,
    pub average_confidence: f64,
}

impl TriageStats {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64 * 100.0
        }
    }
}

/// Repository over the `triage_logs` table. Free-text health data
/// (pages, prompt, model output, evidence) is encrypted per column.
#[derive(Clone)]
pub struct TriageLogRepo {
    db: Database,
    cipher: FieldCipher,
}

const SELECT_COLUMNS: &str = "id, request_id, client_id, created_at, referral_text_enc, llm_prompt_enc,
     llm_response_enc, evidence_enc, referral_pages, specialty, urgency, confidence, llm_model,
     tools_used, matched_rule, success, failure_kind, total_ms";

impl TriageLogRepo {
    pub fn new(db: Database, cipher: FieldCipher) -> Self {
        Self { db, cipher }
    }

    /// Persist one analysis. Returns the row id.
    #[instrument(skip_all, fields(request_id = %record.request_id, client_id = %record.client_id))]
    pub fn insert(&self, record: &AnalysisRecord) -> Result<i64, StoreError> {
        let referral_enc = self.cipher.encrypt_json(&record.referral_pages)?;
        let prompt_enc = self.encrypt_opt(record.prompt.as_deref())?;
        let response_enc = self.encrypt_opt(record.llm_response.as_deref())?;
        let evidence_enc = self.cipher.encrypt(&record.result.evidence)?;
        let tools_used = serde_json::to_string(&record.tools_used)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO triage_logs (
                    request_id, client_id, referral_text_enc, referral_pages, referral_word_count,
                    agent_init_ms, llm_call_ms, rule_processing_ms, total_ms,
                    tools_used, tool_call_count, patient_history_used,
                    llm_prompt_enc, llm_response_enc, llm_model,
                    specialty, urgency, confidence, evidence_enc,
                    matched_rule, urgency_criteria, success, failure_kind, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                           ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
                params![
                    record.request_id.as_str(),
                    record.client_id,
                    referral_enc,
                    record.page_count() as i64,
                    record.word_count() as i64,
                    record.timings.agent_init_ms,
                    record.timings.llm_call_ms,
                    record.timings.rule_processing_ms,
                    record.timings.total_ms,
                    tools_used,
                    record.tools_used.len() as i64,
                    record.patient_history_used(),
                    prompt_enc,
                    response_enc,
                    record.llm_model,
                    record.result.specialty,
                    record.result.urgency,
                    record.result.confidence,
                    evidence_enc,
                    record.matched_rule,
                    record.urgency_criteria,
                    record.failure.is_none(),
                    record.failure.map(|k| k.as_str()),
                    record.created_at,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_decrypted(&self, id: i64) -> Result<Option<DecryptedTriageLog>, StoreError> {
        let raw = self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM triage_logs WHERE id = ?1"),
                [id],
                RawLog::from_row,
            )
            .optional()
            .map_err(StoreError::from)
        })?;
        raw.map(|r| r.decrypt(&self.cipher)).transpose()
    }

    /// Most recent analyses first.
    pub fn recent(&self, limit: u32) -> Result<Vec<DecryptedTriageLog>, StoreError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM triage_logs ORDER BY id DESC LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map([limit], RawLog::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(|r| r.decrypt(&self.cipher)).collect()
    }

    /// Aggregate statistics, optionally for one client.
    pub fn stats(&self, client_id: Option<&str>) -> Result<TriageStats, StoreError> {
        self.db.with_conn(|conn| {
            let filter = "(?1 IS NULL OR client_id = ?1)";
            let mut stats = conn.query_row(
                &format!(
                    "SELECT COUNT(*),
                            COALESCE(SUM(success), 0),
                            COALESCE(SUM(urgency), 0),
                            COALESCE(AVG(CASE WHEN success = 1 THEN total_ms END), 0.0),
                            COALESCE(AVG(CASE WHEN success = 1 THEN confidence END), 0.0)
                     FROM triage_logs WHERE {filter}"
                ),
                [client_id],
                |row| {
                    let total: i64 = row.get(0)?;
                    let successful: i64 = row.get(1)?;
                    let urgent: i64 = row.get(2)?;
                    Ok(TriageStats {
                        total,
                        successful,
                        failed: total - successful,
                        urgent,
                        non_urgent: total - urgent,
                        by_specialty: BTreeMap::new(),
                        average_total_ms: row.get(3)?,
                        average_confidence: row.get(4)?,
                    })
                },
            )?;

            let mut stmt = conn.prepare(&format!(
                "SELECT specialty, COUNT(*) FROM triage_logs WHERE {filter} GROUP BY specialty"
            ))?;
            let pairs = stmt
                .query_map([client_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            stats.by_specialty = pairs.into_iter().collect();
            Ok(stats)
        })
    }

    fn encrypt_opt(&self, value: Option<&str>) -> Result<Option<String>, StoreError> {
        value
            .filter(|v| !v.is_empty())
            .map(|v| self.cipher.encrypt(v))
            .transpose()
            .map_err(StoreError::from)
    }
}

struct RawLog {
    id: i64,
    request_id: String,
    client_id: String,
    created_at: String,
    referral_enc: String,
    prompt_enc: Option<String>,
    response_enc: Option<String>,
    evidence_enc: String,
    referral_pages: i64,
    specialty: String,
    urgency: u8,
    confidence: f64,
    llm_model: Option<String>,
    tools_used: String,
    matched_rule: Option<String>,
    success: bool,
    failure_kind: Option<String>,
    total_ms: Option<f64>,
}

impl RawLog {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            request_id: row.get(1)?,
            client_id: row.get(2)?,
            created_at: row.get(3)?,
            referral_enc: row.get(4)?,
            prompt_enc: row.get(5)?,
            response_enc: row.get(6)?,
            evidence_enc: row.get(7)?,
            referral_pages: row.get(8)?,
            specialty: row.get(9)?,
            urgency: row.get(10)?,
            confidence: row.get(11)?,
            llm_model: row.get(12)?,
            tools_used: row.get(13)?,
            matched_rule: row.get(14)?,
            success: row.get(15)?,
            failure_kind: row.get(16)?,
            total_ms: row.get(17)?,
        })
    }

    fn decrypt(self, cipher: &FieldCipher) -> Result<DecryptedTriageLog, StoreError> {
        Ok(DecryptedTriageLog {
            id: self.id,
            request_id: self.request_id,
            client_id: self.client_id,
            created_at: self.created_at,
            referral_text: cipher.decrypt_json(&self.referral_enc)?,
            llm_prompt: self.prompt_enc.map(|v| cipher.decrypt(&v)).transpose()?,
            llm_response: self.response_enc.map(|v| cipher.decrypt(&v)).transpose()?,
            evidence: cipher.decrypt(&self.evidence_enc)?,
            referral_pages: self.referral_pages,
            specialty: self.specialty,
            urgency: self.urgency,
            confidence: self.confidence,
            llm_model: self.llm_model,
            tools_used: serde_json::from_str(&self.tools_used)?,
            matched_rule: self.matched_rule,
            success: self.success,
            failure_kind: self.failure_kind,
            total_ms: self.total_ms,
        })
    }
}
