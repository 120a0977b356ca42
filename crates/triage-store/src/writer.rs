use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use triage_core::events::TriageEvent;

use crate::triage_log::TriageLogRepo;

/// Persist every `AnalysisCompleted` event from the analyzer's channel.
///
/// Runs until the channel closes. Insert failures are logged and dropped;
/// they never reach the request that produced the record.
pub fn spawn_log_writer(
    repo: TriageLogRepo,
    mut rx: broadcast::Receiver<TriageEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(TriageEvent::AnalysisCompleted(record)) => {
                    let repo = repo.clone();
                    let request_id = record.request_id.clone();
                    let joined = tokio::task::spawn_blocking(move || repo.insert(&record)).await;
                    match joined {
                        Ok(Ok(id)) => tracing::debug!(id, %request_id, "triage log written"),
                        Ok(Err(e)) => {
                            tracing::warn!(%request_id, error = %e, "failed to write triage log")
                        }
                        Err(e) => tracing::warn!(%request_id, error = %e, "triage log task failed"),
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "triage log writer lagged, dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("triage log channel closed");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::secrets::FieldCipher;
    use triage_core::events::{AnalysisRecord, StageTimings};
    use triage_core::ids::RequestId;
    use triage_core::triage::TriageResult;

    fn completed(specialty: &str) -> TriageEvent {
        TriageEvent::AnalysisCompleted(Box::new(AnalysisRecord {
            request_id: RequestId::new(),
            client_id: "clinic".into(),
            referral_pages: vec!["page".into()],
            prompt: None,
            llm_response: Some(format!("SPECIALTY: {specialty}")),
            llm_model: None,
            result: TriageResult::new(specialty, false, "evidence", 0.5),
            failure: None,
            tools_used: vec![],
            matched_rule: None,
            urgency_criteria: None,
            timings: StageTimings::default(),
            created_at: "2026-01-01T00:00:00Z".into(),
        }))
    }

    #[tokio::test]
    async fn writes_completed_events_until_closed() {
        let repo = TriageLogRepo::new(Database::in_memory().unwrap(), FieldCipher::random());
        let (tx, rx) = broadcast::channel(16);
        let handle = spawn_log_writer(repo.clone(), rx);

        tx.send(TriageEvent::AnalysisStarted {
            request_id: RequestId::new(),
            client_id: "clinic".into(),
        })
        .unwrap();
        tx.send(completed("CARDIOLOGY")).unwrap();
        tx.send(completed("NEUROLOGY")).unwrap();
        drop(tx);

        handle.await.unwrap();
        let rows = repo.recent(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].specialty, "NEUROLOGY");
    }
}
