//! Wave-based agent orchestration.
//!
//! Per document: Wave 1 runs Layout and Tampering in parallel, Wave 2 runs
//! Extraction with the Layout context, Wave 3 runs Fraud and Insights in
//! parallel. The last document to complete in a multi-document group
//! triggers the serial group phase (Tampering → Fraud → Insights). Every
//! `(document, agent)` pair is gated through the store so re-runs and racing
//! triggers are at-most-once.

use crate::agents::{fraud, insights, layout, tampering, AgentOutcome};
use crate::extraction;
use crate::llm::ModelClient;
use crate::models::{AgentType, Config, DocumentRecord, DocumentStatus};
use crate::pdf::engine::{self, SnapshotOptions};
use crate::store::AnalysisStore;
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct Orchestrator {
    store: AnalysisStore,
    model: ModelClient,
    config: Config,
}

impl Orchestrator {
    pub fn new(store: AnalysisStore, model: ModelClient, config: Config) -> Self {
        Self {
            store,
            model,
            config,
        }
    }

    /// Persist one agent's outcome behind the (document, agent) gate.
    async fn finish_doc_agent(
        &self,
        document_id: &str,
        agent: AgentType,
        started: Instant,
        outcome: Result<AgentOutcome>,
    ) {
        match outcome {
            Ok(outcome) => {
                if let Err(e) = self
                    .store
                    .complete_agent(
                        document_id,
                        agent,
                        &outcome.results,
                        &outcome.summary,
                        &outcome.risk_level,
                    )
                    .await
                {
                    error!("  ❌ Failed to persist {} result: {e:#}", agent.as_str());
                    return;
                }
                info!(
                    "  ✅ {} agent completed in {:.2}s (risk: {})",
                    agent.as_str(),
                    started.elapsed().as_secs_f64(),
                    outcome.risk_level
                );
            }
            Err(e) => {
                error!("  ❌ {} agent failed: {e:#}", agent.as_str());
                if let Err(pe) = self.store.fail_agent(document_id, agent, &format!("{e:#}")).await {
                    error!("  ❌ Failed to persist {} failure: {pe:#}", agent.as_str());
                }
            }
        }
    }

    /// Claim the gate for one agent; false means skip (already completed or
    /// another runner holds it).
    async fn claim(&self, doc: &DocumentRecord, agent: AgentType) -> bool {
        match self.store.try_begin_agent(&doc.id, &doc.upload_group_id, agent).await {
            Ok(true) => true,
            Ok(false) => {
                info!("  ⏭️  Skipping {} agent (already completed or running)", agent.as_str());
                false
            }
            Err(e) => {
                error!("  ❌ Could not claim {} agent: {e:#}", agent.as_str());
                false
            }
        }
    }

    /// Full per-document pipeline. Called as a background task; never
    /// cancelled once started.
    pub async fn process_document(&self, document_id: &str) {
        let total_start = Instant::now();

        let doc = match self.store.get_document(document_id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                error!("Document {document_id} not found");
                return;
            }
            Err(e) => {
                error!("Failed to load document {document_id}: {e:#}");
                return;
            }
        };

        info!("🔮 Starting parallel analysis for document: {}", doc.original_filename);

        // One immutable snapshot, shared by every wave.
        let snapshot = match engine::load_snapshot(
            doc.file_path.clone(),
            SnapshotOptions {
                render: Some(self.config.check_dpi.clone()),
            },
        )
        .await
        {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                error!("❌ Snapshot load failed for {}: {e:#}", doc.original_filename);
                for agent in AgentType::ALL {
                    if self.claim(&doc, agent).await {
                        let _ = self
                            .store
                            .fail_agent(&doc.id, agent, &format!("PDF unreadable: {e:#}"))
                            .await;
                    }
                }
                let _ = self.store.set_document_status(&doc.id, DocumentStatus::Failed).await;
                return;
            }
        };

        // ── Wave 1: Layout ∥ Tampering ───────────────────────────────────
        info!("  🌊 Starting Wave: 1 (Layout + Tampering)");
        let wave_start = Instant::now();
        let layout_branch = async {
            if self.claim(&doc, AgentType::Layout).await {
                let started = Instant::now();
                info!("  🤖 Running layout agent...");
                let outcome = layout::analyse(&snapshot);
                self.finish_doc_agent(&doc.id, AgentType::Layout, started, Ok(outcome)).await;
            }
            // The persisted result (fresh or pre-existing) is the context
            // handed to extraction.
            self.store
                .agent_result(&doc.id, AgentType::Layout)
                .await
                .ok()
                .flatten()
                .and_then(|r| r.results)
        };
        let tampering_branch = async {
            if self.claim(&doc, AgentType::Tampering).await {
                let started = Instant::now();
                info!("  🤖 Running tampering agent...");
                let outcome = tampering::analyse(&snapshot, &self.config, &self.model).await;
                self.finish_doc_agent(&doc.id, AgentType::Tampering, started, Ok(outcome)).await;
            }
        };
        let (layout_context, ()): (Option<Value>, ()) = tokio::join!(layout_branch, tampering_branch);
        info!("  ✅ Wave 1 completed in {:.2}s", wave_start.elapsed().as_secs_f64());

        // ── Wave 2: Extraction (needs Layout context) ────────────────────
        if self.claim(&doc, AgentType::Extraction).await {
            let started = Instant::now();
            info!("  🤖 Running extraction agent...");
            let outcome = extraction::analyse(
                &doc,
                &snapshot,
                &self.store,
                &self.model,
                &self.config,
                layout_context.as_ref(),
            )
            .await;
            self.finish_doc_agent(&doc.id, AgentType::Extraction, started, outcome).await;
        }

        // ── Wave 3: Fraud ∥ Insights ─────────────────────────────────────
        info!("  🌊 Starting Wave: 3 (Fraud + Insights)");
        let wave_start = Instant::now();
        let fraud_branch = async {
            if self.claim(&doc, AgentType::Fraud).await {
                let started = Instant::now();
                let outcome = fraud::analyse(&doc.id, &self.store, &self.model).await;
                self.finish_doc_agent(&doc.id, AgentType::Fraud, started, outcome).await;
            }
        };
        let insights_branch = async {
            if self.claim(&doc, AgentType::Insights).await {
                let started = Instant::now();
                let outcome = insights::analyse(&doc.id, &self.store, &self.model).await;
                self.finish_doc_agent(&doc.id, AgentType::Insights, started, outcome).await;
            }
        };
        tokio::join!(fraud_branch, insights_branch);
        info!("  ✅ Wave 3 completed in {:.2}s", wave_start.elapsed().as_secs_f64());

        if let Err(e) = self.store.set_document_status(&doc.id, DocumentStatus::Completed).await {
            error!("Failed to mark document completed: {e:#}");
            return;
        }
        info!(
            "🔮 Parallel analysis complete for: {} (total: {:.2}s)",
            doc.original_filename,
            total_start.elapsed().as_secs_f64()
        );

        self.maybe_run_group(&doc.upload_group_id).await;
    }

    /// Group trigger probe: the finishing task checks whether every document
    /// in its group is done. Racing winners are serialised by the group
    /// agent gate.
    pub async fn maybe_run_group(&self, group_id: &str) {
        let docs = match self.store.group_documents(group_id).await {
            Ok(docs) => docs,
            Err(e) => {
                error!("Group lookup failed for {group_id}: {e:#}");
                return;
            }
        };
        if docs.len() < 2 {
            return;
        }
        let all_done = docs.iter().all(|d| d.status == DocumentStatus::Completed);
        if !all_done {
            return;
        }
        info!(
            "🔗 All {} documents in group {group_id} completed — triggering group-level agents",
            docs.len()
        );
        self.process_group(group_id).await;
    }

    /// Serial group phase: Tampering → Fraud → Insights, each at-most-once.
    pub async fn process_group(&self, group_id: &str) {
        let docs = match self.store.group_documents(group_id).await {
            Ok(docs) if !docs.is_empty() => docs,
            Ok(_) => {
                error!("No documents found for group {group_id}");
                return;
            }
            Err(e) => {
                error!("Group lookup failed for {group_id}: {e:#}");
                return;
            }
        };

        let completed = docs.iter().filter(|d| d.status == DocumentStatus::Completed).count();
        if completed < docs.len() {
            warn!(
                "  ⏳ Not all documents completed yet for group {group_id} ({completed}/{})",
                docs.len()
            );
            return;
        }
        if docs.len() < 2 {
            info!("  📄 Single document in group {group_id} — skipping group agents");
            return;
        }

        info!(
            "🔮 Starting group-level analysis for {} documents (group: {group_id})",
            docs.len()
        );

        for agent in AgentType::GROUP {
            let claimed = match self.store.try_begin_group_agent(group_id, agent).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!("  ❌ Could not claim group {} agent: {e:#}", agent.as_str());
                    continue;
                }
            };
            if !claimed {
                info!("  ⏭️  Skipping group {} (already completed or running)", agent.as_str());
                continue;
            }

            info!("  🤖 Running group {} agent...", agent.as_str());
            let outcome = match agent {
                AgentType::Tampering => tampering::analyse_group(&docs, &self.store).await,
                AgentType::Fraud => fraud::analyse_group(group_id, &self.store, &self.model).await,
                AgentType::Insights => {
                    insights::analyse_group(group_id, &self.store, &self.model).await
                }
                _ => unreachable!("only group-capable agents are dispatched"),
            };

            match outcome {
                Ok(outcome) => {
                    if let Err(e) = self
                        .store
                        .complete_group_agent(
                            group_id,
                            agent,
                            &outcome.results,
                            &outcome.summary,
                            &outcome.risk_level,
                        )
                        .await
                    {
                        error!("  ❌ Failed to persist group {} result: {e:#}", agent.as_str());
                        continue;
                    }
                    info!(
                        "  ✅ Group {} completed (risk: {})",
                        agent.as_str(),
                        outcome.risk_level
                    );
                }
                Err(e) => {
                    error!("  ❌ Group {} failed: {e:#}", agent.as_str());
                    let _ = self.store.fail_group_agent(group_id, agent, &format!("{e:#}")).await;
                }
            }
        }

        info!("🔮 Group analysis complete for {group_id}");
    }
}
