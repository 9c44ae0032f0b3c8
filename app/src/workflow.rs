//! Orchestration state machine (§4.10):
//!
//! `uploaded -> ocr_primary -> parse -> llm_primary -> validate -> done
//!   | fallback_ocr -> parse -> llm_fallback -> validate -> done
//!   | needs_review`

use crate::artifacts::ArtifactWriter;
use crate::dependency::{Dependencies, Services};
use crate::prompt::RagSnippet;
use crate::providers::{text_blocks_from_block_form, to_normalizer_payload, LlmProvider, OcrProvider, ProviderOutput};
use receipt_core::amount_column::detect_amount_column;
use receipt_core::geometry::{AmountColumn, ExtractedItem};
use receipt_core::merchant_cleanup::{clean_tt_items, is_tt_merchant};
use receipt_core::ocr_normalizer::{extract_unified_info, normalize_ocr_result, UnifiedInfo};
use receipt_core::parsed_receipt::ParsedReceipt;
use receipt_core::parsers::parse_receipt;
use receipt_core::regions::split_regions;
use receipt_core::rows::reconstruct_rows;
use receipt_core::store_config::{StoreConfig, StoreConfigRegistry};
use receipt_core::summary::{ProcessingRun, ProcessingStage, ReceiptSummary, RunStatus, TaxLine};
use receipt_core::validation::{apply_field_conflicts_resolution, check_receipt_sums, validate_item_math, FieldConflict, ResolutionReport, SumCheckReport};
use receipt_shared::config::Settings;
use receipt_shared::error::{ReceiptError, ReceiptResult};
use receipt_shared::time::{generate_receipt_id, now_iso8601};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::timeline::{TimelineRecorder, TimelineReport};

/// One incoming receipt image and the hints the caller already has about it.
pub struct ReceiptUpload {
    pub user_id: String,
    pub image_bytes: Vec<u8>,
    pub mime_type: String,
    pub merchant_id_hint: Option<String>,
    pub merchant_name_hint: Option<String>,
    pub chain_id_hint: Option<String>,
    pub rag_snippets: Vec<RagSnippet>,
}

/// A cooperative cancellation flag, checked between (not during) stages. No
/// already-committed write is rolled back once a stage has persisted.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The orchestrator's terminal states, forwarded verbatim to
/// [`crate::statistics::StatisticsManager::update_statistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Passed,
    PassedWithResolution,
    PassedAfterFallback,
    PassedAfterBackup,
    NeedsManualReview,
    Error,
}

impl TerminalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalStatus::Passed => "passed",
            TerminalStatus::PassedWithResolution => "passed_with_resolution",
            TerminalStatus::PassedAfterFallback => "passed_after_fallback",
            TerminalStatus::PassedAfterBackup => "passed_after_backup",
            TerminalStatus::NeedsManualReview => "needs_manual_review",
            TerminalStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkflowOutcome {
    pub receipt_id: String,
    pub status: TerminalStatus,
    pub summary: Option<ReceiptSummary>,
    pub sum_check: Option<SumCheckReport>,
    pub resolution: Option<ResolutionReport>,
    pub error: Option<String>,
    pub timeline: TimelineReport,
}

/// Processes one receipt end to end. Never panics on a stage failure: every
/// typed error resolves into a terminal status, with only
/// [`ReceiptError::RepositoryError`] forcing the top-level `error` branch.
pub async fn process_receipt<D: Dependencies>(
    services: &Services<D>,
    settings: &Settings,
    upload: ReceiptUpload,
    cancellation: &CancellationToken,
) -> WorkflowOutcome {
    let receipt_id = generate_receipt_id();
    let mut timeline = TimelineRecorder::new(&receipt_id);

    match run_pipeline(services, settings, &upload, &receipt_id, &mut timeline, cancellation).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(receipt_id = %receipt_id, error = %err, "receipt workflow failed");
            let report = timeline.to_report();

            let writer = ArtifactWriter::new(settings);
            if let Err(io_err) = writer.write_error(&receipt_id, &err.to_string(), &report) {
                tracing::error!(%io_err, "failed to persist error artifact");
            }

            services.statistics.update_statistics(&today(), "openai", false, true, false);
            let _ = services.receipts.save_processing_run(ProcessingRun {
                receipt_id: receipt_id.clone(),
                stage: ProcessingStage::Manual,
                model_provider: "orchestrator".to_string(),
                model_name: None,
                status: RunStatus::Fail,
                validation_status: None,
                input_payload: Value::Null,
                output_payload: Value::Null,
                error_message: Some(err.to_string()),
                created_at: now_iso8601(),
            });

            WorkflowOutcome {
                receipt_id,
                status: TerminalStatus::Error,
                summary: None,
                sum_check: None,
                resolution: None,
                error: Some(err.to_string()),
                timeline: report,
            }
        }
    }
}

fn today() -> String {
    now_iso8601()[..10].to_string()
}

fn check_cancelled(token: &CancellationToken) -> ReceiptResult<()> {
    if token.is_cancelled() {
        return Err(ReceiptError::RepositoryError("workflow cancelled".to_string()));
    }
    Ok(())
}

async fn run_pipeline<D: Dependencies>(
    services: &Services<D>,
    settings: &Settings,
    upload: &ReceiptUpload,
    receipt_id: &str,
    timeline: &mut TimelineRecorder,
    cancellation: &CancellationToken,
) -> ReceiptResult<WorkflowOutcome> {
    services.receipts.create_receipt(receipt_id)?;

    // Step 1: OCR A.
    timeline.start("ocr_primary");
    let ocr_primary_result = call_ocr(&services.ocr_primary, upload, settings.stage_timeout_ms).await;
    timeline.end("ocr_primary");
    let ocr_primary_output = ocr_primary_result?;
    let ocr_primary_payload = to_normalizer_payload(&ocr_primary_output);
    let normalized_primary = normalize_ocr_result(&ocr_primary_payload, services.ocr_primary.provider_name());
    let unified_primary = extract_unified_info(&normalized_primary);

    check_cancelled(cancellation)?;

    // Steps 2-3: resolve store config, run the rule-based parser.
    timeline.start("parse");
    let candidate = build_initial_candidate(&services.store_configs, &ocr_primary_payload, &unified_primary, upload);
    timeline.end("parse");

    check_cancelled(cancellation)?;

    // Step 4: pick the primary or secondary LLM per the rate limiter.
    let primary_provider_name = services.llm_primary.provider_name().to_string();
    let (primary_allowed, _, _) = services.rate_limiter.check(&upload.user_id, &primary_provider_name);
    let (first_llm, first_llm_stage): (&dyn LlmProvider, ProcessingStage) = if primary_allowed {
        (&services.llm_primary, ProcessingStage::LlmPrimary)
    } else {
        (&services.llm_fallback, ProcessingStage::LlmFallback)
    };

    // Step 5: call the LLM with the normalized OCR + rule-based candidate.
    let initial_candidate_json = candidate.as_ref().map(|(_, parsed)| serde_json::to_value(parsed).unwrap_or(Value::Null));
    let (system_message, user_message, _rag_metadata, model, temperature) = services.prompts.format(
        &unified_primary.raw_text,
        &unified_primary.trusted_hints,
        upload.merchant_id_hint.as_deref(),
        unified_primary.merchant_name.as_deref().or(upload.merchant_name_hint.as_deref()),
        initial_candidate_json.as_ref(),
        &upload.rag_snippets,
    );

    timeline.start(&format!("{}_llm", first_llm.provider_name()));
    let first_llm_result = call_llm(first_llm, &system_message, &user_message, &model, temperature, settings.stage_timeout_ms).await;
    timeline.end(&format!("{}_llm", first_llm.provider_name()));
    let first_llm_json = first_llm_result?;

    check_cancelled(cancellation)?;

    // Step 6: sum check.
    timeline.start("sum_check");
    let (mut summary, items, mut resolution) = receipt_summary_from_llm_json(&first_llm_json);
    overlay_candidate_metadata(&mut summary, &candidate);
    let items = apply_merchant_cleanup(&mut summary, items);
    let sum_check = check_receipt_sums(&items, &summary, &unified_primary.raw_text);
    timeline.end("sum_check");

    let is_gemini = |name: &str| name.eq_ignore_ascii_case("gemini");

    // Step 7: pass — resolve conflicts and persist.
    if sum_check.passed {
        let had_conflicts = !resolution.field_conflicts.is_empty();
        apply_field_conflicts_resolution(&mut summary, &mut resolution);

        timeline.start("save_output");
        persist_success(services, receipt_id, first_llm_stage, first_llm.provider_name(), &model, &summary, &items, &first_llm_json)?;
        let report = timeline.to_report();
        let writer = ArtifactWriter::new(settings);
        let _ = writer.write_success(receipt_id, &first_llm_json, &report);
        timeline.end("save_output");

        let status = if had_conflicts { TerminalStatus::PassedWithResolution } else { TerminalStatus::Passed };
        services.statistics.update_statistics(&today(), if is_gemini(first_llm.provider_name()) { "gemini" } else { "other" }, true, false, false);

        return Ok(WorkflowOutcome {
            receipt_id: receipt_id.to_string(),
            status,
            summary: Some(summary),
            sum_check: Some(sum_check),
            resolution: Some(resolution),
            error: None,
            timeline: timeline.to_report(),
        });
    }

    // Step 8: fail — call OCR B, re-prompt the secondary LLM with both OCR
    // outputs and the failed first result, and re-run the sum checker.
    check_cancelled(cancellation)?;

    timeline.start("ocr_fallback");
    let ocr_fallback_result = call_ocr(&services.ocr_fallback, upload, settings.stage_timeout_ms).await;
    timeline.end("ocr_fallback");

    let ocr_fallback_output = match ocr_fallback_result {
        Ok(output) => output,
        Err(err) => {
            tracing::warn!(%err, "fallback OCR failed, routing to manual review");
            return Ok(needs_review(
                services,
                settings,
                receipt_id,
                timeline,
                &summary,
                &sum_check,
                &resolution,
                Some(&ocr_primary_payload),
                None,
                Some(&first_llm_json),
                None,
            ));
        }
    };
    let ocr_fallback_payload = to_normalizer_payload(&ocr_fallback_output);
    let normalized_fallback = normalize_ocr_result(&ocr_fallback_payload, services.ocr_fallback.provider_name());
    let unified_fallback = extract_unified_info(&normalized_fallback);

    let backup_raw_text = format!(
        "## Primary OCR raw text:\n{}\n\n## Fallback OCR raw text:\n{}",
        unified_primary.raw_text, unified_fallback.raw_text
    );
    let backup_context = serde_json::json!({
        "previous_result": first_llm_json,
        "sum_check_failure": sum_check,
    });
    let (backup_system_message, backup_user_message, _backup_rag, backup_model, backup_temperature) = services.prompts.format(
        &backup_raw_text,
        &unified_fallback.trusted_hints,
        upload.merchant_id_hint.as_deref(),
        unified_fallback.merchant_name.as_deref().or(upload.merchant_name_hint.as_deref()),
        Some(&backup_context),
        &upload.rag_snippets,
    );

    timeline.start(&format!("{}_backup_llm", services.llm_fallback.provider_name()));
    let backup_llm_result = call_llm(&services.llm_fallback, &backup_system_message, &backup_user_message, &backup_model, backup_temperature, settings.stage_timeout_ms).await;
    timeline.end(&format!("{}_backup_llm", services.llm_fallback.provider_name()));

    let backup_llm_json = match backup_llm_result {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!(%err, "backup LLM failed, routing to manual review");
            return Ok(needs_review(
                services,
                settings,
                receipt_id,
                timeline,
                &summary,
                &sum_check,
                &resolution,
                Some(&ocr_primary_payload),
                Some(&ocr_fallback_payload),
                Some(&first_llm_json),
                None,
            ));
        }
    };

    timeline.start("backup_sum_check");
    let (mut backup_summary, backup_items, mut backup_resolution) = receipt_summary_from_llm_json(&backup_llm_json);
    overlay_candidate_metadata(&mut backup_summary, &candidate);
    let backup_items = apply_merchant_cleanup(&mut backup_summary, backup_items);
    let backup_sum_check = check_receipt_sums(&backup_items, &backup_summary, &backup_raw_text);
    timeline.end("backup_sum_check");

    if backup_sum_check.passed {
        apply_field_conflicts_resolution(&mut backup_summary, &mut backup_resolution);

        timeline.start("save_output");
        persist_success(
            services,
            receipt_id,
            ProcessingStage::LlmFallback,
            services.llm_fallback.provider_name(),
            &backup_model,
            &backup_summary,
            &backup_items,
            &backup_llm_json,
        )?;
        let report = timeline.to_report();
        let writer = ArtifactWriter::new(settings);
        let _ = writer.write_success(receipt_id, &backup_llm_json, &report);
        let _ = writer.write_debug_bundle(
            receipt_id,
            Some(&ocr_primary_payload),
            Some(&ocr_fallback_payload),
            Some(&first_llm_json),
            Some(&backup_llm_json),
            &report,
        );
        timeline.end("save_output");

        let status = if is_gemini(first_llm.provider_name()) { TerminalStatus::PassedAfterFallback } else { TerminalStatus::PassedAfterBackup };
        services.statistics.update_statistics(&today(), if is_gemini(services.llm_fallback.provider_name()) { "gemini" } else { "other" }, true, false, false);

        return Ok(WorkflowOutcome {
            receipt_id: receipt_id.to_string(),
            status,
            summary: Some(backup_summary),
            sum_check: Some(backup_sum_check),
            resolution: Some(backup_resolution),
            error: None,
            timeline: timeline.to_report(),
        });
    }

    services.statistics.update_statistics(&today(), if is_gemini(services.llm_fallback.provider_name()) { "gemini" } else { "other" }, false, false, true);
    Ok(needs_review(
        services,
        settings,
        receipt_id,
        timeline,
        &backup_summary,
        &backup_sum_check,
        &backup_resolution,
        Some(&ocr_primary_payload),
        Some(&ocr_fallback_payload),
        Some(&first_llm_json),
        Some(&backup_llm_json),
    ))
}

/// Persists a `needs_manual_review` run and writes the full debug bundle.
#[allow(clippy::too_many_arguments)]
fn needs_review<D: Dependencies>(
    services: &Services<D>,
    settings: &Settings,
    receipt_id: &str,
    timeline: &mut TimelineRecorder,
    summary: &ReceiptSummary,
    sum_check: &SumCheckReport,
    resolution: &ResolutionReport,
    ocr_primary: Option<&Value>,
    ocr_fallback: Option<&Value>,
    llm_primary: Option<&Value>,
    llm_fallback: Option<&Value>,
) -> WorkflowOutcome {
    timeline.start("manual_review");
    let _ = services.receipts.save_receipt_summary(receipt_id, summary);
    let _ = services.receipts.save_processing_run(ProcessingRun {
        receipt_id: receipt_id.to_string(),
        stage: ProcessingStage::Manual,
        model_provider: "orchestrator".to_string(),
        model_name: None,
        status: RunStatus::NeedsReview,
        validation_status: Some("needs_manual_review".to_string()),
        input_payload: Value::Null,
        output_payload: serde_json::to_value(sum_check).unwrap_or(Value::Null),
        error_message: None,
        created_at: now_iso8601(),
    });
    timeline.end("manual_review");

    let report = timeline.to_report();
    let writer = ArtifactWriter::new(settings);
    let _ = writer.write_debug_bundle(receipt_id, ocr_primary, ocr_fallback, llm_primary, llm_fallback, &report);

    WorkflowOutcome {
        receipt_id: receipt_id.to_string(),
        status: TerminalStatus::NeedsManualReview,
        summary: Some(summary.clone()),
        sum_check: Some(sum_check.clone()),
        resolution: Some(resolution.clone()),
        error: None,
        timeline: report,
    }
}

fn persist_success<D: Dependencies>(
    services: &Services<D>,
    receipt_id: &str,
    stage: ProcessingStage,
    model_provider: &str,
    model_name: &str,
    summary: &ReceiptSummary,
    items: &[ExtractedItem],
    llm_json: &Value,
) -> ReceiptResult<()> {
    services.receipts.save_receipt_summary(receipt_id, summary)?;
    services.receipts.save_receipt_items(receipt_id, items)?;
    services.receipts.save_processing_run(ProcessingRun {
        receipt_id: receipt_id.to_string(),
        stage,
        model_provider: model_provider.to_string(),
        model_name: Some(model_name.to_string()),
        status: RunStatus::Pass,
        validation_status: Some("passed".to_string()),
        input_payload: Value::Null,
        output_payload: llm_json.clone(),
        error_message: None,
        created_at: now_iso8601(),
    })
}

/// Runs the rule-based geometric pipeline (rows -> regions -> amount column
/// -> store parser) to build the "Initial Parse Result" context handed to
/// the LLM. Returns `None` when no store config can be resolved — the LLM
/// still runs on the raw OCR output alone, just without that context.
fn build_initial_candidate(
    store_configs: &StoreConfigRegistry,
    ocr_payload: &Value,
    unified: &UnifiedInfo,
    upload: &ReceiptUpload,
) -> Option<(StoreConfig, ParsedReceipt)> {
    let config = upload
        .chain_id_hint
        .as_deref()
        .and_then(|id| store_configs.get(id))
        .or_else(|| unified.merchant_name.as_deref().and_then(|name| store_configs.resolve_by_merchant_name(name)))
        .or_else(|| upload.merchant_name_hint.as_deref().and_then(|name| store_configs.resolve_by_merchant_name(name)))?;

    let blocks = text_blocks_from_block_form(ocr_payload);
    if blocks.is_empty() {
        return Some((config.clone(), ParsedReceipt::empty("rule_based", config.chain_id.clone(), "no positioned blocks in OCR output")));
    }

    let markers = match config.compile_markers() {
        Ok(markers) => markers,
        Err(err) => return Some((config.clone(), ParsedReceipt::empty("rule_based", config.chain_id.clone(), err.to_string()))),
    };

    let rows = reconstruct_rows(&blocks, config.pipeline.row_epsilon, config.pipeline.split_on_second_amount);
    let regions = split_regions(rows, &markers);
    let fallback_column = AmountColumn { center_x: 0.85, tolerance: 0.1, confidence: 0.0, block_count: 0 };
    let amount_columns = detect_amount_column(&regions.item_rows, fallback_column);

    let mut parsed = parse_receipt(&regions, &amount_columns, &config, unified.merchant_name.as_deref());
    for item in &mut parsed.items {
        let row_text = item.raw_text.clone();
        validate_item_math(item, &row_text);
    }

    Some((config, parsed))
}

/// Fills in fields the LLM's generic output schema has no slot for but the
/// rule-based candidate already resolved: the store chain id, and the
/// Trader-Joe's-only operational footer fields.
fn overlay_candidate_metadata(summary: &mut ReceiptSummary, candidate: &Option<(StoreConfig, ParsedReceipt)>) {
    let Some((config, parsed)) = candidate else { return };
    summary.store_chain_id = Some(config.chain_id.clone());
    summary.store_number = parsed.transaction_meta.store_number.clone();
    summary.till_number = parsed.transaction_meta.till_number.clone();
    summary.transaction_number = parsed.transaction_meta.transaction_number.clone();
    summary.cashier = parsed.transaction_meta.cashier.clone();
}

/// Merchant-scoped post-LLM cleaning (§4.4 Expansion, T&T only): the LLM
/// routinely reintroduces membership-card and loyalty-points rows the
/// geometric parser had already suppressed, so this strips them a second
/// time from the LLM's own item list and records any membership number it
/// recovers. A no-op for every other merchant.
fn apply_merchant_cleanup(summary: &mut ReceiptSummary, items: Vec<ExtractedItem>) -> Vec<ExtractedItem> {
    match summary.merchant_name.as_deref() {
        Some(name) if is_tt_merchant(name) => {}
        _ => return items,
    }
    let (cleaned, membership_id, suppressed) = clean_tt_items(items);
    if membership_id.is_some() {
        summary.membership_id = membership_id;
    }
    if suppressed {
        summary.points_line_suppressed = true;
    }
    cleaned
}

/// Maps one LLM response (shaped per [`crate::prompt`]'s default output
/// schema, or a merchant-specific override following the same shape) into
/// the domain types the sum checker and repository operate on.
fn receipt_summary_from_llm_json(doc: &Value) -> (ReceiptSummary, Vec<ExtractedItem>, ResolutionReport) {
    let receipt = doc.get("receipt").cloned().unwrap_or(Value::Null);
    let tax = value_f64(&receipt, "tax").map(|amount| vec![TaxLine { label: "TAX".to_string(), amount }]);

    let summary = ReceiptSummary {
        merchant_name: value_str(&receipt, "merchant_name"),
        store_chain_id: None,
        address: value_str(&receipt, "merchant_address"),
        purchase_date: value_str(&receipt, "purchase_date"),
        purchase_time: value_str(&receipt, "purchase_time"),
        currency: value_str(&receipt, "currency"),
        subtotal: value_f64(&receipt, "subtotal"),
        tax,
        fees: None,
        total: value_f64(&receipt, "total"),
        payment_method: value_str(&receipt, "payment_method"),
        card_last4: value_str(&receipt, "card_last4"),
        membership_id: None,
        item_count: None,
        points_line_suppressed: false,
        store_number: None,
        till_number: None,
        transaction_number: None,
        cashier: None,
    };

    let items = doc
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .enumerate()
                .map(|(idx, item)| {
                    let mut extracted = ExtractedItem::new(
                        value_str(item, "product_name").unwrap_or_default(),
                        value_f64(item, "line_total").unwrap_or(0.0),
                        idx as u32,
                        idx as u32,
                    );
                    extracted.quantity = value_f64(item, "quantity");
                    extracted.unit_price = value_f64(item, "unit_price");
                    extracted.unit = value_str(item, "unit");
                    extracted.raw_text = value_str(item, "raw_text").unwrap_or_default();
                    extracted.on_sale = item.get("is_on_sale").and_then(Value::as_bool).unwrap_or(false);
                    extracted
                })
                .collect()
        })
        .unwrap_or_default();

    let mut resolution = ResolutionReport::default();
    if let Some(conflicts) = doc.get("tbd").and_then(|tbd| tbd.get("field_conflicts")).and_then(Value::as_object) {
        for (field, conflict) in conflicts {
            resolution.field_conflicts.insert(
                field.clone(),
                FieldConflict {
                    from_raw_text: conflict.get("from_raw_text").and_then(Value::as_str).map(str::to_string),
                    from_trusted_hints: conflict.get("from_trusted_hints").and_then(Value::as_str).map(str::to_string),
                },
            );
        }
    }

    (summary, items, resolution)
}

fn value_str(doc: &Value, key: &str) -> Option<String> {
    doc.get(key).and_then(Value::as_str).map(str::to_string)
}

fn value_f64(doc: &Value, key: &str) -> Option<f64> {
    doc.get(key).and_then(Value::as_f64)
}

async fn call_ocr(provider: &dyn OcrProvider, upload: &ReceiptUpload, timeout_ms: u64) -> ReceiptResult<ProviderOutput> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), provider.parse(&upload.image_bytes, &upload.mime_type)).await {
        Ok(result) => result,
        Err(_) => Err(ReceiptError::OcrFailure {
            provider: provider.provider_name().to_string(),
            message: format!("timed out after {timeout_ms}ms"),
        }),
    }
}

async fn call_llm(provider: &dyn LlmProvider, system_message: &str, user_message: &str, model: &str, temperature: f64, timeout_ms: u64) -> ReceiptResult<Value> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), provider.generate(system_message, user_message, model, temperature)).await {
        Ok(result) => result,
        Err(_) => Err(ReceiptError::LlmFailure {
            provider: provider.provider_name().to_string(),
            message: format!("timed out after {timeout_ms}ms"),
        }),
    }
}
