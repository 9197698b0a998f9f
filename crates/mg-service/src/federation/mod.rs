//! Query federation and synthesis pipeline.
//!
//! The orchestrator owns the whole synthesis path: plan from the intent's
//! required tools, parallel fan-out into an evidence bundle, the optional
//! image branch, prompt assembly, the primary/fallback LLM call, the
//! deterministic merge, alert derivation, outbound scrubbing, and the
//! `medical-query` audit record. No upstream failure aborts a request; only
//! total failure of every source and the LLM degrades to the fixed safety
//! response, still served at HTTP 200.

pub mod merge;
pub mod prompt;

use crate::audit::AuditSink;
use crate::errors::GatewayError;
use crate::imaging::{ImageArtifact, ImagePreprocessor};
use crate::intent::{response_hint, FileDescriptor, IntentClassifier};
use crate::llm::{LlmAdapter, LlmOutcome, LlmResult};
use crate::models::{
    AuditKind, AuditOutcome, AuditRecord, AuditSeverity, ChatMessage, EvidenceBundle,
    EvidenceEntry, IntentAnalysis, IntentTag, QueryFlags, ResponseHint, Specialty,
    SynthesizedResponse, ToolCapability, ToolFailure, ToolName, ToolResult, Urgency,
};
use crate::observability::metrics::record_federation;
use crate::phi::PhiScrubber;
use crate::tools::ToolPool;
use futures::future::join_all;
use merge::{merge, MergeInputs};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Head-room subtracted from the request deadline for each tool call, so
/// merging and the outbound scrub still fit inside the request budget.
pub const TOOL_DEADLINE_HEADROOM: Duration = Duration::from_millis(500);

/// Bounded conversation tail folded into the prompt.
pub const DEFAULT_HISTORY_TAIL: usize = 5;

/// One uploaded image, as the HTTP layer hands it over.
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub filename: String,
}

/// A federated chat request.
pub struct ChatRequest {
    pub message: String,
    pub patient_context: Option<Value>,
    pub history: Vec<ChatMessage>,
    pub upload: Option<UploadedImage>,
    pub session_hash: String,
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

/// The core pipeline input once intent and image are settled.
struct FederationRequest {
    query: String,
    intent: IntentAnalysis,
    hint: ResponseHint,
    image: Option<ImageArtifact>,
    patient_context: Option<Value>,
    history: Vec<ChatMessage>,
    medications: Vec<String>,
    session_hash: String,
    deadline: Instant,
    cancel: CancellationToken,
}

/// The federation orchestrator. One per process, shared by all handlers.
pub struct Orchestrator {
    pool: Arc<ToolPool>,
    llm: Arc<LlmAdapter>,
    imaging: Arc<ImagePreprocessor>,
    scrubber: Arc<PhiScrubber>,
    audit: AuditSink,
    classifier: IntentClassifier,
    history_tail: usize,
    low_confidence_threshold: f64,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: Arc<ToolPool>,
        llm: Arc<LlmAdapter>,
        imaging: Arc<ImagePreprocessor>,
        scrubber: Arc<PhiScrubber>,
        audit: AuditSink,
        classifier: IntentClassifier,
        history_tail: usize,
        low_confidence_threshold: f64,
    ) -> Self {
        Self {
            pool,
            llm,
            imaging,
            scrubber,
            audit,
            classifier,
            history_tail,
            low_confidence_threshold,
        }
    }

    /// The chat pipeline: scrub, preprocess, classify, federate.
    #[instrument(skip_all, name = "mg.federation.chat")]
    pub async fn chat(&self, request: ChatRequest) -> Result<SynthesizedResponse, GatewayError> {
        let ChatRequest {
            message,
            patient_context,
            history,
            upload,
            session_hash,
            deadline,
            cancel,
        } = request;

        if message.trim().is_empty() {
            return Err(GatewayError::MissingField("message".to_string()));
        }

        // Inbound scrub before anything else sees the payload
        let (query, _) = self.scrubber.scrub_text(&message);
        let patient_context = patient_context
            .as_ref()
            .map(|context| self.scrubber.scrub_value(context));
        let history: Vec<ChatMessage> = history
            .into_iter()
            .map(|message| ChatMessage {
                role: message.role,
                content: self.scrubber.scrub_text(&message.content).0,
            })
            .collect();
        let history = bounded_tail(history, self.history_tail);

        let mut files = Vec::new();
        if let Some(upload) = &upload {
            files.push(FileDescriptor::new(&upload.filename, &upload.mime));
        }

        let image = match upload {
            Some(upload) => Some(
                self.imaging
                    .process(upload.bytes, &upload.mime, &upload.filename, &session_hash)
                    .await?,
            ),
            None => None,
        };

        let intent =
            self.classifier
                .classify(&query, &files, patient_context.as_ref(), &self.pool.membership());
        let hint = response_hint(&intent);

        Ok(self
            .federate(FederationRequest {
                query,
                intent,
                hint,
                image,
                patient_context,
                history,
                medications: Vec::new(),
                session_hash,
                deadline,
                cancel,
            })
            .await)
    }

    /// Structured differential-diagnosis entry point.
    #[instrument(skip_all, name = "mg.federation.differential")]
    pub async fn differential_diagnosis(
        &self,
        clinical_data: Value,
        session_hash: String,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> SynthesizedResponse {
        let clinical_data = self.scrubber.scrub_value(&clinical_data);
        let query =
            "Provide a ranked differential diagnosis for the supplied clinical data".to_string();
        let intent = self.fixed_intent(
            IntentTag::DifferentialDiagnosis,
            Specialty::General,
            Urgency::Medium,
            &[
                ToolCapability::Literature,
                ToolCapability::Guidelines,
                ToolCapability::Citations,
            ],
        );
        self.federate(FederationRequest {
            query,
            intent,
            hint: ResponseHint::DifferentialDiagnosis,
            image: None,
            patient_context: Some(clinical_data),
            history: Vec::new(),
            medications: Vec::new(),
            session_hash,
            deadline,
            cancel,
        })
        .await
    }

    /// Clinical-trials lookup entry point.
    #[instrument(skip_all, name = "mg.federation.trials")]
    pub async fn clinical_trials(
        &self,
        condition: String,
        patient_criteria: Option<Value>,
        session_hash: String,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> SynthesizedResponse {
        let (condition, _) = self.scrubber.scrub_text(&condition);
        let patient_criteria = patient_criteria
            .as_ref()
            .map(|criteria| self.scrubber.scrub_value(criteria));
        let intent = self.fixed_intent(
            IntentTag::ClinicalTrials,
            Specialty::Research,
            Urgency::Low,
            &[ToolCapability::Trials, ToolCapability::Citations],
        );
        self.federate(FederationRequest {
            query: format!("Find relevant clinical trials for: {condition}"),
            intent,
            hint: ResponseHint::ResearchAnalysis,
            image: None,
            patient_context: patient_criteria,
            history: Vec::new(),
            medications: Vec::new(),
            session_hash,
            deadline,
            cancel,
        })
        .await
    }

    /// Drug-interaction check entry point.
    #[instrument(skip_all, name = "mg.federation.interactions")]
    pub async fn drug_interactions(
        &self,
        medications: Vec<String>,
        new_drug: Option<String>,
        session_hash: String,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> SynthesizedResponse {
        let medications: Vec<String> = medications
            .iter()
            .map(|name| self.scrubber.scrub_text(name).0)
            .collect();
        let new_drug = new_drug.map(|name| self.scrubber.scrub_text(&name).0);

        let mut all = medications.clone();
        if let Some(new_drug) = &new_drug {
            all.push(new_drug.clone());
        }
        let mut intent = self.fixed_intent(
            IntentTag::DrugInteraction,
            Specialty::Pharmacology,
            Urgency::High,
            &[ToolCapability::Interactions, ToolCapability::Guidelines],
        );
        intent.flags.has_medications = true;

        self.federate(FederationRequest {
            query: format!("Check interactions among: {}", all.join(", ")),
            intent,
            hint: ResponseHint::DrugTherapy,
            image: None,
            patient_context: None,
            history: Vec::new(),
            medications: all,
            session_hash,
            deadline,
            cancel,
        })
        .await
    }

    /// Dedicated image-analysis entry point.
    #[instrument(skip_all, name = "mg.federation.image")]
    pub async fn image_analysis(
        &self,
        upload: UploadedImage,
        clinical_context: String,
        session_hash: String,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Result<SynthesizedResponse, GatewayError> {
        let (context_text, _) = self.scrubber.scrub_text(&clinical_context);
        let files = [FileDescriptor::new(&upload.filename, &upload.mime)];

        let artifact = self
            .imaging
            .process(upload.bytes, &upload.mime, &upload.filename, &session_hash)
            .await?;

        let intent = self.classifier.classify(
            &context_text,
            &files,
            None,
            &self.pool.membership(),
        );

        Ok(self
            .federate(FederationRequest {
                query: if context_text.is_empty() {
                    "Analyze the attached medical image".to_string()
                } else {
                    context_text
                },
                intent,
                hint: ResponseHint::ImageAnalysis,
                image: Some(artifact),
                patient_context: None,
                history: Vec::new(),
                medications: Vec::new(),
                session_hash,
                deadline,
                cancel,
            })
            .await)
    }

    /// The nine-step synthesis pipeline.
    #[instrument(skip_all, name = "mg.federation.federate")]
    async fn federate(&self, request: FederationRequest) -> SynthesizedResponse {
        let started = Instant::now();
        let FederationRequest {
            query,
            intent,
            hint,
            image,
            patient_context,
            history,
            medications,
            session_hash,
            deadline,
            cancel,
        } = request;

        // 1. Plan: one entry per required capability, imaging excluded here
        //    (it belongs to the image branch).
        let plan: Vec<ToolCapability> = intent
            .required_tools
            .iter()
            .copied()
            .filter(|capability| *capability != ToolCapability::Imaging)
            .collect();
        let entry_deadline = deadline
            .checked_sub(TOOL_DEADLINE_HEADROOM)
            .unwrap_or(deadline);
        let interactions_planned = plan.contains(&ToolCapability::Interactions);

        // 2. Fan-out, every entry in parallel; no failure cancels a sibling.
        let fan_out = join_all(plan.iter().map(|capability| {
            let capability = *capability;
            let args = self.args_for(capability, &query, patient_context.as_ref(), &medications);
            let cancel = cancel.clone();
            async move {
                let call_started = Instant::now();
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => Err(crate::tools::ToolCallError::Unavailable(
                        "request cancelled".to_string(),
                    )),
                    result = self.pool.call(
                        capability.backing_client(),
                        capability.method(),
                        args,
                        entry_deadline,
                    ) => result,
                };
                (capability, outcome, call_started.elapsed())
            }
        }));

        // 3. Image branch, parallel to the fan-out.
        let image_branch = self.image_branch(
            image.as_ref(),
            &intent,
            &query,
            entry_deadline,
            cancel.clone(),
        );

        let (fan_out_results, (vision, imaging_entry)) = tokio::join!(fan_out, image_branch);

        let mut evidence = EvidenceBundle::new();
        for (capability, outcome, elapsed) in fan_out_results {
            evidence.insert(capability, evidence_entry(outcome, elapsed));
        }
        if let Some(entry) = imaging_entry {
            evidence.insert(ToolCapability::Imaging, entry);
        }

        // 4–5. Prompt assembly and the LLM call with the deadline remainder.
        let assembled = prompt::build_prompt(
            &query,
            &intent,
            hint,
            patient_context.as_ref(),
            &evidence,
            &history,
        );
        let llm = tokio::select! {
            _ = cancel.cancelled() => LlmResult::Unavailable {
                causes: vec!["request cancelled".to_string()],
            },
            result = self.llm.generate(assembled, hint, deadline) => result,
        };

        // 6–7. Merge and alert derivation.
        let had_image = image.is_some();
        let mut response = merge(MergeInputs {
            intent,
            evidence,
            llm,
            vision,
            had_image,
            interactions_planned,
            disclaimer: self.llm.disclaimer().map(str::to_string),
            low_confidence_threshold: self.low_confidence_threshold,
        });

        // 8. Outbound scrub.
        self.scrub_response(&mut response);

        // 9. Audit.
        let duration = started.elapsed();
        let degraded = response.summary == "Medical analysis unavailable";
        record_federation(
            response.intent.urgency.as_str(),
            if degraded { "degraded" } else { "ok" },
            duration,
        );
        self.audit.emit(
            AuditRecord::new(
                AuditKind::MedicalQuery,
                if response.intent.urgency == Urgency::Critical {
                    AuditSeverity::Warning
                } else {
                    AuditSeverity::Info
                },
                "medical-query",
                "federate",
            )
            .with_session_hash(session_hash)
            .with_outcome(if degraded {
                AuditOutcome::Failure
            } else {
                AuditOutcome::Success
            })
            .with_detail(
                "intents",
                response
                    .intent
                    .intents
                    .iter()
                    .map(|tag| tag.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            )
            .with_detail("tools", response.mcp_tools.join(","))
            .with_detail("durationMs", duration.as_millis() as u64)
            .with_detail("confidence", response.confidence),
        );

        info!(
            target: "mg.federation",
            sources = response.evidence.len(),
            confidence = response.confidence,
            degraded,
            duration_ms = duration.as_millis() as u64,
            "federation complete"
        );

        response
    }

    /// Vision LLM call plus the `imaging` tool attempt, when an image is
    /// present and the pool carries the client.
    async fn image_branch(
        &self,
        image: Option<&ImageArtifact>,
        intent: &IntentAnalysis,
        query: &str,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> (Option<LlmOutcome>, Option<EvidenceEntry>) {
        let Some(artifact) = image else {
            return (None, None);
        };

        let vision_prompt = prompt::build_vision_prompt(query, intent);
        let vision_call = async {
            tokio::select! {
                _ = cancel.cancelled() => LlmResult::Unavailable {
                    causes: vec!["request cancelled".to_string()],
                },
                result = self.llm.analyze_image(
                    vision_prompt,
                    ResponseHint::ImageAnalysis,
                    artifact.content.clone(),
                    artifact.format.mime().to_string(),
                    deadline,
                ) => result,
            }
        };

        let wants_imaging_tool = intent.required_tools.contains(&ToolCapability::Imaging)
            && self.pool.contains(ToolName::Imaging);
        let tool_call = async {
            if !wants_imaging_tool {
                return None;
            }
            let call_started = Instant::now();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(crate::tools::ToolCallError::Unavailable(
                    "request cancelled".to_string(),
                )),
                result = self.pool.call(
                    ToolName::Imaging,
                    ToolCapability::Imaging.method(),
                    json!({
                        "query": query,
                        "format": artifact.format.mime(),
                        "width": artifact.width,
                        "height": artifact.height,
                    }),
                    deadline,
                ) => result,
            };
            Some(evidence_entry(outcome, call_started.elapsed()))
        };

        let (vision_result, imaging_entry) = tokio::join!(vision_call, tool_call);
        let vision = match vision_result {
            LlmResult::Generated(outcome) => Some(outcome),
            LlmResult::Unavailable { .. } => None,
        };
        (vision, imaging_entry)
    }

    fn args_for(
        &self,
        capability: ToolCapability,
        query: &str,
        patient_context: Option<&Value>,
        medications: &[String],
    ) -> Value {
        let mut args = json!({ "query": query });
        if let (Some(context), Value::Object(map)) = (patient_context, &mut args) {
            map.insert("patientContext".to_string(), context.clone());
        }
        if capability == ToolCapability::Interactions {
            if let Value::Object(map) = &mut args {
                map.insert("medications".to_string(), json!(medications));
            }
        }
        args
    }

    fn fixed_intent(
        &self,
        tag: IntentTag,
        specialty: Specialty,
        urgency: Urgency,
        capabilities: &[ToolCapability],
    ) -> IntentAnalysis {
        let membership = self.pool.membership();
        IntentAnalysis {
            intents: vec![tag],
            specialty,
            urgency,
            required_tools: capabilities
                .iter()
                .copied()
                .filter(|capability| membership.contains(&capability.backing_client()))
                .collect(),
            confidence: 0.9,
            flags: QueryFlags::default(),
        }
    }

    /// Outbound scrub: every free-text and structured field, one pass.
    fn scrub_response(&self, response: &mut SynthesizedResponse) {
        response.summary = self.scrubber.scrub_text(&response.summary).0;
        for finding in &mut response.findings {
            finding.content = self.scrubber.scrub_text(&finding.content).0;
        }
        for recommendation in &mut response.recommendations {
            recommendation.text = self.scrubber.scrub_text(&recommendation.text).0;
        }
        response.analysis = self.scrubber.scrub_value(&response.analysis);
        for entry in response.evidence.values_mut() {
            if let EvidenceEntry::Result(result) = entry {
                result.payload = self.scrubber.scrub_value(&result.payload);
            }
        }
    }
}

/// Confidence assigned to a successful tool payload: modest, and lower when
/// the provider returned nothing usable.
fn evidence_confidence(payload: &Value) -> f64 {
    let empty = match payload {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(text) => text.is_empty(),
        _ => false,
    };
    if empty {
        0.35
    } else {
        0.55
    }
}

fn evidence_entry(
    outcome: Result<Value, crate::tools::ToolCallError>,
    elapsed: Duration,
) -> EvidenceEntry {
    match outcome {
        Ok(payload) => {
            let confidence = evidence_confidence(&payload);
            EvidenceEntry::Result(ToolResult {
                payload,
                duration: elapsed,
                confidence,
            })
        }
        Err(error) => EvidenceEntry::Error {
            error: ToolFailure {
                kind: error.failure_kind(),
                message: error.to_string(),
            },
        },
    }
}

fn bounded_tail(history: Vec<ChatMessage>, tail: usize) -> Vec<ChatMessage> {
    let skip = history.len().saturating_sub(tail);
    history.into_iter().skip(skip).collect()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_tail() {
        let history: Vec<ChatMessage> = (0..8)
            .map(|i| ChatMessage {
                role: "user".to_string(),
                content: format!("m{i}"),
            })
            .collect();
        let tail = bounded_tail(history, 5);
        assert_eq!(tail.len(), 5);
        assert_eq!(tail[0].content, "m3");
        assert_eq!(tail[4].content, "m7");
    }

    #[test]
    fn test_evidence_confidence() {
        assert!(evidence_confidence(&json!({"articles": [1]})) > evidence_confidence(&json!({})));
        assert!((evidence_confidence(&Value::Null) - 0.35).abs() < f64::EPSILON);
    }

    #[test]
    fn test_evidence_entry_from_error() {
        let entry = evidence_entry(
            Err(crate::tools::ToolCallError::DeadlineExceeded),
            Duration::from_millis(100),
        );
        let EvidenceEntry::Error { error } = entry else {
            panic!("expected error entry");
        };
        assert_eq!(error.kind, crate::models::ToolFailureKind::Timeout);
    }
}
