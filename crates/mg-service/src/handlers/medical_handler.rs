//! Structured medical endpoints: differential diagnosis, clinical trials,
//! drug interactions, and dedicated image analysis.

use super::request_deadline;
use crate::errors::GatewayError;
use crate::federation::UploadedImage;
use crate::models::SynthesizedResponse;
use crate::routes::AppState;
use crate::session::SessionHandle;
use axum::extract::{Multipart, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifferentialDiagnosisBody {
    pub clinical_data: Value,
}

/// POST /api/medical/differential-diagnosis
#[instrument(skip_all, name = "mg.handlers.differential_diagnosis")]
pub async fn differential_diagnosis(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionHandle>,
    Json(body): Json<DifferentialDiagnosisBody>,
) -> Result<Json<SynthesizedResponse>, GatewayError> {
    if body.clinical_data.is_null() {
        return Err(GatewayError::MissingField("clinicalData".to_string()));
    }

    let response = state
        .orchestrator
        .differential_diagnosis(
            body.clinical_data,
            session.id_hash.clone(),
            request_deadline(),
            state.shutdown.child_token(),
        )
        .await;

    session
        .record_usage(&response.mcp_tools, "differential-diagnosis")
        .await;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalTrialsBody {
    pub condition: String,
    #[serde(default)]
    pub patient_criteria: Option<Value>,
}

/// POST /api/medical/clinical-trials
#[instrument(skip_all, name = "mg.handlers.clinical_trials")]
pub async fn clinical_trials(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionHandle>,
    Json(body): Json<ClinicalTrialsBody>,
) -> Result<Json<SynthesizedResponse>, GatewayError> {
    if body.condition.trim().is_empty() {
        return Err(GatewayError::MissingField("condition".to_string()));
    }

    let response = state
        .orchestrator
        .clinical_trials(
            body.condition,
            body.patient_criteria,
            session.id_hash.clone(),
            request_deadline(),
            state.shutdown.child_token(),
        )
        .await;

    session
        .record_usage(&response.mcp_tools, "clinical-trials")
        .await;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrugInteractionsBody {
    pub medications: Vec<String>,
    #[serde(default)]
    pub new_drug: Option<String>,
}

/// POST /api/medical/drug-interactions
#[instrument(skip_all, name = "mg.handlers.drug_interactions")]
pub async fn drug_interactions(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionHandle>,
    Json(body): Json<DrugInteractionsBody>,
) -> Result<Json<SynthesizedResponse>, GatewayError> {
    if body.medications.is_empty() && body.new_drug.is_none() {
        return Err(GatewayError::MissingField("medications".to_string()));
    }

    let response = state
        .orchestrator
        .drug_interactions(
            body.medications,
            body.new_drug,
            session.id_hash.clone(),
            request_deadline(),
            state.shutdown.child_token(),
        )
        .await;

    session
        .record_usage(&response.mcp_tools, "drug-interactions")
        .await;
    Ok(Json(response))
}

/// POST /api/medical/image-analysis
///
/// Multipart fields: `medicalImage` file, `clinicalContext` text, optional
/// `analysisOptions` JSON string.
#[instrument(skip_all, name = "mg.handlers.image_analysis")]
pub async fn image_analysis(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionHandle>,
    mut multipart: Multipart,
) -> Result<Json<SynthesizedResponse>, GatewayError> {
    let mut upload: Option<UploadedImage> = None;
    let mut clinical_context = String::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        GatewayError::InvalidField {
            field: "multipart".to_string(),
            reason: e.to_string(),
        }
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "medicalImage" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(|_| GatewayError::PayloadTooLarge {
                    limit_bytes: state.config.max_image_bytes(),
                })?;
                upload = Some(UploadedImage {
                    bytes: bytes.to_vec(),
                    mime,
                    filename,
                });
            }
            "clinicalContext" => {
                clinical_context = field.text().await.unwrap_or_default();
            }
            "analysisOptions" => {
                // Accepted for interface compatibility; options beyond the
                // defaults are not yet interpreted.
                let _ = field.text().await;
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| GatewayError::MissingField("medicalImage".to_string()))?;

    let response = state
        .orchestrator
        .image_analysis(
            upload,
            clinical_context,
            session.id_hash.clone(),
            request_deadline(),
            state.shutdown.child_token(),
        )
        .await?;

    session
        .record_usage(&response.mcp_tools, "image-analysis")
        .await;
    Ok(Json(response))
}
