//! The federated chat handler.

use super::{parse_history, request_deadline};
use crate::errors::GatewayError;
use crate::federation::{ChatRequest, UploadedImage};
use crate::models::SynthesizedResponse;
use crate::routes::AppState;
use crate::session::SessionHandle;
use axum::extract::{Multipart, State};
use axum::{Extension, Json};
use std::sync::Arc;
use tracing::instrument;

/// POST /api/medical-chat
///
/// Multipart fields: `message` (text), `patientContext` (JSON string),
/// `conversationHistory` (JSON string), optional `medicalImage` file.
#[instrument(skip_all, name = "mg.handlers.medical_chat")]
pub async fn medical_chat(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionHandle>,
    mut multipart: Multipart,
) -> Result<Json<SynthesizedResponse>, GatewayError> {
    let mut message: Option<String> = None;
    let mut patient_context_raw: Option<String> = None;
    let mut history_raw: Option<String> = None;
    let mut upload: Option<UploadedImage> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        GatewayError::InvalidField {
            field: "multipart".to_string(),
            reason: e.to_string(),
        }
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "message" => {
                message = Some(read_text_field(field, "message").await?);
            }
            "patientContext" => {
                patient_context_raw = Some(read_text_field(field, "patientContext").await?);
            }
            "conversationHistory" => {
                history_raw = Some(read_text_field(field, "conversationHistory").await?);
            }
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
            _ => {} // unknown fields are ignored
        }
    }

    let message = message
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| GatewayError::MissingField("message".to_string()))?;

    let patient_context = match patient_context_raw.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(serde_json::from_str(raw).map_err(|e| GatewayError::InvalidField {
            field: "patientContext".to_string(),
            reason: e.to_string(),
        })?),
    };

    let response = state
        .orchestrator
        .chat(ChatRequest {
            message,
            patient_context,
            history: parse_history(history_raw.as_deref()),
            upload,
            session_hash: session.id_hash.clone(),
            deadline: request_deadline(),
            cancel: state.shutdown.child_token(),
        })
        .await?;

    session
        .record_usage(&response.mcp_tools, "medical-chat")
        .await;

    Ok(Json(response))
}

async fn read_text_field(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> Result<String, GatewayError> {
    field.text().await.map_err(|e| GatewayError::InvalidField {
        field: name.to_string(),
        reason: e.to_string(),
    })
}
