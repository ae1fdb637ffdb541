//! Send API handler.
//!
//! ```text
//! POST /api/v1/send
//! ```

use std::collections::BTreeMap;

use actix_web::{post, web};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::domain::send::SendRequest;

use super::auth::Authenticated;
use super::error::ApiResult;
use super::schemas::ErrorSchema;
use super::state::HttpState;

/// Request payload for sending a message.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendRequestBody {
    pub from: String,
    pub to: Recipients,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
    /// Either a JSON object or a JSON-encoded string of one (form posts).
    #[serde(default)]
    pub variables: Option<VariablesField>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub disable_tracking: Option<bool>,
}

/// One recipient or a list of them.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    fn into_vec(self) -> Vec<String> {
        match self {
            Recipients::One(single) => vec![single],
            Recipients::Many(many) => many,
        }
    }
}

/// Wire-level `variables` field: an object, or a stringified object.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum VariablesField {
    Object(BTreeMap<String, Value>),
    Raw(String),
}

impl VariablesField {
    /// Normalise to a string map; invalid JSON strings collapse to empty.
    fn into_map(self) -> BTreeMap<String, String> {
        let object = match self {
            VariablesField::Object(map) => map,
            VariablesField::Raw(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map.into_iter().collect(),
                _ => BTreeMap::new(),
            },
        };
        object
            .into_iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                (key, rendered)
            })
            .collect()
    }
}

impl SendRequestBody {
    fn into_domain(self) -> SendRequest {
        SendRequest {
            from: self.from,
            to: self.to.into_vec(),
            subject: self.subject,
            html: self.html,
            text: self.text,
            template_key: self.template_id,
            variables: self.variables.map(VariablesField::into_map).unwrap_or_default(),
            headers: self.headers.map(|h| h.into_iter().collect()).unwrap_or_default(),
            reply_to: self.reply_to,
            disable_tracking: self.disable_tracking.unwrap_or(false),
        }
    }
}

/// Response payload for an accepted send.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendResponseBody {
    pub success: bool,
    pub job_id: String,
    pub message_id: String,
    pub recipients: usize,
    pub suppressed: usize,
    #[schema(value_type = String, example = "queued")]
    pub status: &'static str,
}

/// Accept a message for delivery.
#[utoipa::path(
    post,
    path = "/api/v1/send",
    request_body = SendRequestBody,
    responses(
        (status = 200, description = "Send accepted and queued", body = SendResponseBody),
        (status = 400, description = "Validation failure", body = ErrorSchema),
        (status = 401, description = "Unauthorised", body = ErrorSchema),
        (status = 403, description = "Unverified domain or FROM mismatch", body = ErrorSchema),
        (status = 404, description = "Unknown template", body = ErrorSchema),
        (status = 429, description = "Monthly quota exhausted", body = ErrorSchema)
    ),
    security(("bearer_key" = [])),
    tags = ["send"],
    operation_id = "send"
)]
#[post("/send")]
pub async fn send(
    auth: Authenticated,
    state: web::Data<HttpState>,
    body: web::Json<SendRequestBody>,
) -> ApiResult<web::Json<SendResponseBody>> {
    let outcome = state
        .send
        .accept(&auth.0, body.into_inner().into_domain())
        .await?;
    Ok(web::Json(SendResponseBody {
        success: true,
        job_id: outcome.job_id,
        message_id: outcome.message_id,
        recipients: outcome.recipients,
        suppressed: outcome.suppressed,
        status: "queued",
    }))
}
