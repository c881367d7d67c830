use crate::domain::{ContactSubmission, MailMessage};
use crate::email_client::{DispatchError, EmailClient};
use crate::routes::error_chain_fmt;
use crate::startup::OwnerRecipient;
use actix_web::http::header::{self, ContentType};
use actix_web::http::StatusCode;
use actix_web::web::{Bytes, Data};
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use serde_json::{Map, Value};
use std::fmt::Formatter;

//region Structs & implementations
/// Raw submission fields. Absent keys (and JSON `null`) read as empty.
#[derive(serde::Deserialize, Default, Debug)]
#[serde(default)]
pub struct FormData {
    name: Option<String>,
    email: Option<String>,
    subject: Option<String>,
    message: Option<String>,
}

impl FormData {
    /// JSON when the `Content-Type` mentions `application/json`, URL-encoded
    /// form data otherwise (including when the header is missing).
    pub fn from_body(content_type: &str, body: &[u8]) -> Result<Self, ContactError> {
        if content_type.contains("application/json") {
            Self::from_json(body).map_err(ContactError::InvalidJson)
        } else {
            Self::from_urlencoded(body).map_err(ContactError::InvalidForm)
        }
    }

    /// Only the first JSON value is read. Keys match case-insensitively and
    /// the last occurrence wins; a top-level `null` is an empty submission.
    fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        let mut values = serde_json::Deserializer::from_slice(body).into_iter::<Value>();
        let value = match values.next() {
            Some(value) => value?,
            // Whitespace only: let the plain parser report the EOF
            None => serde_json::from_slice(body)?,
        };
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(fields) => {
                let fields: Map<String, Value> = fields
                    .into_iter()
                    .filter(|(_, value)| !value.is_null())
                    .map(|(key, value)| (key.to_lowercase(), value))
                    .collect();
                serde_json::from_value(Value::Object(fields))
            }
            _ => Err(serde::de::Error::custom("expected a JSON object")),
        }
    }

    /// The first value wins when a key repeats.
    fn from_urlencoded(body: &[u8]) -> Result<Self, anyhow::Error> {
        check_form_encoding(body)?;
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)?;
        let first = |key: &str| {
            pairs
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.clone())
        };
        Ok(Self {
            name: first("name"),
            email: first("email"),
            subject: first("subject"),
            message: first("message"),
        })
    }
}

/// Every `%` must start a two-digit hex escape, and `;` is not a separator.
fn check_form_encoding(body: &[u8]) -> Result<(), anyhow::Error> {
    for pair in body.split(|byte| *byte == b'&') {
        if pair.contains(&b';') {
            anyhow::bail!("Invalid semicolon separator in form data");
        }
        let mut rest = pair;
        while let Some(at) = rest.iter().position(|byte| *byte == b'%') {
            let escape = rest.get(at + 1..at + 3);
            if !escape.map_or(false, |hex| hex.iter().all(u8::is_ascii_hexdigit)) {
                anyhow::bail!("Invalid percent-escape in form data");
            }
            rest = &rest[at + 3..];
        }
    }
    Ok(())
}

impl TryFrom<FormData> for ContactSubmission {
    type Error = String;
    fn try_from(form: FormData) -> Result<Self, Self::Error> {
        ContactSubmission::parse(
            form.name.unwrap_or_default(),
            form.email.unwrap_or_default(),
            form.subject.unwrap_or_default(),
            form.message.unwrap_or_default(),
        )
    }
}

#[derive(serde::Serialize)]
struct SubmissionAccepted {
    status: &'static str,
    message: &'static str,
}
//endregion

//region ContactError & Implementations
/// Everything that stops a submission. The `Display` text is what the
/// client sees; causes only reach the logs.
#[derive(thiserror::Error)]
pub enum ContactError {
    #[error("Invalid JSON format")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Failed to parse form")]
    InvalidForm(#[source] anyhow::Error),
    #[error("{0}")]
    ValidationError(String),
    #[error("Failed to send email")]
    NotificationFailed(#[source] DispatchError),
}

impl std::fmt::Debug for ContactError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for ContactError {
    fn status_code(&self) -> StatusCode {
        match self {
            ContactError::InvalidJson(_)
            | ContactError::InvalidForm(_)
            | ContactError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ContactError::NotificationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
//endregion

//region HTTP handlers
#[tracing::instrument(
    name = "Relaying a contact form submission",
    skip_all,
    fields(
        submitter_name = tracing::field::Empty,
        submitter_email = tracing::field::Empty
    )
)]
pub async fn submit_contact(
    request: HttpRequest,
    body: Bytes,
    email_client: Data<EmailClient>,
    recipient: Data<OwnerRecipient>,
) -> Result<HttpResponse, ContactError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let submission: ContactSubmission = FormData::from_body(content_type, &body)?
        .try_into()
        .map_err(ContactError::ValidationError)?;

    let span = tracing::Span::current();
    span.record("submitter_name", &tracing::field::display(submission.name()));
    span.record("submitter_email", &tracing::field::display(submission.email()));

    let notification = MailMessage::notification(&submission, &recipient.0);
    email_client
        .send_email(&notification)
        .await
        .map_err(ContactError::NotificationFailed)?;

    // Best effort: a failed confirmation never changes the response.
    let confirmation = MailMessage::confirmation(&submission);
    if let Err(e) = email_client.send_email(&confirmation).await {
        tracing::warn!(
            error.cause_chain = ?e,
            "Failed to send the confirmation email to the submitter"
        );
    }

    Ok(HttpResponse::Ok().json(SubmissionAccepted {
        status: "success",
        message: "Your message has been sent successfully",
    }))
}

/// CORS preflight. The headers come from the resource middleware.
pub async fn contact_preflight() -> HttpResponse {
    HttpResponse::Ok().finish()
}

pub async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed()
        .insert_header((header::ALLOW, "POST, OPTIONS"))
        .content_type(ContentType::plaintext())
        .body("Method not allowed")
}
//endregion
