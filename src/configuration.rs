use crate::email_client::EmailClient;
use actix_web::http::header::{HeaderValue, InvalidHeaderValue};
use lettre::address::AddressError;
use lettre::message::Mailbox;
use secrecy::{ExposeSecret, Secret};
use serde_aux::field_attributes::deserialize_number_from_string;
use std::time::Duration;

/// Plain environment variables and the setting each one overrides.
/// Empty values are treated as unset.
const ENVIRONMENT_OVERRIDES: &[(&str, &str)] = &[
    ("SMTP_HOST", "email_client.smtp_host"),
    ("SMTP_PORT", "email_client.smtp_port"),
    ("SMTP_USER", "email_client.username"),
    ("SMTP_PASSWORD", "email_client.password"),
    ("FROM_EMAIL", "email_client.sender_email"),
    ("RECIPIENT_EMAIL", "email_client.recipient_email"),
    ("SMTP_TIMEOUT_MS", "email_client.timeout_milliseconds"),
    ("SERVER_HOST", "application.host"),
    ("SERVER_PORT", "application.port"),
    ("CORS_ORIGIN", "application.cors_origin"),
];

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub email_client: EmailClientSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub cors_origin: String,
}

#[derive(serde::Deserialize, Clone)]
pub struct EmailClientSettings {
    pub smtp_host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub smtp_port: u16,
    pub username: String,
    pub password: Secret<String>,
    pub sender_email: String,
    pub recipient_email: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("{0} must be set")]
    MissingValues(String),
    #[error("`{value}` is not a valid {setting} address")]
    InvalidAddress {
        setting: &'static str,
        value: String,
        #[source]
        source: AddressError,
    },
    #[error("`{0}` is not a valid CORS origin")]
    InvalidCorsOrigin(String, #[source] InvalidHeaderValue),
    #[error("Failed to set up the SMTP transport")]
    Transport(#[from] lettre::transport::smtp::Error),
}

impl Settings {
    /// Reject configurations the service cannot run with: missing SMTP
    /// credentials or recipient, malformed addresses, unusable CORS origin.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let email_client = &self.email_client;
        let missing: Vec<&str> = [
            ("SMTP_USER", email_client.username.is_empty()),
            ("SMTP_PASSWORD", email_client.password.expose_secret().is_empty()),
            ("RECIPIENT_EMAIL", email_client.recipient_email.is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, is_missing)| is_missing.then_some(name))
        .collect();
        if !missing.is_empty() {
            return Err(ConfigurationError::MissingValues(missing.join(", ")));
        }

        email_client.sender()?;
        email_client.recipient()?;
        self.application.cors_origin_header()?;
        Ok(())
    }
}

impl ApplicationSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cors_origin_header(&self) -> Result<HeaderValue, ConfigurationError> {
        HeaderValue::from_str(&self.cors_origin)
            .map_err(|e| ConfigurationError::InvalidCorsOrigin(self.cors_origin.clone(), e))
    }
}

impl EmailClientSettings {
    pub fn client(&self) -> Result<EmailClient, ConfigurationError> {
        let client = EmailClient::new(
            &self.smtp_host,
            self.smtp_port,
            self.username.clone(),
            self.password.clone(),
            self.sender()?,
            self.timeout(),
        )?;
        Ok(client)
    }

    /// The `From` mailbox. Falls back to the SMTP username, which is what
    /// most submission servers require anyway.
    pub fn sender(&self) -> Result<Mailbox, ConfigurationError> {
        let sender = if self.sender_email.is_empty() {
            &self.username
        } else {
            &self.sender_email
        };
        parse_mailbox("sender", sender)
    }

    /// The fixed site-owner address every notification goes to.
    pub fn recipient(&self) -> Result<Mailbox, ConfigurationError> {
        parse_mailbox("recipient", &self.recipient_email)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_milliseconds)
    }
}

fn parse_mailbox(setting: &'static str, value: &str) -> Result<Mailbox, ConfigurationError> {
    value
        .parse()
        .map_err(|source| ConfigurationError::InvalidAddress {
            setting,
            value: value.to_string(),
            source,
        })
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Layer built-in defaults, an optional `config.toml`, `APP_`-prefixed
/// variables (`APP_EMAIL_CLIENT__SMTP_HOST=...`) and finally the plain
/// variables in [`ENVIRONMENT_OVERRIDES`].
pub fn get_settings() -> Result<Settings, config::ConfigError> {
    let mut builder = config::Config::builder()
        .set_default("application.host", "0.0.0.0")?
        .set_default("application.port", 8080)?
        .set_default("application.cors_origin", "*")?
        .set_default("email_client.smtp_host", "smtp.gmail.com")?
        .set_default("email_client.smtp_port", 587)?
        .set_default("email_client.username", "")?
        .set_default("email_client.password", "")?
        .set_default("email_client.sender_email", "")?
        .set_default("email_client.recipient_email", "")?
        .set_default("email_client.timeout_milliseconds", 10_000)?
        .add_source(config::File::with_name("config").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        );

    for (variable, key) in ENVIRONMENT_OVERRIDES {
        builder = builder.set_override_option(*key, non_empty_var(variable))?;
    }

    builder.build()?.try_deserialize::<Settings>()
}
