//! The SMTP Sender (§4.3): builds a transport per job from the resolved
//! `SmtpConfiguration`, sends via `lettre`'s blocking transport inside
//! `spawn_blocking` (lettre has no async transport), and classifies any
//! failure into [`ClassifiedFailure`].

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};
use mailer_common::classify::{recipient_refused, transport_error};
use mailer_common::error::ClassifiedFailure;
use mailer_common::models::SmtpConfiguration;

/// Port 465 uses implicit TLS ("SMTPS"); anything else either negotiates
/// STARTTLS (`use_tls`) or, for local/dev configurations, sends in the clear.
fn build_transport(config: &SmtpConfiguration) -> Result<SmtpTransport, ClassifiedFailure> {
    let builder = SmtpTransport::relay(&config.host)
        .map_err(|e| transport_error(&e.to_string()))?
        .port(config.port as u16);

    let builder = if config.port == 465 {
        let tls = TlsParameters::new(config.host.clone()).map_err(|e| transport_error(&e.to_string()))?;
        builder.tls(Tls::Wrapper(tls))
    } else if config.use_tls {
        let tls = TlsParameters::new(config.host.clone()).map_err(|e| transport_error(&e.to_string()))?;
        builder.tls(Tls::Required(tls))
    } else {
        builder.tls(Tls::None)
    };

    Ok(builder
        .credentials(Credentials::new(config.username.clone(), unwrapped_password(config)))
        .build())
}

fn unwrapped_password(config: &SmtpConfiguration) -> String {
    // The caller is responsible for passing an already-unwrapped config; kept
    // as a named function so the call site below reads as documentation.
    config.password_wrapped.clone()
}

pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Send `email` through `config` (with `password` already unwrapped by the
/// caller via `mailer_common::crypto::WrapKey`). Runs on a blocking thread
/// since `lettre::SmtpTransport::send` blocks the calling thread on I/O.
pub async fn send(
    config: SmtpConfiguration,
    password: String,
    email: OutgoingEmail,
) -> Result<(), ClassifiedFailure> {
    tokio::task::spawn_blocking(move || send_blocking(config, password, email))
        .await
        .map_err(|e| transport_error(&format!("SMTP worker thread panicked: {e}")))?
}

fn send_blocking(
    mut config: SmtpConfiguration,
    password: String,
    email: OutgoingEmail,
) -> Result<(), ClassifiedFailure> {
    config.password_wrapped = password;

    let from: Mailbox = email
        .from
        .parse()
        .map_err(|e| ClassifiedFailure::Permanent(format!("invalid from address: {e}")))?;
    let to: Mailbox = email
        .to
        .parse()
        .map_err(|e| recipient_refused(&format!("invalid recipient address: {e}")))?;

    // The body is the rendered HTML directly (§4.3): a single `text/html`
    // part, not a multipart/alternative with a plain-text fallback (excluded
    // by spec.md §1 Non-goals).
    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(&email.subject)
        .header(ContentType::TEXT_HTML)
        .body(email.body)
        .map_err(|e| ClassifiedFailure::Permanent(format!("malformed message: {e}")))?;

    let transport = build_transport(&config)?;

    match transport.send(&message) {
        Ok(_response) => Ok(()),
        Err(e) => Err(classify_smtp_error(&e)),
    }
}

/// `lettre::transport::smtp::Error` exposes broad categories rather than a
/// raw reply code, so we fall back to the permanent/temporary split directly
/// instead of going through [`classify_smtp_code`] (reserved for cases where
/// the numeric code is known, e.g. a future non-lettre transport). A
/// permanent lettre error covers both a 5xx permanent reply and a rejected
/// AUTH exchange, so it is reported as [`ClassifiedFailure::Permanent`]
/// without narrowing to a specific cause the transport didn't give us.
fn classify_smtp_error(error: &lettre::transport::smtp::Error) -> ClassifiedFailure {
    if error.is_permanent() {
        ClassifiedFailure::Permanent(error.to_string())
    } else {
        transport_error(&error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(port: i32, use_tls: bool) -> SmtpConfiguration {
        SmtpConfiguration {
            id: uuid::Uuid::now_v7(),
            host: "smtp.example.com".to_string(),
            port,
            username: "no-reply@example.com".to_string(),
            password_wrapped: "unused-in-build-transport".to_string(),
            use_tls,
        }
    }

    #[test]
    fn implicit_tls_builds_for_port_465() {
        assert!(build_transport(&test_config(465, true)).is_ok());
    }

    #[test]
    fn starttls_builds_for_submission_port() {
        assert!(build_transport(&test_config(587, true)).is_ok());
    }

    #[test]
    fn plaintext_builds_when_tls_disabled() {
        assert!(build_transport(&test_config(25, false)).is_ok());
    }
}
