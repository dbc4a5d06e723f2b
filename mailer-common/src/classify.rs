//! Maps SMTP reply codes and transport exceptions to a [`ClassifiedFailure`]
//! (§4.3's failure table). Kept independent of the SMTP client so the
//! webhook worker's HTTP status mapping can reuse the permanent/temporary
//! vocabulary without depending on `mailer-worker`.

use crate::error::ClassifiedFailure;

const PERMANENT_SMTP_CODES: [u16; 5] = [550, 551, 552, 553, 554];
const TEMPORARY_SMTP_CODES: [u16; 4] = [421, 450, 451, 452];

/// Classify a numeric SMTP reply code per §4.3. Any other 5xx is treated as
/// temporary (the spec's stated "safe default"); anything else falls back to
/// temporary as well, since an unrecognized code should not permanently fail
/// a job that may succeed on retry.
pub fn classify_smtp_code(code: u16, message: &str) -> ClassifiedFailure {
    if PERMANENT_SMTP_CODES.contains(&code) {
        ClassifiedFailure::Permanent(format!("SMTP {code}: {message}"))
    } else if TEMPORARY_SMTP_CODES.contains(&code) {
        ClassifiedFailure::Temporary(format!("SMTP {code}: {message}"))
    } else if (500..600).contains(&code) {
        ClassifiedFailure::Temporary(format!("SMTP {code}: {message}"))
    } else {
        ClassifiedFailure::Temporary(format!("SMTP {code}: {message}"))
    }
}

pub fn recipient_refused(message: &str) -> ClassifiedFailure {
    ClassifiedFailure::Permanent(format!("Recipient refused: {message}"))
}

pub fn auth_failure(message: &str) -> ClassifiedFailure {
    ClassifiedFailure::Permanent(format!("Authentication failed: {message}"))
}

pub fn transport_error(message: &str) -> ClassifiedFailure {
    ClassifiedFailure::Temporary(format!("Connection error: {message}"))
}

/// Classify a webhook subscriber's HTTP response status (§4.6 step 6).
/// Any non-2xx is treated as transient, mirroring `is_retryable_status` in
/// the teacher's webhook worker but simplified: the spec has no permanent
/// webhook classification, only retry-until-exhausted.
pub fn webhook_status_is_retryable(status: u16) -> bool {
    !(200..300).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_codes_classify_permanent() {
        for code in PERMANENT_SMTP_CODES {
            assert!(matches!(
                classify_smtp_code(code, "x"),
                ClassifiedFailure::Permanent(_)
            ));
        }
    }

    #[test]
    fn temporary_codes_classify_temporary() {
        for code in TEMPORARY_SMTP_CODES {
            assert!(matches!(
                classify_smtp_code(code, "x"),
                ClassifiedFailure::Temporary(_)
            ));
        }
    }

    #[test]
    fn unlisted_5xx_defaults_temporary() {
        assert!(matches!(
            classify_smtp_code(500, "x"),
            ClassifiedFailure::Temporary(_)
        ));
    }

    #[test]
    fn webhook_2xx_is_not_retryable() {
        assert!(!webhook_status_is_retryable(200));
        assert!(!webhook_status_is_retryable(204));
    }

    #[test]
    fn webhook_non_2xx_is_retryable() {
        assert!(webhook_status_is_retryable(500));
        assert!(webhook_status_is_retryable(429));
        assert!(webhook_status_is_retryable(404));
    }
}
