//! Emails sent on behalf of the authentication flows.
//!
//! Both helpers are fire-and-forget: a failed delivery never reaches the
//! request that triggered it, and the user can always ask for a new email.

use crate::service::MailService;
use crate::templates::EmailTemplate;
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

/// Username used when the account has no display name.
pub const DEFAULT_USERNAME: &str = "User";

const OTP_LENGTH: usize = 6;

/// Sends the signup and password-reset emails.
#[derive(Clone)]
pub struct AuthNotifier {
    mail: Arc<MailService>,
}

impl AuthNotifier {
    pub fn new(mail: Arc<MailService>) -> Self {
        Self { mail }
    }

    /// Queue the one-time code sent during email verification.
    pub fn send_verification_otp(&self, email: &str, otp: &str) -> Uuid {
        self.mail.send_mail(email, EmailTemplate::otp(otp))
    }

    /// Queue a password reset link for `email`.
    pub fn send_password_reset(&self, email: &str, name: Option<&str>, url: &str) -> Uuid {
        let username = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_USERNAME);

        self.mail
            .send_mail(email, EmailTemplate::password_reset(username, url, email))
    }
}

/// Generate a random 6-digit one-time code.
pub fn generate_otp() -> String {
    let mut rng = rand::rng();
    (0..OTP_LENGTH)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}
