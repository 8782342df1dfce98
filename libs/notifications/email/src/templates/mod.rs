//! Email template rendering with Handlebars
//!
//! This module provides:
//! - `TemplateKind`: the closed set of email variants
//! - `EmailTemplate`: a kind together with its typed props, used as the cache key
//! - `TemplateRenderer`: Handlebars-based rendering with a render cache

use crate::error::{MailError, MailResult};
use chrono::{Datelike, Utc};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// Email variants the renderer knows how to produce.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
pub enum TemplateKind {
    #[strum(serialize = "EmailOTPVerification")]
    #[serde(rename = "EmailOTPVerification")]
    EmailOtpVerification,
    PasswordResetLink,
}

impl TemplateKind {
    /// Parse a kind by its wire name.
    pub fn parse(name: &str) -> MailResult<Self> {
        name.parse()
            .map_err(|_| MailError::UnknownTemplateKind(name.to_string()))
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Subject line, fixed per kind.
    pub fn subject(self) -> &'static str {
        match self {
            TemplateKind::EmailOtpVerification => "Verify your email",
            TemplateKind::PasswordResetLink => "Reset your password",
        }
    }

    fn source(self) -> &'static str {
        match self {
            TemplateKind::EmailOtpVerification => OTP_VERIFICATION_HTML,
            TemplateKind::PasswordResetLink => PASSWORD_RESET_LINK_HTML,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OtpVerificationProps {
    pub otp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetLinkProps {
    pub username: String,
    pub link: String,
    pub user_email: String,
}

/// A template kind paired with the props it expects.
///
/// Two values are equal exactly when they would render the same body, so the
/// type doubles as the render cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "template", content = "props")]
pub enum EmailTemplate {
    #[serde(rename = "EmailOTPVerification")]
    EmailOtpVerification(OtpVerificationProps),
    PasswordResetLink(PasswordResetLinkProps),
}

impl EmailTemplate {
    pub fn otp(otp: impl Into<String>) -> Self {
        EmailTemplate::EmailOtpVerification(OtpVerificationProps { otp: otp.into() })
    }

    pub fn password_reset(
        username: impl Into<String>,
        link: impl Into<String>,
        user_email: impl Into<String>,
    ) -> Self {
        EmailTemplate::PasswordResetLink(PasswordResetLinkProps {
            username: username.into(),
            link: link.into(),
            user_email: user_email.into(),
        })
    }

    /// Build a template from a kind name and untyped JSON props.
    pub fn from_parts(kind_name: &str, props: serde_json::Value) -> MailResult<Self> {
        let kind = TemplateKind::parse(kind_name)?;
        let invalid = |e: serde_json::Error| MailError::InvalidTemplateProps {
            kind: kind.to_string(),
            details: e.to_string(),
        };

        Ok(match kind {
            TemplateKind::EmailOtpVerification => {
                EmailTemplate::EmailOtpVerification(serde_json::from_value(props).map_err(invalid)?)
            }
            TemplateKind::PasswordResetLink => {
                EmailTemplate::PasswordResetLink(serde_json::from_value(props).map_err(invalid)?)
            }
        })
    }

    pub fn kind(&self) -> TemplateKind {
        match self {
            EmailTemplate::EmailOtpVerification(_) => TemplateKind::EmailOtpVerification,
            EmailTemplate::PasswordResetLink(_) => TemplateKind::PasswordResetLink,
        }
    }
}

/// Values shared by every template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branding {
    pub app_name: String,
    pub year: i32,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            app_name: "Bobo".to_string(),
            year: Utc::now().year(),
        }
    }
}

/// Rendered subject and HTML body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: &'static str,
    pub body: Arc<str>,
}

#[derive(Serialize)]
struct RenderContext<'a, P: Serialize> {
    #[serde(flatten)]
    props: &'a P,
    app_name: &'a str,
    year: i32,
}

/// Handlebars-based renderer with a process-local cache.
///
/// Bodies are cached per [`EmailTemplate`] until [`clear_cache`] runs. The
/// subject is looked up on every call.
///
/// [`clear_cache`]: TemplateRenderer::clear_cache
pub struct TemplateRenderer {
    handlebars: Handlebars<'static>,
    branding: Branding,
    cache: RwLock<HashMap<EmailTemplate, Arc<str>>>,
    renders: AtomicU64,
}

impl TemplateRenderer {
    /// Create a renderer with every template kind registered.
    pub fn new(branding: Branding) -> MailResult<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);

        for kind in TemplateKind::iter() {
            handlebars.register_template_string(kind.name(), kind.source())?;
        }

        Ok(Self {
            handlebars,
            branding,
            cache: RwLock::new(HashMap::new()),
            renders: AtomicU64::new(0),
        })
    }

    pub fn branding(&self) -> &Branding {
        &self.branding
    }

    pub async fn render(&self, template: &EmailTemplate) -> MailResult<RenderedEmail> {
        let kind = template.kind();
        let subject = kind.subject();

        if let Some(body) = self.cache.read().await.get(template) {
            trace!(template = %kind, "Template cache hit");
            return Ok(RenderedEmail {
                subject,
                body: Arc::clone(body),
            });
        }

        let body: Arc<str> = self.render_body(template)?.into();
        self.cache
            .write()
            .await
            .insert(template.clone(), Arc::clone(&body));

        Ok(RenderedEmail { subject, body })
    }

    fn render_body(&self, template: &EmailTemplate) -> MailResult<String> {
        let name = template.kind().name();
        if !self.handlebars.has_template(name) {
            return Err(MailError::UnknownTemplateKind(name.to_string()));
        }

        let body = match template {
            EmailTemplate::EmailOtpVerification(props) => {
                self.handlebars.render(name, &self.context(props))?
            }
            EmailTemplate::PasswordResetLink(props) => {
                self.handlebars.render(name, &self.context(props))?
            }
        };

        self.renders.fetch_add(1, Ordering::Relaxed);
        debug!(template = name, "Rendered email template");
        Ok(body)
    }

    fn context<'a, P: Serialize>(&'a self, props: &'a P) -> RenderContext<'a, P> {
        RenderContext {
            props,
            app_name: &self.branding.app_name,
            year: self.branding.year,
        }
    }

    /// Drop every cached body, returning how many there were.
    pub async fn clear_cache(&self) -> usize {
        let mut cache = self.cache.write().await;
        let cleared = cache.len();
        cache.clear();
        cleared
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Number of times Handlebars actually rendered a body.
    pub fn render_count(&self) -> u64 {
        self.renders.load(Ordering::Relaxed)
    }
}

const OTP_VERIFICATION_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Verify your email</title>
</head>
<body style="background-color: #f1f5f9; font-family: Arial, sans-serif; padding: 48px 0;">
    <div style="display: none;">Your OTP for {{app_name}} is {{otp}}</div>
    <div style="max-width: 576px; margin: 0 auto; padding: 32px; background-color: #ffffff; border: 1px solid #e2e8f0; border-radius: 8px;">
        <h1 style="text-align: center; font-size: 24px; color: #1f2937;">Confirm Your Identity</h1>
        <p style="text-align: center; color: #4b5563;">Enter the following code to complete your verification.</p>
        <div style="margin: 32px 0; padding: 16px; text-align: center; background-color: #f1f5f9; border-radius: 6px;">
            <p style="font-size: 30px; font-weight: bold; letter-spacing: 0.1em; color: #2563eb;">{{otp}}</p>
        </div>
        <p style="text-align: center; font-size: 14px; color: #6b7280;">This code will expire in 10 minutes. If you did not request this, please disregard this email.</p>
        <hr style="margin: 32px 0; border-color: #e2e8f0;">
        <p style="text-align: center; font-size: 12px; color: #9ca3af;">&copy; {{year}} {{app_name}}. All Rights Reserved.</p>
    </div>
</body>
</html>"#;

const PASSWORD_RESET_LINK_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Reset your password</title>
</head>
<body style="background-color: #f1f5f9; font-family: Arial, sans-serif; padding: 48px 0;">
    <div style="display: none;">Reset your {{app_name}} password</div>
    <div style="max-width: 576px; margin: 0 auto; padding: 32px; background-color: #ffffff; border: 1px solid #e2e8f0; border-radius: 8px;">
        <h1 style="text-align: center; font-size: 24px; color: #1f2937;">Password Reset</h1>
        <p style="color: #4b5563;">Hello {{username}},</p>
        <p style="color: #4b5563;">We received a request to reset the password for your {{app_name}} account <strong>{{userEmail}}</strong>.</p>
        <p style="text-align: center; margin: 32px 0;">
            <a href="{{link}}"
               style="background-color: #2563eb; color: #ffffff; padding: 12px 24px; text-decoration: none; border-radius: 6px; display: inline-block;">
                Reset Password
            </a>
        </p>
        <p style="font-size: 14px; color: #6b7280;">If you did not request this, you can safely ignore this email. Your password will remain unchanged.</p>
        <hr style="margin: 32px 0; border-color: #e2e8f0;">
        <p style="text-align: center; font-size: 12px; color: #9ca3af;">&copy; {{year}} {{app_name}}. All Rights Reserved.</p>
    </div>
</body>
</html>"#;
