//! Session establishment: cached cookies first, interactive login second,
//! with an out-of-band OTP handoff when the site asks for one.
//!
//! Every probe is bounded by a short timeout from [`Timings`] and every UI
//! concern is an ordered [`Locator`](crate::scraping::browser::Locator) list
//! from [`ProbeConfig`].

use crate::bot::notifier::Notifier;
use crate::core::config::{ProbeConfig, SiteConfig, Timings};
use crate::features::otp_channel::{OtpChannel, OtpError};
use crate::features::session_store::SessionStore;
use crate::scraping::browser::{
    click_first, fill_first, first_visible, BrowserError, BrowserSession,
};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("site credentials are not configured")]
    CredentialsMissing,

    #[error("login form unavailable: no {0} matched")]
    FormUnavailable(&'static str),

    #[error("OTP not supplied: {0}")]
    Otp(#[from] OtpError),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// How the session was obtained; becomes the first note of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionNote {
    CachedSession,
    Credentials,
    CredentialsWithOtp,
}

impl fmt::Display for SessionNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CachedSession => "Used saved cookies",
            Self::Credentials => "Logged in with credentials",
            Self::CredentialsWithOtp => "Logged in with credentials + OTP",
        })
    }
}

pub struct SessionEstablisher<'a> {
    pub site: &'a SiteConfig,
    pub probes: &'a ProbeConfig,
    pub timings: &'a Timings,
    pub otp_timeout: Duration,
    pub store: &'a SessionStore,
    pub otp: &'a OtpChannel,
    pub notifier: &'a dyn Notifier,
}

impl SessionEstablisher<'_> {
    /// Authenticate the fresh `session`.
    pub async fn establish(&self, session: &dyn BrowserSession) -> Result<SessionNote, AuthError> {
        if let Some(cookies) = self.store.load() {
            if let Err(e) = session.set_cookies(&cookies).await {
                warn!("session: cached cookies not injected: {}", e);
            }
        }

        session
            .goto(self.site.base_url.as_str(), self.timings.navigation)
            .await?;

        if first_visible(
            session,
            &self.probes.logged_in_markers,
            self.timings.logged_in_probe,
        )
        .await
        .is_some()
        {
            info!("session: ✅ cached session is still logged in");
            return Ok(SessionNote::CachedSession);
        }

        info!("session: cached session missing or stale, logging in");
        let note = self.login(session).await?;

        tokio::time::sleep(self.timings.post_login_settle).await;
        self.persist_cookies(session).await;
        Ok(note)
    }

    async fn login(&self, session: &dyn BrowserSession) -> Result<SessionNote, AuthError> {
        if !self.site.has_credentials() {
            return Err(AuthError::CredentialsMissing);
        }

        // The form is sometimes already open; a missing trigger is not fatal.
        if let Err(e) =
            click_first(session, &self.probes.login_triggers, self.timings.login_trigger).await
        {
            warn!("session: no login trigger clicked ({}); trying the form directly", e);
        }

        fill_first(
            session,
            &self.probes.identity_fields,
            &self.site.email,
            self.timings.field_fill,
        )
        .await
        .map_err(|_| AuthError::FormUnavailable("identity field"))?;
        fill_first(
            session,
            &self.probes.secret_fields,
            &self.site.password,
            self.timings.field_fill,
        )
        .await
        .map_err(|_| AuthError::FormUnavailable("password field"))?;
        click_first(session, &self.probes.login_submits, self.timings.field_fill)
            .await
            .map_err(|_| AuthError::FormUnavailable("login button"))?;

        let Some(otp_field) =
            first_visible(session, &self.probes.otp_fields, self.timings.otp_probe).await
        else {
            return Ok(SessionNote::Credentials);
        };

        info!("session: 🔐 site asked for an OTP");
        self.notifier
            .send(
                &format!(
                    "🔐 Login asked for an OTP. Send it with `/otp 123456` within {} min.",
                    self.otp_timeout.as_secs().div_ceil(60)
                ),
                true,
            )
            .await;

        let code = self.otp.request_code(self.otp_timeout).await?;
        session
            .fill(otp_field, code.trim(), self.timings.field_fill)
            .await?;
        session.press_enter(otp_field).await?;
        Ok(SessionNote::CredentialsWithOtp)
    }

    async fn persist_cookies(&self, session: &dyn BrowserSession) {
        match session.cookies().await {
            Ok(cookies) if !cookies.is_empty() => {
                if let Err(e) = self.store.save(&cookies) {
                    warn!(
                        "session: failed to save cookies to {}: {}",
                        self.store.path().display(),
                        e
                    );
                }
            }
            Ok(_) => warn!("session: browser returned no cookies to cache"),
            Err(e) => warn!("session: could not read cookies: {}", e),
        }
    }
}
