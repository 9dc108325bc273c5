/// Customer portal client.
///
/// Signs in by replaying the portal's login form, then pulls hourly usage
/// through the same page-method calls the Usage History page makes:
///
/// 1. GET  `/My-Account/Usage-History`             (primes session state)
/// 2. POST `.../MeterData.aspx/GetDailyUsageData`  (required before interval data)
/// 3. POST `.../MeterData.aspx/GetIntervalData`    (the hourly series)
///
/// The session (cookie jar + signed-in flag) is owned by the client.
/// Any failed request drops the signed-in flag so the next fetch signs in
/// again.

pub mod login;
pub mod usage;

#[cfg(test)]
pub(crate) mod fixtures;

use crate::config::ServiceConfig;
use crate::model::{PortalError, UsagePoint};
use chrono::NaiveDate;
use chrono_tz::Tz;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;
use tracing::{debug, error, info};

use self::usage::UsageRequest;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Absolute URLs of the portal pages the client talks to.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalEndpoints {
    pub login: String,
    pub usage_page: String,
    pub daily: String,
    pub hourly: String,
}

impl PortalEndpoints {
    pub fn from_base(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let meter_data = format!("{}/DesktopModules/MeterUsage/API/MeterData.aspx", base);
        Self {
            login: format!("{}/Customer-Login", base),
            usage_page: format!("{}/My-Account/Usage-History", base),
            daily: format!("{}/GetDailyUsageData", meter_data),
            hourly: format!("{}/GetIntervalData", meter_data),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// HTTP client with its cookie jar, plus whether it is signed in.
pub struct Session {
    http: Client,
    authenticated: bool,
    timeout: Duration,
}

impl Session {
    pub fn new(timeout: Duration) -> Result<Self, PortalError> {
        Ok(Self {
            http: build_http_client(timeout)?,
            authenticated: false,
            timeout,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn invalidate(&mut self) {
        self.authenticated = false;
    }

    /// Starts over with an empty cookie jar.
    fn reset(&mut self) -> Result<(), PortalError> {
        self.http = build_http_client(self.timeout)?;
        self.authenticated = false;
        Ok(())
    }
}

fn build_http_client(timeout: Duration) -> Result<Client, PortalError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));

    Ok(Client::builder()
        .cookie_store(true)
        .default_headers(headers)
        .timeout(timeout)
        .build()?)
}

/// Turns a non-2xx response into `PortalError::HttpStatus`.
fn check_status(response: Response) -> Result<Response, PortalError> {
    let status = response.status();
    if !status.is_success() {
        return Err(PortalError::HttpStatus {
            url: response.url().to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

// ---------------------------------------------------------------------------
// Usage source
// ---------------------------------------------------------------------------

/// Anything that can produce one local day of hourly usage.
pub trait UsageSource {
    fn fetch_hourly(&mut self, date: NaiveDate) -> Result<Vec<UsagePoint>, PortalError>;

    /// Forget any signed-in state; called at the start of every cycle.
    fn end_session(&mut self) {}
}

// ---------------------------------------------------------------------------
// Portal client
// ---------------------------------------------------------------------------

/// Credentials, account identifiers and session for one portal account.
pub struct PortalClient {
    username: String,
    password: String,
    member_number: String,
    account_number: String,
    tz: Tz,
    endpoints: PortalEndpoints,
    session: Session,
}

impl PortalClient {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        member_number: impl Into<String>,
        account_number: impl Into<String>,
        tz: Tz,
        endpoints: PortalEndpoints,
        timeout: Duration,
    ) -> Result<Self, PortalError> {
        Ok(Self {
            username: username.into(),
            password: password.into(),
            member_number: member_number.into(),
            account_number: account_number.into(),
            tz,
            endpoints,
            session: Session::new(timeout)?,
        })
    }

    pub fn from_config(config: &ServiceConfig, tz: Tz) -> Result<Self, PortalError> {
        Self::new(
            config.username.clone(),
            config.password.clone(),
            config.member_number.clone(),
            config.account_number.clone(),
            tz,
            PortalEndpoints::from_base(&config.portal_base_url),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn account_number(&self) -> &str {
        &self.account_number
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn invalidate(&mut self) {
        self.session.invalidate();
    }

    /// Signs in with a fresh cookie jar.
    ///
    /// # Errors
    /// - `PortalError::LoginFormChanged`: hidden form tokens not found.
    /// - `PortalError::InvalidCredentials`: username not echoed back.
    /// - `PortalError::Transport` / `PortalError::HttpStatus`: request failed.
    pub fn login(&mut self) -> Result<(), PortalError> {
        self.session.reset()?;
        let result = self.try_login();
        if let Err(e) = &result {
            error!("❌ Portal login failed: {}", e);
            self.session.invalidate();
        }
        result
    }

    fn try_login(&mut self) -> Result<(), PortalError> {
        debug!("Attempting to login.");
        let page = check_status(self.session.http.get(&self.endpoints.login).send()?)?.text()?;
        let form = login::parse_login_form(&page)?;

        let payload = login::login_payload(&form, &self.username, &self.password);
        let body = check_status(
            self.session
                .http
                .post(&self.endpoints.login)
                .form(&payload)
                .send()?,
        )?
        .text()?;

        if !login::login_succeeded(&body, &self.username) {
            return Err(PortalError::InvalidCredentials);
        }

        self.session.authenticated = true;
        debug!("Login successful.");
        Ok(())
    }

    /// Attempts a sign-in and reports whether it worked.
    pub fn check_credentials(&mut self) -> bool {
        match self.login() {
            Ok(()) => true,
            Err(e) => {
                error!("Credential test failed: {}", e);
                false
            }
        }
    }

    /// Hourly usage for every hour in `start..=end` (local dates).
    pub fn fetch_hourly_range(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UsagePoint>, PortalError> {
        if !self.session.is_authenticated() {
            self.login()?;
        }

        let result = self.request_interval_data(start, end);
        if result.is_err() {
            self.session.invalidate();
        }
        result
    }

    fn request_interval_data(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UsagePoint>, PortalError> {
        let request = UsageRequest {
            member_number: &self.member_number,
            account_number: &self.account_number,
            start,
            end,
        };
        let http = &self.session.http;

        debug!("Getting usage page session...");
        check_status(http.get(&self.endpoints.usage_page).send()?)?;

        let daily_body = request.daily_body();
        debug!("Requesting daily stats with payload: {}", daily_body);
        check_status(
            http.post(&self.endpoints.daily)
                .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
                .body(daily_body)
                .send()?,
        )?;

        let hourly_body = request.hourly_body();
        debug!("Requesting hourly stats with payload: {}", hourly_body);
        let text = check_status(
            http.post(&self.endpoints.hourly)
                .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
                .body(hourly_body)
                .send()?,
        )?
        .text()?;

        let points = usage::parse_hourly_response(&text, self.tz)?;
        info!("   Fetched {} hourly readings for {} to {}", points.len(), start, end);
        Ok(points)
    }
}

impl UsageSource for PortalClient {
    fn fetch_hourly(&mut self, date: NaiveDate) -> Result<Vec<UsagePoint>, PortalError> {
        self.fetch_hourly_range(date, date)
    }

    fn end_session(&mut self) {
        self.invalidate();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
