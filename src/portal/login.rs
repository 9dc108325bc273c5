/// Login form replay.
///
/// The portal's sign-in is a DNN WebForms partial postback. We GET the
/// page, lift the server-issued hidden fields out of the HTML, and POST
/// them back with the credentials and the same control names the browser
/// would send.

use crate::model::PortalError;
use scraper::{Html, Selector};

pub const FIELD_VIEWSTATE: &str = "__VIEWSTATE";
pub const FIELD_VIEWSTATE_GENERATOR: &str = "__VIEWSTATEGENERATOR";
pub const FIELD_EVENT_VALIDATION: &str = "__EVENTVALIDATION";
pub const FIELD_REQUEST_VERIFICATION_TOKEN: &str = "__RequestVerificationToken";

pub const FIELD_USERNAME: &str = "dnn$ctr384$CustomerLogin$txtUsername";
pub const FIELD_PASSWORD: &str = "dnn$ctr384$CustomerLogin$txtPassword";

/// Generator value captured from the live page; used when the page omits it.
const FALLBACK_VIEWSTATE_GENERATOR: &str = "F57EDA00";

/// Server-issued tokens scraped from the login page.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginForm {
    pub viewstate: String,
    pub viewstate_generator: String,
    pub event_validation: String,
    pub request_verification_token: String,
}

/// Extracts the hidden form fields from the login page.
///
/// # Errors
/// `PortalError::LoginFormChanged` naming the first required field that
/// could not be found.
pub fn parse_login_form(html: &str) -> Result<LoginForm, PortalError> {
    let document = Html::parse_document(html);

    let required = |name: &'static str| -> Result<String, PortalError> {
        hidden_input_value(&document, name)?.ok_or(PortalError::LoginFormChanged(name))
    };

    let viewstate = required(FIELD_VIEWSTATE)?;
    let event_validation = required(FIELD_EVENT_VALIDATION)?;
    let request_verification_token = required(FIELD_REQUEST_VERIFICATION_TOKEN)?;

    let viewstate_generator = hidden_input_value(&document, FIELD_VIEWSTATE_GENERATOR)?
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| FALLBACK_VIEWSTATE_GENERATOR.to_string());

    Ok(LoginForm {
        viewstate,
        viewstate_generator,
        event_validation,
        request_verification_token,
    })
}

/// Value of `<input name="...">`; an input without a value attribute yields "".
fn hidden_input_value(document: &Html, name: &str) -> Result<Option<String>, PortalError> {
    let css = format!("input[name=\"{}\"]", name);
    let selector = Selector::parse(&css)
        .map_err(|e| PortalError::Parse(format!("bad selector {}: {:?}", css, e)))?;

    Ok(document
        .select(&selector)
        .next()
        .map(|input| input.value().attr("value").unwrap_or_default().to_string()))
}

/// Builds the form body for the sign-in postback.
pub fn login_payload<'a>(
    form: &'a LoginForm,
    username: &'a str,
    password: &'a str,
) -> Vec<(&'static str, &'a str)> {
    vec![
        (
            "ScriptManager",
            "dnn$ctr384$CustomerLogin$UpdatePanel1|dnn$ctr384$CustomerLogin$btnLogin",
        ),
        ("__EVENTTARGET", ""),
        ("__EVENTARGUMENT", ""),
        (FIELD_VIEWSTATE, &form.viewstate),
        (FIELD_VIEWSTATE_GENERATOR, &form.viewstate_generator),
        (FIELD_EVENT_VALIDATION, &form.event_validation),
        (FIELD_REQUEST_VERIFICATION_TOKEN, &form.request_verification_token),
        (FIELD_USERNAME, username),
        (FIELD_PASSWORD, password),
        (
            "LBD_VCID_c_default_dnn_ctr384_customerlogin_logincaptcha",
            "7b42de4e898b42f084aa13cb82c55df2",
        ),
        ("LBD_BackWorkaround_c_default_dnn_ctr384_customerlogin_logincaptcha", "1"),
        ("dnn$ctr384$CustomerLogin$CaptchaCodeTextBox", "ASDF"),
        ("dnn$ctr384$CustomerLogin$hdnSecretkey", ""),
        ("dnn$ctr384$CustomerLogin$HiddenField1", ""),
        ("__ASYNCPOST", "true"),
        ("dnn$ctr384$CustomerLogin$btnLogin", "Sign In"),
    ]
}

/// The portal only echoes the username back once the session is signed in.
pub fn login_succeeded(body: &str, username: &str) -> bool {
    !username.is_empty() && body.contains(username)
}
