/// Test fixtures: representative pages and payloads from the customer portal.
///
/// Trimmed to what the parsers look at. The login page is a DNN/ASP.NET
/// WebForms page; the usage endpoints are ASP.NET page methods that wrap
/// their result in a `d` envelope:
///
///   response.d.Items[]
///     .UsageHourDate — local wall time, "MM/DD/YYYY hh:mm AM"
///     .KWH           — number, numeric string, or the string "NaN"
///
/// Note: the portal is inconsistent about KWH types even within a single
/// response. Parsers must handle all three forms plus a missing key.

/// Login page with every hidden field the form replay needs.
#[cfg(test)]
pub(crate) fn fixture_login_page_html() -> &'static str {
    r#"<!DOCTYPE html>
<html>
<head><title>Customer Login</title></head>
<body>
<form method="post" action="/onlineportal/Customer-Login" id="Form">
  <div class="aspNetHidden">
    <input type="hidden" name="__EVENTTARGET" id="__EVENTTARGET" value="" />
    <input type="hidden" name="__EVENTARGUMENT" id="__EVENTARGUMENT" value="" />
    <input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="dDwtMTA4NzU0MzY1Nzs7Pg==" />
  </div>
  <div class="aspNetHidden">
    <input type="hidden" name="__VIEWSTATEGENERATOR" id="__VIEWSTATEGENERATOR" value="CA0B0334" />
    <input type="hidden" name="__EVENTVALIDATION" id="__EVENTVALIDATION" value="/wEdAAXev7Kq3tq" />
  </div>
  <input name="__RequestVerificationToken" type="hidden" value="Xq9-token-abc" />
  <input name="dnn$ctr384$CustomerLogin$txtUsername" type="text" />
  <input name="dnn$ctr384$CustomerLogin$txtPassword" type="password" />
  <input type="submit" name="dnn$ctr384$CustomerLogin$btnLogin" value="Sign In" />
</form>
</body>
</html>"#
}

/// Login page after a redesign: the anti-forgery token is gone.
#[cfg(test)]
pub(crate) fn fixture_login_page_missing_token_html() -> &'static str {
    r#"<html><body>
<form method="post">
  <input type="hidden" name="__VIEWSTATE" value="abc" />
  <input type="hidden" name="__EVENTVALIDATION" value="def" />
</form>
</body></html>"#
}

/// Partial-postback body returned after a successful sign-in.
/// The username is echoed in the account header.
#[cfg(test)]
pub(crate) fn fixture_login_success_body(username: &str) -> String {
    format!(
        "1|#||4|52|pageRedirect||%2fonlineportal%2fMy-Account|\
         <span class=\"welcome\">Welcome, {}</span>",
        username
    )
}

/// Partial-postback body returned for bad credentials.
#[cfg(test)]
pub(crate) fn fixture_login_failure_body() -> &'static str {
    "1|#||4|120|updatePanel|dnn_ctr384_CustomerLogin_UpdatePanel1|\
     <span class=\"error\">Invalid username or password.</span>|"
}

/// Hourly interval response for 07/01/2024 with every KWH variant:
/// numeric, numeric string, "NaN", null, and a missing key.
/// Items are deliberately out of order.
#[cfg(test)]
pub(crate) fn fixture_hourly_json() -> &'static str {
    r#"{
  "d": {
    "__type": "MeterUsage.IntervalData",
    "Items": [
      { "UsageHourDate": "07/01/2024 02:00 AM", "KWH": "0.87", "Temperature": 74 },
      { "UsageHourDate": "07/01/2024 12:00 AM", "KWH": 1.25, "Temperature": 76 },
      { "UsageHourDate": "07/01/2024 01:00 AM", "KWH": "NaN", "Temperature": 75 },
      { "UsageHourDate": "07/01/2024 03:00 AM", "KWH": null },
      { "UsageHourDate": "07/01/2024 01:00 PM" }
    ]
  }
}"#
}

/// A response with an envelope but no items (data not published yet).
#[cfg(test)]
pub(crate) fn fixture_hourly_empty_json() -> &'static str {
    r#"{ "d": { "Items": [] } }"#
}

/// Daily usage response; only requested to prime the portal's session state.
#[cfg(test)]
pub(crate) fn fixture_daily_json() -> &'static str {
    r#"{ "d": { "Items": [ { "UsageDate": "07/01/2024", "KWH": "22.4" } ] } }"#
}
