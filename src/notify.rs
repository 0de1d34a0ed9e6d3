//! SendGrid notifier
//!
//! Renders a `SummaryRecord` into SendGrid dynamic template data and posts it
//! to the v3 `mail/send` endpoint.
//!
//! ## API Reference
//!
//! Endpoint: POST https://api.sendgrid.com/v3/mail/send
//! Auth: `Authorization: Bearer {SENDGRID_API_KEY}`
//! Returns: 202 Accepted with an empty body

use std::time::Duration;

use log::info;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::MailConfig;
use crate::error::{Error, Result};
use crate::summary::SummaryRecord;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Anything that can deliver a summary to a recipient
pub trait Notifier {
    fn notify(&self, summary: &SummaryRecord, recipient: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct EmailAddress<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<EmailAddress<'a>>,
    dynamic_template_data: Value,
}

/// Body of a `mail/send` request using a dynamic template
#[derive(Debug, Serialize)]
struct MailRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: EmailAddress<'a>,
    template_id: &'a str,
}

/// Template variables for a summary.
///
/// Money becomes JSON numbers with two decimals; a missing average is `null`.
/// Month keys keep calendar order.
pub fn template_data(summary: &SummaryRecord) -> Value {
    let months: Map<String, Value> = summary
        .month_transactions
        .iter()
        .map(|(month, count)| (month.to_string(), json!(count)))
        .collect();

    json!({
        "username": summary.username,
        "total_balance": money(summary.total_balance),
        "average_credit_amount": summary.average_credit_amount.map(money),
        "average_debit_amount": summary.average_debit_amount.map(money),
        "month_transactions": months,
    })
}

// Through the decimal string so 39.74 stays 39.74
fn money(value: Decimal) -> Value {
    value
        .to_string()
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Sends through the SendGrid HTTP API
pub struct SendGridNotifier {
    client: reqwest::blocking::Client,
    api_url: String,
    api_key: String,
    template_id: String,
    from_email: String,
}

impl SendGridNotifier {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Notify(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            template_id: config.template_id.clone(),
            from_email: config.from_email.clone(),
        })
    }

    fn request_body(&self, summary: &SummaryRecord, recipient: &str) -> Value {
        let request = MailRequest {
            personalizations: vec![Personalization {
                to: vec![EmailAddress { email: recipient }],
                dynamic_template_data: template_data(summary),
            }],
            from: EmailAddress {
                email: &self.from_email,
            },
            template_id: &self.template_id,
        };

        // Plain data only, serialization can't fail
        serde_json::to_value(request).unwrap_or(Value::Null)
    }
}

impl Notifier for SendGridNotifier {
    fn notify(&self, summary: &SummaryRecord, recipient: &str) -> Result<()> {
        info!("Sending email...");

        if recipient.is_empty() {
            return Err(Error::Notify("no recipient configured".to_string()));
        }

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(summary, recipient))
            .send()
            .map_err(|e| Error::Notify(e.to_string()))?;

        let status = response.status();
        info!("{}", status.as_u16());

        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::Notify(format!("SendGrid returned {}: {}", status, body)));
        }

        info!("Summary sent to {}", recipient);
        Ok(())
    }
}
