use handlebars::Handlebars;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{AlertError, Result};
use crate::models::{Alert, AlertCondition};

pub type Hbs = Arc<Handlebars<'static>>;

const ALERT_SUBJECT: &str = "Price Alert: {{symbol}} is now {{condition}} {{target_price}}";

const ALERT_TEXT: &str = "Price Alert: {{symbol}} is now {{condition}} {{target_price}}. \
Current price: {{current_price}}";

const ALERT_HTML: &str = r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px; border: 1px solid #eee; border-radius: 5px;">
  <h2 style="color: #333; text-align: center;">Price Alert Triggered</h2>
  <p>Hello {{name}},</p>
  <p>Your price alert for <strong>{{symbol}}</strong> has been triggered.</p>
  <div style="background-color: #f8f8f8; padding: 15px; border-radius: 5px; margin: 20px 0;">
    <p><strong>Stock:</strong> {{symbol}}</p>
    <p><strong>Alert condition:</strong> {{condition_title}} {{target_price}}</p>
    <p><strong>Current price:</strong> {{current_price}}</p>
    <p><strong>Triggered at:</strong> {{triggered_at}}</p>
  </div>
  <p><a href="{{frontend_url}}/stocks/{{symbol}}">View Stock Details</a></p>
  <p style="font-size: 14px; color: #777;">This is an automated message. Please do not reply to this email.</p>
</div>"#;

pub fn build_handlebars() -> Result<Hbs> {
    let mut hb = Handlebars::new();
    hb.set_strict_mode(true);

    for (name, src) in [
        ("email/alert_subject", ALERT_SUBJECT),
        ("email/alert_text", ALERT_TEXT),
        ("email/alert_html", ALERT_HTML),
    ] {
        hb.register_template_string(name, src)
            .map_err(|e| AlertError::Template(format!("{name}: {e}")))?;
    }

    Ok(Arc::new(hb))
}

#[derive(Debug, Clone)]
pub struct AlertEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[derive(Serialize)]
struct AlertEmailCtx<'a> {
    name: &'a str,
    symbol: &'a str,
    condition: &'static str,
    condition_title: &'static str,
    target_price: String,
    current_price: String,
    triggered_at: String,
    frontend_url: &'a str,
}

pub fn render_alert_email(hbs: &Hbs, alert: &Alert, name: &str, frontend_url: &str) -> Result<AlertEmail> {
    let triggered_at = alert
        .triggered_at
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string());

    let ctx = AlertEmailCtx {
        name,
        symbol: &alert.symbol,
        condition: alert.condition.as_str(),
        condition_title: match alert.condition {
            AlertCondition::Above => "Above",
            AlertCondition::Below => "Below",
        },
        target_price: alert.target_price.normalize().to_string(),
        current_price: alert
            .current_price
            .map(|p| p.normalize().to_string())
            .unwrap_or_else(|| "-".to_string()),
        triggered_at,
        frontend_url: frontend_url.trim_end_matches('/'),
    };

    let render = |tpl: &str| {
        hbs.render(tpl, &ctx)
            .map_err(|e| AlertError::Template(format!("{tpl}: {e}")))
    };

    Ok(AlertEmail {
        subject: render("email/alert_subject")?,
        text: render("email/alert_text")?,
        html: render("email/alert_html")?,
    })
}
