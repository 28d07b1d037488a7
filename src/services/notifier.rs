use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::{Collection, Database};
use reqwest::Client;
use serde_json::json;

use crate::error::{AlertError, Result};
use crate::models::{Alert, User};
use crate::templates::{render_alert_email, Hbs};

/// Delivers the "alert fired" message. `Ok` means the message was handed off.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

const SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";

pub struct SendGridNotifier {
    http: Client,
    api_key: String,
    from_email: String,
    from_name: String,
    frontend_url: String,
    hbs: Hbs,
    users: Collection<User>,
}

impl SendGridNotifier {
    pub fn new(
        db: &Database,
        hbs: Hbs,
        api_key: String,
        from_email: String,
        from_name: String,
        frontend_url: String,
    ) -> Self {
        Self {
            http: Client::new(),
            api_key,
            from_email,
            from_name,
            frontend_url,
            hbs,
            users: db.collection::<User>("users"),
        }
    }
}

#[async_trait]
impl Notifier for SendGridNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let user = self
            .users
            .find_one(doc! { "_id": alert.user_id }, None)
            .await?
            .ok_or_else(|| AlertError::Notification(format!("no user {} for alert", alert.user_id)))?;

        let email = render_alert_email(&self.hbs, alert, user.display_name(), &self.frontend_url)?;

        let body = json!({
            "personalizations": [{ "to": [{ "email": user.email }] }],
            "from": { "email": self.from_email, "name": self.from_name },
            "subject": email.subject,
            "content": [
                { "type": "text/plain", "value": email.text },
                { "type": "text/html", "value": email.html },
            ],
        });

        let res = self
            .http
            .post(SENDGRID_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(AlertError::Notification(format!("sendgrid {status}: {text}")));
        }

        tracing::info!(alert_id = %alert.id, to = %user.email, "price alert email sent");
        Ok(())
    }
}

/// Development fallback: renders the message and logs it instead of sending.
pub struct LogNotifier {
    hbs: Hbs,
    frontend_url: String,
}

impl LogNotifier {
    pub fn new(hbs: Hbs, frontend_url: String) -> Self {
        Self { hbs, frontend_url }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let name = alert.user_id.to_hex();
        let email = render_alert_email(&self.hbs, alert, &name, &self.frontend_url)?;
        tracing::info!(
            alert_id = %alert.id,
            user_id = %alert.user_id,
            subject = %email.subject,
            "email delivery disabled; would send: {}",
            email.text
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertCondition;
    use crate::templates::build_handlebars;
    use mongodb::bson::oid::ObjectId;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn log_notifier_reports_success() {
        let notifier = LogNotifier::new(build_handlebars().unwrap(), "http://localhost:3000".into());
        let alert = Alert::new(ObjectId::new(), "HPG", AlertCondition::Below, dec!(25000), 0);
        assert!(notifier.notify(&alert).await.is_ok());
    }
}
