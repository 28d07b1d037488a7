use std::fmt;

use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    Above,
    Below,
}

impl AlertCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCondition::Above => "above",
            AlertCondition::Below => "below",
        }
    }

    /// Boundary-inclusive on both sides: a price equal to the target satisfies either condition.
    pub fn is_met(&self, price: Decimal, target: Decimal) -> bool {
        match self {
            AlertCondition::Above => price >= target,
            AlertCondition::Below => price <= target,
        }
    }
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub user_id: ObjectId,
    pub symbol: String,

    pub condition: AlertCondition,
    pub target_price: Decimal,

    // last price seen by the monitor
    #[serde(default)]
    pub current_price: Option<Decimal>,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default)]
    pub triggered: bool,
    #[serde(default)]
    pub triggered_at: Option<i64>,
    #[serde(default)]
    pub notification_sent: bool,

    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Alert {
    pub fn new(
        user_id: ObjectId,
        symbol: &str,
        condition: AlertCondition,
        target_price: Decimal,
        now: i64,
    ) -> Self {
        Self {
            id: ObjectId::new(),
            user_id,
            symbol: symbol.to_uppercase(),
            condition,
            target_price,
            current_price: None,
            active: true,
            triggered: false,
            triggered_at: None,
            notification_sent: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Active and not yet fired.
    pub fn is_armed(&self) -> bool {
        self.active && !self.triggered
    }

    pub fn should_fire(&self, price: Decimal) -> bool {
        self.is_armed() && self.condition.is_met(price, self.target_price)
    }

    /// Applies a user edit. Supplying a target or condition re-arms the alert.
    pub fn apply_edit(&mut self, edit: &AlertEdit, now: i64) {
        if let Some(symbol) = &edit.symbol {
            self.symbol = symbol.to_uppercase();
        }
        if let Some(target) = edit.target_price {
            self.target_price = target;
        }
        if let Some(condition) = edit.condition {
            self.condition = condition;
        }
        if let Some(active) = edit.active {
            self.active = active;
        }
        if edit.rearms() {
            self.triggered = false;
            self.triggered_at = None;
            self.notification_sent = false;
        }
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertEdit {
    pub symbol: Option<String>,
    pub target_price: Option<Decimal>,
    pub condition: Option<AlertCondition>,
    pub active: Option<bool>,
}

impl AlertEdit {
    pub fn rearms(&self) -> bool {
        self.target_price.is_some() || self.condition.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.symbol.is_none()
            && self.target_price.is_none()
            && self.condition.is_none()
            && self.active.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn alert(condition: AlertCondition, target: Decimal) -> Alert {
        Alert::new(ObjectId::new(), "vcb", condition, target, 0)
    }

    #[test]
    fn above_is_inclusive_at_target() {
        let a = alert(AlertCondition::Above, dec!(100));
        assert!(a.should_fire(dec!(100.00)));
        assert!(!a.should_fire(dec!(99.99)));
    }

    #[test]
    fn below_is_inclusive_at_target() {
        let a = alert(AlertCondition::Below, dec!(100));
        assert!(a.should_fire(dec!(100.00)));
        assert!(!a.should_fire(dec!(100.01)));
    }

    #[test]
    fn fired_or_disabled_alerts_never_fire() {
        let mut a = alert(AlertCondition::Above, dec!(10));
        a.triggered = true;
        a.triggered_at = Some(1);
        assert!(!a.should_fire(dec!(50)));

        let mut b = alert(AlertCondition::Above, dec!(10));
        b.active = false;
        assert!(!b.should_fire(dec!(50)));
    }

    #[test]
    fn editing_target_rearms_but_toggling_active_does_not() {
        let mut a = alert(AlertCondition::Above, dec!(10));
        a.triggered = true;
        a.triggered_at = Some(5);
        a.notification_sent = true;

        a.apply_edit(&AlertEdit { active: Some(true), ..Default::default() }, 6);
        assert!(a.triggered);

        a.apply_edit(&AlertEdit { target_price: Some(dec!(12)), ..Default::default() }, 7);
        assert!(!a.triggered);
        assert_eq!(a.triggered_at, None);
        assert!(!a.notification_sent);
        assert_eq!(a.updated_at, 7);
    }

    #[test]
    fn symbol_is_stored_uppercase() {
        let a = alert(AlertCondition::Below, dec!(1));
        assert_eq!(a.symbol, "VCB");
    }
}
