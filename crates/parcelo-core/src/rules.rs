//! Priority-ordered shipping automation rules.
//!
//! Merchants configure rules like "packages over 20 kg go by UPS" or
//! "shipments to Jalisco take the cheapest quote". The engine evaluates
//! rules in strictly descending priority; for equal priorities the
//! configured order is preserved; the first matching rule wins.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::registry::CarrierId;
use crate::{CarrierRate, ValidationError};

/// What a matched rule resolves to.
///
/// Serialized as the original single-string field: a carrier id, or the
/// sentinels `"cheapest"` / `"fastest"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Carrier(CarrierId),
    Cheapest,
    Fastest,
}

impl RuleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Carrier(carrier) => carrier.as_str(),
            Self::Cheapest => "cheapest",
            Self::Fastest => "fastest",
        }
    }
}

impl Display for RuleAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleAction {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cheapest" => Ok(Self::Cheapest),
            "fastest" => Ok(Self::Fastest),
            other => other
                .parse::<CarrierId>()
                .map(Self::Carrier)
                .map_err(|_| ValidationError::InvalidRuleAction {
                    value: value.to_owned(),
                }),
        }
    }
}

impl Serialize for RuleAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RuleAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(DeError::custom)
    }
}

/// Matching conditions for one rule. All present conditions must hold;
/// an absent bound is unconstrained. A rule with no conditions always
/// matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_weight_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_weight_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
}

impl RuleConditions {
    fn matches(&self, profile: &ShipmentProfile, quotes: &[CarrierRate]) -> bool {
        if let Some(min) = self.min_weight_kg {
            if profile.weight_kg < min {
                return false;
            }
        }
        if let Some(max) = self.max_weight_kg {
            if profile.weight_kg > max {
                return false;
            }
        }

        if !self.states.is_empty()
            && !self
                .states
                .iter()
                .any(|state| state.eq_ignore_ascii_case(&profile.destination_state))
        {
            return false;
        }
        if !self.cities.is_empty()
            && !self
                .cities
                .iter()
                .any(|city| city.eq_ignore_ascii_case(&profile.destination_city))
        {
            return false;
        }

        if self.min_cost.is_some() || self.max_cost.is_some() {
            // Cost bounds compare against the mean of the current quotes;
            // with no quotes there is no cost to compare, so no match.
            let Some(mean) = mean_price(quotes) else {
                return false;
            };
            if self.min_cost.is_some_and(|min| mean < min) {
                return false;
            }
            if self.max_cost.is_some_and(|max| mean > max) {
                return false;
            }
        }

        true
    }
}

/// One merchant-configured automation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub priority: i32,
    #[serde(default)]
    pub conditions: RuleConditions,
    pub action: RuleAction,
}

const fn default_active() -> bool {
    true
}

impl AutomationRule {
    pub fn new(name: impl Into<String>, priority: i32, action: RuleAction) -> Self {
        Self {
            name: name.into(),
            is_active: true,
            priority,
            conditions: RuleConditions::default(),
            action,
        }
    }

    pub fn with_conditions(mut self, conditions: RuleConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Shipment facts the rules are evaluated against.
#[derive(Debug, Clone, PartialEq)]
pub struct ShipmentProfile {
    pub weight_kg: f64,
    pub destination_state: String,
    pub destination_city: String,
}

impl ShipmentProfile {
    pub fn new(
        weight_kg: f64,
        destination_state: impl Into<String>,
        destination_city: impl Into<String>,
    ) -> Self {
        Self {
            weight_kg,
            destination_state: destination_state.into(),
            destination_city: destination_city.into(),
        }
    }
}

/// Evaluates automation rules against a shipment and its current quotes.
#[derive(Debug, Default)]
pub struct RuleEngine;

impl RuleEngine {
    pub fn new() -> Self {
        Self
    }

    /// Resolves the carrier the shipment should use, or `None` when no
    /// active rule matches (the caller falls back to manual selection).
    ///
    /// `Cheapest`/`Fastest` sentinels resolve against `quotes`; with zero
    /// quotes a matched sentinel cannot resolve and yields `None`.
    pub fn select_carrier(
        &self,
        rules: &[AutomationRule],
        profile: &ShipmentProfile,
        quotes: &[CarrierRate],
    ) -> Option<CarrierId> {
        let mut ordered: Vec<&AutomationRule> =
            rules.iter().filter(|rule| rule.is_active).collect();
        // Stable sort keeps the configured order for equal priorities.
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        for rule in ordered {
            if !rule.conditions.matches(profile, quotes) {
                continue;
            }

            debug!(rule = %rule.name, action = %rule.action, "automation rule matched");
            return match rule.action {
                RuleAction::Carrier(carrier) => Some(carrier),
                RuleAction::Cheapest => cheapest(quotes),
                RuleAction::Fastest => fastest(quotes),
            };
        }

        None
    }
}

fn mean_price(quotes: &[CarrierRate]) -> Option<f64> {
    if quotes.is_empty() {
        return None;
    }
    let total: f64 = quotes.iter().map(|quote| quote.price).sum();
    Some(total / quotes.len() as f64)
}

/// First minimum wins, so ties resolve to the earlier quote in the
/// already-sorted sheet.
fn cheapest(quotes: &[CarrierRate]) -> Option<CarrierId> {
    quotes
        .iter()
        .fold(None::<&CarrierRate>, |best, quote| match best {
            Some(best) if best.price <= quote.price => Some(best),
            _ => Some(quote),
        })
        .map(|quote| quote.carrier)
}

fn fastest(quotes: &[CarrierRate]) -> Option<CarrierId> {
    quotes
        .iter()
        .fold(None::<&CarrierRate>, |best, quote| match best {
            Some(best) if best.estimated_days <= quote.estimated_days => Some(best),
            _ => Some(quote),
        })
        .map(|quote| quote.carrier)
}
