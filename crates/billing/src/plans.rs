//! Subscription plans and their monthly call quotas

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};

/// Paid plan tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanName {
    Starter,
    Professional,
    Business,
}

impl PlanName {
    pub const ALL: [PlanName; 3] = [PlanName::Starter, PlanName::Professional, PlanName::Business];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanName::Starter => "starter",
            PlanName::Professional => "professional",
            PlanName::Business => "business",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PlanName::Starter => "Starter",
            PlanName::Professional => "Professional",
            PlanName::Business => "Business",
        }
    }

    /// Calls included per billing month
    pub fn monthly_call_quota(&self) -> u32 {
        match self {
            PlanName::Starter => 200,
            PlanName::Professional => 750,
            PlanName::Business => 2_000,
        }
    }
}

impl std::fmt::Display for PlanName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlanName {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starter" => Ok(PlanName::Starter),
            "professional" | "pro" => Ok(PlanName::Professional),
            "business" => Ok(PlanName::Business),
            other => Err(BillingError::InvalidInput(format!("Unknown plan: {}", other))),
        }
    }
}

/// A plan as recorded on a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub name: PlanName,
    pub monthly_call_quota: u32,
}

impl Plan {
    pub fn new(name: PlanName) -> Self {
        Self {
            name,
            monthly_call_quota: name.monthly_call_quota(),
        }
    }
}

/// Stripe price ids for each plan
#[derive(Debug, Clone, Default)]
pub struct PriceIds {
    pub starter: String,
    pub professional: String,
    pub business: String,
}

impl PriceIds {
    pub fn from_env() -> Self {
        Self {
            starter: std::env::var("STRIPE_PRICE_STARTER").unwrap_or_default(),
            professional: std::env::var("STRIPE_PRICE_PROFESSIONAL").unwrap_or_default(),
            business: std::env::var("STRIPE_PRICE_BUSINESS").unwrap_or_default(),
        }
    }

    pub fn price_for(&self, plan: PlanName) -> BillingResult<&str> {
        let price = match plan {
            PlanName::Starter => &self.starter,
            PlanName::Professional => &self.professional,
            PlanName::Business => &self.business,
        };
        if price.is_empty() {
            return Err(BillingError::Config(format!(
                "No Stripe price configured for plan {}",
                plan
            )));
        }
        Ok(price)
    }

    /// Reverse lookup used when a processor payload names a price but no plan
    pub fn plan_for_price(&self, price_id: &str) -> Option<PlanName> {
        PlanName::ALL.into_iter().find(|plan| {
            self.price_for(*plan)
                .map(|configured| configured == price_id)
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_quotas() {
        assert_eq!(Plan::new(PlanName::Starter).monthly_call_quota, 200);
        assert_eq!(Plan::new(PlanName::Professional).monthly_call_quota, 750);
        assert_eq!(Plan::new(PlanName::Business).monthly_call_quota, 2_000);
    }

    #[test]
    fn test_plan_name_parsing() {
        assert_eq!("starter".parse::<PlanName>().unwrap(), PlanName::Starter);
        assert_eq!(" Pro ".parse::<PlanName>().unwrap(), PlanName::Professional);
        assert_eq!("BUSINESS".parse::<PlanName>().unwrap(), PlanName::Business);
        assert!("enterprise".parse::<PlanName>().is_err());
    }

    #[test]
    fn test_price_lookup() {
        let prices = PriceIds {
            starter: "price_s".to_string(),
            professional: "price_p".to_string(),
            business: String::new(),
        };

        assert_eq!(prices.price_for(PlanName::Starter).unwrap(), "price_s");
        assert!(prices.price_for(PlanName::Business).is_err());
        assert_eq!(prices.plan_for_price("price_p"), Some(PlanName::Professional));
        assert_eq!(prices.plan_for_price("price_unknown"), None);
        // An unconfigured price must never match an empty id
        assert_eq!(prices.plan_for_price(""), None);
    }
}
