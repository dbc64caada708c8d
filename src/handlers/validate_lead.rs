//! Lead validation.
//!
//! Checks the inbound lead record and emits a verdict as business data. A
//! lead that fails validation still completes its job; downstream gateways
//! branch on `leadValid` rather than on a failed job.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tracing::info;

use crate::handlers::string_field;
use crate::types::{HandlerResult, JobHandler, Variables};

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap())
}

/// Email is optional; only a present, malformed address fails validation.
fn email_is_valid(email: &str) -> bool {
    email.is_empty() || email_pattern().is_match(email)
}

pub struct ValidateLeadHandler;

#[async_trait]
impl JobHandler for ValidateLeadHandler {
    async fn execute(&self, variables: &Variables) -> HandlerResult {
        let lead_name = string_field(variables, "leadName");
        let email = string_field(variables, "email");
        let company = string_field(variables, "company");

        info!(
            lead_name = lead_name,
            email = email,
            company = company,
            "Validating lead"
        );

        let (valid, message) = if lead_name.is_empty() {
            (false, "Lead name is required")
        } else if !email_is_valid(email) {
            (false, "Invalid email format")
        } else {
            (true, "Lead data is valid")
        };

        HandlerResult::from_value(json!({
            "leadValid": valid,
            "validationMessage": message,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead(name: &str, email: &str, company: &str) -> Variables {
        let mut variables = Variables::new();
        variables.insert("leadName".to_string(), json!(name));
        variables.insert("email".to_string(), json!(email));
        variables.insert("company".to_string(), json!(company));
        variables
    }

    async fn verdict(variables: Variables) -> Variables {
        match ValidateLeadHandler.execute(&variables).await {
            HandlerResult::Success(out) => out,
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_valid_lead_passes() {
        let out = verdict(lead("Jane Doe", "jane@x.com", "Acme")).await;
        assert_eq!(out["leadValid"], json!(true));
        assert_eq!(out["validationMessage"], json!("Lead data is valid"));
    }

    #[tokio::test]
    async fn test_malformed_email_rejected_as_business_data() {
        let out = verdict(lead("Jane Doe", "not-an-email", "Acme")).await;
        assert_eq!(out["leadValid"], json!(false));
        assert_eq!(out["validationMessage"], json!("Invalid email format"));
    }

    #[tokio::test]
    async fn test_missing_lead_name_rejected() {
        let out = verdict(lead("", "jane@x.com", "Acme")).await;
        assert_eq!(out["leadValid"], json!(false));
        assert_eq!(out["validationMessage"], json!("Lead name is required"));
    }

    #[tokio::test]
    async fn test_empty_email_is_allowed() {
        let out = verdict(lead("Jane Doe", "", "Acme")).await;
        assert_eq!(out["leadValid"], json!(true));
    }

    #[test]
    fn test_email_pattern_edges() {
        assert!(email_is_valid("a.b+c@sub.domain.io"));
        assert!(!email_is_valid("a@b"));
        assert!(!email_is_valid("@domain.com"));
        assert!(!email_is_valid("spaces in@mail.com"));
    }
}
