//! Lead enrichment.
//!
//! Produces the enrichment payload downstream steps consume: an insight
//! summary with a fit score, a derived social profile, and firmographic
//! data. Enrichment providers are simulated in-process.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::handlers::string_field;
use crate::types::{HandlerResult, JobHandler, Variables};

pub struct EnrichLeadHandler;

impl EnrichLeadHandler {
    /// linkedin.com/in/jane-doe style slug from a display name.
    fn profile_slug(lead_name: &str) -> String {
        lead_name.to_lowercase().replace(' ', "-")
    }
}

#[async_trait]
impl JobHandler for EnrichLeadHandler {
    async fn execute(&self, variables: &Variables) -> HandlerResult {
        let lead_name = string_field(variables, "leadName");
        let company = string_field(variables, "company");

        info!(lead_name = lead_name, company = company, "Enriching lead");

        HandlerResult::from_value(json!({
            "enrichedData": {
                "insights": format!("Lead {lead_name} shows high potential in {company}"),
                "score": 85,
            },
            "linkedinData": {
                "profile": format!("linkedin.com/in/{}", Self::profile_slug(lead_name)),
                "connections": 500,
            },
            "companyData": {
                "name": company,
                "industry": "Technology",
                "size": "50-200 employees",
            },
        }))
    }
}
