//! Lead persistence.
//!
//! Records the enriched lead and stamps when it was stored. Persistence is
//! simulated; the payload shape matches what the workflow expects from a
//! real store.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::types::{HandlerResult, JobHandler, Variables};

pub struct StoreLeadHandler;

#[async_trait]
impl JobHandler for StoreLeadHandler {
    async fn execute(&self, variables: &Variables) -> HandlerResult {
        let has_enrichment = variables.contains_key("enrichedData");
        info!(has_enrichment = has_enrichment, "Storing enriched lead data");

        HandlerResult::from_value(json!({
            "storageSuccess": true,
            "storedAt": Utc::now().to_rfc3339(),
        }))
    }
}
