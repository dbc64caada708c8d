//! Pipeline success notification.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::handlers::string_field;
use crate::types::{HandlerResult, JobHandler, Variables};

pub struct NotifySuccessHandler;

#[async_trait]
impl JobHandler for NotifySuccessHandler {
    async fn execute(&self, variables: &Variables) -> HandlerResult {
        let lead_name = string_field(variables, "leadName");
        info!(lead_name = lead_name, "Sending success notification");

        HandlerResult::from_value(json!({ "notificationSent": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notification_marked_sent() {
        let mut variables = Variables::new();
        variables.insert("leadName".to_string(), json!("Jane Doe"));

        let out = match NotifySuccessHandler.execute(&variables).await {
            HandlerResult::Success(out) => out,
            other => panic!("expected success, got {other:?}"),
        };
        assert_eq!(out["notificationSent"], json!(true));
    }
}
