//! GraphQL over HTTP POST.
//!
//! Uses the same authentication policy as `ApiClient`. A GraphQL error
//! whose `extensions.code` is `UNAUTHENTICATED` is treated exactly like
//! an HTTP 401.

use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ApiError, RequestAuthenticator};
use crate::config::Config;

/// Error code servers use for a missing or rejected session
pub const UNAUTHENTICATED_CODE: &str = "UNAUTHENTICATED";

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<&'a Value>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlErrorEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlErrorEntry {
    pub message: String,
    #[serde(default)]
    pub extensions: Option<ErrorExtensions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorExtensions {
    pub code: Option<String>,
}

impl GraphQlErrorEntry {
    fn is_unauthenticated(&self) -> bool {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.code.as_deref())
            == Some(UNAUTHENTICATED_CODE)
    }
}

#[derive(Clone)]
pub struct GraphQlClient {
    client: Client,
    endpoint: String,
    auth: RequestAuthenticator,
}

impl GraphQlClient {
    pub fn new(config: &Config, auth: RequestAuthenticator) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            client,
            endpoint: config.graphql_url.clone(),
            auth,
        })
    }

    pub async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Option<&Value>,
    ) -> Result<T, ApiError> {
        let data = self.execute(query, variables).await?;
        Self::parse_data(data)
    }

    pub async fn mutate<T: DeserializeOwned>(
        &self,
        mutation: &str,
        variables: Option<&Value>,
    ) -> Result<T, ApiError> {
        debug!("Sending GraphQL mutation");
        let data = self.execute(mutation, variables).await?;
        Self::parse_data(data)
    }

    fn parse_data<T: DeserializeOwned>(data: Value) -> Result<T, ApiError> {
        serde_json::from_value(data)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse GraphQL data: {}", e)))
    }

    /// Run an operation and return its raw `data` object
    pub async fn execute(&self, query: &str, variables: Option<&Value>) -> Result<Value, ApiError> {
        let headers = self.auth.before_send().await;
        let response = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(&GraphQlRequest { query, variables })
            .send()
            .await?;

        let response = self.auth.check_response(response).await?;
        let body: GraphQlResponse = response.json().await.map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse GraphQL response: {}", e))
        })?;

        if body.errors.iter().any(GraphQlErrorEntry::is_unauthenticated) {
            self.auth.on_unauthorized();
            return Err(ApiError::Unauthorized);
        }

        if !body.errors.is_empty() {
            let messages: Vec<&str> = body.errors.iter().map(|e| e.message.as_str()).collect();
            warn!(count = messages.len(), "GraphQL operation returned errors");
            return Err(ApiError::GraphQl(messages.join("; ")));
        }

        body.data
            .filter(|d| !d.is_null())
            .ok_or_else(|| ApiError::InvalidResponse("GraphQL response carried no data".to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthenticated_detection() {
        let body: GraphQlResponse = serde_json::from_str(
            r#"{"data":null,"errors":[{"message":"no","extensions":{"code":"UNAUTHENTICATED"}}]}"#,
        )
        .unwrap();
        assert!(body.errors[0].is_unauthenticated());

        let body: GraphQlResponse =
            serde_json::from_str(r#"{"errors":[{"message":"bad field"}]}"#).unwrap();
        assert!(!body.errors[0].is_unauthenticated());
        assert!(body.data.is_none());
    }

    #[test]
    fn test_request_omits_missing_variables() {
        let json = serde_json::to_value(GraphQlRequest {
            query: "{ me { id } }",
            variables: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"query": "{ me { id } }"}));
    }
}
