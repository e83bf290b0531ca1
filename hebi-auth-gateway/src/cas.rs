//! Ticket validation against the enterprise SSO (CAS) server.
//!
//! The SSO server itself is an external collaborator: the gateway only knows
//! how to exchange a one-shot ticket for an authenticated identity via the
//! `/serviceValidate` endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

/// What the SSO server said about a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketOutcome {
    Validated { user: String },
    Rejected { code: String, description: String },
    /// The response was not parseable or matched neither known case.
    Unintelligible,
}

#[async_trait]
pub trait CasValidator: Send + Sync {
    async fn validate(&self, ticket: &str) -> anyhow::Result<TicketOutcome>;
}

#[derive(Deserialize)]
struct CasEnvelope {
    #[serde(rename = "serviceResponse")]
    service_response: CasServiceResponse,
}

#[derive(Deserialize)]
struct CasServiceResponse {
    #[serde(rename = "authenticationSuccess")]
    success: Option<CasSuccess>,
    #[serde(rename = "authenticationFailure")]
    failure: Option<CasFailure>,
}

#[derive(Deserialize)]
struct CasSuccess {
    user: String,
}

#[derive(Deserialize)]
struct CasFailure {
    code: String,
    description: String,
}

fn parse_response(body: &str) -> TicketOutcome {
    let Ok(envelope) = serde_json::from_str::<CasEnvelope>(body) else {
        return TicketOutcome::Unintelligible;
    };

    if let Some(success) = envelope.service_response.success {
        TicketOutcome::Validated { user: success.user }
    } else if let Some(failure) = envelope.service_response.failure {
        TicketOutcome::Rejected {
            code: failure.code,
            description: failure.description,
        }
    } else {
        TicketOutcome::Unintelligible
    }
}

pub struct HttpCasValidator {
    client: reqwest::Client,
    validate_url: Url,
    service_url: Url,
}

impl HttpCasValidator {
    pub fn new(cas_server: &Url, service_url: Url) -> anyhow::Result<Self> {
        let validate_url = format!("{}/serviceValidate", cas_server.as_str().trim_end_matches('/'))
            .parse()
            .map_err(|error| anyhow::anyhow!("invalid serviceValidate URL: {error}"))?;

        Ok(Self {
            client: reqwest::Client::new(),
            validate_url,
            service_url,
        })
    }
}

#[async_trait]
impl CasValidator for HttpCasValidator {
    async fn validate(&self, ticket: &str) -> anyhow::Result<TicketOutcome> {
        let response = self
            .client
            .get(self.validate_url.clone())
            .query(&[
                ("format", "json"),
                ("ticket", ticket),
                ("service", self.service_url.as_str()),
            ])
            .send()
            .await?;

        let body = response.text().await?;

        Ok(parse_response(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response_yields_the_user() {
        let outcome = parse_response(
            r#"{"serviceResponse":{"authenticationSuccess":{"user":"abc12345","attributes":{}}}}"#,
        );
        assert_eq!(
            outcome,
            TicketOutcome::Validated {
                user: "abc12345".to_owned()
            }
        );
    }

    #[test]
    fn failure_response_yields_code_and_description() {
        let outcome = parse_response(
            r#"{"serviceResponse":{"authenticationFailure":{"code":"INVALID_TICKET","description":"Ticket 'ST-xyz' not recognized"}}}"#,
        );
        assert_eq!(
            outcome,
            TicketOutcome::Rejected {
                code: "INVALID_TICKET".to_owned(),
                description: "Ticket 'ST-xyz' not recognized".to_owned(),
            }
        );
    }

    #[test]
    fn anything_else_is_unintelligible() {
        assert_eq!(parse_response("<html>oops</html>"), TicketOutcome::Unintelligible);
        assert_eq!(parse_response(r#"{"serviceResponse":{}}"#), TicketOutcome::Unintelligible);
    }
}
