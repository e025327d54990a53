// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Agent Trust Authors
use crate::{
    agent_identifier::AgentIdentifier,
    https_client::{self, TlsClientArgs},
    identity_material::{IdentityMaterial, IdentityMaterialError},
};
use async_trait::async_trait;
use log::*;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Number;
use thiserror::Error;

pub const REGISTRATION_PATH: &str = "admin/agent";
pub const DEFAULT_REGISTRATION_TIMEOUT: u64 = 30000;

#[derive(Error, Debug)]
pub enum RegistrationError {
    /// Server URL not set on the builder
    #[error("Registration server URL not set")]
    ServerUrlNotSet,

    /// Agent identifier not set on the builder
    #[error("Agent identifier not set")]
    AgentIdentifierNotSet,

    /// HTTPS client creation error
    #[error("HTTPS client creation error: {0}")]
    HttpsClient(#[from] anyhow::Error),

    /// Network error, timeout or unreadable response body
    #[error("Registration request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server explicitly refused to register the agent
    #[error("Registration rejected by server: {message}")]
    Rejected { message: String },

    /// The server answered with an unexpected status code
    #[error("Failed to register agent: received {code} from {addr}")]
    Status { addr: String, code: u16 },

    /// The server answered without an identity
    #[error("Server returned no identity for agent {uuid}")]
    NoIdentity { uuid: String },

    /// The server answered with an identity that cannot be used
    #[error("Server returned an unusable identity")]
    Malformed(#[from] IdentityMaterialError),
}

/// Optional properties an agent sends to be registered without manual approval
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationProperties {
    pub key: Option<String>,
    pub resources: Option<String>,
    pub environments: Option<String>,
    pub hostname: Option<String>,
    pub elastic_agent_id: Option<String>,
    pub elastic_plugin_id: Option<String>,
}

/// Performs the round trip exchanging the agent details for a fresh identity
///
/// Implementations do not retry; a failed attempt is reported to the caller.
#[async_trait]
pub trait RegistrationRequester: Send + Sync {
    async fn request(
        &self,
        host_name: &str,
        properties: &RegistrationProperties,
    ) -> Result<IdentityMaterial, RegistrationError>;
}

#[derive(Debug, Serialize)]
struct Register<'a> {
    hostname: &'a str,
    uuid: &'a str,
    location: &'a str,
    operating_system: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_auto_register_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_auto_register_resources: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_auto_register_environments: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_auto_register_hostname: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    elastic_agent_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    elastic_plugin_id: Option<&'a str>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegisterResponseResults {
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    certificate_chain: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response<T> {
    code: Number,
    status: String,
    results: T,
}

#[derive(Debug, Default)]
pub struct RemoteRegistrationRequesterBuilder {
    server_url: Option<String>,
    agent_identifier: Option<AgentIdentifier>,
    working_dir: Option<String>,
    ca_certificate: Option<String>,
    insecure: Option<bool>,
    timeout: Option<u64>,
}

impl RemoteRegistrationRequesterBuilder {
    /// Create a new RemoteRegistrationRequesterBuilder object
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL of the coordinating server
    ///
    /// # Arguments:
    ///
    /// * url (String): The server URL, e.g. https://server:8154/go
    pub fn server_url(mut self, url: String) -> Self {
        self.server_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    /// Set the identifier sent with every registration request
    ///
    /// # Arguments:
    ///
    /// * id (AgentIdentifier): The persisted agent identifier
    pub fn agent_identifier(mut self, id: AgentIdentifier) -> Self {
        self.agent_identifier = Some(id);
        self
    }

    /// Set the agent working directory reported to the server
    ///
    /// # Arguments:
    ///
    /// * dir (String): The working directory path
    pub fn working_dir(mut self, dir: String) -> Self {
        self.working_dir = Some(dir);
        self
    }

    /// Set the CA certificate file path used to verify the server
    ///
    /// # Arguments:
    ///
    /// * ca_certificate (String): Path to the CA certificate file
    pub fn ca_certificate(mut self, ca_certificate: String) -> Self {
        self.ca_certificate = Some(ca_certificate);
        self
    }

    /// Set the insecure flag to disable server certificate validation
    ///
    /// # Arguments:
    ///
    /// * insecure (bool): If true, disable certificate validation
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = Some(insecure);
        self
    }

    /// Set the request timeout in milliseconds
    ///
    /// # Arguments:
    ///
    /// * timeout (u64): Request timeout in milliseconds
    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Generate the RemoteRegistrationRequester using the previously set options
    pub fn build(self) -> Result<RemoteRegistrationRequester, RegistrationError> {
        let Some(server_url) = self.server_url else {
            return Err(RegistrationError::ServerUrlNotSet);
        };

        let Some(agent_identifier) = self.agent_identifier else {
            return Err(RegistrationError::AgentIdentifierNotSet);
        };

        let client = https_client::get_tls_client(&TlsClientArgs {
            ca_certificate: self.ca_certificate,
            insecure: self.insecure,
            timeout: self.timeout.unwrap_or(DEFAULT_REGISTRATION_TIMEOUT),
        })?;

        Ok(RemoteRegistrationRequester {
            server_url,
            agent_identifier,
            working_dir: self.working_dir.unwrap_or_default(),
            client,
        })
    }
}

/// Requests the agent identity from the coordinating server over HTTP(S)
#[derive(Debug, Clone)]
pub struct RemoteRegistrationRequester {
    server_url: String,
    agent_identifier: AgentIdentifier,
    working_dir: String,
    client: reqwest::Client,
}

impl RemoteRegistrationRequester {
    pub fn agent_identifier(&self) -> &AgentIdentifier {
        &self.agent_identifier
    }
}

#[async_trait]
impl RegistrationRequester for RemoteRegistrationRequester {
    async fn request(
        &self,
        host_name: &str,
        properties: &RegistrationProperties,
    ) -> Result<IdentityMaterial, RegistrationError> {
        let uuid = self.agent_identifier.as_str();
        let data = Register {
            hostname: host_name,
            uuid,
            location: &self.working_dir,
            operating_system: std::env::consts::OS,
            agent_auto_register_key: properties.key.as_deref(),
            agent_auto_register_resources: properties.resources.as_deref(),
            agent_auto_register_environments: properties
                .environments
                .as_deref(),
            agent_auto_register_hostname: properties.hostname.as_deref(),
            elastic_agent_id: properties.elastic_agent_id.as_deref(),
            elastic_plugin_id: properties.elastic_plugin_id.as_deref(),
        };

        let addr = format!("{}/{REGISTRATION_PATH}", self.server_url);

        info!("Requesting agent registration from {addr} for {uuid}");

        let resp = self.client.post(&addr).json(&data).send().await?;

        if !resp.status().is_success() {
            // A 403 Forbidden is the server refusing this agent
            if resp.status() == StatusCode::FORBIDDEN {
                let message = resp
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(RegistrationError::Rejected { message });
            }
            return Err(RegistrationError::Status {
                addr,
                code: resp.status().as_u16(),
            });
        }

        let resp: Response<RegisterResponseResults> = resp.json().await?;

        let (Some(key), Some(chain)) =
            (resp.results.private_key, resp.results.certificate_chain)
        else {
            return Err(RegistrationError::NoIdentity {
                uuid: uuid.to_string(),
            });
        };
        if key.trim().is_empty() || chain.trim().is_empty() {
            return Err(RegistrationError::NoIdentity {
                uuid: uuid.to_string(),
            });
        }

        let material =
            IdentityMaterial::from_pem(key.as_bytes(), chain.as_bytes())?;
        material.check_key_matches_leaf()?;

        info!("SUCCESS: Agent {uuid} received identity from {addr}");
        Ok(material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::testing::generate_identity;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn requester(uri: &str, uuid: &str) -> RemoteRegistrationRequester {
        RemoteRegistrationRequesterBuilder::new()
            .server_url(format!("{uri}/go/"))
            .agent_identifier(AgentIdentifier::new(uuid))
            .working_dir("/var/lib/agent".to_string())
            .timeout(2000)
            .build()
            .unwrap() //#[allow_ci]
    }

    fn ok_response(key: &str, chain: &str) -> serde_json::Value {
        json!({
            "code": 200,
            "status": "OK",
            "results": {
                "private_key": key,
                "certificate_chain": chain,
            }
        })
    }

    #[tokio::test]
    async fn test_request_ok() {
        let id = generate_identity("agent-host").unwrap(); //#[allow_ci]
        let key = String::from_utf8(id.key_pem.clone()).unwrap(); //#[allow_ci]
        let chain = String::from_utf8(id.chain_pem.clone()).unwrap(); //#[allow_ci]

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/go/admin/agent"))
            .and(body_partial_json(json!({
                "hostname": "agent-host",
                "uuid": "uuid-1234",
                "location": "/var/lib/agent",
                "agent_auto_register_key": "secret",
                "agent_auto_register_resources": "linux,docker",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(ok_response(&key, &chain)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let properties = RegistrationProperties {
            key: Some("secret".to_string()),
            resources: Some("linux,docker".to_string()),
            ..Default::default()
        };

        let material = requester(&mock_server.uri(), "uuid-1234")
            .request("agent-host", &properties)
            .await
            .unwrap(); //#[allow_ci]

        assert_eq!(material.chain_pem(), id.chain_pem);
        assert_eq!(material.subject().unwrap(), "agent-host"); //#[allow_ci]
    }

    #[tokio::test]
    async fn test_unset_properties_not_sent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/go/admin/agent"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let _ = requester(&mock_server.uri(), "uuid-1234")
            .request("agent-host", &RegistrationProperties::default())
            .await;

        let received = mock_server.received_requests().await.unwrap(); //#[allow_ci]
        assert_eq!(received.len(), 1);
        let body: serde_json::Value = received[0].body_json().unwrap(); //#[allow_ci]
        assert_eq!(body["uuid"], "uuid-1234");
        assert_eq!(body["operating_system"], std::env::consts::OS);
        assert!(body.get("agent_auto_register_key").is_none());
    }

    #[tokio::test]
    async fn test_request_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/go/admin/agent"))
            .respond_with(
                ResponseTemplate::new(403).set_body_string("agent is disabled"),
            )
            .mount(&mock_server)
            .await;

        let r = requester(&mock_server.uri(), "uuid-1234")
            .request("agent-host", &RegistrationProperties::default())
            .await;

        assert!(matches!(
            r,
            Err(RegistrationError::Rejected { message }) if message == "agent is disabled"
        ));
    }

    #[tokio::test]
    async fn test_request_unexpected_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/go/admin/agent"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let r = requester(&mock_server.uri(), "uuid-1234")
            .request("agent-host", &RegistrationProperties::default())
            .await;

        assert!(matches!(
            r,
            Err(RegistrationError::Status { code: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_request_without_identity() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/go/admin/agent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200,
                "status": "OK",
                "results": {}
            })))
            .mount(&mock_server)
            .await;

        let r = requester(&mock_server.uri(), "uuid-1234")
            .request("agent-host", &RegistrationProperties::default())
            .await;

        assert!(matches!(
            r,
            Err(RegistrationError::NoIdentity { uuid }) if uuid == "uuid-1234"
        ));
    }

    #[tokio::test]
    async fn test_request_malformed_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/go/admin/agent"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&mock_server)
            .await;

        let r = requester(&mock_server.uri(), "uuid-1234")
            .request("agent-host", &RegistrationProperties::default())
            .await;

        assert!(matches!(r, Err(RegistrationError::Request(_))));
    }

    #[tokio::test]
    async fn test_request_mismatched_identity() {
        let first = generate_identity("agent-host").unwrap(); //#[allow_ci]
        let second = generate_identity("other").unwrap(); //#[allow_ci]
        let key = String::from_utf8(second.key_pem).unwrap(); //#[allow_ci]
        let chain = String::from_utf8(first.chain_pem).unwrap(); //#[allow_ci]

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/go/admin/agent"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(ok_response(&key, &chain)),
            )
            .mount(&mock_server)
            .await;

        let r = requester(&mock_server.uri(), "uuid-1234")
            .request("agent-host", &RegistrationProperties::default())
            .await;

        assert!(matches!(
            r,
            Err(RegistrationError::Malformed(
                IdentityMaterialError::KeyMismatch { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/go/admin/agent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(std::time::Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let r = requester(&mock_server.uri(), "uuid-1234")
            .request("agent-host", &RegistrationProperties::default())
            .await;

        assert!(matches!(r, Err(RegistrationError::Request(e)) if e.is_timeout()));
    }

    #[test]
    fn test_builder_missing_options() {
        let r = RemoteRegistrationRequesterBuilder::new()
            .agent_identifier(AgentIdentifier::new("uuid"))
            .build();
        assert!(matches!(r, Err(RegistrationError::ServerUrlNotSet)));

        let r = RemoteRegistrationRequesterBuilder::new()
            .server_url("http://localhost:8153/go".to_string())
            .build();
        assert!(matches!(r, Err(RegistrationError::AgentIdentifierNotSet)));
    }
}
