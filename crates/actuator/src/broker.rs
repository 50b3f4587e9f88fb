//! Connection parameters that spawned agents use to reach the control-plane message broker.
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::common::error::configuration_error;

/// Immutable description of the broker connection, embedded into every submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConnection {
    uri: String,
    routing_key: String,
    /// Empty path means that no client certificate is used.
    cert_path: PathBuf,
    no_verify_peer: bool,
    no_verify_host: bool,
}

impl BrokerConnection {
    pub fn builder() -> BrokerConnectionBuilder {
        BrokerConnectionBuilder::default()
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn cert_path(&self) -> Option<&Path> {
        if self.cert_path.as_os_str().is_empty() {
            None
        } else {
            Some(&self.cert_path)
        }
    }

    pub fn no_verify_peer(&self) -> bool {
        self.no_verify_peer
    }

    pub fn no_verify_host(&self) -> bool {
        self.no_verify_host
    }

    /// Environment variables through which an agent receives the connection.
    pub fn environment(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![
            ("ACTUATOR_BROKER_URI", self.uri.clone()),
            ("ACTUATOR_ROUTING_KEY", self.routing_key.clone()),
        ];
        if let Some(cert) = self.cert_path() {
            env.push(("ACTUATOR_BROKER_CERT", cert.display().to_string()));
        }
        if self.no_verify_peer {
            env.push(("ACTUATOR_NO_VERIFY_PEER", "1".to_string()));
        }
        if self.no_verify_host {
            env.push(("ACTUATOR_NO_VERIFY_HOST", "1".to_string()));
        }
        env
    }
}

/// Builder of [`BrokerConnection`].
///
/// `uri` and `routing_key` are required. Every successful [`build`](Self::build) leaves the
/// builder empty, so it cannot leak fields into the next connection.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConnectionBuilder {
    uri: Option<String>,
    routing_key: Option<String>,
    cert_path: Option<PathBuf>,
    #[serde(default)]
    no_verify_peer: bool,
    #[serde(default)]
    no_verify_host: bool,
}

impl BrokerConnectionBuilder {
    pub fn uri<S: Into<String>>(&mut self, uri: S) -> &mut Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn routing_key<S: Into<String>>(&mut self, routing_key: S) -> &mut Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn cert_path<P: Into<PathBuf>>(&mut self, cert_path: P) -> &mut Self {
        self.cert_path = Some(cert_path.into());
        self
    }

    pub fn no_verify_peer(&mut self, value: bool) -> &mut Self {
        self.no_verify_peer = value;
        self
    }

    pub fn no_verify_host(&mut self, value: bool) -> &mut Self {
        self.no_verify_host = value;
        self
    }

    pub fn build(&mut self) -> crate::Result<BrokerConnection> {
        if self.uri.is_none() {
            return configuration_error("Broker URI was not set".to_string());
        }
        if self.routing_key.is_none() {
            return configuration_error("Broker routing key was not set".to_string());
        }
        let BrokerConnectionBuilder {
            uri,
            routing_key,
            cert_path,
            no_verify_peer,
            no_verify_host,
        } = std::mem::take(self);
        Ok(BrokerConnection {
            uri: uri.unwrap_or_default(),
            routing_key: routing_key.unwrap_or_default(),
            cert_path: cert_path.unwrap_or_default(),
            no_verify_peer,
            no_verify_host,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::BrokerConnection;
    use crate::common::error::ActuatorError;
    use std::path::Path;

    #[test]
    fn build_full() {
        let broker = BrokerConnection::builder()
            .uri("amqps://broker:5671/vhost")
            .routing_key("agents")
            .cert_path("/etc/certs/client.pem")
            .no_verify_peer(true)
            .build()
            .unwrap();
        assert_eq!(broker.uri(), "amqps://broker:5671/vhost");
        assert_eq!(broker.routing_key(), "agents");
        assert_eq!(broker.cert_path(), Some(Path::new("/etc/certs/client.pem")));
        assert!(broker.no_verify_peer());
        assert!(!broker.no_verify_host());
    }

    #[test]
    fn cert_defaults_to_none() {
        let broker = BrokerConnection::builder()
            .uri("amqp://localhost")
            .routing_key("agents")
            .build()
            .unwrap();
        assert_eq!(broker.cert_path(), None);
        assert_eq!(
            broker.environment(),
            vec![
                ("ACTUATOR_BROKER_URI", "amqp://localhost".to_string()),
                ("ACTUATOR_ROUTING_KEY", "agents".to_string()),
            ]
        );
    }

    #[test]
    fn missing_uri() {
        let result = BrokerConnection::builder().routing_key("agents").build();
        assert!(matches!(result, Err(ActuatorError::Configuration(_))));
    }

    #[test]
    fn missing_routing_key() {
        let result = BrokerConnection::builder().uri("amqp://localhost").build();
        assert!(matches!(result, Err(ActuatorError::Configuration(_))));
    }

    #[test]
    fn builder_is_cleared_after_build() {
        let mut builder = BrokerConnection::builder();
        builder
            .uri("amqp://localhost")
            .routing_key("agents")
            .no_verify_host(true);
        let first = builder.build().unwrap();
        assert!(first.no_verify_host());
        assert!(matches!(
            builder.build(),
            Err(ActuatorError::Configuration(_))
        ));

        let second = builder
            .uri("amqp://other")
            .routing_key("agents")
            .build()
            .unwrap();
        assert!(!second.no_verify_host());
    }

    #[test]
    fn failed_build_keeps_fields() {
        let mut builder = BrokerConnection::builder();
        builder.routing_key("agents");
        assert!(builder.build().is_err());
        let broker = builder.uri("amqp://localhost").build().unwrap();
        assert_eq!(broker.routing_key(), "agents");
    }

    #[test]
    fn environment_flags() {
        let broker = BrokerConnection::builder()
            .uri("amqp://localhost")
            .routing_key("agents")
            .cert_path("/cert.pem")
            .no_verify_peer(true)
            .no_verify_host(true)
            .build()
            .unwrap();
        let env = broker.environment();
        assert!(env.contains(&("ACTUATOR_BROKER_CERT", "/cert.pem".to_string())));
        assert!(env.contains(&("ACTUATOR_NO_VERIFY_PEER", "1".to_string())));
        assert!(env.contains(&("ACTUATOR_NO_VERIFY_HOST", "1".to_string())));
    }
}
