use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::info;

use crate::error::{Error, Result};

const CHANNEL_SCHEME: &str = "persistent://";

/// Fully qualified channel name for a topic.
pub fn channel_name(tenant: &str, namespace: &str, topic: &str) -> String {
    format!("{CHANNEL_SCHEME}{tenant}/{namespace}/{topic}")
}

/// Split a fully qualified channel name into `(tenant, namespace, topic)`.
///
/// The topic is everything after the namespace, so it may itself contain
/// slashes.
pub fn parse_channel_name(channel: &str) -> Result<(String, String, String)> {
    let invalid = || Error::config(format!("invalid channel name: {channel}"));
    let rest = channel.strip_prefix(CHANNEL_SCHEME).ok_or_else(invalid)?;
    let mut parts = rest.splitn(3, '/');
    let tenant = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
    let namespace = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
    let topic = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
    Ok((tenant.to_string(), namespace.to_string(), topic.to_string()))
}

/// Admin access to the messaging backend.
///
/// Only used at startup, to create the fixed channel set of the simple
/// assignment policy.
#[async_trait]
pub trait ChannelProvisioner: Send + Sync {
    /// Create every topic under `tenant/namespace`. Topics that already exist
    /// count as created.
    async fn create_channels(&self, tenant: &str, namespace: &str, topics: &[String])
        -> Result<()>;
}

/// Provisions persistent topics through the Pulsar admin REST API.
pub struct PulsarAdminProvisioner {
    admin_url: String,
    client: Client,
}

impl PulsarAdminProvisioner {
    pub fn new(admin_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Provisioning(format!("failed to build admin client: {e}")))?;
        Ok(Self {
            admin_url: admin_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn topic_url(&self, tenant: &str, namespace: &str, topic: &str) -> String {
        format!(
            "{}/admin/v2/persistent/{tenant}/{namespace}/{topic}",
            self.admin_url
        )
    }

    async fn create_topic(&self, tenant: &str, namespace: &str, topic: &str) -> Result<()> {
        let url = self.topic_url(tenant, namespace, topic);
        let response = self
            .client
            .put(&url)
            .send()
            .await
            .map_err(|e| Error::Provisioning(format!("failed to create topic {topic}: {e}")))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::Provisioning(format!(
            "failed to create topic {topic}: {status} {body}"
        )))
    }
}

#[async_trait]
impl ChannelProvisioner for PulsarAdminProvisioner {
    async fn create_channels(
        &self,
        tenant: &str,
        namespace: &str,
        topics: &[String],
    ) -> Result<()> {
        for topic in topics {
            self.create_topic(tenant, namespace, topic).await?;
        }
        info!(
            tenant,
            namespace,
            count = topics.len(),
            "provisioned channels"
        );
        Ok(())
    }
}

/// Provisioner for deployments where channels are created out of band.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProvisioner;

#[async_trait]
impl ChannelProvisioner for NoopProvisioner {
    async fn create_channels(
        &self,
        tenant: &str,
        namespace: &str,
        topics: &[String],
    ) -> Result<()> {
        info!(
            tenant,
            namespace,
            count = topics.len(),
            "skipping channel provisioning"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use httpmock::{Method, MockServer};

    use super::*;

    fn topics(n: u32) -> Vec<String> {
        (0..n).map(|i| format!("shard_log_{i}")).collect()
    }

    #[test]
    fn channel_name_format() {
        assert_eq!(
            channel_name("default", "ns", "collection-1"),
            "persistent://default/ns/collection-1"
        );
    }

    #[test]
    fn parse_channel_name_splits_parts() {
        let (tenant, namespace, topic) =
            parse_channel_name("persistent://default/ns/collection-1").unwrap();
        assert_eq!(tenant, "default");
        assert_eq!(namespace, "ns");
        assert_eq!(topic, "collection-1");
    }

    #[test]
    fn parse_channel_name_keeps_slashes_in_topic() {
        let (_, _, topic) = parse_channel_name("persistent://t/ns/a/b").unwrap();
        assert_eq!(topic, "a/b");
    }

    #[test]
    fn parse_channel_name_rejects_malformed() {
        for bad in [
            "pulsar://t/ns/topic",
            "persistent://t/ns",
            "persistent://t//topic",
            "persistent:///ns/topic",
            "persistent://t/ns/",
            "",
        ] {
            assert!(parse_channel_name(bad).is_err(), "should reject: {bad:?}");
        }
    }

    #[tokio::test]
    async fn creates_every_topic() {
        let server = MockServer::start();
        let create = server.mock(|when, then| {
            when.method(Method::PUT)
                .path_contains("/admin/v2/persistent/default/ns/shard_log_");
            then.status(204);
        });

        let provisioner =
            PulsarAdminProvisioner::new(server.base_url(), Duration::from_secs(5)).unwrap();
        provisioner
            .create_channels("default", "ns", &topics(4))
            .await
            .unwrap();

        assert_eq!(create.hits(), 4);
    }

    #[tokio::test]
    async fn existing_topic_is_not_an_error() {
        let server = MockServer::start();
        let conflict = server.mock(|when, then| {
            when.method(Method::PUT)
                .path("/admin/v2/persistent/default/ns/shard_log_0");
            then.status(409).body("This topic already exists");
        });

        let provisioner =
            PulsarAdminProvisioner::new(format!("{}/", server.base_url()), Duration::from_secs(5))
                .unwrap();
        provisioner
            .create_channels("default", "ns", &topics(1))
            .await
            .unwrap();

        assert_eq!(conflict.hits(), 1);
    }

    #[tokio::test]
    async fn server_error_fails_provisioning() {
        let server = MockServer::start();
        let _unavailable = server.mock(|when, then| {
            when.method(Method::PUT);
            then.status(500).body("broker unavailable");
        });

        let provisioner =
            PulsarAdminProvisioner::new(server.base_url(), Duration::from_secs(5)).unwrap();
        let err = provisioner
            .create_channels("default", "ns", &topics(2))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Provisioning(_)));
        assert!(err.to_string().contains("broker unavailable"));
    }
}
