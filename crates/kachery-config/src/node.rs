use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use kachery_types::ChannelMembership;

use crate::config_trait::Config;

fn default_metrics_address() -> SocketAddr {
    "127.0.0.1:9184".parse().unwrap()
}

/// Everything a daemon process needs to start: where content lives on disk,
/// which channels it has joined and under what roles, the keypair that signs
/// pubsub envelopes and subfeed messages, and where to expose metrics.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeConfig {
    pub storage_dir: PathBuf,

    #[serde(default)]
    pub channels: Vec<ChannelMembership>,

    pub node_keypair_path: PathBuf,

    #[serde(default = "default_metrics_address")]
    pub metrics_address: SocketAddr,
}

impl Config for NodeConfig {}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use kachery_types::{ChannelAuthorization, ChannelRoles};

    use super::*;

    fn sample() -> NodeConfig {
        NodeConfig {
            storage_dir: PathBuf::from("/var/lib/kachery"),
            channels: vec![ChannelMembership {
                channel_name: "public".into(),
                channel_bucket_uri: "gs://kachery-public/v1".into(),
                roles: ChannelRoles {
                    request_files: true,
                    ..Default::default()
                },
                authorization: ChannelAuthorization {
                    permissions: ChannelRoles {
                        request_files: true,
                        ..Default::default()
                    },
                },
            }],
            node_keypair_path: PathBuf::from("/var/lib/kachery/node.key"),
            metrics_address: default_metrics_address(),
        }
    }

    #[test]
    fn round_trips_through_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let config = sample();
        config.save(&path).unwrap();
        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded.storage_dir, config.storage_dir);
        assert_eq!(loaded.channels.len(), 1);
        assert_eq!(loaded.metrics_address, config.metrics_address);
    }

    #[test]
    fn metrics_address_defaults_when_absent() {
        let yaml = "storage-dir: /data\nnode-keypair-path: /data/node.key\n";
        let loaded: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(loaded.metrics_address, default_metrics_address());
        assert!(loaded.channels.is_empty());
    }
}
