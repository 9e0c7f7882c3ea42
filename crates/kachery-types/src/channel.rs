use serde::{Deserialize, Serialize};

/// The four capabilities a node can hold on a channel, each gating one
/// pubsub sub-channel (see `kachery-network`'s subscription table).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelCapability {
    RequestFiles,
    ProvideFiles,
    RequestFeeds,
    ProvideFeeds,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRoles {
    #[serde(default)]
    pub request_files: bool,
    #[serde(default)]
    pub provide_files: bool,
    #[serde(default)]
    pub request_feeds: bool,
    #[serde(default)]
    pub provide_feeds: bool,
}

impl ChannelRoles {
    fn get(&self, cap: ChannelCapability) -> bool {
        match cap {
            ChannelCapability::RequestFiles => self.request_files,
            ChannelCapability::ProvideFiles => self.provide_files,
            ChannelCapability::RequestFeeds => self.request_feeds,
            ChannelCapability::ProvideFeeds => self.provide_feeds,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAuthorization {
    pub permissions: ChannelRoles,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMembership {
    pub channel_name: String,
    pub channel_bucket_uri: String,
    pub roles: ChannelRoles,
    pub authorization: ChannelAuthorization,
}

impl ChannelMembership {
    /// An operation is enabled iff both the role and the matching permission
    /// are set; neither one alone is sufficient.
    pub fn is_enabled(&self, cap: ChannelCapability) -> bool {
        self.roles.get(cap) && self.authorization.permissions.get(cap)
    }

    pub fn pubsub_channel_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.channel_name, suffix)
    }
}
