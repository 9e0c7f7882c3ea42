use serde::{Deserialize, Serialize};

use crate::file_key::FileKey;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadFileStatusKind {
    Pending,
    Started,
    Finished,
}

/// Body carried by a signed pubsub message. Tagged so a malformed or
/// forward-incompatible payload is rejected at the parse boundary rather than
/// handled with ad hoc field sniffing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PubsubMessageBody {
    RequestFile {
        #[serde(rename = "fileKey")]
        file_key: FileKey,
    },
    UploadFileStatus {
        #[serde(rename = "fileKey")]
        file_key: FileKey,
        status: UploadFileStatusKind,
    },
    RequestSubfeed {
        #[serde(rename = "feedId")]
        feed_id: String,
        #[serde(rename = "subfeedHash")]
        subfeed_hash: String,
        position: u64,
    },
    SubfeedMessageCountUpdate {
        #[serde(rename = "feedId")]
        feed_id: String,
        #[serde(rename = "subfeedHash")]
        subfeed_hash: String,
        #[serde(rename = "messageCount")]
        message_count: u64,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PubsubEnvelope {
    pub body: PubsubMessageBody,
    pub from_node_id: String,
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let body = PubsubMessageBody::RequestFile {
            file_key: FileKey::from_sha1("a".repeat(40)),
        };
        let json = serde_json::to_string(&body).unwrap();
        let back: PubsubMessageBody = serde_json::from_str(&json).unwrap();
        assert_eq!(body, back);
    }
}
