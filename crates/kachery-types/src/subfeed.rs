use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubfeedMessageBody {
    pub message: Value,
    pub message_number: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub previous_signature: Option<String>,
    pub timestamp: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SignedSubfeedMessage {
    pub body: SubfeedMessageBody,
    pub signature: String,
}
