use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkStat {
    pub size: u64,
    /// Milliseconds since the epoch, matching the precision `linkLocalFile`'s
    /// 2ms tolerance check operates at.
    pub mtime: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkFile {
    pub path: String,
    #[serde(rename = "manifestSha1", default)]
    pub manifest_sha1: Option<String>,
    pub stat: LinkStat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let link = LinkFile {
            path: "/data/file.bin".into(),
            manifest_sha1: None,
            stat: LinkStat { size: 6, mtime: 1_700_000_000_000 },
        };
        let json = serde_json::to_string(&link).unwrap();
        let back: LinkFile = serde_json::from_str(&json).unwrap();
        assert_eq!(link, back);
    }
}
