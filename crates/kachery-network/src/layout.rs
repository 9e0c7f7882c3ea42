fn prefix_parts(hex: &str) -> (&str, &str, &str) {
    let a = hex.get(0..2).unwrap_or("00");
    let b = hex.get(2..4).unwrap_or("00");
    let c = hex.get(4..6).unwrap_or("00");
    (a, b, c)
}

/// `sha1/<aa>/<bb>/<cc>/<sha1>`, the bucket-side mirror of the CAS's own
/// fan-out.
pub fn file_object_path(sha1: &str) -> String {
    let (a, b, c) = prefix_parts(sha1);
    format!("sha1/{a}/{b}/{c}/{sha1}")
}

fn subfeed_object_dir(feed_id: &str, subfeed_hash: &str) -> String {
    let (fa, fb, fc) = prefix_parts(feed_id);
    let (sa, sb, sc) = prefix_parts(subfeed_hash);
    format!("feeds/{fa}/{fb}/{fc}/{feed_id}/subfeeds/{sa}/{sb}/{sc}/{subfeed_hash}")
}

pub fn subfeed_json_path(feed_id: &str, subfeed_hash: &str) -> String {
    format!("{}/subfeed.json", subfeed_object_dir(feed_id, subfeed_hash))
}

pub fn subfeed_message_path(feed_id: &str, subfeed_hash: &str, index: u64) -> String {
    format!("{}/{index}", subfeed_object_dir(feed_id, subfeed_hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_path_fans_out_by_hex_prefix() {
        assert_eq!(file_object_path("abcdef01"), "sha1/ab/cd/ef/abcdef01");
    }

    #[test]
    fn subfeed_paths_fan_out_by_both_ids() {
        assert_eq!(
            subfeed_json_path("abcdef01", "112233aa"),
            "feeds/ab/cd/ef/abcdef01/subfeeds/11/22/33/112233aa/subfeed.json"
        );
        assert_eq!(
            subfeed_message_path("abcdef01", "112233aa", 7),
            "feeds/ab/cd/ef/abcdef01/subfeeds/11/22/33/112233aa/7"
        );
    }
}
