use std::path::{Path, PathBuf};

fn prefix_parts(hex: &str) -> (&str, &str, &str) {
    let a = hex.get(0..2).unwrap_or("00");
    let b = hex.get(2..4).unwrap_or("00");
    let c = hex.get(4..6).unwrap_or("00");
    (a, b, c)
}

/// Mirrors the bucket subfeed tree (`feeds/<aa>/<bb>/<cc>/<feedId>/subfeeds/<aa>/<bb>/<cc>/<subfeedHash>/…`)
/// locally, but collapses the per-message bucket files into a single
/// append-only log, since there is no object-store listing to replicate on
/// disk.
pub fn subfeed_dir(storage_dir: &Path, feed_id: &str, subfeed_hash: &str) -> PathBuf {
    let (fa, fb, fc) = prefix_parts(feed_id);
    let (sa, sb, sc) = prefix_parts(subfeed_hash);
    storage_dir
        .join("feeds")
        .join(fa)
        .join(fb)
        .join(fc)
        .join(feed_id)
        .join("subfeeds")
        .join(sa)
        .join(sb)
        .join(sc)
        .join(subfeed_hash)
}

pub fn message_log_path(storage_dir: &Path, feed_id: &str, subfeed_hash: &str) -> PathBuf {
    subfeed_dir(storage_dir, feed_id, subfeed_hash).join("messages.ndjson")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_path_fans_out_by_hex_prefix_of_both_ids() {
        let path = message_log_path(Path::new("/data"), "abcdef01", "112233aa");
        assert_eq!(
            path,
            Path::new("/data/feeds/ab/cd/ef/abcdef01/subfeeds/11/22/33/112233aa/messages.ndjson")
        );
    }
}
