use std::path::{Path, PathBuf};

use rand::Rng;

/// Splits a lowercase hex sha1 into the three 2-char prefixes that fan out
/// the on-disk layout (`<aa>/<bb>/<cc>/<sha1>`).
pub fn hex_prefix_parts(sha1: &str) -> (&str, &str, &str) {
    (&sha1[0..2], &sha1[2..4], &sha1[4..6])
}

pub fn content_path(storage_dir: &Path, sha1: &str) -> PathBuf {
    let (aa, bb, cc) = hex_prefix_parts(sha1);
    storage_dir.join("sha1").join(aa).join(bb).join(cc).join(sha1)
}

pub fn link_path(storage_dir: &Path, sha1: &str) -> PathBuf {
    let mut path = content_path(storage_dir, sha1).into_os_string();
    path.push(".link");
    PathBuf::from(path)
}

pub fn trash_path(storage_dir: &Path, sha1: &str) -> PathBuf {
    let (aa, bb, cc) = hex_prefix_parts(sha1);
    storage_dir
        .join("sha1-trash")
        .join(aa)
        .join(bb)
        .join(cc)
        .join(sha1)
}

pub fn tmp_dir(storage_dir: &Path) -> PathBuf {
    storage_dir.join("tmp")
}

pub fn tmp_path(storage_dir: &Path, prefix: &str) -> PathBuf {
    tmp_dir(storage_dir).join(format!("{prefix}-{}", random_suffix(10)))
}

fn random_suffix(len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e1_small_file_layout() {
        let sha1 = "f572d396fae9206628714fb2ce00f72e94f2258f";
        let path = content_path(Path::new("/store"), sha1);
        assert_eq!(path, Path::new("/store/sha1/f5/72/d3/f572d396fae9206628714fb2ce00f72e94f2258f"));
    }

    #[test]
    fn link_path_appends_suffix() {
        let sha1 = "a".repeat(40);
        let path = link_path(Path::new("/store"), &sha1);
        assert!(path.to_string_lossy().ends_with(".link"));
    }
}
