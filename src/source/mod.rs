//! Snapshot source: discovers dump files, decodes them ahead of the engine and
//! hands them over in timestamp order.
//!
//! Dump files are named `<prefix>-<13-digit ms timestamp>-<32 hex hash>.json[.bz2]`.
//! Anything else in the directory is ignored.

pub mod dump;

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::PREFETCH_DEPTH;
use crate::error::{AppError, Result};
use crate::types::AuctionSnapshot;

/// A dump file whose name parsed cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpFile {
    pub path: PathBuf,
    pub timestamp: i64,
    pub content_hash: String,
    pub compressed: bool,
}

/// Parse the timestamp and content hash out of a dump file name.
pub fn parse_dump_name(path: &Path) -> Option<DumpFile> {
    let name = path.file_name()?.to_str()?;
    let (stem, compressed) = if let Some(stem) = name.strip_suffix(".json.bz2") {
        (stem, true)
    } else {
        (name.strip_suffix(".json")?, false)
    };

    // The prefix may itself contain dashes, so split from the right.
    let mut parts = stem.rsplitn(3, '-');
    let hash = parts.next()?;
    let ts = parts.next()?;
    let prefix = parts.next()?;

    if prefix.is_empty()
        || ts.len() != 13
        || !ts.bytes().all(|b| b.is_ascii_digit())
        || hash.len() != 32
        || !hash.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return None;
    }

    Some(DumpFile {
        path: path.to_path_buf(),
        timestamp: ts.parse().ok()?,
        content_hash: hash.to_ascii_lowercase(),
        compressed,
    })
}

/// All dump files in `dir`, oldest first, skipping those stamped before `skip_before`.
pub fn collect_dumps(dir: &Path, skip_before: Option<i64>) -> Result<Vec<DumpFile>> {
    if !dir.is_dir() {
        return Err(AppError::Config(format!(
            "data directory does not exist: {}",
            dir.display()
        )));
    }

    let mut files: Vec<DumpFile> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter_map(|p| parse_dump_name(&p))
        .filter(|d| skip_before.map_or(true, |min| d.timestamp >= min))
        .collect();

    files.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

/// Read and decode one dump. Blocking.
pub fn load_dump(file: &DumpFile) -> Result<AuctionSnapshot> {
    let handle = File::open(&file.path)?;
    dump::decode_dump(handle, file.compressed, file.timestamp, &file.content_hash)
}

/// Decode dumps on the blocking pool, at most [`PREFETCH_DEPTH`] ahead of the
/// consumer. Results arrive in the order of `files`; per-file failures are
/// passed through for the consumer to log and skip.
pub fn spawn_reader(files: Vec<DumpFile>) -> mpsc::Receiver<(DumpFile, Result<AuctionSnapshot>)> {
    let (tx, rx) = mpsc::channel(PREFETCH_DEPTH);

    tokio::spawn(async move {
        for file in files {
            debug!(path = %file.path.display(), "reading dump");
            let job = file.clone();
            let decoded = match tokio::task::spawn_blocking(move || load_dump(&job)).await {
                Ok(res) => res,
                Err(e) => Err(AppError::Dump(format!("decode task failed: {e}"))),
            };
            if tx.send((file, decoded)).await.is_err() {
                info!("dump consumer went away, stopping reader");
                break;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789ABCDEF";

    #[test]
    fn parses_compressed_and_plain_names() {
        let d = parse_dump_name(Path::new(&format!("/data/eu-kazzak-1500000000000-{HASH}.json.bz2")))
            .expect("compressed dump");
        assert_eq!(d.timestamp, 1_500_000_000_000);
        assert_eq!(d.content_hash, HASH.to_ascii_lowercase());
        assert!(d.compressed);

        let d = parse_dump_name(Path::new(&format!("auctions-1500000000000-{HASH}.json"))).unwrap();
        assert!(!d.compressed);
    }

    #[test]
    fn rejects_names_off_the_convention() {
        for name in [
            format!("auctions-150000000000-{HASH}.json"),
            "auctions-1500000000000-nothex.json".to_string(),
            format!("-1500000000000-{HASH}.json"),
            format!("auctions-1500000000000-{HASH}.txt"),
            "notes.json".to_string(),
        ] {
            assert!(parse_dump_name(Path::new(&name)).is_none(), "{name}");
        }
    }

    #[test]
    fn collect_sorts_by_timestamp_and_applies_skip_before() {
        let dir = tempfile::tempdir().unwrap();
        for ts in ["1500000003000", "1500000001000", "1500000002000"] {
            fs::write(dir.path().join(format!("ah-{ts}-{HASH}.json")), "{}").unwrap();
        }
        fs::write(dir.path().join("README.txt"), "ignored").unwrap();

        let all = collect_dumps(dir.path(), None).unwrap();
        let stamps: Vec<i64> = all.iter().map(|d| d.timestamp).collect();
        assert_eq!(stamps, vec![1_500_000_001_000, 1_500_000_002_000, 1_500_000_003_000]);

        let later = collect_dumps(dir.path(), Some(1_500_000_002_000)).unwrap();
        assert_eq!(later.len(), 2);
    }

    #[tokio::test]
    async fn reader_passes_through_bad_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let good = r#"{"realms":[{"name":"A","slug":"a"}],"auctions":[
            {"auc":1,"item":2,"ownerRealm":"A","bid":3,"quantity":1,"timeLeft":"LONG"}]}"#;
        fs::write(dir.path().join(format!("ah-1500000001000-{HASH}.json")), good).unwrap();
        fs::write(dir.path().join(format!("ah-1500000002000-{HASH}.json")), "garbage").unwrap();
        fs::write(dir.path().join(format!("ah-1500000003000-{HASH}.json")), good).unwrap();

        let files = collect_dumps(dir.path(), None).unwrap();
        let mut rx = spawn_reader(files);

        let mut seen = Vec::new();
        while let Some((file, res)) = rx.recv().await {
            seen.push((file.timestamp, res.is_ok()));
        }
        assert_eq!(
            seen,
            vec![
                (1_500_000_001_000, true),
                (1_500_000_002_000, false),
                (1_500_000_003_000, true),
            ]
        );
    }
}
