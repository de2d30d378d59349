use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::Proxy;

/// Manually curated candidate list
pub const CANDIDATE_FILE: &str = "pool.conf";
/// Checkpoint rewritten after every full test run
pub const CHECKED_FILE: &str = "pool_checked.conf";
/// Append-only audit log of evicted proxies
pub const EVICTED_FILE: &str = "pool_bad.list";

/// File-backed storage for the proxy pool
#[derive(Debug, Clone)]
pub struct PoolStore {
    dir: PathBuf,
}

impl PoolStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn load_candidates(&self) -> Result<Vec<Proxy>> {
        self.load_file(CANDIDATE_FILE).await
    }

    pub async fn load_checked(&self) -> Result<Vec<Proxy>> {
        self.load_file(CHECKED_FILE).await
    }

    async fn load_file(&self, name: &str) -> Result<Vec<Proxy>> {
        let path = self.dir.join(name);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "pool file not found, skipping");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let proxies = parse_records(&text);
        debug!(path = %path.display(), count = proxies.len(), "loaded pool file");
        Ok(proxies)
    }

    /// Replace the checkpoint with the given registry snapshot
    pub async fn save_checked(&self, proxies: &[Arc<Proxy>]) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.dir.join(CHECKED_FILE);
        let tmp = self.dir.join(format!("{}.tmp", CHECKED_FILE));
        fs::write(&tmp, render_records(proxies)).await?;
        fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), count = proxies.len(), "pool checkpoint written");
        Ok(())
    }

    /// Append one evicted proxy to the audit log
    pub async fn append_evicted(&self, proxy: &Proxy) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(EVICTED_FILE))
            .await?;
        file.write_all(format!("{}\n", proxy.to_record()).as_bytes())
            .await?;
        file.flush().await?;
        Ok(())
    }
}

/// Parse pool records, one proxy per line.
///
/// Fields are whitespace separated `key=value` pairs; a token that is not a
/// `key=value` pair is taken as the proxy URI. Blank lines and `#` comments are
/// skipped, and so are records whose URI does not parse.
pub fn parse_records(text: &str) -> Vec<Proxy> {
    let mut proxies = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = HashMap::new();
        for token in line.split_whitespace() {
            match token.split_once('=') {
                Some((key, value)) if is_field_name(key) => {
                    fields.insert(key.to_string(), value.to_string());
                }
                _ => {
                    fields
                        .entry("proxy".to_string())
                        .or_insert_with(|| token.to_string());
                }
            }
        }

        match Proxy::from_record(&fields) {
            Ok(proxy) => proxies.push(proxy),
            Err(e) => warn!(line = lineno + 1, "skipping pool record: {}", e),
        }
    }

    proxies
}

pub fn render_records(proxies: &[Arc<Proxy>]) -> String {
    let mut out = String::new();
    for proxy in proxies {
        out.push_str(&proxy.to_record());
        out.push('\n');
    }
    out
}

fn is_field_name(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
