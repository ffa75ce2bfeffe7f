//! Certificates on disk, one directory per domain:
//!
//! ```text
//! {root}/{domain}/cert.pem
//! {root}/{domain}/key.pem
//! {root}/{domain}/.last_update   RFC 3339 write time
//! {root}/{domain}/.wildcard      "true" or "false"
//! ```

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, warn};

use wr_core::model::CertificateRecord;

/// What the manager knows about one certificate directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalCertificate {
    /// Both `cert.pem` and `key.pem` are present
    pub exists: bool,
    pub last_modified: Option<DateTime<Utc>>,
    /// Only known for certificates this process wrote or was told about
    pub expires_at: Option<DateTime<Utc>>,
    pub wildcard: bool,
}

/// File layout of a domain's certificate directory
#[derive(Debug, Clone)]
pub struct CertificatePaths {
    pub dir: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub last_update: PathBuf,
    pub wildcard: PathBuf,
}

impl CertificatePaths {
    pub fn new(root: &Path, domain: &str) -> Self {
        let dir = root.join(domain);
        Self {
            cert: dir.join("cert.pem"),
            key: dir.join("key.pem"),
            last_update: dir.join(".last_update"),
            wildcard: dir.join(".wildcard"),
            dir,
        }
    }
}

/// Read every certificate directory under `root`
pub async fn scan(root: &Path) -> io::Result<BTreeMap<String, LocalCertificate>> {
    let mut found = BTreeMap::new();
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let Some(domain) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let paths = CertificatePaths::new(root, &domain);
        found.insert(domain, read_certificate(&paths).await);
    }

    debug!(count = found.len(), root = %root.display(), "Scanned local certificates");
    Ok(found)
}

async fn read_certificate(paths: &CertificatePaths) -> LocalCertificate {
    let exists = is_file(&paths.cert).await && is_file(&paths.key).await;

    let last_modified = match read_timestamp(&paths.last_update).await {
        Some(ts) => Some(ts),
        None => modified_time(&paths.cert).await,
    };

    let wildcard = fs::read_to_string(&paths.wildcard)
        .await
        .map(|s| s.trim() == "true")
        .unwrap_or(false);

    LocalCertificate {
        exists,
        last_modified,
        expires_at: None,
        wildcard,
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

async fn read_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let raw = fs::read_to_string(path).await.ok()?;
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

async fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).await.ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Whether `record` is newer than what is on disk.
///
/// Missing files or an unreadable `.last_update` always update. A record
/// without `updated_at` is compared by `expires_at`; one with neither
/// always updates.
pub async fn should_update(root: &Path, record: &CertificateRecord) -> bool {
    let paths = CertificatePaths::new(root, &record.domain);
    if !is_file(&paths.cert).await || !is_file(&paths.key).await || !is_file(&paths.last_update).await {
        return true;
    }

    let Some(remote) = record.updated_at.or(record.expires_at) else {
        return true;
    };
    match read_timestamp(&paths.last_update).await {
        Some(local) => remote > local,
        None => true,
    }
}

/// Write `record` under `{root}/{record.domain}` and return the new state
pub async fn write_certificate(
    root: &Path,
    record: &CertificateRecord,
    now: DateTime<Utc>,
) -> io::Result<LocalCertificate> {
    let paths = CertificatePaths::new(root, &record.domain);
    fs::create_dir_all(&paths.dir).await?;

    fs::write(&paths.cert, &record.cert_pem).await?;
    fs::write(&paths.key, &record.key_pem).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&paths.cert, std::fs::Permissions::from_mode(0o644)).await?;
        fs::set_permissions(&paths.key, std::fs::Permissions::from_mode(0o600)).await?;
    }

    fs::write(&paths.last_update, now.to_rfc3339()).await?;
    fs::write(&paths.wildcard, if record.wildcard { "true" } else { "false" }).await?;

    debug!(domain = %record.domain, wildcard = record.wildcard, "Wrote certificate");
    Ok(LocalCertificate {
        exists: true,
        last_modified: Some(now),
        expires_at: record.expires_at,
        wildcard: record.wildcard,
    })
}

/// Remove a domain's certificate directory
pub async fn remove_certificate(root: &Path, domain: &str) -> io::Result<()> {
    let dir = CertificatePaths::new(root, domain).dir;
    match fs::remove_dir_all(&dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(domain, "Certificate directory already gone");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
