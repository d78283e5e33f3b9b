use crate::keys::{
    check_url, decode_path, generate_archive_url, raw_url_path, strip_entry_fragment,
};
use crate::traits::{FetchedFile, FileSource, TransferError, TransferProvider, TransferResult};
use async_trait::async_trait;
use chrono::Utc;
use exparc_core::models::{Experiment, Replica};
use exparc_core::ProviderKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use url::Url;

/// Local filesystem transfer provider
#[derive(Debug, Clone)]
pub struct LocalTransfer {
    name: String,
    base_url: String,
    base_path: PathBuf,
    trust_length: bool,
}

impl LocalTransfer {
    /// Create a new LocalTransfer instance
    ///
    /// # Arguments
    /// * `name` - Location name
    /// * `base_url` - Root directory as a URL (e.g., "file:///var/lib/exparc/online")
    pub async fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        trust_length: bool,
    ) -> TransferResult<Self> {
        let name = name.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let parsed = Url::parse(&base_url).map_err(|e| {
            TransferError::Config(format!(
                "url for transfer provider ({}) is not valid: {}",
                name, e
            ))
        })?;
        if parsed.scheme() != ProviderKind::Local.scheme() {
            return Err(TransferError::Config(format!(
                "file: url required for transfer provider ({})",
                name
            )));
        }
        let raw_path = raw_url_path(&base_url).unwrap_or_default();
        let base_path = PathBuf::from(decode_path(raw_path)?);
        if base_path.as_os_str().is_empty() || base_path == Path::new("/") {
            return Err(TransferError::Config(format!(
                "url for transfer provider ({}) requires a non-empty path",
                name
            )));
        }

        fs::create_dir_all(&base_path).await.map_err(|e| {
            TransferError::Config(format!(
                "Failed to create directory {} for transfer provider ({}): {}",
                base_path.display(),
                name,
                e
            ))
        })?;

        Ok(LocalTransfer {
            name,
            base_url,
            base_path,
            trust_length,
        })
    }

    /// Convert a URL under the base URL to a filesystem path with traversal
    /// validation. The fragment addressing a bundle entry, if any, is ignored.
    fn url_to_path(&self, url: &str) -> TransferResult<PathBuf> {
        check_url(&self.base_url, url)?;
        let addressed = strip_entry_fragment(&self.base_url, url);
        let relative = decode_path(addressed[self.base_url.len()..].trim_start_matches('/'))?;

        if relative.is_empty() || relative.split('/').any(|segment| segment == "..") {
            return Err(TransferError::InvalidUrl(format!(
                "{} does not name a file under {}",
                url, self.base_url
            )));
        }

        Ok(self.base_path.join(relative))
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> TransferResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn existing(&self, url: &str) -> TransferResult<PathBuf> {
        let path = self.url_to_path(url)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(TransferError::NotFound(url.to_string()));
        }
        Ok(path)
    }
}

#[async_trait]
impl TransferProvider for LocalTransfer {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn trusts_length(&self) -> bool {
        self.trust_length
    }

    async fn is_alive(&self) -> bool {
        match fs::metadata(&self.base_path).await {
            Ok(meta) => meta.is_dir(),
            Err(e) => {
                tracing::warn!(location = %self.name, error = %e, "Local liveness test failed");
                false
            }
        }
    }

    async fn length(&self, replica: &Replica) -> TransferResult<u64> {
        let path = self.existing(&replica.url).await?;
        Ok(fs::metadata(&path).await?.len())
    }

    async fn open_for_read(
        &self,
        replica: &Replica,
        spool_dir: Option<&Path>,
    ) -> TransferResult<FetchedFile> {
        let path = self.existing(&replica.url).await?;
        let start = Instant::now();
        let fetched = FetchedFile::spool(spool_dir)?;
        let size = fs::copy(&path, fetched.path()).await?;

        tracing::debug!(
            path = %path.display(),
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local fetch successful"
        );
        Ok(fetched)
    }

    async fn put_file(&self, source: FileSource, target_url: &str) -> TransferResult<()> {
        let path = self.url_to_path(target_url)?;
        self.ensure_parent_dir(&path).await?;
        let start = Instant::now();

        let size = match source {
            FileSource::Path(local) => fs::copy(&local, &path).await?,
            FileSource::Reader(mut reader) => {
                let mut file = fs::File::create(&path).await?;
                let copied = tokio::io::copy(&mut reader, &mut file).await?;
                file.sync_all().await?;
                copied
            }
        };

        tracing::info!(
            path = %path.display(),
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local put successful"
        );
        Ok(())
    }

    async fn put_archive(
        &self,
        archive: &Path,
        experiment: &Experiment,
    ) -> TransferResult<String> {
        let archive_url = generate_archive_url(&self.base_url, experiment, Utc::now());
        self.put_file(FileSource::Path(archive.to_path_buf()), &archive_url)
            .await?;
        Ok(archive_url)
    }

    async fn remove_file(&self, replica: &Replica) -> TransferResult<()> {
        let path = self.existing(&replica.url).await?;
        fs::remove_file(&path).await?;

        tracing::info!(path = %path.display(), "Local remove successful");
        Ok(())
    }
}
