use crate::commands::{self, CommandTemplates};
use crate::executor::{RemoteExecutor, DEFAULT_SSH_PORT};
use crate::keys::{
    check_url, decode_path, generate_archive_url, raw_url_path, split_remote_path,
    strip_entry_fragment,
};
use crate::traits::{FetchedFile, FileSource, TransferError, TransferProvider, TransferResult};
use async_trait::async_trait;
use chrono::Utc;
use exparc_core::config::ProviderParams;
use exparc_core::ProviderKind;
use exparc_core::models::{Experiment, Replica};
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use url::Url;

/// Remote-shell transfer provider.
///
/// Every operation renders one command template and runs it through
/// [`RemoteExecutor`]: copies run `scp` locally, everything else runs
/// through the `ssh` prefix on the remote host.
#[derive(Debug, Clone)]
pub struct ScpTransfer {
    name: String,
    base_url: String,
    base_path: String,
    executor: RemoteExecutor,
    templates: CommandTemplates,
    trust_length: bool,
}

/// Remote path components derived from a URL.
struct RemotePath {
    path: String,
    dirname: String,
    filename: String,
}

impl RemotePath {
    fn params(&self) -> HashMap<&'static str, String> {
        [
            ("path", self.path.clone()),
            ("dirname", self.dirname.clone()),
            ("filename", self.filename.clone()),
        ]
        .into_iter()
        .collect()
    }
}

impl ScpTransfer {
    /// Create a provider for the location `name` rooted at `base_url`.
    ///
    /// All validation happens here, before any command is run.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        params: &ProviderParams,
    ) -> TransferResult<Self> {
        let name = name.into();
        let base_url = base_url.into();

        let parsed = Url::parse(&base_url).map_err(|e| {
            TransferError::Config(format!(
                "url for transfer provider ({}) is not valid: {}",
                name, e
            ))
        })?;

        if parsed.scheme() != ProviderKind::Scp.scheme() {
            return Err(TransferError::Config(format!(
                "scp: url required for transfer provider ({})",
                name
            )));
        }
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(TransferError::Config(format!(
                "url for transfer provider ({}) cannot use a username or password",
                name
            )));
        }

        let hostname = parsed.host_str().unwrap_or_default().to_string();
        let raw_path = raw_url_path(&base_url).unwrap_or_default();
        if raw_path.contains(['#', '?', ';']) {
            tracing::warn!(
                location = %name,
                url = %base_url,
                "Base url contains a path param, query or fragment marker; it is treated as part of the path"
            );
        }
        if hostname.is_empty() || raw_path.trim_end_matches('/').is_empty() {
            return Err(TransferError::Config(format!(
                "url for transfer provider ({}) requires a non-empty hostname and path",
                name
            )));
        }

        let username = params
            .username
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| TransferError::Config("No username parameter found".to_string()))?;

        let base_path = decode_path(raw_path)?.trim_end_matches('/').to_string();
        let templates = CommandTemplates::with_overrides(&params.commands);
        let ssh_template = templates.get(commands::SSH).unwrap_or_default().to_string();
        let executor = RemoteExecutor::new(
            hostname,
            username,
            parsed.port().unwrap_or(DEFAULT_SSH_PORT),
            params.key_filename.clone(),
            ssh_template,
        );

        Ok(Self {
            name,
            base_url,
            base_path,
            executor,
            templates,
            trust_length: params.trust_length,
        })
    }

    fn analyse_url(&self, url: &str) -> TransferResult<RemotePath> {
        check_url(&self.base_url, url)?;
        let addressed = strip_entry_fragment(&self.base_url, url);
        let raw = raw_url_path(addressed)
            .ok_or_else(|| TransferError::InvalidUrl(format!("{} has no path", url)))?;
        let path = decode_path(raw)?;
        let (dirname, filename) = split_remote_path(&path);
        Ok(RemotePath {
            path,
            dirname,
            filename,
        })
    }

    /// Render and run the template for `op`.
    ///
    /// Returns `Ok(None)` when the operation is optional and has no template.
    async fn run_command(
        &self,
        op: &str,
        mut params: HashMap<&'static str, String>,
        optional: bool,
    ) -> TransferResult<Option<String>> {
        let is_copy = op == commands::SCP_FROM || op == commands::SCP_TO;
        if is_copy {
            params.insert("opts", self.executor.scp_opts());
            params.insert("username", self.executor.username().to_string());
            params.insert("hostname", self.executor.hostname().to_string());
        }

        let Some(remote_command) = self.templates.render(op, &params, optional)? else {
            return Ok(None);
        };
        let command_line = self.executor.compose(&remote_command, !is_copy);
        let output = self.executor.execute(&command_line).await?;
        Ok(Some(output.output))
    }

    async fn run_hook(&self, op: &str, target: &RemotePath) -> TransferResult<()> {
        self.run_command(op, target.params(), true).await?;
        Ok(())
    }

    async fn ensure_remote_dir(&self, target: &RemotePath) -> TransferResult<()> {
        if target.dirname != self.base_path {
            let params = [("path", target.dirname.clone())].into_iter().collect();
            self.run_command(commands::MKDIRS, params, false).await?;
        }
        Ok(())
    }

    async fn push(&self, local: &Path, remote: &str) -> TransferResult<()> {
        let params = [
            ("local", local.display().to_string()),
            ("remote", remote.to_string()),
        ]
        .into_iter()
        .collect();
        self.run_command(commands::SCP_TO, params, false).await?;
        Ok(())
    }
}

#[async_trait]
impl TransferProvider for ScpTransfer {
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
        match self.run_command(commands::ECHO, HashMap::new(), false).await {
            Ok(Some(output)) if output == "hi\n" => true,
            Ok(output) => {
                tracing::debug!(location = %self.name, output = ?output, "Remote echo output is incorrect");
                false
            }
            Err(e) => {
                tracing::warn!(location = %self.name, error = %e, "SSH liveness test failed");
                false
            }
        }
    }

    #[tracing::instrument(skip(self, replica), fields(location = %self.name, url = %replica.url))]
    async fn length(&self, replica: &Replica) -> TransferResult<u64> {
        let target = self.analyse_url(&replica.url)?;
        let output = self
            .run_command(commands::LENGTH, target.params(), false)
            .await?
            .unwrap_or_default();
        let trimmed = output.trim();
        trimmed.parse::<u64>().map_err(|_| {
            TransferError::InvalidOutput(format!(
                "length of {} is not a number: {:?}",
                target.path, trimmed
            ))
        })
    }

    #[tracing::instrument(skip(self, replica), fields(location = %self.name, url = %replica.url))]
    async fn open_for_read(
        &self,
        replica: &Replica,
        spool_dir: Option<&Path>,
    ) -> TransferResult<FetchedFile> {
        let target = self.analyse_url(&replica.url)?;
        let fetched = FetchedFile::spool(spool_dir)?;
        let params = [
            ("local", fetched.path().display().to_string()),
            ("remote", target.path.clone()),
        ]
        .into_iter()
        .collect();
        self.run_command(commands::SCP_FROM, params, false).await?;
        Ok(fetched)
    }

    #[tracing::instrument(skip(self, source), fields(location = %self.name))]
    async fn put_file(&self, source: FileSource, target_url: &str) -> TransferResult<()> {
        let target = self.analyse_url(target_url)?;
        self.run_hook(commands::PRE_PUT_FILE, &target).await?;
        self.ensure_remote_dir(&target).await?;

        match source {
            FileSource::Path(local) => self.push(&local, &target.path).await?,
            FileSource::Reader(mut reader) => {
                let spool = tempfile::Builder::new().prefix("exparc_scp_").tempfile()?;
                let mut out = tokio::fs::File::from_std(spool.reopen()?);
                tokio::io::copy(&mut reader, &mut out).await?;
                out.flush().await?;
                drop(out);
                self.push(spool.path(), &target.path).await?;
            }
        }

        self.run_hook(commands::POST_PUT_FILE, &target).await
    }

    #[tracing::instrument(skip(self, archive, experiment), fields(location = %self.name, experiment_id = experiment.id))]
    async fn put_archive(
        &self,
        archive: &Path,
        experiment: &Experiment,
    ) -> TransferResult<String> {
        let archive_url = generate_archive_url(&self.base_url, experiment, Utc::now());
        let target = self.analyse_url(&archive_url)?;

        self.run_hook(commands::PRE_PUT_ARCHIVE, &target).await?;
        self.ensure_remote_dir(&target).await?;
        self.push(archive, &target.path).await?;
        self.run_hook(commands::POST_PUT_ARCHIVE, &target).await?;

        tracing::info!(archive_url = %archive_url, "Archive pushed");
        Ok(archive_url)
    }

    #[tracing::instrument(skip(self, replica), fields(location = %self.name, url = %replica.url))]
    async fn remove_file(&self, replica: &Replica) -> TransferResult<()> {
        let target = self.analyse_url(&replica.url)?;
        self.run_command(commands::REMOVE, target.params(), false)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::offline_replica_url;
    use tempfile::tempdir;

    fn params(username: Option<&str>) -> ProviderParams {
        ProviderParams {
            username: username.map(String::from),
            ..Default::default()
        }
    }

    /// Parameters that run every operation on the local shell.
    fn local_shell_params(extra: &[(&str, &str)]) -> ProviderParams {
        let mut commands: HashMap<String, String> = [
            (commands::SSH, ""),
            (commands::SCP_FROM, r#"cp "${remote}" "${local}""#),
            (commands::SCP_TO, r#"cp "${local}" "${remote}""#),
            (commands::LENGTH, r#"wc -c < "${path}""#),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in extra {
            commands.insert(k.to_string(), v.to_string());
        }
        ProviderParams {
            username: Some("archiver".into()),
            commands,
            ..Default::default()
        }
    }

    fn replica(url: String) -> Replica {
        Replica {
            id: 1,
            datafile_id: 1,
            url,
            protocol: "scp".into(),
            verified: true,
            stay_remote: false,
            location_id: 1,
        }
    }

    fn experiment() -> Experiment {
        Experiment {
            id: 7,
            title: "t".into(),
            description: None,
            created_by: 1,
            url: None,
        }
    }

    #[test]
    fn construction_rejects_embedded_credentials() {
        let err = ScpTransfer::new("a", "scp://bob@host/data", &params(Some("u"))).unwrap_err();
        assert!(err.is_config());
        let err = ScpTransfer::new("a", "scp://bob:pw@host/data", &params(Some("u"))).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn construction_requires_host_and_path() {
        assert!(ScpTransfer::new("a", "scp://host", &params(Some("u"))).is_err());
        assert!(ScpTransfer::new("a", "scp://host/", &params(Some("u"))).is_err());
        assert!(ScpTransfer::new("a", "scp:///data", &params(Some("u"))).is_err());
    }

    #[test]
    fn construction_requires_username() {
        let err = ScpTransfer::new("a", "scp://host/data", &params(None)).unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: No username parameter found");
        assert!(ScpTransfer::new("a", "scp://host/data", &params(Some(""))).is_err());
    }

    #[test]
    fn construction_requires_scp_scheme() {
        assert!(ScpTransfer::new("a", "sftp://host/data", &params(Some("u"))).is_err());
        assert!(ScpTransfer::new("a", "not a url", &params(Some("u"))).is_err());
    }

    #[test]
    fn construction_accepts_port_and_key() {
        let mut p = params(Some("u"));
        p.key_filename = Some("/keys/id".into());
        p.trust_length = true;
        let provider = ScpTransfer::new("a", "scp://host:2200/data", &p).unwrap();
        assert_eq!(provider.executor.scp_opts(), " -i /keys/id -P 2200");
        assert!(provider.trusts_length());
        assert_eq!(provider.base_path, "/data");
    }

    #[tokio::test]
    async fn liveness_check_collapses_failures_to_false() {
        let p = local_shell_params(&[(commands::ECHO, "exit 255")]);
        let provider = ScpTransfer::new("a", "scp://localhost/tmp", &p).unwrap();
        assert!(!provider.is_alive().await);

        let p = local_shell_params(&[(commands::ECHO, "echo ho")]);
        let provider = ScpTransfer::new("a", "scp://localhost/tmp", &p).unwrap();
        assert!(!provider.is_alive().await);

        let p = local_shell_params(&[]);
        let provider = ScpTransfer::new("a", "scp://localhost/tmp", &p).unwrap();
        assert!(provider.is_alive().await);
    }

    #[tokio::test]
    async fn put_read_length_and_remove_round_trip() {
        let dir = tempdir().unwrap();
        let base = format!("scp://localhost{}", dir.path().display());
        let provider = ScpTransfer::new("online", &base, &local_shell_params(&[])).unwrap();

        let target = format!("{}/3/data.bin", base);
        let reader = Box::pin(std::io::Cursor::new(b"twelve bytes".to_vec()));
        provider
            .put_file(FileSource::Reader(reader), &target)
            .await
            .unwrap();
        assert!(dir.path().join("3/data.bin").exists());

        let r = replica(target);
        assert_eq!(provider.length(&r).await.unwrap(), 12);

        let fetched = provider.open_for_read(&r, None).await.unwrap();
        assert_eq!(std::fs::read(fetched.path()).unwrap(), b"twelve bytes");

        provider.remove_file(&r).await.unwrap();
        assert!(!dir.path().join("3/data.bin").exists());

        let err = provider.remove_file(&r).await.unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn non_numeric_length_is_invalid_output() {
        let p = local_shell_params(&[(commands::LENGTH, "echo lots")]);
        let provider = ScpTransfer::new("a", "scp://localhost/tmp", &p).unwrap();
        let err = provider
            .length(&replica("scp://localhost/tmp/f".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidOutput(_)));
    }

    #[tokio::test]
    async fn urls_outside_the_base_are_rejected() {
        let provider =
            ScpTransfer::new("a", "scp://localhost/tmp", &local_shell_params(&[])).unwrap();
        let err = provider
            .remove_file(&replica("scp://elsewhere/tmp/f".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn put_archive_runs_hooks_and_returns_generated_url() {
        let dir = tempdir().unwrap();
        let base = format!("scp://localhost{}", dir.path().display());
        let marker = dir.path().join("hook.log");
        let hook = format!(r#"echo "${{filename}}" >> "{}""#, marker.display());
        let p = local_shell_params(&[(commands::POST_PUT_ARCHIVE, hook.as_str())]);
        let provider = ScpTransfer::new("archive", &base, &p).unwrap();

        let bundle = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(bundle.path(), b"bundle").unwrap();

        let url = provider.put_archive(bundle.path(), &experiment()).await.unwrap();
        assert!(url.starts_with(&format!("{}/7-", base)));
        assert!(url.ends_with("-archive.tar.gz"));

        let filename = url.rsplit('/').next().unwrap();
        assert_eq!(std::fs::read(dir.path().join(filename)).unwrap(), b"bundle");
        let logged = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(logged.trim(), filename);
    }

    #[tokio::test]
    async fn markers_in_the_base_url_stay_in_the_path() {
        let dir = tempdir().unwrap();
        let base_dir = dir.path().join("base#x");
        std::fs::create_dir(&base_dir).unwrap();
        let base = format!("scp://localhost{}/base#x", dir.path().display());
        let provider = ScpTransfer::new("archive", &base, &local_shell_params(&[])).unwrap();
        assert_eq!(provider.base_path, base_dir.display().to_string());

        let bundle = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(bundle.path(), b"bundle").unwrap();
        let url = provider.put_archive(bundle.path(), &experiment()).await.unwrap();

        let filename = url.rsplit('/').next().unwrap();
        assert_eq!(std::fs::read(base_dir.join(filename)).unwrap(), b"bundle");

        let entry = replica(offline_replica_url(&url, "7/1/f.txt"));
        assert_eq!(provider.length(&entry).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn failing_configured_hook_propagates() {
        let dir = tempdir().unwrap();
        let base = format!("scp://localhost{}", dir.path().display());
        let p = local_shell_params(&[(commands::PRE_PUT_FILE, "exit 1")]);
        let provider = ScpTransfer::new("a", &base, &p).unwrap();
        let src = tempfile::NamedTempFile::new().unwrap();

        let err = provider
            .put_file(FileSource::Path(src.path().to_path_buf()), &format!("{}/f", base))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::CommandFailed { .. }));
        assert!(!dir.path().join("f").exists());
    }
}
