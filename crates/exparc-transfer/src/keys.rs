//! Shared URL and path derivation for transfer providers.
//!
//! Archive URL format: `{base_url}/{experiment_id}-{YYYYmmddTHHMMSS}-archive.tar.gz`.
//! Offline replica URL format: `{archive_url}#{percent-encoded path in archive}`.

use chrono::{DateTime, Utc};
use exparc_core::models::Experiment;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::borrow::Cow;

use crate::traits::{TransferError, TransferResult};

/// Characters kept as is in the fragment of an offline replica URL. `/` stays
/// so the in-archive path remains readable.
const FRAGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Generate the URL an experiment bundle is pushed to.
///
/// All providers must use this format so archive URLs stay comparable.
pub fn generate_archive_url(base_url: &str, experiment: &Experiment, at: DateTime<Utc>) -> String {
    format!(
        "{}/{}-{}-archive.tar.gz",
        base_url.trim_end_matches('/'),
        experiment.id,
        at.format("%Y%m%dT%H%M%S")
    )
}

/// URL of an offline replica addressing `path_in_archive` inside the bundle at
/// `archive_url`.
pub fn offline_replica_url(archive_url: &str, path_in_archive: &str) -> String {
    format!(
        "{}#{}",
        archive_url,
        utf8_percent_encode(path_in_archive, FRAGMENT)
    )
}

/// In-archive path addressed by an offline replica URL, decoded. `None` when
/// the URL has no fragment.
pub fn path_in_fragment(url: &str) -> Option<String> {
    let (_, fragment) = url.rsplit_once('#')?;
    percent_decode_str(fragment)
        .decode_utf8()
        .ok()
        .map(Cow::into_owned)
}

/// Path of a URL exactly as written after the authority, still encoded.
///
/// Unlike [`url::Url::path`], `?`, `#` and `;` are kept as path characters.
pub fn raw_url_path(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    rest.find('/').map(|idx| &rest[idx..])
}

/// `url` with the fragment that addresses an entry inside a bundle removed.
///
/// Only a `#` after `base_url` starts that fragment; markers inside the base
/// are literal path characters.
pub fn strip_entry_fragment<'a>(base_url: &str, url: &'a str) -> &'a str {
    let Some(rest) = url.strip_prefix(base_url) else {
        return url;
    };
    match rest.find('#') {
        Some(idx) => &url[..base_url.len() + idx],
        None => url,
    }
}

/// Split a remote path into `(dirname, filename)` the way POSIX `dirname` and
/// `basename` do for a path without trailing slash.
pub fn split_remote_path(path: &str) -> (String, String) {
    match path.rfind('/') {
        Some(0) => ("/".to_string(), path[1..].to_string()),
        Some(idx) => (path[..idx].to_string(), path[idx + 1..].to_string()),
        None => (String::new(), path.to_string()),
    }
}

/// Reject URLs that do not live under `base_url`. The match must end on a
/// path boundary, so `scp://h/data2/f` is not under `scp://h/data`.
pub fn check_url(base_url: &str, url: &str) -> TransferResult<()> {
    let under_base = url.strip_prefix(base_url).is_some_and(|rest| {
        base_url.ends_with('/') || rest.is_empty() || rest.starts_with(['/', '#'])
    });
    if under_base {
        Ok(())
    } else {
        Err(TransferError::InvalidUrl(format!(
            "{} is not under the provider base url {}",
            url, base_url
        )))
    }
}

/// Percent-decoded form of a URL path component.
pub fn decode_path(path: &str) -> TransferResult<String> {
    percent_decode_str(path)
        .decode_utf8()
        .map(Cow::into_owned)
        .map_err(|e| TransferError::InvalidUrl(format!("{}: {}", path, e)))
}
