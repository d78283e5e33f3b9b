use std::fmt::{Display, Formatter, Result as FmtResult};

/// Classification of a storage location.
///
/// Online locations host authoritative copies of datafiles; offline locations
/// only host copies that reference a position inside an archive bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "location_kind", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Online,
    Offline,
}

impl Display for LocationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            LocationKind::Online => write!(f, "online"),
            LocationKind::Offline => write!(f, "offline"),
        }
    }
}

/// Transfer provider implementations a location can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Remote shell (ssh) commands plus scp copies.
    Scp,
    /// A directory on the local filesystem.
    #[serde(alias = "file")]
    Local,
}

impl ProviderKind {
    /// URL scheme a location bound to this provider must use.
    pub fn scheme(&self) -> &'static str {
        match self {
            ProviderKind::Scp => "scp",
            ProviderKind::Local => "file",
        }
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProviderKind::Scp => write!(f, "scp"),
            ProviderKind::Local => write!(f, "local"),
        }
    }
}
