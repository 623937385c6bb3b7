//! Account and Collection domain types.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// The source kind of a [`Collection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Caldav,
    IcsSubscription,
}

/// A configured CalDAV (or ICS-subscription) account.
///
/// Credentials are opaque to the core: they are only ever forwarded to
/// [`crate::caldav::client::CalDavClient::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub server_url: String,
    pub username: String,
    pub password: String,
    pub enabled: bool,
    #[serde(default)]
    pub collections: Vec<Collection>,
    #[serde(default)]
    pub home_url: Option<String>,
}

/// A single remote calendar known to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub url: String,
    pub name: String,
    pub color: Option<String>,
    pub enabled: bool,
    pub source_kind: SourceKind,
}

impl Collection {
    /// Derive a stable local id from a collection URL: base64 (URL-safe,
    /// unpadded) of the URL bytes.
    pub fn derive_id(url: &str) -> String {
        URL_SAFE_NO_PAD.encode(url.as_bytes())
    }

    pub fn new(url: impl Into<String>, name: impl Into<String>, source_kind: SourceKind) -> Self {
        let url = url.into();
        let id = Self::derive_id(&url);
        Self {
            id,
            url,
            name: name.into(),
            color: None,
            enabled: true,
            source_kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_id_is_stable_and_unpadded() {
        let id = Collection::derive_id("https://cal.example.com/dav/user01/personal/");
        assert_eq!(id, Collection::derive_id("https://cal.example.com/dav/user01/personal/"));
        assert!(!id.contains('='));
    }
}
