//! Credential bundle wire format.
//!
//! A successful redemption returns newline-delimited JSON: exactly one
//! `Link` document followed by exactly one `Secret` document. Each
//! document carries a `"kind"` tag so a reordered or truncated body is
//! reported precisely instead of being misread.

use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, OwnerReference};

/// Content type of an encoded bundle.
pub const BUNDLE_CONTENT_TYPE: &str = "application/x-ndjson";

/// One externally reachable address of the issuing site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub host: String,
    pub port: u16,
}

/// Describes how to reach the issuing site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkDescriptor {
    pub meta: ObjectMeta,
    pub endpoints: Vec<Endpoint>,
    #[serde(default = "default_cost")]
    pub cost: u32,
    /// Name of the [`TlsCredential`] the link authenticates with.
    pub tls_credentials: String,
}

fn default_cost() -> u32 {
    1
}

/// Client TLS material for a link.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsCredential {
    pub meta: ObjectMeta,
    #[serde(rename = "ca.crt")]
    pub ca_crt: String,
    #[serde(rename = "tls.crt")]
    pub tls_crt: String,
    #[serde(rename = "tls.key")]
    pub tls_key: String,
}

impl std::fmt::Debug for TlsCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsCredential")
            .field("meta", &self.meta)
            .field("ca_crt", &self.ca_crt.len())
            .field("tls_crt", &self.tls_crt.len())
            .field("tls_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
enum BundleDocument {
    Link(LinkDescriptor),
    Secret(TlsCredential),
}

impl BundleDocument {
    fn kind(&self) -> &'static str {
        match self {
            BundleDocument::Link(_) => "Link",
            BundleDocument::Secret(_) => "Secret",
        }
    }
}

/// Errors decoding a bundle.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("Controller could not decode response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Controller could not decode response: missing {0} document")]
    Missing(&'static str),

    #[error("Controller could not decode response: expected {expected} document, found {found}")]
    UnexpectedKind {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Controller could not decode response: unexpected trailing document")]
    Trailing,
}

/// What a successful redemption hands the joining site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    pub link: LinkDescriptor,
    pub credential: TlsCredential,
}

impl CredentialBundle {
    pub fn encode(&self) -> Result<Vec<u8>, BundleError> {
        let mut out = serde_json::to_vec(&BundleDocument::Link(self.link.clone()))?;
        out.push(b'\n');
        out.extend(serde_json::to_vec(&BundleDocument::Secret(
            self.credential.clone(),
        ))?);
        out.push(b'\n');
        Ok(out)
    }

    pub fn decode(body: &[u8]) -> Result<Self, BundleError> {
        let mut documents = serde_json::Deserializer::from_slice(body).into_iter::<BundleDocument>();

        let link = match documents.next().transpose()? {
            Some(BundleDocument::Link(link)) => link,
            Some(other) => {
                return Err(BundleError::UnexpectedKind {
                    expected: "Link",
                    found: other.kind(),
                })
            }
            None => return Err(BundleError::Missing("Link")),
        };

        let credential = match documents.next().transpose()? {
            Some(BundleDocument::Secret(credential)) => credential,
            Some(other) => {
                return Err(BundleError::UnexpectedKind {
                    expected: "Secret",
                    found: other.kind(),
                })
            }
            None => return Err(BundleError::Missing("Secret")),
        };

        if documents.next().is_some() {
            return Err(BundleError::Trailing);
        }

        Ok(Self { link, credential })
    }

    /// Bind both documents to the site that received them.
    pub fn set_owner(&mut self, owner: OwnerReference) {
        self.link.meta.set_owner(owner.clone());
        self.credential.meta.set_owner(owner);
    }

    /// Rename the link and its credential, keeping the reference intact.
    pub fn rename(&mut self, name: &str) {
        self.link.meta.name = name.to_string();
        self.link.tls_credentials = name.to_string();
        self.credential.meta.name = name.to_string();
    }
}
