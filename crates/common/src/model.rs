//! The link/segment data type is treated as an opaque, signable, hashable
//! record owned by `chainscript` in the source system (an explicit
//! non-goal here); what follows is the minimal shape the rest of the
//! connector needs to decode, decrypt, hash and re-sign it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CommonError;

/// A process step name/state pair, carried in [`LinkMeta`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// One entity this link's `data` is encrypted for: an RSA public key and the
/// symmetric key it wraps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(rename = "pubKey")]
    pub pub_key: String,
    #[serde(rename = "symmetricKey", with = "base64_bytes")]
    pub symmetric_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    #[serde(default, rename = "payloadPath", skip_serializing_if = "Vec::is_empty")]
    pub payload_path: Vec<String>,
}

/// The opaque payload nested inside `meta.data`: at minimum the recipient
/// list a decryptor needs; anything else the remote service put there is
/// preserved verbatim in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaData {
    #[serde(default)]
    pub recipients: Vec<Recipient>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkMeta {
    #[serde(rename = "mapId")]
    pub map_id: String,
    pub process: Process,
    pub action: String,
    pub priority: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "outDegree", default)]
    pub out_degree: i32,
    #[serde(rename = "prevLinkHash", default, with = "base64_bytes_opt")]
    pub prev_link_hash: Option<Vec<u8>>,
    #[serde(default)]
    pub data: MetaData,
}

/// A link's binary `data` payload is represented on the wire as base64 once
/// encrypted, and as an opaque JSON value once the plaintext has been
/// written back by the decryptor (see `TraceClient`'s reflective walk).
/// `LinkData` captures both states without forcing every consumer to know
/// which one it is holding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LinkData {
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Plain(String),
}

impl LinkData {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            LinkData::Bytes(b) => b,
            LinkData::Plain(s) => s.as_bytes(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            LinkData::Bytes(b) => b,
            LinkData::Plain(s) => s.into_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub version: String,
    pub data: LinkData,
    pub meta: LinkMeta,
    #[serde(default)]
    pub signatures: Vec<Signature>,
}

impl Link {
    /// Canonical link hash. `chainscript`'s real hash covers the signed
    /// encoding of the whole link; this stands in for it (non-goal: the
    /// hashing/signing algorithm itself lives outside this connector).
    pub fn hash(&self) -> Result<Vec<u8>, CommonError> {
        let canonical = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(hasher.finalize().to_vec())
    }

    /// True if a signature from `public_key` is already attached.
    pub fn signed_by(&self, public_key: &str) -> bool {
        self.signatures.iter().any(|s| s.public_key == public_key)
    }
}

/// Builds a [`Link`] that is well-formed with respect to its workflow and
/// map placement, mirroring the source's link-building helper: every link
/// belongs to a `mapId` inside a workflow, and a link built as the child of
/// a parent has its priority bumped above the parent's.
pub struct LinkBuilder {
    workflow_id: String,
    map_id: String,
    action: String,
    data: Vec<u8>,
    tags: Vec<String>,
    parent: Option<(Vec<u8>, f64)>,
}

impl LinkBuilder {
    pub fn new(workflow_id: impl Into<String>, map_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            map_id: map_id.into(),
            action: action.into(),
            data: Vec::new(),
            tags: Vec::new(),
            parent: None,
        }
    }

    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Parent this link under `prev_link_hash`/`prev_priority`; the built
    /// link's priority is auto-incremented above the parent's.
    pub fn parent(mut self, prev_link_hash: Vec<u8>, prev_priority: f64) -> Self {
        self.parent = Some((prev_link_hash, prev_priority));
        self
    }

    pub fn build(self) -> Link {
        let (prev_link_hash, priority) = match self.parent {
            Some((hash, prev_priority)) => (Some(hash), prev_priority + 1.0),
            None => (None, 1.0),
        };
        Link {
            version: "1.0.0".to_string(),
            data: LinkData::Bytes(self.data),
            meta: LinkMeta {
                map_id: self.map_id,
                process: Process { name: self.workflow_id, state: None },
                action: self.action,
                priority,
                tags: self.tags,
                out_degree: 0,
                prev_link_hash,
                data: MetaData::default(),
            },
            signatures: Vec::new(),
        }
    }
}

/// A link plus its computed hash; `link_hash` is authoritative when present
/// (the remote service may have computed it from a different encoding than
/// a locally recomputed `Link::hash`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "raw")]
    pub link: Link,
    pub meta: SegmentMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentMeta {
    #[serde(rename = "linkHash", default, with = "base64_bytes_opt")]
    pub link_hash: Option<Vec<u8>>,
}

impl Segment {
    pub fn link_hash(&self) -> Result<Vec<u8>, CommonError> {
        match &self.meta.link_hash {
            Some(h) => Ok(h.clone()),
            None => self.link.hash(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(rename = "workflowID")]
    pub workflow_id: String,
    pub cursor: crate::Cursor,
}

pub type WorkflowStates = HashMap<String, crate::Cursor>;

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_opt {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_str(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(d)?;
        s.map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom)).transpose()
    }
}
