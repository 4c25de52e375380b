//! Reflective decryption of GraphQL response payloads.
//!
//! The source client walks an arbitrary, caller-defined destination struct
//! by runtime reflection, looking for link-shaped subtrees at any depth.
//! Rust has no equivalent runtime reflection over a caller's type, so this
//! walker takes the REDESIGN FLAGS approach instead: operate on the decoded
//! JSON tree (a `serde_json::Value`) before it is deserialized into the
//! caller's destination type, substitute decrypted content in place, and
//! let `serde_json::from_value` drive the second pass into whatever type
//! the caller asked for.
//!
//! Any failure to trial-parse or decrypt a node is silently skipped —
//! only the caller's final deserialization and top-level transport errors
//! are allowed to surface (§4.4: "this replicates... best-effort
//! re-interpretation").

use base64::{engine::general_purpose::STANDARD, Engine};
use common::{Link, Recipient};
use decryptor::Decryptor;
use serde_json::Value;

/// Walk `value` in place, decrypting any `raw`-shaped or `data`+`meta.recipients`-shaped
/// subtree addressed to this node.
pub fn walk_and_decrypt(value: &mut Value, decryptor: &Decryptor) {
    match value {
        Value::Array(items) => {
            for item in items.iter_mut() {
                walk_and_decrypt(item, decryptor);
            }
        }
        Value::Object(map) => {
            if let Some(raw) = map.get("raw").cloned() {
                if let Ok(mut link) = serde_json::from_value::<Link>(raw) {
                    if decryptor.decrypt_link(&mut link).is_ok() {
                        if let Ok(encoded) = serde_json::to_value(&link) {
                            map.insert("raw".to_string(), encoded);
                        }
                    }
                }
            }

            try_decrypt_data_field(map, decryptor);

            for (_, child) in map.iter_mut() {
                walk_and_decrypt(child, decryptor);
            }
        }
        _ => {}
    }
}

fn try_decrypt_data_field(map: &mut serde_json::Map<String, Value>, decryptor: &Decryptor) {
    let Some(data_value) = map.get("data") else { return };
    if is_empty(data_value) {
        return;
    }
    let Some(recipients_value) = map.get("meta").and_then(|m| m.get("recipients")).cloned() else {
        return;
    };
    let Ok(recipients) = serde_json::from_value::<Vec<Recipient>>(recipients_value) else {
        return;
    };
    if recipients.is_empty() {
        return;
    }
    let Some(cipher_bytes) = decode_data_bytes(data_value) else { return };
    let Ok(plain) = decryptor.decrypt_link_data(&cipher_bytes, &recipients) else { return };

    // Best-effort destination typing: a plain JSON string satisfies both a
    // `String` destination field (the common case, §4.4 scenario 5) and a
    // dynamic `serde_json::Value`/`interface{}`-style destination. Callers
    // that need the exact bytes back (a `Vec<u8>` field) should deserialize
    // through `common::model::LinkData`, which accepts this representation.
    map.insert("data".to_string(), Value::String(String::from_utf8_lossy(&plain).into_owned()));
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn decode_data_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => STANDARD.decode(s).ok(),
        Value::Array(items) => items.iter().map(|v| v.as_u64().map(|n| n as u8)).collect(),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    use rsa::RsaPrivateKey;

    fn test_decryptor() -> Decryptor {
        let key = RsaPrivateKey::new(&mut rand_core::OsRng, 2048).unwrap();
        Decryptor::from_pem(&key.to_pkcs8_pem(LineEnding::LF).unwrap()).unwrap()
    }

    #[test]
    fn decrypts_nested_raw_link() {
        let decryptor = test_decryptor();
        let (ciphertext, recipients) =
            Decryptor::encrypt_link_data(b"plaintext-data", &[decryptor.public_key_pem()]).unwrap();
        let link = common::model::LinkBuilder::new("wf", "map", "init").data(ciphertext).build();
        let mut link = link;
        link.meta.data = common::model::MetaData { recipients, extra: Default::default() };

        let mut tree = serde_json::json!({
            "workflow": { "links": { "edges": [ { "node": { "raw": serde_json::to_value(&link).unwrap() } } ] } }
        });
        walk_and_decrypt(&mut tree, &decryptor);

        let decrypted_raw = &tree["workflow"]["links"]["edges"][0]["node"]["raw"];
        assert_eq!(decrypted_raw["data"], serde_json::json!("plaintext-data"));
    }

    #[test]
    fn decrypts_sibling_data_and_meta_shape() {
        let decryptor = test_decryptor();
        let (ciphertext, recipients) =
            Decryptor::encrypt_link_data(b"side-channel", &[decryptor.public_key_pem()]).unwrap();

        let mut tree = serde_json::json!({
            "link": {
                "data": STANDARD.encode(&ciphertext),
                "meta": { "recipients": serde_json::to_value(&recipients).unwrap() }
            }
        });
        walk_and_decrypt(&mut tree, &decryptor);
        assert_eq!(tree["link"]["data"], serde_json::json!("side-channel"));
    }

    #[test]
    fn leaves_unrelated_raw_string_field_untouched() {
        let decryptor = test_decryptor();
        let mut tree = serde_json::json!({ "sibling": { "raw": "not a link" } });
        walk_and_decrypt(&mut tree, &decryptor);
        assert_eq!(tree["sibling"]["raw"], serde_json::json!("not a link"));
    }
}
