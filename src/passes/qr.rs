use serde::{Deserialize, Serialize};

use crate::db::Pass;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QrPayload {
    pub id: String,
    pub code: String,
}

impl From<&Pass> for QrPayload {
    fn from(pass: &Pass) -> Self {
        Self {
            id: pass.id.clone(),
            code: pass.code.clone(),
        }
    }
}

/// Result of reading scanned QR text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Payload(QrPayload),
    /// Not a pass payload; the text is passed on as an opaque lookup token.
    Raw(String),
}

impl Decoded {
    /// The string the lookup should match against.
    pub fn token(&self) -> &str {
        match self {
            Decoded::Payload(payload) if !payload.code.trim().is_empty() => &payload.code,
            Decoded::Payload(payload) => &payload.id,
            Decoded::Raw(raw) => raw,
        }
    }
}

/// QR text for a pass: `{"id": .., "code": ..}`.
pub fn encode(pass: &Pass) -> String {
    serde_json::json!({ "id": pass.id, "code": pass.code }).to_string()
}

pub fn decode(text: &str) -> Decoded {
    match serde_json::from_str::<QrPayload>(text.trim()) {
        Ok(payload) => Decoded::Payload(payload),
        Err(_) => Decoded::Raw(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_exactly_id_and_code() {
        let mut pass = Pass::new("abc", "CP-7Q2K", "Ada");
        pass.host = "Ops".into();

        let value: serde_json::Value = serde_json::from_str(&encode(&pass)).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(object["id"], "abc");
        assert_eq!(object["code"], "CP-7Q2K");
    }

    #[test]
    fn decodes_payload_and_prefers_code_token() {
        let decoded = decode(r#" {"id":"abc","code":"CP-7Q2K"} "#);
        assert_eq!(
            decoded,
            Decoded::Payload(QrPayload {
                id: "abc".into(),
                code: "CP-7Q2K".into()
            })
        );
        assert_eq!(decoded.token(), "CP-7Q2K");
    }

    #[test]
    fn non_json_text_is_raw() {
        let decoded = decode("CP-7Q2K");
        assert_eq!(decoded, Decoded::Raw("CP-7Q2K".into()));
        assert_eq!(decoded.token(), "CP-7Q2K");

        assert!(matches!(decode("{broken"), Decoded::Raw(_)));
    }
}
