use serde::{Deserialize, Serialize};

/// W3C element identifier key used in element references.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Every WebDriver response wraps its payload in `{"value": ...}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ValueResponse<T> {
    pub value: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorValue {
    pub error: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewSession {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ElementRef {
    #[serde(rename = "element-6066-11e4-a52e-4f735466cecf")]
    pub id: String,
}

/// Cookie as accepted by `POST /session/{id}/cookie`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    /// Seconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_ref_uses_w3c_key() {
        let json = format!(r#"{{"{ELEMENT_KEY}": "abc-123"}}"#);
        let el: ElementRef = serde_json::from_str(&json).unwrap();
        assert_eq!(el.id, "abc-123");
    }

    #[test]
    fn cookie_skips_missing_optionals() {
        let cookie = Cookie {
            name: "auth_token".into(),
            value: "v".into(),
            domain: Some(".x.com".into()),
            path: None,
            secure: true,
            http_only: true,
            expiry: None,
        };
        let json = serde_json::to_value(&cookie).unwrap();
        assert_eq!(json["httpOnly"], true);
        assert!(json.get("path").is_none());
        assert!(json.get("expiry").is_none());
    }
}
