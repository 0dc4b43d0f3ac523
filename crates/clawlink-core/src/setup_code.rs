//! Setup codes: base64 JSON `{url, token}` for out-of-band pairing.

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
};
use serde::{Deserialize, Serialize};

use crate::{endpoint::GatewayEndpoint, error::SetupCodeError};

/// Decoded setup code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupCode {
    /// Gateway URL
    pub url: String,
    /// Bearer token
    #[serde(default)]
    pub token: String,
}

impl SetupCode {
    /// Decode a setup code, with or without a `scheme://` prefix.
    ///
    /// # Errors
    ///
    /// - `SetupCodeError::Base64` if the body is not base64 in any alphabet
    /// - `SetupCodeError::Json` if it does not decode to `{url, token}`
    /// - `SetupCodeError::MissingUrl` if `url` is blank
    pub fn decode(raw: &str) -> Result<Self, SetupCodeError> {
        let trimmed = raw.trim();
        let body = trimmed.split_once("://").map_or(trimmed, |(_, body)| body).trim();

        let bytes = [STANDARD, URL_SAFE, STANDARD_NO_PAD, URL_SAFE_NO_PAD]
            .iter()
            .find_map(|engine| engine.decode(body).ok())
            .ok_or(SetupCodeError::Base64)?;

        let code: Self =
            serde_json::from_slice(&bytes).map_err(|e| SetupCodeError::Json(e.to_string()))?;
        if code.url.trim().is_empty() {
            return Err(SetupCodeError::MissingUrl);
        }
        Ok(code)
    }

    /// Encode as standard padded base64, without a prefix.
    pub fn encode(&self) -> String {
        let json = serde_json::json!({ "url": self.url, "token": self.token });
        STANDARD.encode(json.to_string())
    }

    /// Endpoint described by this code.
    pub fn into_endpoint(self) -> GatewayEndpoint {
        GatewayEndpoint::new(self.url, self.token)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn decodes_prefixed_code() {
        let body = STANDARD.encode(r#"{"url":"wss://gw.example","token":"tok"}"#);
        let code = SetupCode::decode(&format!("  openclaw://{body}\n")).unwrap();

        assert_eq!(code.url, "wss://gw.example");
        assert_eq!(code.token, "tok");
    }

    #[test]
    fn decodes_url_safe_unpadded() {
        let json = r#"{"url":"ws://h/??>>","token":"~~~"}"#;
        let body = URL_SAFE_NO_PAD.encode(json);
        assert_eq!(SetupCode::decode(&body).unwrap().url, "ws://h/??>>");
    }

    #[test]
    fn token_defaults_to_empty() {
        let body = STANDARD.encode(r#"{"url":"ws://gw"}"#);
        assert_eq!(SetupCode::decode(&body).unwrap().token, "");
    }

    #[test]
    fn errors() {
        assert_eq!(SetupCode::decode("!!!"), Err(SetupCodeError::Base64));
        assert!(matches!(
            SetupCode::decode(&STANDARD.encode("[1]")),
            Err(SetupCodeError::Json(_))
        ));
        assert_eq!(
            SetupCode::decode(&STANDARD.encode(r#"{"url":"  ","token":"t"}"#)),
            Err(SetupCodeError::MissingUrl)
        );
    }

    #[test]
    fn into_endpoint_carries_credentials() {
        let endpoint = SetupCode { url: "ws://gw".into(), token: "Bearer t".into() }.into_endpoint();
        assert_eq!(endpoint.url, "ws://gw");
        assert_eq!(endpoint.bare_token(), "t");
        assert_eq!(endpoint.password, None);
    }

    proptest! {
        #[test]
        fn encoded_codes_decode_with_any_prefix(
            url in "[a-z]{1,12}://[a-z0-9.:/]{1,24}",
            token in "[ -~]{0,40}",
            prefix in prop::option::of("[a-z]{1,10}"),
        ) {
            let code = SetupCode { url, token };
            let encoded = code.encode();
            let raw = match prefix {
                Some(scheme) => format!("{scheme}://{encoded}"),
                None => encoded,
            };

            prop_assert_eq!(SetupCode::decode(&raw).unwrap(), code);
        }
    }
}
