//! Pairing tokens and remote control codes.
//!
//! A code is `base64(url + "|" + token)`: everything a sender needs to
//! reach the relay and authenticate.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use url::Url;
use uuid::Uuid;

use crate::error::RemoteError;

/// Byte length of a pairing token (hyphenated UUID text).
pub const TOKEN_LEN: usize = 36;

/// Public relay address plus the token a peer must present first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingCode {
    pub url: Url,
    pub token: String,
}

impl PairingCode {
    /// Pair `url` with a fresh random token.
    #[must_use]
    pub fn generate(url: Url) -> Self {
        Self {
            url,
            token: Uuid::new_v4().to_string(),
        }
    }

    /// The shareable remote control code.
    #[must_use]
    pub fn encode(&self) -> String {
        STANDARD.encode(format!("{}|{}", self.url, self.token))
    }

    /// Parse a remote control code.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidCode`] when the code is not base64, has
    /// no separator, carries an invalid URL or a token of the wrong length.
    pub fn decode(code: &str) -> Result<Self, RemoteError> {
        let bytes = STANDARD
            .decode(code.trim())
            .map_err(|err| RemoteError::InvalidCode(err.to_string()))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| RemoteError::InvalidCode("not utf-8".into()))?;
        let (url, token) = text
            .rsplit_once('|')
            .ok_or_else(|| RemoteError::InvalidCode("missing separator".into()))?;
        if token.len() != TOKEN_LEN {
            return Err(RemoteError::InvalidCode("token has the wrong length".into()));
        }
        let url = Url::parse(url).map_err(|err| RemoteError::InvalidCode(err.to_string()))?;
        Ok(Self {
            url,
            token: token.to_string(),
        })
    }

    /// Host and port to connect to.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidCode`] when the URL lacks either.
    pub fn endpoint(&self) -> Result<(String, u16), RemoteError> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| RemoteError::InvalidCode("url has no host".into()))?;
        let port = self
            .url
            .port_or_known_default()
            .ok_or_else(|| RemoteError::InvalidCode("url has no port".into()))?;
        Ok((host.to_string(), port))
    }
}
