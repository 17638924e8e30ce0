//! Presigned URL signing.
//!
//! A presigned URL carries the object key in its path and the expiry,
//! optional response overrides and an HMAC-SHA256 signature in its query.
//! The HTTP method is covered by the signature but not carried in the URL,
//! so a GET URL cannot be replayed as a PUT.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use super::{HttpMethod, PresignRequest};
use crate::{CairnError, Result};

type HmacSha256 = Hmac<Sha256>;

const EXPIRES: &str = "expires";
const CONTENT_TYPE: &str = "response-content-type";
const CONTENT_DISPOSITION: &str = "response-content-disposition";
const SIGNATURE: &str = "signature";

/// What a verified URL grants access to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRequest {
    /// Object key.
    pub key: String,
    /// Content type to serve the object with, if overridden.
    pub content_type: Option<String>,
    /// Content disposition to serve the object with, if overridden.
    pub content_disposition: Option<String>,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies presigned URLs with a shared secret.
#[derive(Clone)]
pub struct UrlSigner {
    key: Vec<u8>,
    base_url: Url,
}

impl UrlSigner {
    /// Create a signer issuing URLs under `base_url`.
    pub fn new(key: impl AsRef<[u8]>, base_url: Url) -> Result<Self> {
        if key.as_ref().is_empty() {
            return Err(CairnError::Config("signing key cannot be empty".to_string()));
        }
        if base_url.cannot_be_a_base() {
            return Err(CairnError::Config(format!(
                "public URL cannot carry object paths: {base_url}"
            )));
        }
        Ok(Self {
            key: key.as_ref().to_vec(),
            base_url,
        })
    }

    /// Base URL objects are served under.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Sign a request, with the expiry counted from now.
    pub fn sign(&self, request: &PresignRequest) -> Result<Url> {
        self.sign_at(request, Utc::now())
    }

    /// Sign a request, with the expiry counted from `now`.
    pub fn sign_at(&self, request: &PresignRequest, now: DateTime<Utc>) -> Result<Url> {
        let expires_in = chrono::Duration::from_std(request.expires_in)
            .map_err(|e| CairnError::InvalidArgument(format!("invalid URL validity: {e}")))?;
        let expires = (now + expires_in).timestamp();

        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                CairnError::Config(format!("public URL cannot carry object paths: {}", self.base_url))
            })?;
            segments.pop_if_empty();
            for segment in request.key.split('/') {
                segments.push(segment);
            }
        }

        let signature = self.signature(
            request.method,
            &request.key,
            expires,
            request.content_type.as_deref(),
            request.content_disposition.as_deref(),
        )?;

        {
            let mut query = url.query_pairs_mut();
            query.clear();
            query.append_pair(EXPIRES, &expires.to_string());
            if let Some(ref content_type) = request.content_type {
                query.append_pair(CONTENT_TYPE, content_type);
            }
            if let Some(ref disposition) = request.content_disposition {
                query.append_pair(CONTENT_DISPOSITION, disposition);
            }
            query.append_pair(SIGNATURE, &signature);
        }

        Ok(url)
    }

    /// Verify a URL for the given method against the current time.
    pub fn verify(&self, url: &Url, method: HttpMethod) -> Result<VerifiedRequest> {
        self.verify_at(url, method, Utc::now())
    }

    /// Verify a URL for the given method as of `now`.
    pub fn verify_at(
        &self,
        url: &Url,
        method: HttpMethod,
        now: DateTime<Utc>,
    ) -> Result<VerifiedRequest> {
        let key = self.key_from_url(url)?;

        let mut expires = None;
        let mut content_type = None;
        let mut content_disposition = None;
        let mut signature = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                EXPIRES => expires = Some(value.into_owned()),
                CONTENT_TYPE => content_type = Some(value.into_owned()),
                CONTENT_DISPOSITION => content_disposition = Some(value.into_owned()),
                SIGNATURE => signature = Some(value.into_owned()),
                _ => {}
            }
        }

        let expires: i64 = expires
            .ok_or_else(|| CairnError::Signature("missing expiry".to_string()))?
            .parse()
            .map_err(|_| CairnError::Signature("malformed expiry".to_string()))?;
        let signature = signature.ok_or_else(|| CairnError::Signature("missing signature".to_string()))?;
        let payload = string_to_sign(
            method,
            &key,
            expires,
            content_type.as_deref(),
            content_disposition.as_deref(),
        );
        verify_payload(&self.key, payload.as_bytes(), &signature)?;

        let expires_at = DateTime::from_timestamp(expires, 0)
            .ok_or_else(|| CairnError::Signature("malformed expiry".to_string()))?;
        if now.timestamp() > expires {
            return Err(CairnError::Signature(format!("URL expired at {expires_at}")));
        }

        Ok(VerifiedRequest {
            key,
            content_type,
            content_disposition,
            expires_at,
        })
    }

    fn key_from_url(&self, url: &Url) -> Result<String> {
        if url.scheme() != self.base_url.scheme()
            || url.host_str() != self.base_url.host_str()
            || url.port_or_known_default() != self.base_url.port_or_known_default()
        {
            return Err(CairnError::Signature("URL was not issued by this store".to_string()));
        }

        let base: Vec<&str> = self
            .base_url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        let path: Vec<&str> = url
            .path_segments()
            .map(|s| s.collect())
            .unwrap_or_default();

        if path.len() <= base.len() || path[..base.len()] != base[..] {
            return Err(CairnError::Signature("URL was not issued by this store".to_string()));
        }

        let decoded: Vec<String> = path[base.len()..]
            .iter()
            .map(|segment| {
                urlencoding::decode(segment)
                    .map(|s| s.into_owned())
                    .map_err(|_| CairnError::Signature("malformed object path".to_string()))
            })
            .collect::<Result<_>>()?;

        Ok(decoded.join("/"))
    }

    fn signature(
        &self,
        method: HttpMethod,
        key: &str,
        expires: i64,
        content_type: Option<&str>,
        content_disposition: Option<&str>,
    ) -> Result<String> {
        let payload = string_to_sign(method, key, expires, content_type, content_disposition);
        sign_payload(&self.key, payload.as_bytes())
    }
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

fn mac(key: &[u8]) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key).map_err(|e| CairnError::Config(format!("invalid signing key: {e}")))
}

/// HMAC-SHA256 of `payload` under `key`, base64url encoded without padding.
pub(super) fn sign_payload(key: &[u8], payload: &[u8]) -> Result<String> {
    let mut mac = mac(key)?;
    mac.update(payload);
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Check a signature produced by [`sign_payload`] in constant time.
pub(super) fn verify_payload(key: &[u8], payload: &[u8], signature: &str) -> Result<()> {
    let signature = URL_SAFE_NO_PAD
        .decode(signature.as_bytes())
        .map_err(|_| CairnError::Signature("malformed signature".to_string()))?;
    let mut mac = mac(key)?;
    mac.update(payload);
    mac.verify_slice(&signature)
        .map_err(|_| CairnError::Signature("signature mismatch".to_string()))
}

fn string_to_sign(
    method: HttpMethod,
    key: &str,
    expires: i64,
    content_type: Option<&str>,
    content_disposition: Option<&str>,
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}",
        method.as_str(),
        key,
        expires,
        content_type.unwrap_or(""),
        content_disposition.unwrap_or("")
    )
}
