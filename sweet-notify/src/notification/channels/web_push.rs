//! Browser push delivery.
//!
//! Payloads are encrypted with `aes128gcm` (RFC 8291) and authorized with
//! VAPID (RFC 8292). Every subscription is attempted independently; one that
//! fails for any reason is removed from the notifiee.

use std::sync::Arc;
use std::time::Duration;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit};
use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::ecdsa::SigningKey;
use p256::ecdsa::signature::Signer;
use p256::elliptic_curve::rand_core::{OsRng, RngCore};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info, warn};
use url::Url;

use super::{ChannelReport, DEFAULT_DELIVERY_TIMEOUT, with_timeout};
use crate::database::repositories::PushTargetRepository;
use crate::notification::error::NotifyError;
use crate::notification::payload::{NotificationPayload, raster_image};
use crate::utils::http_client::build_push_client;
use crate::utils::text::{truncate_bytes, truncate_chars};
use crate::{Error, Result};

const CHANNEL: &str = "web_push";

const SALT_LEN: usize = 16;
const PUBLIC_KEY_LEN: usize = 65;
const AUTH_SECRET_LEN: usize = 16;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = SALT_LEN + 4 + 1 + PUBLIC_KEY_LEN;
const RECORD_SIZE: u32 = 4096;
/// Push services reject encrypted bodies larger than this.
const MAX_ENCRYPTED_BODY_BYTES: usize = 4096;
/// Cap on the serialized message, well inside a single record.
const MAX_PAYLOAD_BYTES: usize = 3500;
const MAX_BODY_CHARS: usize = 1000;
const DEFAULT_CONCURRENCY: usize = 16;
const DEFAULT_TTL_SECS: u32 = 24 * 60 * 60;
const VAPID_JWT_EXP_SECS: i64 = 12 * 60 * 60;
const VAPID_JWT_SKEW_SECS: i64 = 60;

const IKM_INFO_PREFIX: &[u8] = b"WebPush: info\0";
const KEY_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

/// The JSON message shown by the service worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebPushMessage {
    pub body: String,
    #[serde(rename = "imageURL")]
    pub image_url: String,
    pub link: String,
}

impl WebPushMessage {
    pub fn new(payload: &NotificationPayload, link: &str) -> Self {
        Self {
            body: truncate_chars(&payload.plain_text(), MAX_BODY_CHARS),
            image_url: raster_image(&payload.image),
            link: link.to_string(),
        }
    }

    /// Serialize the message in at most `max_bytes`, shortening the body (and
    /// then dropping the image) until it fits.
    pub fn to_json_capped(&self, max_bytes: usize) -> Result<String> {
        let mut message = self.clone();
        loop {
            let json = serde_json::to_string(&message)?;
            if json.len() <= max_bytes {
                return Ok(json);
            }
            let overflow = json.len() - max_bytes;
            if !message.body.is_empty() {
                let target = message.body.len().saturating_sub(overflow);
                message.body = truncate_bytes(&message.body, target);
            } else if !message.image_url.is_empty() {
                message.image_url.clear();
            } else {
                return Err(Error::Other(format!(
                    "Web push message is {} bytes, limit is {}",
                    json.len(),
                    max_bytes
                )));
            }
        }
    }
}

/// Sends one serialized message to one serialized subscription.
#[async_trait]
pub trait WebPushSender: Send + Sync {
    async fn send(&self, subscription: &str, message: &str) -> Result<()>;
}

/// VAPID key pair and contact used to authorize push requests.
#[derive(Clone)]
pub struct WebPushConfig {
    vapid_public_key_b64: String,
    vapid_private_key_raw: [u8; 32],
    vapid_subject: String,
    ttl_secs: u32,
}

impl std::fmt::Debug for WebPushConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebPushConfig")
            .field("vapid_public_key_b64", &self.vapid_public_key_b64)
            .field("vapid_subject", &self.vapid_subject)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl WebPushConfig {
    pub fn new(
        vapid_public_key_b64: &str,
        vapid_private_key_b64: &str,
        vapid_subject: impl Into<String>,
    ) -> Result<Self> {
        let public_raw = decode_b64url(vapid_public_key_b64)
            .map_err(|e| Error::config(format!("Invalid WEB_PUSH_VAPID_PUBLIC_KEY: {}", e)))?;
        if public_raw.len() != PUBLIC_KEY_LEN {
            return Err(Error::config(format!(
                "WEB_PUSH_VAPID_PUBLIC_KEY must decode to {} bytes",
                PUBLIC_KEY_LEN
            )));
        }

        let private_raw: [u8; 32] = decode_b64url(vapid_private_key_b64)
            .map_err(|e| Error::config(format!("Invalid WEB_PUSH_VAPID_PRIVATE_KEY: {}", e)))?
            .try_into()
            .map_err(|_| Error::config("WEB_PUSH_VAPID_PRIVATE_KEY must decode to 32 bytes"))?;
        SigningKey::from_bytes(&private_raw.into())
            .map_err(|_| Error::config("WEB_PUSH_VAPID_PRIVATE_KEY is not a valid P-256 key"))?;

        Ok(Self {
            vapid_public_key_b64: vapid_public_key_b64.trim_end_matches('=').to_string(),
            vapid_private_key_raw: private_raw,
            vapid_subject: vapid_subject.into(),
            ttl_secs: DEFAULT_TTL_SECS,
        })
    }

    /// Read the VAPID configuration from the environment.
    ///
    /// Returns `Ok(None)` when neither key is set, which disables web push.
    pub fn from_env() -> Result<Option<Self>> {
        let public = non_empty_env("WEB_PUSH_VAPID_PUBLIC_KEY");
        let private = non_empty_env("WEB_PUSH_VAPID_PRIVATE_KEY");

        let (public, private) = match (public, private) {
            (None, None) => return Ok(None),
            (Some(public), Some(private)) => (public, private),
            _ => {
                return Err(Error::config(
                    "Both WEB_PUSH_VAPID_PUBLIC_KEY and WEB_PUSH_VAPID_PRIVATE_KEY must be set",
                ));
            }
        };
        let subject = non_empty_env("WEB_PUSH_VAPID_SUBJECT")
            .unwrap_or_else(|| "mailto:admin@localhost".to_string());

        let mut config = Self::new(&public, &private, subject)?;
        if let Some(ttl) = non_empty_env("WEB_PUSH_TTL_SECS") {
            let ttl_secs = ttl
                .parse()
                .map_err(|_| Error::config(format!("Invalid WEB_PUSH_TTL_SECS: {}", ttl)))?;
            config = config.with_ttl_secs(ttl_secs);
        }
        Ok(Some(config))
    }

    pub fn with_ttl_secs(mut self, ttl_secs: u32) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn vapid_public_key_b64(&self) -> &str {
        &self.vapid_public_key_b64
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
struct CachedVapidJwt {
    jwt: String,
    exp_unix: i64,
}

#[derive(Debug, Deserialize)]
struct SubscriptionInfo {
    endpoint: String,
    keys: SubscriptionKeys,
}

#[derive(Debug, Deserialize)]
struct SubscriptionKeys {
    p256dh: String,
    auth: String,
}

/// Production web push sender.
pub struct VapidWebPushSender {
    config: WebPushConfig,
    signing_key: SigningKey,
    client: reqwest::Client,
    vapid_jwt_cache: DashMap<String, CachedVapidJwt>,
}

impl VapidWebPushSender {
    pub fn new(config: WebPushConfig, request_timeout: Duration) -> Result<Self> {
        let signing_key = SigningKey::from_bytes(&config.vapid_private_key_raw.into())
            .map_err(|_| Error::config("Invalid VAPID private key"))?;
        Ok(Self {
            config,
            signing_key,
            client: build_push_client(request_timeout)?,
            vapid_jwt_cache: DashMap::new(),
        })
    }

    fn vapid_jwt(&self, aud: &str) -> Result<String> {
        let now = Utc::now().timestamp();
        if let Some(entry) = self.vapid_jwt_cache.get(aud)
            && entry.exp_unix - VAPID_JWT_SKEW_SECS > now
        {
            return Ok(entry.jwt.clone());
        }

        let exp_unix = now + VAPID_JWT_EXP_SECS;
        let jwt = sign_vapid_jwt(&self.signing_key, aud, &self.config.vapid_subject, exp_unix)?;
        self.vapid_jwt_cache.insert(
            aud.to_string(),
            CachedVapidJwt {
                jwt: jwt.clone(),
                exp_unix,
            },
        );
        Ok(jwt)
    }
}

#[async_trait]
impl WebPushSender for VapidWebPushSender {
    async fn send(&self, subscription: &str, message: &str) -> Result<()> {
        let info: SubscriptionInfo = serde_json::from_str(subscription)?;
        let client_public = decode_key::<PUBLIC_KEY_LEN>(&info.keys.p256dh, "p256dh")?;
        let client_auth = decode_key::<AUTH_SECRET_LEN>(&info.keys.auth, "auth")?;

        let aud = push_service_audience(&info.endpoint)?;
        let jwt = self.vapid_jwt(&aud)?;
        let body = encrypt_aes128gcm(message.as_bytes(), &client_public, &client_auth)?;

        let response = self
            .client
            .post(&info.endpoint)
            .header("TTL", self.config.ttl_secs.to_string())
            .header("Content-Encoding", "aes128gcm")
            .header("Content-Type", "application/octet-stream")
            .header(
                "Authorization",
                format!("vapid t={}, k={}", jwt, self.config.vapid_public_key_b64()),
            )
            .header("Urgency", "normal")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body_text = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read response body>".to_string());
        Err(Error::Other(format!(
            "Push service rejected message: status {} body {}",
            status,
            truncate_chars(&body_text, 500)
        )))
    }
}

/// Delivers a notification to every browser subscription of a user.
pub struct WebPushChannel {
    sender: Arc<dyn WebPushSender>,
    targets: Arc<dyn PushTargetRepository>,
    concurrency: usize,
    timeout: Duration,
}

impl WebPushChannel {
    pub fn new(sender: Arc<dyn WebPushSender>, targets: Arc<dyn PushTargetRepository>) -> Self {
        Self {
            sender,
            targets,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send `message` to each of `subscriptions`. Failed subscriptions are
    /// removed from `user_id`; the others are unaffected.
    pub async fn deliver(
        &self,
        user_id: &str,
        subscriptions: Vec<String>,
        message: &WebPushMessage,
    ) -> ChannelReport {
        if subscriptions.is_empty() {
            return ChannelReport::skipped();
        }

        let mut report = ChannelReport {
            attempted: subscriptions.len(),
            ..ChannelReport::default()
        };

        // An unbuildable message prunes nothing.
        let message = match message.to_json_capped(MAX_PAYLOAD_BYTES) {
            Ok(message) => message,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Web push message could not be built");
                report
                    .failures
                    .push(NotifyError::delivery(CHANNEL, e.to_string()));
                return report;
            }
        };

        let outcomes: Vec<(String, std::result::Result<(), String>)> = stream::iter(subscriptions)
            .map(|subscription| {
                let message = message.as_str();
                async move {
                    let outcome =
                        with_timeout(self.timeout, self.sender.send(&subscription, message)).await;
                    (subscription, outcome)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (subscription, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    warn!(
                        user_id = %user_id,
                        endpoint = %subscription_endpoint(&subscription),
                        error = %reason,
                        "Web push subscription not working, removing it"
                    );
                    match self
                        .targets
                        .remove_web_push_subscription(user_id, &subscription)
                        .await
                    {
                        Ok(removed) => report.pruned += removed as usize,
                        Err(e) => warn!(
                            user_id = %user_id,
                            error = %e,
                            "Failed to remove web push subscription"
                        ),
                    }
                    report.failures.push(NotifyError::delivery(CHANNEL, reason));
                }
            }
        }

        if report.pruned > 0 {
            info!(user_id = %user_id, pruned = report.pruned, "Pruned web push subscriptions");
        }
        debug!(
            user_id = %user_id,
            attempted = report.attempted,
            delivered = report.delivered,
            "Web push delivery finished"
        );
        report
    }
}

/// Best-effort endpoint for logs, never the keys.
fn subscription_endpoint(subscription: &str) -> String {
    serde_json::from_str::<SubscriptionInfo>(subscription)
        .map(|info| info.endpoint)
        .unwrap_or_else(|_| "<invalid subscription>".to_string())
}

fn push_service_audience(endpoint: &str) -> Result<String> {
    let url = Url::parse(endpoint)
        .map_err(|e| Error::Other(format!("Invalid push endpoint URL: {}", e)))?;
    let host = url
        .host()
        .ok_or_else(|| Error::Other("Push endpoint missing host".to_string()))?;

    let host = match host {
        url::Host::Domain(d) => d.to_string(),
        url::Host::Ipv4(ip) => ip.to_string(),
        url::Host::Ipv6(ip) => format!("[{}]", ip),
    };

    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

fn decode_b64url(input: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(input.trim().trim_end_matches('=').as_bytes())
}

fn encode_b64url(input: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(input)
}

fn decode_key<const N: usize>(input: &str, name: &str) -> Result<[u8; N]> {
    decode_b64url(input)
        .map_err(|e| Error::Other(format!("Invalid {} key: {}", name, e)))?
        .try_into()
        .map_err(|_| Error::Other(format!("Invalid {} key length", name)))
}

fn hkdf_sha256<const N: usize>(salt: &[u8], ikm: &[u8], info: &[u8]) -> Result<[u8; N]> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; N];
    hk.expand(info, &mut okm)
        .map_err(|_| Error::Other("HKDF expand failed".to_string()))?;
    Ok(okm)
}

/// Encrypt `plaintext` as a single `aes128gcm` record for the given client
/// keys. The returned body carries the salt and our ephemeral public key in
/// its header.
fn encrypt_aes128gcm(
    plaintext: &[u8],
    client_public_raw: &[u8; PUBLIC_KEY_LEN],
    auth_secret: &[u8; AUTH_SECRET_LEN],
) -> Result<Vec<u8>> {
    if plaintext.is_empty() {
        return Err(Error::Other("Web push payload cannot be empty".to_string()));
    }
    // Header, plaintext, padding delimiter and tag must fit one request body.
    if HEADER_LEN + plaintext.len() + 1 + TAG_LEN > MAX_ENCRYPTED_BODY_BYTES {
        return Err(Error::Other(format!(
            "Web push payload too large: {} bytes",
            plaintext.len()
        )));
    }

    let mut rng = OsRng;
    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);

    let client_public = p256::PublicKey::from_sec1_bytes(client_public_raw)
        .map_err(|_| Error::Other("Invalid client public key".to_string()))?;

    let local_secret = EphemeralSecret::random(&mut rng);
    let local_public = p256::PublicKey::from(&local_secret).to_encoded_point(false);
    let local_public_raw: [u8; PUBLIC_KEY_LEN] = local_public
        .as_bytes()
        .try_into()
        .map_err(|_| Error::Other("Invalid local public key length".to_string()))?;

    let shared_secret = local_secret.diffie_hellman(&client_public);

    let mut key_info = Vec::with_capacity(IKM_INFO_PREFIX.len() + PUBLIC_KEY_LEN * 2);
    key_info.extend_from_slice(IKM_INFO_PREFIX);
    key_info.extend_from_slice(client_public_raw);
    key_info.extend_from_slice(&local_public_raw);

    let ikm: [u8; 32] = hkdf_sha256(
        auth_secret,
        shared_secret.raw_secret_bytes().as_slice(),
        &key_info,
    )?;
    let cek: [u8; 16] = hkdf_sha256(&salt, &ikm, KEY_INFO)?;
    // Single record, so the sequence number is zero and the IV is the nonce.
    let nonce: [u8; 12] = hkdf_sha256(&salt, &ikm, NONCE_INFO)?;

    let cipher = Aes128Gcm::new_from_slice(&cek)
        .map_err(|_| Error::Other("Invalid CEK length".to_string()))?;

    let mut padded = Vec::with_capacity(plaintext.len() + 1);
    padded.extend_from_slice(plaintext);
    padded.push(2); // last record delimiter

    let ciphertext = cipher
        .encrypt((&nonce).into(), padded.as_slice())
        .map_err(|_| Error::Other("AES-GCM encryption failed".to_string()))?;

    let mut body = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(PUBLIC_KEY_LEN as u8);
    body.extend_from_slice(&local_public_raw);
    body.extend_from_slice(&ciphertext);
    Ok(body)
}

fn sign_vapid_jwt(
    signing_key: &SigningKey,
    aud: &str,
    subject: &str,
    exp_unix: i64,
) -> Result<String> {
    #[derive(Serialize)]
    struct Claims<'a> {
        aud: &'a str,
        exp: i64,
        sub: &'a str,
    }

    let header = serde_json::json!({ "typ": "JWT", "alg": "ES256" });
    let claims = Claims {
        aud,
        exp: exp_unix,
        sub: subject,
    };

    let signing_input = format!(
        "{}.{}",
        encode_b64url(serde_json::to_string(&header)?.as_bytes()),
        encode_b64url(serde_json::to_string(&claims)?.as_bytes())
    );
    let signature: p256::ecdsa::Signature = signing_key.sign(signing_input.as_bytes());

    Ok(format!(
        "{}.{}",
        signing_input,
        encode_b64url(signature.to_bytes().as_slice())
    ))
}
