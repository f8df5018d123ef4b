// ── Cognito SRP ──
//
// Client half of the USER_SRP_AUTH flow: the ephemeral `A` value sent
// with InitiateAuth and the PASSWORD_VERIFIER claim. The password is
// only ever used locally to derive `x`.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};

use crate::crypto::{hmac_sha256, sha256, sha256_hex};
use crate::error::Error;

/// RFC 5054 3072-bit group prime.
const N_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AAAC42DAD33170D04507A33A85521ABDF1CBA64",
    "ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6B",
    "F12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB31",
    "43DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF",
);
const G_HEX: &str = "2";
const DERIVED_KEY_INFO: &[u8] = b"Caldera Derived Key";
const TIMESTAMP_FORMAT: &str = "%a %b %-d %H:%M:%S UTC %Y";

/// Challenge parameters of a `PASSWORD_VERIFIER` challenge.
#[derive(Debug, Clone)]
pub struct PasswordVerifierChallenge {
    pub srp_b: String,
    pub salt: String,
    pub secret_block: String,
    pub user_id_for_srp: String,
}

/// Proof values for `RespondToAuthChallenge`.
#[derive(Debug, Clone)]
pub struct PasswordClaim {
    pub user_id_for_srp: String,
    pub secret_block: String,
    pub signature: String,
    pub timestamp: String,
}

/// One SRP exchange. A fresh session (fresh `a`) is required per login.
pub struct SrpSession {
    pool_name: String,
    password: SecretString,
    n: BigUint,
    g: BigUint,
    k: BigUint,
    small_a: BigUint,
    large_a: BigUint,
}

impl fmt::Debug for SrpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrpSession")
            .field("pool_name", &self.pool_name)
            .finish_non_exhaustive()
    }
}

impl SrpSession {
    /// Start an exchange for `user_pool_id` (`{region}_{poolName}`).
    pub fn new(user_pool_id: &str, password: SecretString) -> Result<Self, Error> {
        let mut bytes = [0u8; 128];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::with_private_value(user_pool_id, password, BigUint::from_bytes_be(&bytes))
    }

    fn with_private_value(
        user_pool_id: &str,
        password: SecretString,
        private: BigUint,
    ) -> Result<Self, Error> {
        let pool_name = user_pool_id
            .split_once('_')
            .map(|(_, name)| name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::Srp(format!("malformed user pool id: {user_pool_id}")))?
            .to_owned();

        let n = parse_hex(N_HEX)?;
        let g = parse_hex(G_HEX)?;
        let k = hash_to_int(&decode_hex(&format!("00{N_HEX}0{G_HEX}"))?);

        let small_a = private % &n;
        let large_a = g.modpow(&small_a, &n);
        if (&large_a % &n).bits() == 0 {
            return Err(Error::Srp("degenerate client value A".into()));
        }

        Ok(Self {
            pool_name,
            password,
            n,
            g,
            k,
            small_a,
            large_a,
        })
    }

    /// `SRP_A` as sent in InitiateAuth.
    pub fn srp_a(&self) -> String {
        format!("{:x}", self.large_a)
    }

    /// Answer the challenge at the current time.
    pub fn process_challenge(
        &self,
        challenge: &PasswordVerifierChallenge,
    ) -> Result<PasswordClaim, Error> {
        self.process_challenge_at(challenge, Utc::now())
    }

    /// Answer the challenge with a fixed timestamp.
    pub fn process_challenge_at(
        &self,
        challenge: &PasswordVerifierChallenge,
        now: DateTime<Utc>,
    ) -> Result<PasswordClaim, Error> {
        let key = self.password_authentication_key(
            &challenge.user_id_for_srp,
            &challenge.srp_b,
            &challenge.salt,
        )?;

        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let secret_block = STANDARD
            .decode(&challenge.secret_block)
            .map_err(|e| Error::Srp(format!("SECRET_BLOCK is not valid base64: {e}")))?;

        let mut message = Vec::with_capacity(
            self.pool_name.len() + challenge.user_id_for_srp.len() + secret_block.len() + 32,
        );
        message.extend_from_slice(self.pool_name.as_bytes());
        message.extend_from_slice(challenge.user_id_for_srp.as_bytes());
        message.extend_from_slice(&secret_block);
        message.extend_from_slice(timestamp.as_bytes());

        let signature = STANDARD.encode(hmac_sha256(&key, &message)?);

        Ok(PasswordClaim {
            user_id_for_srp: challenge.user_id_for_srp.clone(),
            secret_block: challenge.secret_block.clone(),
            signature,
            timestamp,
        })
    }

    fn password_authentication_key(
        &self,
        user_id: &str,
        srp_b: &str,
        salt: &str,
    ) -> Result<Vec<u8>, Error> {
        let large_b = parse_hex(srp_b)?;
        if (&large_b % &self.n).bits() == 0 {
            return Err(Error::Srp("server value B is zero mod N".into()));
        }

        let u = hash_to_int(&decode_hex(&format!(
            "{}{}",
            pad_hex(&format!("{:x}", self.large_a)),
            pad_hex(&format!("{large_b:x}"))
        ))?);
        if u.bits() == 0 {
            return Err(Error::Srp("scrambling parameter u is zero".into()));
        }

        let identity = format!(
            "{}{}:{}",
            self.pool_name,
            user_id,
            self.password.expose_secret()
        );
        let x = hash_to_int(&decode_hex(&format!(
            "{}{}",
            pad_hex(salt),
            sha256_hex(identity.as_bytes())
        ))?);

        let kgx = (&self.k * self.g.modpow(&x, &self.n)) % &self.n;
        let base = ((large_b % &self.n) + &self.n - kgx) % &self.n;
        let exponent = &self.small_a + &u * &x;
        let s = base.modpow(&exponent, &self.n);

        let ikm = decode_hex(&pad_hex(&format!("{s:x}")))?;
        let salt = decode_hex(&pad_hex(&format!("{u:x}")))?;
        derive_key(&ikm, &salt)
    }
}

/// `SECRET_HASH` for app clients with a secret:
/// `base64(HMAC-SHA256(client_secret, username ‖ client_id))`.
pub fn secret_hash(username: &str, client_id: &str, client_secret: &[u8]) -> Result<String, Error> {
    let message = format!("{username}{client_id}");
    Ok(STANDARD.encode(hmac_sha256(client_secret, message.as_bytes())?))
}

/// Single-block HKDF-SHA256, truncated to 16 bytes.
fn derive_key(ikm: &[u8], salt: &[u8]) -> Result<Vec<u8>, Error> {
    let prk = hmac_sha256(salt, ikm)?;
    let mut info = DERIVED_KEY_INFO.to_vec();
    info.push(1);
    let mut okm = hmac_sha256(&prk, &info)?;
    okm.truncate(16);
    Ok(okm)
}

/// Left-pad a hex string so it decodes to a positive two's-complement value.
fn pad_hex(hex: &str) -> String {
    if hex.len() % 2 == 1 {
        format!("0{hex}")
    } else if hex.starts_with(|c: char| matches!(c, '8'..='9' | 'a'..='f' | 'A'..='F')) {
        format!("00{hex}")
    } else {
        hex.to_owned()
    }
}

fn parse_hex(hex: &str) -> Result<BigUint, Error> {
    BigUint::parse_bytes(hex.as_bytes(), 16)
        .ok_or_else(|| Error::Srp(format!("invalid hex integer ({} chars)", hex.len())))
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, Error> {
    hex::decode(hex).map_err(|e| Error::Srp(format!("invalid hex: {e}")))
}

fn hash_to_int(data: &[u8]) -> BigUint {
    BigUint::from_bytes_be(&sha256(data))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const POOL: &str = "eu-central-1_AbCdEfGhI";
    const SERVER_B: &str = concat!(
        "76136a71c69ee94724be3f6839b580d01c73e8ea6819b807c29d2e462c00ce9a135f29827b80e362",
        "015694958abc0b340633eec4cf8f96060c7f8a077668b0cc33438e36893582d20f74c3ee4b083bfa",
        "ca2ef0be0682320859c0d820bcb1d41622b374d6c8cfa51bb1d557f27e43c67bda674edbfb5800ca",
        "0b30d7f56ceb20774a9d31dfd3be996a878ca06fc0aca6564563f614b360ddf6c5b962afffa8917a",
        "61613f7730344fee390acb2527ba48ef3f743d2555d9d6b251bbec1394a1235a45f3f6ab2650b037",
        "454ac313ab1bfe44cc459f21448bb529ccf71ee34710ddb5017e1c13d1c2e04fd73ecd4286bd4597",
        "6b84c47421973555b61775df41414a9c3cff5592eb50bcce6e3a302916bc66caeb7fd5456d0c2749",
        "7da9eb8817363eef281de6164a68e3663da14dfe20d92d3c9399235bad6f5c24218fc079f0655273",
        "2dfd8afad0cfca003cff29fd7a8724bb7c4a6c403591c4f7f5ce919934861b766af1cbb4df2ce171",
        "e988b13fe6437e9a4029ae75f85ed500e0f9c3eebd77115b",
    );

    fn fixed_session() -> SrpSession {
        let private = parse_hex(&"7".repeat(64)).unwrap();
        SrpSession::with_private_value(POOL, SecretString::from("hunter2"), private).unwrap()
    }

    #[test]
    fn group_prime_is_3072_bits() {
        assert_eq!(N_HEX.len(), 768);
        assert_eq!(parse_hex(N_HEX).unwrap().bits(), 3072);
    }

    #[test]
    fn multiplier_matches_reference() {
        let session = fixed_session();
        assert_eq!(
            format!("{:x}", session.k),
            "538282c4354742d7cbbde2359fcf67f9f5b3a6b08791e5011b43b8a5b66d9ee6"
        );
    }

    #[test]
    fn client_value_a() {
        let a = fixed_session().srp_a();
        assert_eq!(a.len(), 768);
        assert!(a.starts_with("da7948689e88591c481a33f5c688d805"));
    }

    #[test]
    fn password_claim_matches_reference() {
        let session = fixed_session();
        let challenge = PasswordVerifierChallenge {
            srp_b: SERVER_B.into(),
            salt: "8a1b2c3d4e5f".into(),
            secret_block: STANDARD.encode(b"secret-block-bytes"),
            user_id_for_srp: "user-id-for-srp".into(),
        };
        let now = Utc.with_ymd_and_hms(2025, 12, 27, 12, 0, 0).unwrap();
        let claim = session.process_challenge_at(&challenge, now).unwrap();

        assert_eq!(claim.timestamp, "Sat Dec 27 12:00:00 UTC 2025");
        assert_eq!(claim.signature, "bDmgj/eKLhaKSiHOHPfGnkHg3qInVpgI7clWfK9gRfU=");
        assert_eq!(claim.secret_block, "c2VjcmV0LWJsb2NrLWJ5dGVz");
    }

    #[test]
    fn timestamp_day_has_no_leading_zero() {
        let now = Utc.with_ymd_and_hms(2025, 1, 5, 9, 3, 4).unwrap();
        assert_eq!(
            now.format(TIMESTAMP_FORMAT).to_string(),
            "Sun Jan 5 09:03:04 UTC 2025"
        );
    }

    #[test]
    fn zero_server_value_is_rejected() {
        let session = fixed_session();
        let challenge = PasswordVerifierChallenge {
            srp_b: N_HEX.into(),
            salt: "01".into(),
            secret_block: STANDARD.encode(b"x"),
            user_id_for_srp: "u".into(),
        };
        assert!(matches!(
            session.process_challenge(&challenge),
            Err(Error::Srp(_))
        ));
    }

    #[test]
    fn malformed_pool_id_is_rejected() {
        let result = SrpSession::new("no-underscore", SecretString::from("pw"));
        assert!(matches!(result, Err(Error::Srp(_))));
    }

    #[test]
    fn secret_hash_vector() {
        assert_eq!(
            secret_hash("user@example.com", "clientid", b"clientsecret").unwrap(),
            "RpQurCvdrRg+z6GGbo3CbwMcL9hGDKxRDTHz13n06nE="
        );
    }

    #[test]
    fn pad_hex_rules() {
        assert_eq!(pad_hex("abc"), "0abc");
        assert_eq!(pad_hex("8f"), "008f");
        assert_eq!(pad_hex("7f"), "7f");
    }
}
