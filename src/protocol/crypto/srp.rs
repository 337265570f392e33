use super::CryptoError;
use num_bigint::{BigUint, RandomBits};
use num_traits::Zero;
use rand::Rng;
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

/// RFC 5054 3072-bit group prime
const N_3072_HEX: &[u8] = b"FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08\
      8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B\
      302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9\
      A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6\
      49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8\
      FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D\
      670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C\
      180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
      3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D\
      04507A33A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7D\
      B3970F85A6E1E4C7ABF5AE8CDB0933D71E8C94E04A25619DCEE3D226\
      1AD2EE6BF12FFA06D98A0864D87602733EC86A64521F2B18177B200C\
      BBE117577A615D6C770988C0BAD946E208E24FA074E5AB3143DB5BFC\
      E0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF";

/// Byte length of the group prime, used for padding
pub const SRP_MODULUS_LEN: usize = 384;

/// Username fixed by the pairing protocol
pub const SRP_USERNAME: &[u8] = b"Pair-Setup";

/// Number of random bits in an ephemeral secret
const EPHEMERAL_BITS: u64 = 256;

/// SRP-6a group parameters (3072-bit, g = 5, SHA-512)
struct SrpGroup {
    n: BigUint,
    g: BigUint,
    k: BigUint,
}

impl SrpGroup {
    fn rfc5054_3072() -> Result<Self, CryptoError> {
        let n = BigUint::parse_bytes(N_3072_HEX, 16)
            .ok_or_else(|| CryptoError::SrpError("Failed to parse N".to_string()))?;
        let g = BigUint::from(5u32);

        // k = H(N, pad(g))
        let k = BigUint::from_bytes_be(&hash(&[n.to_bytes_be().as_slice(), pad(&g).as_slice()]));

        Ok(Self { n, g, k })
    }

    /// x = H(salt, H(username ":" password))
    fn private_key(username: &[u8], password: &[u8], salt: &[u8]) -> BigUint {
        let inner = hash(&[username, &b":"[..], password]);
        BigUint::from_bytes_be(&hash(&[salt, inner.as_slice()]))
    }

    /// u = H(pad(A), pad(B))
    fn scrambler(a_pub: &BigUint, b_pub: &BigUint) -> BigUint {
        BigUint::from_bytes_be(&hash(&[pad(a_pub).as_slice(), pad(b_pub).as_slice()]))
    }

    /// M1 = H(H(N) xor H(g), H(username), salt, A, B, K)
    ///
    /// `g`, `A` and `B` are hashed without padding, leading zero bytes stripped.
    fn client_proof(
        &self,
        username: &[u8],
        salt: &[u8],
        a_pub: &BigUint,
        b_pub: &BigUint,
        key: &[u8],
    ) -> Vec<u8> {
        let hn = Sha512::digest(self.n.to_bytes_be());
        let hg = Sha512::digest(self.g.to_bytes_be());
        let mut hn_xor_hg = [0u8; 64];
        for (out, (x, y)) in hn_xor_hg.iter_mut().zip(hn.iter().zip(hg.iter())) {
            *out = x ^ y;
        }

        let h_user = Sha512::digest(username);
        hash(&[
            &hn_xor_hg[..],
            h_user.as_slice(),
            salt,
            a_pub.to_bytes_be().as_slice(),
            b_pub.to_bytes_be().as_slice(),
            key,
        ])
    }

    /// M2 = H(A, M1, K)
    fn server_proof(a_pub: &BigUint, client_proof: &[u8], key: &[u8]) -> Vec<u8> {
        hash(&[a_pub.to_bytes_be().as_slice(), client_proof, key])
    }

    fn random_ephemeral(&self) -> BigUint {
        let mut rng = rand::thread_rng();
        let secret: BigUint = rng.sample(RandomBits::new(EPHEMERAL_BITS));
        secret % &self.n
    }
}

fn hash(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

/// Left-pad to the modulus length
fn pad(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= SRP_MODULUS_LEN {
        return bytes;
    }
    let mut padded = vec![0u8; SRP_MODULUS_LEN];
    padded[SRP_MODULUS_LEN - bytes.len()..].copy_from_slice(&bytes);
    padded
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Accessory side of the SRP-6a exchange.
///
/// Holds the verifier and the ephemeral secret `b` between M2 and M4.
pub struct SrpServer {
    group: SrpGroup,
    verifier: BigUint,
    b: BigUint,
    public_key: Vec<u8>,
}

impl SrpServer {
    /// Derive a password verifier `v = g^x mod N`
    ///
    /// # Errors
    ///
    /// Returns error if the group parameters cannot be constructed.
    pub fn compute_verifier(
        username: &[u8],
        password: &[u8],
        salt: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let group = SrpGroup::rfc5054_3072()?;
        let x = SrpGroup::private_key(username, password, salt);
        Ok(group.g.modpow(&x, &group.n).to_bytes_be())
    }

    /// Start a server session from a stored verifier, generating `b` and `B`
    ///
    /// # Errors
    ///
    /// Returns error if the verifier is empty.
    pub fn new(verifier: &[u8]) -> Result<Self, CryptoError> {
        let group = SrpGroup::rfc5054_3072()?;
        let b = group.random_ephemeral();
        Self::with_secret(group, verifier, b)
    }

    /// Start a server session with a caller-supplied ephemeral secret `b`
    ///
    /// # Errors
    ///
    /// Returns error if the verifier or the secret is empty.
    pub fn with_ephemeral(verifier: &[u8], secret: &[u8]) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::SrpError("empty ephemeral secret".to_string()));
        }
        let group = SrpGroup::rfc5054_3072()?;
        Self::with_secret(group, verifier, BigUint::from_bytes_be(secret))
    }

    fn with_secret(group: SrpGroup, verifier: &[u8], b: BigUint) -> Result<Self, CryptoError> {
        if verifier.is_empty() {
            return Err(CryptoError::SrpError("empty verifier".to_string()));
        }
        let verifier = BigUint::from_bytes_be(verifier);

        // B = (k*v + g^b) % N
        let b_pub = (&group.k * &verifier + group.g.modpow(&b, &group.n)) % &group.n;
        let public_key = pad(&b_pub);

        Ok(Self {
            group,
            verifier,
            b,
            public_key,
        })
    }

    /// Server public key `B`, padded to the modulus length
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Compute the session key from the client's `A` and check its proof.
    ///
    /// Returns the session key and the server proof `M2` on success.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::SrpError` for an invalid `A` and
    /// `CryptoError::VerificationFailed` when the proof does not match.
    pub fn verify_client(
        &self,
        username: &[u8],
        salt: &[u8],
        client_public: &[u8],
        client_proof: &[u8],
    ) -> Result<(SessionKey, Vec<u8>), CryptoError> {
        let n = &self.group.n;
        let a_pub = BigUint::from_bytes_be(client_public);
        if (&a_pub % n).is_zero() {
            return Err(CryptoError::SrpError(
                "Invalid client public key".to_string(),
            ));
        }

        let b_pub = BigUint::from_bytes_be(&self.public_key);
        let u = SrpGroup::scrambler(&a_pub, &b_pub);
        if u.is_zero() {
            return Err(CryptoError::SrpError("Invalid scrambling parameter".to_string()));
        }

        // S = (A * v^u) ^ b % N
        let base = (&a_pub * self.verifier.modpow(&u, n)) % n;
        let s_shared = base.modpow(&self.b, n);
        let key = hash(&[s_shared.to_bytes_be().as_slice()]);

        let expected = self
            .group
            .client_proof(username, salt, &a_pub, &b_pub, &key);
        if !constant_time_eq(&expected, client_proof) {
            return Err(CryptoError::VerificationFailed);
        }

        let server_proof = SrpGroup::server_proof(&a_pub, client_proof, &key);
        Ok((SessionKey { key }, server_proof))
    }
}

/// Controller side of the SRP-6a exchange
pub struct SrpClient {
    group: SrpGroup,
    a: BigUint,
    public_key: Vec<u8>,
}

impl SrpClient {
    /// Generate a fresh ephemeral `a` and `A`
    ///
    /// # Errors
    ///
    /// Returns error if the group parameters cannot be constructed.
    pub fn new() -> Result<Self, CryptoError> {
        let group = SrpGroup::rfc5054_3072()?;
        let a = group.random_ephemeral();
        Ok(Self::with_secret(group, a))
    }

    /// Client with a caller-supplied ephemeral secret `a`
    ///
    /// # Errors
    ///
    /// Returns error if the secret is empty.
    pub fn with_ephemeral(secret: &[u8]) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::SrpError("empty ephemeral secret".to_string()));
        }
        let group = SrpGroup::rfc5054_3072()?;
        Ok(Self::with_secret(group, BigUint::from_bytes_be(secret)))
    }

    fn with_secret(group: SrpGroup, a: BigUint) -> Self {
        let public_key = pad(&group.g.modpow(&a, &group.n));

        Self {
            group,
            a,
            public_key,
        }
    }

    /// Client public key `A`, padded to the modulus length
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Process the server's salt and `B`, producing the client proof
    ///
    /// # Errors
    ///
    /// Returns error if `B` is invalid.
    pub fn process_challenge(
        &self,
        username: &[u8],
        password: &[u8],
        salt: &[u8],
        server_public: &[u8],
    ) -> Result<SrpVerifier, CryptoError> {
        let n = &self.group.n;
        let b_pub = BigUint::from_bytes_be(server_public);
        if (&b_pub % n).is_zero() {
            return Err(CryptoError::SrpError(
                "Invalid server public key".to_string(),
            ));
        }

        let a_pub = BigUint::from_bytes_be(&self.public_key);
        let u = SrpGroup::scrambler(&a_pub, &b_pub);
        let x = SrpGroup::private_key(username, password, salt);

        // S = (B - k * g^x) ^ (a + u * x) % N
        // BigUint cannot go negative, so the subtraction is done modulo N
        let k_g_x = (&self.group.k * self.group.g.modpow(&x, n)) % n;
        let base = if b_pub >= k_g_x {
            (&b_pub - &k_g_x) % n
        } else {
            (n - (&k_g_x - &b_pub) % n) % n
        };
        let exp = &self.a + (&u * x);
        let s_shared = base.modpow(&exp, n);
        let key = hash(&[s_shared.to_bytes_be().as_slice()]);

        let m1 = self
            .group
            .client_proof(username, salt, &a_pub, &b_pub, &key);

        Ok(SrpVerifier { a_pub, m1, key })
    }
}

/// Client state between sending M3 and receiving M4
pub struct SrpVerifier {
    a_pub: BigUint,
    m1: Vec<u8>,
    key: Vec<u8>,
}

impl SrpVerifier {
    /// Client proof `M1`
    #[must_use]
    pub fn client_proof(&self) -> &[u8] {
        &self.m1
    }

    /// Check the server proof and release the session key
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::VerificationFailed` on mismatch.
    pub fn verify_server(&self, server_proof: &[u8]) -> Result<SessionKey, CryptoError> {
        let expected = SrpGroup::server_proof(&self.a_pub, &self.m1, &self.key);
        if !constant_time_eq(&expected, server_proof) {
            return Err(CryptoError::VerificationFailed);
        }

        Ok(SessionKey {
            key: self.key.clone(),
        })
    }
}

impl Drop for SrpVerifier {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Shared SRP session key `K` (64 bytes)
pub struct SessionKey {
    key: Vec<u8>,
}

impl SessionKey {
    /// Key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_srp_handshake() {
        let salt = b"randomsalt";
        let verifier = SrpServer::compute_verifier(SRP_USERNAME, b"1234", salt).unwrap();
        let server = SrpServer::new(&verifier).unwrap();
        assert_eq!(server.public_key().len(), SRP_MODULUS_LEN);

        let client = SrpClient::new().unwrap();
        let client_verifier = client
            .process_challenge(SRP_USERNAME, b"1234", salt, server.public_key())
            .unwrap();

        let (server_key, server_proof) = server
            .verify_client(
                SRP_USERNAME,
                salt,
                client.public_key(),
                client_verifier.client_proof(),
            )
            .unwrap();

        let client_key = client_verifier.verify_server(&server_proof).unwrap();
        assert_eq!(client_key.as_bytes(), server_key.as_bytes());
        assert_eq!(server_key.as_bytes().len(), 64);
    }

    #[test]
    fn test_srp_wrong_password_rejected() {
        let salt = b"salt";
        let verifier = SrpServer::compute_verifier(SRP_USERNAME, b"correct", salt).unwrap();
        let server = SrpServer::new(&verifier).unwrap();

        let client = SrpClient::new().unwrap();
        let client_verifier = client
            .process_challenge(SRP_USERNAME, b"wrong", salt, server.public_key())
            .unwrap();

        let result = server.verify_client(
            SRP_USERNAME,
            salt,
            client.public_key(),
            client_verifier.client_proof(),
        );
        assert!(matches!(result, Err(CryptoError::VerificationFailed)));
    }

    #[test]
    fn test_srp_zero_public_key_rejected() {
        let verifier = SrpServer::compute_verifier(SRP_USERNAME, b"1234", b"s").unwrap();
        let server = SrpServer::new(&verifier).unwrap();

        let result = server.verify_client(SRP_USERNAME, b"s", &[0u8; 384], &[0u8; 64]);
        assert!(matches!(result, Err(CryptoError::SrpError(_))));
    }

    #[test]
    fn test_tampered_server_proof_rejected() {
        let salt = b"salt";
        let verifier = SrpServer::compute_verifier(SRP_USERNAME, b"pw", salt).unwrap();
        let server = SrpServer::new(&verifier).unwrap();
        let client = SrpClient::new().unwrap();
        let cv = client
            .process_challenge(SRP_USERNAME, b"pw", salt, server.public_key())
            .unwrap();
        let (_, mut proof) = server
            .verify_client(SRP_USERNAME, salt, client.public_key(), cv.client_proof())
            .unwrap();
        proof[0] ^= 0xFF;

        assert!(cv.verify_server(&proof).is_err());
    }
}
