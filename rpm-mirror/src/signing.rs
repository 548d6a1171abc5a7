// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Detached signing of repository metadata.

Publishing signs `repomd.xml` through a [MetadataSigner] looked up by name in a
[SigningServiceRegistry]. [PgpDetachedSigner] is an in-process signer producing
ASCII armored detached PGP signatures.
*/

use {
    crate::error::{MirrorError, Result},
    async_trait::async_trait,
    chrono::SubsecRound,
    pgp::{
        crypto::{HashAlgorithm, SymmetricKeyAlgorithm},
        packet::{Packet, SignatureConfig, SignatureType, Subpacket},
        types::{CompressionAlgorithm, KeyTrait, KeyVersion, PublicKeyTrait, SecretKeyTrait},
        KeyType, SecretKeyParams, SecretKeyParamsBuilder, SignedPublicKey, SignedSecretKey,
    },
    smallvec::{smallvec, SmallVec},
    std::{collections::HashMap, io::Cursor, sync::Arc},
};

/// The result of signing a payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignedPayload {
    /// Detached signature over the payload.
    pub signature: Vec<u8>,
    /// Public key able to verify the signature.
    pub public_key: Vec<u8>,
}

/// Produces detached signatures.
#[async_trait]
pub trait MetadataSigner: Send + Sync {
    async fn sign(&self, payload: &[u8]) -> Result<SignedPayload>;
}

/// Signs payloads with a PGP secret key.
pub struct PgpDetachedSigner {
    key: SignedSecretKey,
    passphrase: String,
    public_key: String,
}

impl PgpDetachedSigner {
    /// Construct an instance from a key pair.
    ///
    /// `passphrase` unlocks the secret key.
    pub fn new(
        key: SignedSecretKey,
        public_key: &SignedPublicKey,
        passphrase: impl ToString,
    ) -> Result<Self> {
        let public_key = public_key
            .to_armored_string(None)
            .map_err(|e| MirrorError::Signing(format!("armoring public key: {}", e)))?;

        Ok(Self {
            key,
            passphrase: passphrase.to_string(),
            public_key,
        })
    }

    /// The ASCII armored public key.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    fn armored_signature(&self, payload: &[u8]) -> pgp::errors::Result<Vec<u8>> {
        let hashed_subpackets = vec![
            Subpacket::IssuerFingerprint(
                KeyVersion::V4,
                SmallVec::from_slice(&self.key.fingerprint()),
            ),
            Subpacket::SignatureCreationTime(chrono::Utc::now().trunc_subsecs(0)),
        ];
        let unhashed_subpackets = vec![Subpacket::Issuer(self.key.key_id())];

        let config = SignatureConfig::new_v4(
            Default::default(),
            SignatureType::Binary,
            self.key.algorithm(),
            HashAlgorithm::SHA2_256,
            hashed_subpackets,
            unhashed_subpackets,
        );

        let passphrase = self.passphrase.clone();
        let signature = config.sign(&self.key, || passphrase, Cursor::new(payload))?;

        let packet = Packet::Signature(signature);
        let mut writer = Cursor::new(Vec::<u8>::new());
        pgp::armor::write(&packet, pgp::armor::BlockType::Signature, &mut writer, None)?;

        Ok(writer.into_inner())
    }
}

#[async_trait]
impl MetadataSigner for PgpDetachedSigner {
    async fn sign(&self, payload: &[u8]) -> Result<SignedPayload> {
        let signature = self
            .armored_signature(payload)
            .map_err(|e| MirrorError::Signing(format!("PGP signing failed: {}", e)))?;

        log::info!("signed {} byte payload", payload.len());

        Ok(SignedPayload {
            signature,
            public_key: self.public_key.as_bytes().to_vec(),
        })
    }
}

/// Named signing services.
#[derive(Clone, Default)]
pub struct SigningServiceRegistry {
    services: HashMap<String, Arc<dyn MetadataSigner>>,
}

impl SigningServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signer under a name, replacing any previous one.
    pub fn register(&mut self, name: impl ToString, signer: Arc<dyn MetadataSigner>) {
        self.services.insert(name.to_string(), signer);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn MetadataSigner>> {
        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| MirrorError::SigningServiceNotFound(name.to_string()))
    }
}

/// Obtain a [SecretKeyParamsBuilder] defining how to generate a metadata signing key.
///
/// The `primary_user_id` has a format like `Name <email>`.
pub fn signing_secret_key_params_builder(primary_user_id: impl ToString) -> SecretKeyParamsBuilder {
    let mut key_params = SecretKeyParamsBuilder::default();
    key_params
        .key_type(KeyType::Rsa(2048))
        .preferred_symmetric_algorithms(smallvec![SymmetricKeyAlgorithm::AES256])
        .preferred_hash_algorithms(smallvec![
            HashAlgorithm::SHA2_256,
            HashAlgorithm::SHA2_384,
            HashAlgorithm::SHA2_512
        ])
        .preferred_compression_algorithms(smallvec![CompressionAlgorithm::ZLIB])
        .can_create_certificates(false)
        .can_sign(true)
        .primary_user_id(primary_user_id.to_string());

    key_params
}

/// Create a self-signed PGP key pair.
///
/// `key_passphrase` returns the passphrase locking the private key.
pub fn create_self_signed_key<PW>(
    params: SecretKeyParams,
    key_passphrase: PW,
) -> pgp::errors::Result<(SignedSecretKey, SignedPublicKey)>
where
    PW: (FnOnce() -> String) + Clone,
{
    let secret_key = params.generate()?;
    let secret_key_signed = secret_key.sign(key_passphrase.clone())?;

    let public_key = secret_key_signed.public_key();
    let public_key_signed = public_key.sign(&secret_key_signed, key_passphrase)?;

    Ok((secret_key_signed, public_key_signed))
}
