//! Cryptographic primitives for the tunnel.
//!
//! # Data Flow
//! ```text
//! process start
//!     → identity.rs (X25519 keypair, public half exported as base64 JWK)
//!
//! handshake:
//!     client JWK → identity.rs (decode, ECDH) → key.rs (HKDF → SessionKey)
//!
//! tunneled traffic:
//!     key.rs (AES-256-GCM seal/open, nonce || ciphertext || tag)
//! ```
//!
//! # Security Constraints
//! - Key material is zeroized on drop
//! - `Debug` output never contains key bytes
//! - Decryption failures collapse into a single opaque error

pub mod identity;
pub mod key;

pub use identity::{decode_public_jwk, encode_public_jwk, KeyPair, ServerIdentity};
pub use key::SessionKey;
