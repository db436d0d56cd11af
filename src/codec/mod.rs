//! Binary decoding framework for on-chain account layouts.
//!
//! Protocol adapters describe each account shape they understand as an
//! [`AccountDecoder`] and stack them in a [`MultiDecoder`], which probes
//! candidates in registration order and decodes with the first one whose
//! `validate` passes. Decoding is deterministic and side-effect free:
//! the same bytes always produce the same value or the same error.

pub mod reader;

use sha2::{Digest, Sha256};

use crate::utils::error::{IndexerError, Result};

pub use reader::{ByteReader, DecodeError};

/// Length of the conventional account-type tag at the start of account data.
pub const DISCRIMINATOR_LEN: usize = 8;

/// Calculates the 8-byte discriminator for an account type.
///
/// The discriminator is the first 8 bytes of the SHA256 hash of the
/// account name prefixed with `"account:"`, the convention used by the
/// market programs this crate indexes.
///
/// # Example
///
/// ```
/// use weathervane::codec::account_discriminator;
///
/// let discriminator = account_discriminator("PoolMarketV1");
/// assert_eq!(discriminator.len(), 8);
/// ```
#[must_use]
pub fn account_discriminator(account_name: &str) -> [u8; 8] {
    let preimage = format!("account:{account_name}");
    let hash = Sha256::digest(preimage.as_bytes());
    let mut discriminator = [0u8; 8];
    discriminator.copy_from_slice(&hash[..8]);
    discriminator
}

/// True when `data` begins with `discriminator`.
///
/// The discriminator is a convention tag, not authoritative; decoders
/// still validate the full layout before claiming the account.
#[must_use]
pub fn starts_with_discriminator(data: &[u8], discriminator: &[u8; 8]) -> bool {
    data.len() >= DISCRIMINATOR_LEN && data[..DISCRIMINATOR_LEN] == discriminator[..]
}

/// Hex rendering of the leading discriminator bytes, for diagnostics.
#[must_use]
pub fn discriminator_hex(data: &[u8]) -> String {
    data.iter()
        .take(DISCRIMINATOR_LEN)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Contract for decoding one account layout into its typed representation.
///
/// `decode` must be deterministic and free of side effects. `validate`
/// drives layout selection in [`MultiDecoder`] and must reject every
/// buffer `decode` would reject; the default implementation attempts a
/// full decode.
pub trait AccountDecoder<T>: Send + Sync {
    /// Name of the account layout this decoder understands.
    fn account_type(&self) -> &'static str;

    /// Decodes `data` into the typed account representation.
    fn decode(&self, data: &[u8]) -> std::result::Result<T, DecodeError>;

    /// Whether `data` plausibly matches this decoder's layout.
    fn validate(&self, data: &[u8]) -> bool {
        self.decode(data).is_ok()
    }
}

/// A successfully decoded account together with its layout name.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    /// The matching decoder's [`AccountDecoder::account_type`].
    pub account_type: &'static str,
    pub account: T,
}

/// An ordered stack of decoders for account layouts sharing one output type.
///
/// Candidates are probed in registration order and the first decoder whose
/// `validate` accepts the bytes wins, so ties between overlapping layouts
/// are broken deterministically by order.
pub struct MultiDecoder<T> {
    decoders: Vec<Box<dyn AccountDecoder<T>>>,
}

impl<T> MultiDecoder<T> {
    /// Creates an empty decoder stack.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoders: Vec::new(),
        }
    }

    /// Builder-style registration, preserving call order.
    #[must_use]
    pub fn with(mut self, decoder: impl AccountDecoder<T> + 'static) -> Self {
        self.decoders.push(Box::new(decoder));
        self
    }

    /// Appends a decoder to the end of the probe order.
    pub fn register(&mut self, decoder: Box<dyn AccountDecoder<T>>) {
        self.decoders.push(decoder);
    }

    /// Number of registered decoders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decodes `data` with the first validating decoder.
    ///
    /// # Errors
    ///
    /// [`IndexerError::NoDecoderMatched`] (carrying the hex discriminator)
    /// when no registered decoder recognizes the bytes; a [`DecodeError`]
    /// if the selected decoder fails the full parse.
    pub fn decode(&self, data: &[u8]) -> Result<Decoded<T>> {
        for decoder in &self.decoders {
            if decoder.validate(data) {
                let account = decoder.decode(data)?;
                return Ok(Decoded {
                    account_type: decoder.account_type(),
                    account,
                });
            }
        }
        Err(IndexerError::NoDecoderMatched {
            discriminator: discriminator_hex(data),
        })
    }
}

impl<T> Default for MultiDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}
