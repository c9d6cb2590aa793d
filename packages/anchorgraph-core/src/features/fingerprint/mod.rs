//! Fingerprint extraction and persistence.

mod extractor;
mod store;

pub use extractor::{Fingerprint, FingerprintExtractor};
pub use store::FingerprintStore;
