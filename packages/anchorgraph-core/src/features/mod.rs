pub mod anchor;
pub mod ast2code;
pub mod fingerprint;
pub mod matching;
pub mod range;
