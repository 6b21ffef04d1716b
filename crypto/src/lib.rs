pub mod bls;

pub use bls::{BlsError, BlsPublicKey, BlsSecretKey, BlsSignature, Domain};
