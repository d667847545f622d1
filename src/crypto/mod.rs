pub mod cipher;
pub mod curve;
pub mod kdf;
pub mod memory;
pub mod sensitive;
pub mod shamir;
