//! Key filtering
//!
//! Keys are selected by SHA256 fingerprint. Entries may also be given as
//! OpenSSH public key lines.

mod allow_list;

pub use allow_list::AllowList;
