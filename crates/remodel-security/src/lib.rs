mod checksum;

pub use checksum::{sha384_hex, sha384_reader_hex, verify_sha384, verify_sha384_file};
