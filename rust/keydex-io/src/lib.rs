//! IO abstractions for keydex: temporary file stores used by the
//! disk-spilling sort machinery.

pub mod temp_file_store;
