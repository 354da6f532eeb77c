pub mod atomic;
pub mod vecbin;

pub use atomic::{load_bytes, load_json, read_bytes, save_bytes, save_json, write_atomic, GZ_SUFFIX};
pub use vecbin::{decode_all, encode_all, VecBinHeader, VecRecord, VEC_BIN_VERSION};
