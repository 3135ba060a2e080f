pub(crate) mod encoding;
pub(crate) mod hash;
pub(crate) mod id;
pub(crate) mod time;

pub use hash::HashType;
