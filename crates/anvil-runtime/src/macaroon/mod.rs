mod key_store;
mod manager;

pub use key_store::{
    create_opaque_key, delete_opaque_key, delete_opaque_keys, get_opaque_key,
    get_opaque_key_with_expiry, prune_expired_keys,
};
pub use manager::MacaroonManager;
