mod builtin;
mod caveat;
mod token;

pub use builtin::{register_builtin_caveats, ExpiresAt, RefreshOnly, UserContext};
pub use caveat::{encode_caveat, Caveat, CaveatRegistry, RequestContext};
pub use token::{Macaroon, RootKey};
