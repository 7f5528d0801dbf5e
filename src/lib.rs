mod address;
pub use address::*;

mod attachment;
pub use attachment::*;

mod bundle;
pub use bundle::PreKeyBundle;

mod config;
pub use config::ProtocolConfig;

mod content;
pub use content::*;

mod dispatch;
pub use dispatch::*;

mod error;
pub use error::Error;

mod identity_key;
pub use identity_key::{IdentityKey, IdentityKeyPair};

mod inventory;
pub use inventory::*;

mod lock;
pub use lock::SessionLocks;

mod one_time_pre_key;
pub use one_time_pre_key::*;

mod pre_key;
pub use pre_key::*;

pub(crate) mod proto;

mod push;
pub use push::*;

mod ratchet;
pub use ratchet::*;

mod receiver;
pub use receiver::*;

mod session;
pub use session::*;

mod state;
pub use state::*;

mod store;
pub use store::*;

mod types;
pub use types::*;

mod x3dh;
