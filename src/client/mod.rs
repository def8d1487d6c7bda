pub use self::auth::AuthFailure;
pub use self::auth_method::none::AuthNoneResult;
pub use self::auth_method::password::{AuthPasswordResult, AuthPasswordPrompt};
pub use self::channel::{
    Channel, ChannelReceiver, ChannelEvent, ChannelReq, ChannelReply, ChannelConfig, ChannelKind,
    DataType, DATA_STANDARD, DATA_STDERR,
};
pub use self::client::{Client, ClientReceiver, ClientFuture, ClientConfig, GlobalReq, GlobalReply};
pub use self::client_event::{
    ClientEvent, ServerHostKey, AcceptPubkeySender, HostKeyVerdict, DebugMsg, AuthBanner,
    AcceptChannel,
};
pub use self::session::{Session, SessionReceiver, SessionEvent, SessionReply, ExitSignal};

#[macro_use] mod pump;
mod auth;
mod auth_method;
mod channel;
mod channel_state;
mod client;
mod client_event;
mod client_state;
mod conn;
mod negotiate;
mod recv;
mod session;
