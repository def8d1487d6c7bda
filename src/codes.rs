//! Numeric and string codes fixed by the SSH protocol.
#![allow(dead_code)]
#![allow(missing_docs)]

/// Defines a list of constants together with `to_str()`, which maps a code back to its name.
macro_rules! named_codes {
    ($ty:ty { $($name:ident = $value:literal => $text:literal,)* }) => {
        $( pub const $name: $ty = $value; )*

        /// Convert a code to a string.
        pub const fn to_str(code: $ty) -> Option<&'static str> {
            match code {
                $( $value => Some($text), )*
                _ => None,
            }
        }
    };
}

pub(crate) mod msg {
    named_codes!(u8 {
        DISCONNECT = 1 => "SSH_MSG_DISCONNECT",
        IGNORE = 2 => "SSH_MSG_IGNORE",
        UNIMPLEMENTED = 3 => "SSH_MSG_UNIMPLEMENTED",
        DEBUG = 4 => "SSH_MSG_DEBUG",
        SERVICE_REQUEST = 5 => "SSH_MSG_SERVICE_REQUEST",
        SERVICE_ACCEPT = 6 => "SSH_MSG_SERVICE_ACCEPT",
        KEXINIT = 20 => "SSH_MSG_KEXINIT",
        NEWKEYS = 21 => "SSH_MSG_NEWKEYS",
        USERAUTH_REQUEST = 50 => "SSH_MSG_USERAUTH_REQUEST",
        USERAUTH_FAILURE = 51 => "SSH_MSG_USERAUTH_FAILURE",
        USERAUTH_SUCCESS = 52 => "SSH_MSG_USERAUTH_SUCCESS",
        USERAUTH_BANNER = 53 => "SSH_MSG_USERAUTH_BANNER",
        GLOBAL_REQUEST = 80 => "SSH_MSG_GLOBAL_REQUEST",
        REQUEST_SUCCESS = 81 => "SSH_MSG_REQUEST_SUCCESS",
        REQUEST_FAILURE = 82 => "SSH_MSG_REQUEST_FAILURE",
        CHANNEL_OPEN = 90 => "SSH_MSG_CHANNEL_OPEN",
        CHANNEL_OPEN_CONFIRMATION = 91 => "SSH_MSG_CHANNEL_OPEN_CONFIRMATION",
        CHANNEL_OPEN_FAILURE = 92 => "SSH_MSG_CHANNEL_OPEN_FAILURE",
        CHANNEL_WINDOW_ADJUST = 93 => "SSH_MSG_CHANNEL_WINDOW_ADJUST",
        CHANNEL_DATA = 94 => "SSH_MSG_CHANNEL_DATA",
        CHANNEL_EXTENDED_DATA = 95 => "SSH_MSG_CHANNEL_EXTENDED_DATA",
        CHANNEL_EOF = 96 => "SSH_MSG_CHANNEL_EOF",
        CHANNEL_CLOSE = 97 => "SSH_MSG_CHANNEL_CLOSE",
        CHANNEL_REQUEST = 98 => "SSH_MSG_CHANNEL_REQUEST",
        CHANNEL_SUCCESS = 99 => "SSH_MSG_CHANNEL_SUCCESS",
        CHANNEL_FAILURE = 100 => "SSH_MSG_CHANNEL_FAILURE",
    });

    // numbers 30 to 49 are reused by every key exchange method, and 60 to 79 by every
    // authentication method, so they have no unique name

    pub const KEXDH_INIT: u8 = 30;
    pub const KEXDH_REPLY: u8 = 31;
    pub const KEX_ECDH_INIT: u8 = 30;
    pub const KEX_ECDH_REPLY: u8 = 31;
    pub const KEX_DH_GEX_REQUEST_OLD: u8 = 30;
    pub const KEX_DH_GEX_GROUP: u8 = 31;
    pub const KEX_DH_GEX_INIT: u8 = 32;
    pub const KEX_DH_GEX_REPLY: u8 = 33;
    pub const KEX_DH_GEX_REQUEST: u8 = 34;

    pub const USERAUTH_PASSWD_CHANGEREQ: u8 = 60;
}

/// Reason codes for [`DisconnectError`][crate::DisconnectError] (RFC 4253, section 11.1).
pub mod disconnect {
    named_codes!(u32 {
        HOST_NOT_ALLOWED_TO_CONNECT = 1 => "host not allowed to connect",
        PROTOCOL_ERROR = 2 => "protocol error",
        KEY_EXCHANGE_FAILED = 3 => "key exchange failed",
        RESERVED = 4 => "reserved",
        MAC_ERROR = 5 => "mac error",
        COMPRESSION_ERROR = 6 => "compression error",
        SERVICE_NOT_AVAILABLE = 7 => "service not available",
        PROTOCOL_VERSION_NOT_SUPPORTED = 8 => "protocol version not supported",
        HOST_KEY_NOT_VERIFIABLE = 9 => "host key not verifiable",
        CONNECTION_LOST = 10 => "connection lost",
        BY_APPLICATION = 11 => "by application",
        TOO_MANY_CONNECTIONS = 12 => "too many connections",
        AUTH_CANCELLED_BY_USER = 13 => "auth cancelled by user",
        NO_MORE_AUTH_METHODS_AVAILABLE = 14 => "no more auth methods available",
        ILLEGAL_USER_NAME = 15 => "illegal user name",
    });
}

/// Reason codes for [`ChannelOpenError`][crate::ChannelOpenError] (RFC 4254, section 5.1).
pub mod open {
    named_codes!(u32 {
        ADMINISTRATIVELY_PROHIBITED = 1 => "administratively prohibited",
        CONNECT_FAILED = 2 => "connect failed",
        UNKNOWN_CHANNEL_TYPE = 3 => "unknown channel type",
        RESOURCE_SHORTAGE = 4 => "resource shortage",
    });
}

/// Signal names for [`Session::signal()`][crate::Session::signal()] and
/// [`ExitSignal`][crate::ExitSignal] (RFC 4254, section 6.10).
pub mod signal {
    pub const ABRT: &str = "ABRT";
    pub const ALRM: &str = "ALRM";
    pub const FPE: &str = "FPE";
    pub const HUP: &str = "HUP";
    pub const ILL: &str = "ILL";
    pub const INT: &str = "INT";
    pub const KILL: &str = "KILL";
    pub const PIPE: &str = "PIPE";
    pub const QUIT: &str = "QUIT";
    pub const SEGV: &str = "SEGV";
    pub const TERM: &str = "TERM";
    pub const USR1: &str = "USR1";
    pub const USR2: &str = "USR2";
}
