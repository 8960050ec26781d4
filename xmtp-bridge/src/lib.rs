#![doc = include_str!("../README.md")]

pub mod callbacks;
pub mod codec;
pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod library;
#[cfg(feature = "loopback")]
pub mod loopback;
pub mod prepared;
pub mod registry;
pub mod signature;
pub mod types;

mod bridge;
mod logger;

// Re-export core public API at crate root.
pub use bridge::Bridge;
pub use codec::ClientInfo;
pub use config::{BridgeConfig, BridgeConfigBuilder, ClientOptions, WalletOptions};
pub use error::{Error, Result};
pub use events::{ChannelSink, EventBridge, EventName, EventSink, HostEvent};
pub use library::{
    ClientHandle, Container, Contacts, ConversationRef, EventStream, GroupRef, MessageContainer,
    MessagingLibrary, NoHooks, PreActionHooks, SigningKey,
};
pub use prepared::PreparedMessage;
pub use registry::{SubscriptionKey, SubscriptionKind};
pub use types::{
    ConsentEntityType, ConsentState, DeliveryStatus, Env, GroupPermissionsPreset, IdentityState,
    MetadataField, PermissionLevel, PermissionOption, PermissionUpdateType, PreAction,
};

pub use logger::init_logger;
