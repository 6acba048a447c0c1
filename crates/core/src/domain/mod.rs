pub mod billing;
pub mod bot_config;
pub mod contact;
pub mod conversation;
pub mod message;
pub mod product;
pub mod workspace;
