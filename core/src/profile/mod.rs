//! Profile service: the local avatar, the `/avatar` and `/attachment`
//! responders, and the peer-side fetchers.

pub mod avatar;
mod fetch;
mod service;
mod values;

pub use avatar::Avatar;
pub use fetch::{AttachmentFetch, AvatarFetch};
pub use service::{ATTACHMENT_REQUEST_PATH, AVATAR_REQUEST_PATH};

pub(crate) use service::install_profile_handlers;
