//! # Herald Transport
//!
//! Concrete adapters for the transport and content source contracts:
//! WhatsApp Business Cloud API for outbound messaging, YouTube Data API
//! for the watched channel.

pub mod whatsapp;
pub mod youtube;

pub use whatsapp::CloudApiTransport;
pub use youtube::YouTubeSource;
