pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod picker;
pub mod pipeline;
pub mod qr;
pub mod scan;
pub mod processing {
    pub mod compose;
    pub mod layout;
}
pub mod slideshow {
    pub mod loader;
    pub mod timeline;
    pub mod viewer;
}
