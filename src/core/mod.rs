pub mod account;
pub mod blobs;
pub mod cache;
pub mod entity;
pub mod error;
pub mod export;
pub mod note;
pub mod projector;
pub mod task;
