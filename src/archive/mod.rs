pub mod attachments;
pub mod audit;
pub mod config;
pub mod document;
pub mod history;
pub mod lock;
pub mod markdown;
pub mod model;
pub mod paths;
pub mod pipeline;
pub mod source;
pub mod warn;
pub mod zone;
