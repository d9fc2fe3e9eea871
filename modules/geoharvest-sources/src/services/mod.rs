pub mod feed;
pub mod wikipedia;
