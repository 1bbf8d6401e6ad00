pub mod chromium;
pub mod data_access;
pub mod document_render;
pub mod retry;
