pub mod dashboard;
mod template;
