pub mod history;
pub mod journal;
pub mod project;
pub mod protocol;
pub mod stream;
