mod close;
mod message;
mod params;

pub use close::{CloseKind, APP_ERROR_CLOSE_CODE, NORMAL_CLOSE_CODE, USER_CLOSE_CODE};
pub use message::{CodePayload, ServerMessage};
pub use params::{
    CodeGenerationParams, GenerationParams, GenerationType, InputMode, PromptBatchEntry,
    PromptContent, Settings,
};
