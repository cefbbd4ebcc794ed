use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationType {
    Create,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    Image,
    Video,
    Text,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptContent {
    #[serde(default)]
    pub text: String,
    /// Data URLs or remote URLs.
    #[serde(default)]
    pub images: Vec<String>,
}

impl PromptContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.images.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptBatchEntry {
    #[serde(flatten)]
    pub content: PromptContent,
    pub page_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeGenerationParams {
    pub generation_type: GenerationType,
    pub input_mode: InputMode,
    pub prompt: PromptContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prompts: Vec<PromptBatchEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<PromptContent>,
    #[serde(default)]
    pub is_imported_from_code: bool,
}

/// User settings forwarded to the service with every request.
///
/// Only the fields the client itself reads are typed; everything else is
/// carried through `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub open_ai_api_key: Option<String>,
    #[serde(default, rename = "openAiBaseURL")]
    pub open_ai_base_url: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub screenshot_one_api_key: Option<String>,
    #[serde(default)]
    pub is_image_generation_enabled: bool,
    #[serde(default)]
    pub is_block_update_enabled: bool,
    #[serde(default = "default_code_config")]
    pub generated_code_config: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_generation_model: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            open_ai_api_key: None,
            open_ai_base_url: None,
            anthropic_api_key: None,
            screenshot_one_api_key: None,
            is_image_generation_enabled: false,
            is_block_update_enabled: false,
            generated_code_config: default_code_config(),
            code_generation_model: None,
            extra: Map::new(),
        }
    }
}

fn default_code_config() -> String {
    "html_tailwind".to_string()
}

/// The single JSON object sent when the connection opens.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParams {
    #[serde(flatten)]
    pub request: CodeGenerationParams,
    #[serde(flatten)]
    pub settings: Settings,
}

impl GenerationParams {
    pub fn block_updates(&self) -> bool {
        self.settings.is_block_update_enabled
    }
}
