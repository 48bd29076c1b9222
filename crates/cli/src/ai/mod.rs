// Step expressions from a language model
//
// The tool asks a model for a `Table.AddColumn` expression and splices
// whatever comes back (after cleanup) into the query. Anything that can
// produce such text implements `FragmentGenerator`.

pub mod client;

pub use client::ModelGenerator;

/// What the model is asked to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentRequest {
    /// Natural-language instruction from the user
    pub instruction: String,
    /// Header of the new column
    pub column: String,
    /// Rendered reference of the step the column builds on
    pub previous_step: String,
}

/// Error obtaining a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    /// Provider disabled or unusable
    NotConfigured(String),
    MissingKey,
    NetworkError(String),
    ApiError { status: u16, message: String },
    ParseError(String),
    InvalidResponse(String),
    /// The model answered with no text
    EmptyResponse,
}

impl std::fmt::Display for GenerateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerateError::NotConfigured(msg) => write!(f, "AI not configured: {}", msg),
            GenerateError::MissingKey => write!(f, "API key not configured"),
            GenerateError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            GenerateError::ApiError { status, message } => write!(f, "API error ({}): {}", status, message),
            GenerateError::ParseError(msg) => write!(f, "Failed to parse response: {}", msg),
            GenerateError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            GenerateError::EmptyResponse => write!(f, "Model returned an empty response"),
        }
    }
}

impl std::error::Error for GenerateError {}

/// Produces raw step text for a request. Output is cleaned up by the caller.
pub trait FragmentGenerator {
    fn generate(&self, request: &FragmentRequest) -> Result<String, GenerateError>;
}

pub fn build_system_prompt() -> &'static str {
    "You are a Power Query M assistant. Return only valid full Table.AddColumn expressions."
}

pub fn build_user_prompt(request: &FragmentRequest) -> String {
    let column = request.column.replace('"', "\"\"");
    let mut prompt = String::new();

    prompt.push_str(request.instruction.trim());
    prompt.push_str("\n\n");

    prompt.push_str("RULES:\n");
    prompt.push_str(&format!(
        "- Return one Power Query M expression of the form Table.AddColumn({}, \"{}\", each ...)\n",
        request.previous_step, column
    ));
    prompt.push_str(&format!("- The new column is built on the step {}\n", request.previous_step));
    prompt.push_str("- Write the whole expression on a single line\n");
    prompt.push_str("- Do NOT include explanations, comments, step names or markdown code blocks\n");

    prompt.push_str("\nExample:\n");
    prompt.push_str(
        "Table.AddColumn(#\"Changed Type\", \"Sales Status\", each if [Sales] > 1000 then \"High\" else \"Low\")",
    );

    prompt
}
