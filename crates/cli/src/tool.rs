// Add-column tool: prompt in, patched query out
//
// Shared by the MCP server and the `add-column` / `list-queries` commands.
// One call is one document session: open, read, patch, save, close.

use std::fmt;
use std::path::{Path, PathBuf};

use pqstep_config::Settings;
use pqstep_engine::{formula, normalize_fragment, patch, FragmentError, PatchError, PatchOutcome};
use pqstep_io::{DocumentError, DocumentGateway, DocumentSession};
use serde::Serialize;

use crate::ai::{FragmentGenerator, FragmentRequest, GenerateError};

/// Prompt that stands for the configured default prompt.
pub const UPDATE_SHORTCUT: &str = "update";

/// One add-column invocation.
#[derive(Debug, Clone, Default)]
pub struct AddColumnRequest {
    pub prompt: String,
    /// Column header; derived from the prompt when absent
    pub column: Option<String>,
    /// Target query; configured query when absent
    pub query: Option<String>,
    /// Document path; configured document when absent
    pub document: Option<PathBuf>,
    /// Step expression to splice instead of asking the model
    pub fragment: Option<String>,
    /// Patch but do not save
    pub dry_run: bool,
}

/// Result of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AddColumnOutcome {
    Added {
        document: PathBuf,
        query: String,
        step: String,
        column: String,
        formula: String,
        saved: bool,
    },
    /// The step is already in place; nothing was written
    UpToDate {
        document: PathBuf,
        query: String,
        step: String,
    },
}

impl AddColumnOutcome {
    pub fn message(&self) -> String {
        match self {
            AddColumnOutcome::Added { step, column, saved, .. } => {
                let mut msg = format!("Column '{}' added as step #\"{}\".", column, step);
                if !saved {
                    msg.push_str(" (dry run, document not saved)");
                }
                msg
            }
            AddColumnOutcome::UpToDate { .. } => "No changes made. Formula is already up to date.".to_string(),
        }
    }
}

/// Queries of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryList {
    pub document: PathBuf,
    pub queries: Vec<String>,
}

impl QueryList {
    pub fn message(&self) -> String {
        if self.queries.is_empty() {
            format!("No queries found in {}", self.document.display())
        } else {
            format!("Available queries: {}", self.queries.join(", "))
        }
    }
}

/// Why an invocation failed. The document is unchanged in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    MissingDocumentPath,
    /// `update` was requested but no default prompt is configured
    MissingDefaultPrompt,
    EmptyPrompt,
    Document(DocumentError),
    Generate(GenerateError),
    Fragment(FragmentError),
    Patch(PatchError),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::MissingDocumentPath => write!(
                f,
                "No document configured. Set document.path in settings.json or PQSTEP_DOCUMENT_PATH"
            ),
            ToolError::MissingDefaultPrompt => write!(
                f,
                "No default prompt configured. Set prompt.default in settings.json or PQSTEP_DEFAULT_PROMPT"
            ),
            ToolError::EmptyPrompt => write!(f, "Prompt is empty"),
            ToolError::Document(e) => write!(f, "{}", e),
            ToolError::Generate(e) => write!(f, "{}", e),
            ToolError::Fragment(e) => write!(f, "{}", e),
            ToolError::Patch(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ToolError {}

impl From<DocumentError> for ToolError {
    fn from(e: DocumentError) -> Self {
        ToolError::Document(e)
    }
}

impl From<GenerateError> for ToolError {
    fn from(e: GenerateError) -> Self {
        ToolError::Generate(e)
    }
}

impl From<FragmentError> for ToolError {
    fn from(e: FragmentError) -> Self {
        ToolError::Fragment(e)
    }
}

impl From<PatchError> for ToolError {
    fn from(e: PatchError) -> Self {
        ToolError::Patch(e)
    }
}

/// The add-column tool with its collaborators.
pub struct ColumnTool<G> {
    settings: Settings,
    gateway: G,
    generator: Box<dyn FragmentGenerator>,
}

impl<G: DocumentGateway> ColumnTool<G> {
    pub fn new(settings: Settings, gateway: G, generator: Box<dyn FragmentGenerator>) -> Self {
        Self {
            settings,
            gateway,
            generator,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn document_path(&self, explicit: Option<&Path>) -> Result<PathBuf, ToolError> {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| self.settings.document_path.clone())
            .ok_or(ToolError::MissingDocumentPath)
    }

    /// The instruction to use, with the `update` shortcut expanded.
    fn resolve_prompt(&self, prompt: &str) -> Result<String, ToolError> {
        let prompt = prompt.trim();
        if prompt.eq_ignore_ascii_case(UPDATE_SHORTCUT) {
            return self
                .settings
                .default_prompt
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .ok_or(ToolError::MissingDefaultPrompt);
        }
        if prompt.is_empty() {
            return Err(ToolError::EmptyPrompt);
        }
        Ok(prompt.to_string())
    }

    pub fn add_column(&self, request: &AddColumnRequest) -> Result<AddColumnOutcome, ToolError> {
        let document = self.document_path(request.document.as_deref())?;
        let prompt = self.resolve_prompt(&request.prompt)?;
        let names = pqstep_engine::derive(&prompt, request.column.as_deref());
        let query = request
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| self.settings.effective_query())
            .to_string();

        let mut session = self.gateway.open(&document)?;
        let result = self.apply(&mut session, &document, &query, &prompt, &names, request);
        session.close();

        match &result {
            Ok(outcome) => log::info!("{}: {}", query, outcome.message()),
            Err(e) => log::warn!("{}: {}", query, e),
        }
        result
    }

    fn apply(
        &self,
        session: &mut G::Session,
        document: &Path,
        query: &str,
        prompt: &str,
        names: &pqstep_engine::DerivedNames,
        request: &AddColumnRequest,
    ) -> Result<AddColumnOutcome, ToolError> {
        let old_formula = session.formula(query)?;
        let previous_step =
            formula::render_reference(&formula::previous_step_excluding(&old_formula, names.step.label()));

        let raw = match &request.fragment {
            Some(fragment) => fragment.clone(),
            None => self.generator.generate(&FragmentRequest {
                instruction: prompt.to_string(),
                column: names.column.clone(),
                previous_step: previous_step.clone(),
            })?,
        };
        let fragment = normalize_fragment(&raw, &previous_step, &names.column)?;

        match patch(&old_formula, &names.step, &fragment)? {
            PatchOutcome::Success(new_formula) => {
                session.set_formula(query, &new_formula)?;
                if !request.dry_run {
                    session.save()?;
                }
                Ok(AddColumnOutcome::Added {
                    document: document.to_path_buf(),
                    query: query.to_string(),
                    step: names.step.label().to_string(),
                    column: names.column.clone(),
                    formula: new_formula,
                    saved: !request.dry_run,
                })
            }
            PatchOutcome::NoOp => Ok(AddColumnOutcome::UpToDate {
                document: document.to_path_buf(),
                query: query.to_string(),
                step: names.step.label().to_string(),
            }),
        }
    }

    pub fn list_queries(&self, document: Option<&Path>) -> Result<QueryList, ToolError> {
        let document = self.document_path(document)?;
        let session = self.gateway.open(&document)?;
        let queries = session.query_names();
        session.close();
        Ok(QueryList { document, queries })
    }
}
