//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 1       | Universal        | General error (unspecified)              |
//! | 2       | Universal        | CLI usage error (bad args, missing input)|
//! | 3-9     | patch            | Step insertion outcomes                  |
//! | 10-19   | ai               | Model provider/keychain codes            |
//! | 20-29   | document         | Document access codes                    |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into `tool_exit_code` or the relevant command

use pqstep_engine::{FragmentError, PatchError};
use pqstep_io::DocumentError;

use crate::ai::GenerateError;
use crate::tool::ToolError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing prompt or document path.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Patch (3-9)
// =============================================================================

/// The step is already in place; nothing was written.
pub const EXIT_PATCH_NO_OP: u8 = 3;

/// The formula has no `in` clause.
pub const EXIT_PATCH_MALFORMED: u8 = 4;

/// The step name is taken by a different expression.
pub const EXIT_PATCH_COLLISION: u8 = 5;

/// The fragment (given or generated) is empty after cleanup.
pub const EXIT_PATCH_EMPTY_FRAGMENT: u8 = 6;

// =============================================================================
// AI (10-19)
// =============================================================================

/// AI disabled (provider=none).
pub const EXIT_AI_DISABLED: u8 = 10;

/// AI provider configured but API key missing.
pub const EXIT_AI_MISSING_KEY: u8 = 11;

/// Keychain error (cannot read/write credentials).
pub const EXIT_AI_KEYCHAIN_ERR: u8 = 12;

/// The model request failed (network, HTTP status, unreadable reply).
pub const EXIT_AI_REQUEST_FAILED: u8 = 13;

// =============================================================================
// Document (20-29)
// =============================================================================

/// Document file does not exist.
pub const EXIT_DOC_NOT_FOUND: u8 = 20;

/// Document file is read-only.
pub const EXIT_DOC_READ_ONLY: u8 = 21;

/// Another session holds the document lock.
pub const EXIT_DOC_LOCKED: u8 = 22;

/// The requested query is not in the document.
pub const EXIT_DOC_QUERY_NOT_FOUND: u8 = 23;

/// The document could not be parsed.
pub const EXIT_DOC_PARSE: u8 = 24;

/// Reading or writing the document failed.
pub const EXIT_DOC_IO: u8 = 25;

/// Map a tool error to its exit code.
pub fn tool_exit_code(err: &ToolError) -> u8 {
    match err {
        ToolError::MissingDocumentPath | ToolError::MissingDefaultPrompt | ToolError::EmptyPrompt => EXIT_USAGE,
        ToolError::Document(e) => document_exit_code(e),
        ToolError::Generate(e) => generate_exit_code(e),
        ToolError::Fragment(FragmentError::Empty) => EXIT_PATCH_EMPTY_FRAGMENT,
        ToolError::Patch(e) => patch_exit_code(e),
    }
}

pub fn patch_exit_code(err: &PatchError) -> u8 {
    match err {
        PatchError::MalformedFormula => EXIT_PATCH_MALFORMED,
        PatchError::StepNameCollision(_) => EXIT_PATCH_COLLISION,
        PatchError::EmptyFragment => EXIT_PATCH_EMPTY_FRAGMENT,
    }
}

pub fn document_exit_code(err: &DocumentError) -> u8 {
    match err {
        DocumentError::NotFound(_) => EXIT_DOC_NOT_FOUND,
        DocumentError::ReadOnly(_) => EXIT_DOC_READ_ONLY,
        DocumentError::Locked { .. } => EXIT_DOC_LOCKED,
        DocumentError::QueryNotFound { .. } => EXIT_DOC_QUERY_NOT_FOUND,
        DocumentError::Parse(_) => EXIT_DOC_PARSE,
        DocumentError::Io(_) => EXIT_DOC_IO,
    }
}

pub fn generate_exit_code(err: &GenerateError) -> u8 {
    match err {
        GenerateError::NotConfigured(_) => EXIT_AI_DISABLED,
        GenerateError::MissingKey => EXIT_AI_MISSING_KEY,
        GenerateError::NetworkError(_)
        | GenerateError::ApiError { .. }
        | GenerateError::ParseError(_)
        | GenerateError::InvalidResponse(_)
        | GenerateError::EmptyResponse => EXIT_AI_REQUEST_FAILED,
    }
}
