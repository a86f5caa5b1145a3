//! RTE protocol errors
//!
//! SCOs only ever see numeric codes and strings. Each [`RteErrorKind`] maps to
//! the standard code of the session's SCORM version.

use crate::cmi::{DataModelError, ScormVersion};
use serde::Serialize;

/// Broad family an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    None,
    /// Call made in the wrong lifecycle state
    Sequencing,
    /// Bad parameter or arity
    Argument,
    /// Element access refused by the data model
    DataModel,
    /// Commit failures and anything unexpected
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RteErrorKind {
    NoError,
    GeneralException,
    GeneralArgument,
    AlreadyInitialized,
    ContentTerminated,
    TerminateBeforeInit,
    TerminateAfterTerminate,
    GetBeforeInit,
    GetAfterTerminate,
    SetBeforeInit,
    SetAfterTerminate,
    CommitBeforeInit,
    CommitAfterTerminate,
    GeneralGetFailure,
    GeneralSetFailure,
    GeneralCommitFailure,
    UndefinedElement,
    NoChildren,
    NotAnArray,
    NotInitialized,
    ReadOnly,
    WriteOnly,
    Keyword,
    TypeMismatch,
    OutOfRange,
    DependencyNotEstablished,
}

impl RteErrorKind {
    pub fn category(&self) -> ErrorCategory {
        use RteErrorKind::*;
        match self {
            NoError => ErrorCategory::None,
            AlreadyInitialized | ContentTerminated | TerminateBeforeInit
            | TerminateAfterTerminate | GetBeforeInit | GetAfterTerminate | SetBeforeInit
            | SetAfterTerminate | CommitBeforeInit | CommitAfterTerminate => {
                ErrorCategory::Sequencing
            }
            GeneralArgument => ErrorCategory::Argument,
            GeneralGetFailure | GeneralSetFailure | UndefinedElement | NoChildren | NotAnArray
            | NotInitialized | ReadOnly | WriteOnly | Keyword | TypeMismatch | OutOfRange
            | DependencyNotEstablished => ErrorCategory::DataModel,
            GeneralException | GeneralCommitFailure => ErrorCategory::General,
        }
    }

    /// Standard numeric code for `version`
    pub fn code(&self, version: ScormVersion) -> u16 {
        use RteErrorKind::*;
        match version {
            ScormVersion::Scorm2004 => match self {
                NoError => 0,
                GeneralException => 101,
                AlreadyInitialized => 103,
                ContentTerminated => 104,
                TerminateBeforeInit => 112,
                TerminateAfterTerminate => 113,
                GetBeforeInit => 122,
                GetAfterTerminate => 123,
                SetBeforeInit => 132,
                SetAfterTerminate => 133,
                CommitBeforeInit => 142,
                CommitAfterTerminate => 143,
                GeneralArgument => 201,
                GeneralGetFailure | NoChildren | NotAnArray => 301,
                GeneralSetFailure => 351,
                GeneralCommitFailure => 391,
                UndefinedElement => 401,
                NotInitialized => 403,
                ReadOnly | Keyword => 404,
                WriteOnly => 405,
                TypeMismatch => 406,
                OutOfRange => 407,
                DependencyNotEstablished => 408,
            },
            ScormVersion::Scorm12 => match self {
                NoError => 0,
                GeneralException | AlreadyInitialized | ContentTerminated
                | TerminateAfterTerminate | GetAfterTerminate | SetAfterTerminate
                | CommitAfterTerminate | GeneralCommitFailure => 101,
                GeneralArgument | GeneralGetFailure | GeneralSetFailure | UndefinedElement
                | DependencyNotEstablished => 201,
                NoChildren => 202,
                NotAnArray => 203,
                TerminateBeforeInit | GetBeforeInit | SetBeforeInit | CommitBeforeInit => 301,
                // 1.2 has no "not initialized" value state; unset elements read as ""
                NotInitialized => 101,
                Keyword => 402,
                ReadOnly => 403,
                WriteOnly => 404,
                TypeMismatch | OutOfRange => 405,
            },
        }
    }
}

/// Last error recorded by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RteError {
    pub kind: RteErrorKind,
    pub diagnostic: String,
}

impl RteError {
    pub fn none() -> Self {
        Self { kind: RteErrorKind::NoError, diagnostic: String::new() }
    }

    pub fn new(kind: RteErrorKind, diagnostic: impl Into<String>) -> Self {
        Self { kind, diagnostic: diagnostic.into() }
    }

    pub fn is_error(&self) -> bool {
        self.kind != RteErrorKind::NoError
    }

    pub fn code(&self, version: ScormVersion) -> u16 {
        self.kind.code(version)
    }

    /// Map a data model refusal to the RTE error a SetValue/GetValue reports
    pub fn from_data_model(err: &DataModelError, on_set: bool) -> Self {
        let kind = match err {
            DataModelError::Undefined(_) => RteErrorKind::UndefinedElement,
            DataModelError::ReadOnly(_) => RteErrorKind::ReadOnly,
            DataModelError::WriteOnly(_) => RteErrorKind::WriteOnly,
            DataModelError::Keyword(_) => RteErrorKind::Keyword,
            DataModelError::NotInitialized(_) => RteErrorKind::NotInitialized,
            DataModelError::IndexOutOfRange { .. } if on_set => RteErrorKind::GeneralSetFailure,
            DataModelError::IndexOutOfRange { .. } => RteErrorKind::GeneralGetFailure,
            DataModelError::TypeMismatch { .. } => RteErrorKind::TypeMismatch,
            DataModelError::OutOfRange { .. } => RteErrorKind::OutOfRange,
            DataModelError::DependencyNotEstablished { .. } => {
                RteErrorKind::DependencyNotEstablished
            }
            DataModelError::DuplicateIdentifier { .. } => RteErrorKind::GeneralSetFailure,
            DataModelError::NoChildren(_) => RteErrorKind::NoChildren,
            DataModelError::NotAnArray(_) => RteErrorKind::NotAnArray,
        };
        Self::new(kind, err.to_string())
    }
}

/// Standard description for a numeric code, `""` for unknown codes
pub fn error_string(version: ScormVersion, code: u16) -> &'static str {
    match version {
        ScormVersion::Scorm12 => match code {
            0 => "No error",
            101 => "General exception",
            201 => "Invalid argument error",
            202 => "Element cannot have children",
            203 => "Element not an array - cannot have count",
            301 => "Not initialized",
            401 => "Not implemented error",
            402 => "Invalid set value, element is a keyword",
            403 => "Element is read only",
            404 => "Element is write only",
            405 => "Incorrect data type",
            _ => "",
        },
        ScormVersion::Scorm2004 => match code {
            0 => "No Error",
            101 => "General Exception",
            102 => "General Initialization Failure",
            103 => "Already Initialized",
            104 => "Content Instance Terminated",
            111 => "General Termination Failure",
            112 => "Termination Before Initialization",
            113 => "Termination After Termination",
            122 => "Retrieve Data Before Initialization",
            123 => "Retrieve Data After Termination",
            132 => "Store Data Before Initialization",
            133 => "Store Data After Termination",
            142 => "Commit Before Initialization",
            143 => "Commit After Termination",
            201 => "General Argument Error",
            301 => "General Get Failure",
            351 => "General Set Failure",
            391 => "General Commit Failure",
            401 => "Undefined Data Model Element",
            402 => "Unimplemented Data Model Element",
            403 => "Data Model Element Value Not Initialized",
            404 => "Data Model Element Is Read Only",
            405 => "Data Model Element Is Write Only",
            406 => "Data Model Element Type Mismatch",
            407 => "Data Model Element Value Out Of Range",
            408 => "Data Model Dependency Not Established",
            _ => "",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_per_version() {
        assert_eq!(RteErrorKind::GeneralCommitFailure.code(ScormVersion::Scorm2004), 391);
        assert_eq!(RteErrorKind::GeneralCommitFailure.code(ScormVersion::Scorm12), 101);
        assert_eq!(RteErrorKind::ReadOnly.code(ScormVersion::Scorm2004), 404);
        assert_eq!(RteErrorKind::ReadOnly.code(ScormVersion::Scorm12), 403);
        assert_eq!(RteErrorKind::GetBeforeInit.code(ScormVersion::Scorm12), 301);
        assert_eq!(RteErrorKind::GetBeforeInit.code(ScormVersion::Scorm2004), 122);
    }

    #[test]
    fn test_every_code_has_a_description() {
        use RteErrorKind::*;
        let kinds = [
            NoError, GeneralException, GeneralArgument, AlreadyInitialized, ContentTerminated,
            TerminateBeforeInit, TerminateAfterTerminate, GetBeforeInit, GetAfterTerminate,
            SetBeforeInit, SetAfterTerminate, CommitBeforeInit, CommitAfterTerminate,
            GeneralGetFailure, GeneralSetFailure, GeneralCommitFailure, UndefinedElement,
            NoChildren, NotAnArray, NotInitialized, ReadOnly, WriteOnly, Keyword, TypeMismatch,
            OutOfRange, DependencyNotEstablished,
        ];
        for version in [ScormVersion::Scorm12, ScormVersion::Scorm2004] {
            for kind in kinds {
                assert!(!error_string(version, kind.code(version)).is_empty(), "{:?}", kind);
            }
        }
        assert_eq!(error_string(ScormVersion::Scorm2004, 999), "");
    }

    #[test]
    fn test_categories() {
        assert_eq!(RteErrorKind::SetAfterTerminate.category(), ErrorCategory::Sequencing);
        assert_eq!(RteErrorKind::TypeMismatch.category(), ErrorCategory::DataModel);
        assert_eq!(RteErrorKind::GeneralCommitFailure.category(), ErrorCategory::General);
    }
}
