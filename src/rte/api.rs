//! Name-based dispatch for the RTE API
//!
//! Hosts that bridge a browser `window.API` / `window.API_1484_11` object
//! forward calls as a method name plus string arguments.

use super::errors::{RteError, RteErrorKind};
use super::session::RteSession;
use crate::cmi::ScormVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMethod {
    Initialize,
    Terminate,
    GetValue,
    SetValue,
    Commit,
    GetLastError,
    GetErrorString,
    GetDiagnostic,
}

impl ApiMethod {
    pub const ALL: [ApiMethod; 8] = [
        ApiMethod::Initialize,
        ApiMethod::Terminate,
        ApiMethod::GetValue,
        ApiMethod::SetValue,
        ApiMethod::Commit,
        ApiMethod::GetLastError,
        ApiMethod::GetErrorString,
        ApiMethod::GetDiagnostic,
    ];

    /// Name the SCO calls for this method
    pub fn name(&self, version: ScormVersion) -> &'static str {
        match version {
            ScormVersion::Scorm12 => match self {
                ApiMethod::Initialize => "LMSInitialize",
                ApiMethod::Terminate => "LMSFinish",
                ApiMethod::GetValue => "LMSGetValue",
                ApiMethod::SetValue => "LMSSetValue",
                ApiMethod::Commit => "LMSCommit",
                ApiMethod::GetLastError => "LMSGetLastError",
                ApiMethod::GetErrorString => "LMSGetErrorString",
                ApiMethod::GetDiagnostic => "LMSGetDiagnostic",
            },
            ScormVersion::Scorm2004 => match self {
                ApiMethod::Initialize => "Initialize",
                ApiMethod::Terminate => "Terminate",
                ApiMethod::GetValue => "GetValue",
                ApiMethod::SetValue => "SetValue",
                ApiMethod::Commit => "Commit",
                ApiMethod::GetLastError => "GetLastError",
                ApiMethod::GetErrorString => "GetErrorString",
                ApiMethod::GetDiagnostic => "GetDiagnostic",
            },
        }
    }

    pub fn from_name(version: ScormVersion, name: &str) -> Option<ApiMethod> {
        ApiMethod::ALL.into_iter().find(|m| m.name(version) == name)
    }

    /// Number of string arguments the method takes
    pub fn arity(&self) -> usize {
        match self {
            ApiMethod::GetLastError => 0,
            ApiMethod::SetValue => 2,
            _ => 1,
        }
    }

    /// Value returned when the call fails before reaching the session
    fn failure_result(&self) -> &'static str {
        match self {
            ApiMethod::Initialize | ApiMethod::Terminate | ApiMethod::SetValue | ApiMethod::Commit => {
                "false"
            }
            _ => "",
        }
    }
}

/// API names for a version, in the order hosts usually expose them
pub fn method_names(version: ScormVersion) -> Vec<&'static str> {
    ApiMethod::ALL.iter().map(|m| m.name(version)).collect()
}

impl RteSession {
    /// Dispatch a call by its version-specific name
    ///
    /// Unknown names return `""` with a general exception. A wrong argument
    /// count sets a general argument error.
    pub fn invoke<S: AsRef<str>>(&mut self, name: &str, args: &[S]) -> String {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();

        let method = match ApiMethod::from_name(self.version(), name) {
            Some(method) => method,
            None => {
                self.fail(
                    None,
                    name,
                    &args,
                    RteError::new(
                        RteErrorKind::GeneralException,
                        format!("unknown SCORM {} API method '{}'", self.version(), name),
                    ),
                );
                return String::new();
            }
        };

        if args.len() != method.arity() {
            self.fail(
                Some(method),
                name,
                &args,
                RteError::new(
                    RteErrorKind::GeneralArgument,
                    format!("{} takes {} argument(s), got {}", name, method.arity(), args.len()),
                ),
            );
            return method.failure_result().to_string();
        }

        match method {
            ApiMethod::Initialize => self.initialize(args[0]),
            ApiMethod::Terminate => self.terminate(args[0]),
            ApiMethod::GetValue => self.get_value(args[0]),
            ApiMethod::SetValue => self.set_value(args[0], args[1]),
            ApiMethod::Commit => self.commit(args[0]),
            ApiMethod::GetLastError => self.get_last_error(),
            ApiMethod::GetErrorString => self.get_error_string(args[0]),
            ApiMethod::GetDiagnostic => self.get_diagnostic(args[0]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for version in [ScormVersion::Scorm12, ScormVersion::Scorm2004] {
            for method in ApiMethod::ALL {
                assert_eq!(ApiMethod::from_name(version, method.name(version)), Some(method));
            }
        }
        assert_eq!(ApiMethod::from_name(ScormVersion::Scorm12, "Initialize"), None);
        assert_eq!(ApiMethod::from_name(ScormVersion::Scorm2004, "LMSFinish"), None);
    }

    #[test]
    fn test_arity() {
        assert_eq!(ApiMethod::SetValue.arity(), 2);
        assert_eq!(ApiMethod::GetLastError.arity(), 0);
        assert_eq!(ApiMethod::Commit.arity(), 1);
    }
}
