use octocrab::Error as OctocrabError;

#[derive(Debug)]
pub enum GitHubError {
    ApiError(OctocrabError),
    NotFound {
        resource: String,
    },
    MergeRejected {
        pr_number: u64,
        message: String,
    },
    Timeout {
        operation: String,
        duration_ms: u64,
    },
    UnexpectedResponse(String),
}

impl GitHubError {
    /// HTTP status reported by the platform, when there was one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            GitHubError::ApiError(OctocrabError::GitHub { source, .. }) => {
                Some(source.status_code.as_u16())
            }
            GitHubError::NotFound { .. } => Some(404),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            GitHubError::Timeout { .. } => true,
            GitHubError::ApiError(OctocrabError::Http { .. }) => true,
            other => matches!(other.status_code(), Some(code) if code == 429 || code >= 500),
        }
    }
}

impl From<OctocrabError> for GitHubError {
    fn from(err: OctocrabError) -> Self {
        match &err {
            OctocrabError::GitHub { source, .. } if source.status_code.as_u16() == 404 => {
                GitHubError::NotFound {
                    resource: source.message.clone(),
                }
            }
            _ => GitHubError::ApiError(err),
        }
    }
}

impl std::fmt::Display for GitHubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitHubError::ApiError(octocrab_err) => {
                writeln!(f, "GitHub API Error")?;
                writeln!(f, "────────────────")?;

                match octocrab_err {
                    octocrab::Error::GitHub { source, .. } => {
                        writeln!(f, "🌐 HTTP {}: {}", source.status_code, source.message)?;
                        writeln!(f)?;

                        match source.status_code.as_u16() {
                            401 => {
                                writeln!(f, "🔧 AUTHENTICATION FAILED:")?;
                                writeln!(f, "   → The routed credential is invalid or expired")?;
                                write!(f, "   → Check it with: fleet-control tokens validate")
                            }
                            403 => {
                                writeln!(f, "🔧 PERMISSION DENIED:")?;
                                writeln!(f, "   → The credential lacks access to this repository")?;
                                writeln!(f, "   → Check the organization route in fleet-control.toml")?;
                                write!(f, "   → May need 'repo' scope: https://github.com/settings/tokens")
                            }
                            405 | 409 | 422 => {
                                writeln!(f, "🔧 REQUEST REJECTED:")?;
                                writeln!(f, "   → The pull request may not be mergeable yet")?;
                                write!(f, "   → Re-run triage to see the current blockers")
                            }
                            _ => {
                                writeln!(f, "🔧 TROUBLESHOOTING:")?;
                                writeln!(f, "   → Test connection: curl -I https://api.github.com")?;
                                write!(f, "   → Check rate limits: gh api rate_limit")
                            }
                        }
                    }
                    octocrab::Error::Http { .. } => {
                        writeln!(f, "🌐 Network connection failed to GitHub API")?;
                        writeln!(f)?;
                        writeln!(f, "🔧 TROUBLESHOOTING:")?;
                        writeln!(f, "   → Test HTTPS: curl -I https://api.github.com")?;
                        writeln!(f, "   → Check proxy settings (https_proxy)")?;
                        write!(f, "📊 GitHub status: https://status.github.com")
                    }
                    _ => {
                        write!(f, "🌐 {octocrab_err}")
                    }
                }
            }
            GitHubError::NotFound { resource } => {
                writeln!(f, "GitHub Resource Not Found")?;
                writeln!(f, "─────────────────────────")?;
                write!(f, "🔍 {resource}\n\n")?;
                writeln!(f, "🔧 QUICK FIXES:")?;
                writeln!(f, "   → Check the repository reference and PR number")?;
                write!(f, "   → Private repositories answer 404 to credentials without access")
            }
            GitHubError::MergeRejected { pr_number, message } => {
                writeln!(f, "Merge Rejected")?;
                writeln!(f, "──────────────")?;
                write!(f, "🔀 PR #{pr_number} was not merged: {message}\n\n")?;
                writeln!(f, "🔧 NEXT STEPS:")?;
                writeln!(f, "   → Run: fleet-control triage <repo> {pr_number}")?;
                write!(f, "   → Resolve the reported blockers before retrying")
            }
            GitHubError::Timeout {
                operation,
                duration_ms,
            } => {
                writeln!(f, "GitHub Operation Timeout")?;
                writeln!(f, "─────────────────────────")?;
                write!(f, "⏰ Operation '{operation}' timed out after {duration_ms}ms\n\n")?;
                writeln!(f, "🔧 RECOMMENDED ACTIONS:")?;
                writeln!(f, "   → Retry the operation")?;
                write!(f, "   → Check GitHub status: https://status.github.com")
            }
            GitHubError::UnexpectedResponse(msg) => {
                writeln!(f, "Unexpected GitHub Response")?;
                writeln!(f, "──────────────────────────")?;
                write!(f, "📄 {msg}")
            }
        }
    }
}

impl std::error::Error for GitHubError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GitHubError::ApiError(err) => Some(err),
            _ => None,
        }
    }
}
