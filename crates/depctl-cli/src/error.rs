/// Distinguishes the exit-code-3 and exit-code-2 cases from every other
/// command failure, which exits 1. Malformed arguments never reach here —
/// `clap` exits 2 on its own before any command body runs.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("not logged in — run `depctl login <token>` first")]
    Unauthenticated,

    #[error("{0}")]
    Usage(String),
}
