pub mod server;

/// What the binary runs after argument parsing.
#[derive(Debug)]
pub enum Action {
    /// Serve `/authorize` and `/health`.
    Server(server::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        match self {
            Self::Server(args) => server::execute(args).await,
        }
    }
}
